//! # Guide Funnel Bot
//!
//! A Telegram bot that gates a downloadable guide behind a channel
//! subscription, collects the visitor's name and e-mail, records every
//! interaction as a lead and sends the operator a daily report.

pub mod aggregator;
pub mod alerting;
pub mod attribution;
pub mod bot;
pub mod config;
pub mod dialogue;
pub mod dispatcher;
pub mod errors;
pub mod funnel;
pub mod ledger;
pub mod localization;
pub mod oracle;
pub mod scheduler;
pub mod transport;
