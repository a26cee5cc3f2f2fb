//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `message_handler`: Handles incoming messages and routes commands
//! - `command_handler`: Visitor and operator commands
//! - `callback_handler`: Handles inline keyboard callback queries
//! - `ui_builder`: Creates keyboards and formats messages

pub mod callback_handler;
pub mod command_handler;
pub mod message_handler;
pub mod ui_builder;

use std::sync::Arc;

use teloxide::types::User;
use tracing::debug;

use crate::aggregator::DailyAggregator;
use crate::alerting::OperatorAlerts;
use crate::config::BotConfig;
use crate::dialogue::{FunnelSession, SessionStore};
use crate::funnel::{Funnel, FunnelEvent, FunnelSettings, Visitor};
use crate::ledger::Ledger;
use crate::transport::Messenger;

// Re-export main handler functions for use in main.rs
pub use callback_handler::callback_handler;
pub use message_handler::message_handler;

/// Shared state injected into every handler
pub struct BotContext {
    pub config: BotConfig,
    pub messenger: Arc<dyn Messenger>,
    pub ledger: Ledger,
    pub sessions: SessionStore,
    pub funnel: Funnel,
    pub aggregator: DailyAggregator,
}

impl BotContext {
    pub fn new(config: BotConfig, messenger: Arc<dyn Messenger>, ledger: Ledger) -> Self {
        let alerts = Arc::new(OperatorAlerts::new(messenger.clone(), &config.alerts));
        let funnel = Funnel::new(
            messenger.clone(),
            ledger.clone(),
            alerts,
            config.channel_id.clone(),
            FunnelSettings::from_config(&config),
        );
        let aggregator = DailyAggregator::new(
            ledger.clone(),
            messenger.clone(),
            config.channel_id.clone(),
            config.alerts.chat_id,
            config.default_language.clone(),
        );

        Self {
            sessions: SessionStore::new(config.session_ttl),
            config,
            messenger,
            ledger,
            funnel,
            aggregator,
        }
    }

    pub fn language(&self) -> Option<&str> {
        Some(self.config.default_language.as_str())
    }

    /// Run one funnel event against the visitor's stored session
    pub async fn step(&self, visitor: &Visitor, event: FunnelEvent) -> FunnelSession {
        let session = self.sessions.load(visitor.id).await;
        let session = self.funnel.handle(visitor, session, event).await;
        debug!(user_id = %visitor.id, stage = ?session.stage, "Session stored");
        self.sessions.save(visitor.id, session.clone()).await;
        session
    }
}

/// Visitor profile of a Telegram user
pub fn visitor_from_user(user: &User) -> Visitor {
    Visitor {
        id: user.id.0 as i64,
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()),
        last_name: user.last_name.clone(),
    }
}
