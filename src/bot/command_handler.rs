//! Command Handler module for visitor and operator slash commands

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::attribution::parse_activation;
use crate::dispatcher::DocumentDispatcher;
use crate::funnel::{FunnelEvent, Visitor};
use crate::ledger::Trigger;
use crate::localization::{t_args_lang, t_lang};

use super::ui_builder::{catalog_keyboard, format_counts, format_report};
use super::BotContext;

/// Slash commands the bot understands
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `/start` with its optional payload
    Start(Option<String>),
    Guides,
    WhoAmI,
    Report,
    Health,
    Stats,
    PingDoc,
    /// Write a diagnostic row to prove the store accepts writes
    StoreTest,
    Unknown(String),
}

impl Command {
    /// Whether only the operator may run the command
    pub fn is_operator_only(&self) -> bool {
        matches!(
            self,
            Command::Report
                | Command::Health
                | Command::Stats
                | Command::PingDoc
                | Command::StoreTest
        )
    }
}

/// Parse a slash command, accepting the `/command@bot_username` form
pub fn parse_command(text: &str, bot_username: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };

    let name = match head.split_once('@') {
        Some((name, target)) if target.eq_ignore_ascii_case(bot_username) => name,
        Some(_) => return Some(Command::Unknown(head.to_string())),
        None => head,
    };

    let command = match name.to_lowercase().as_str() {
        "start" => Command::Start(Some(args.to_string()).filter(|args| !args.is_empty())),
        "guides" => Command::Guides,
        "whoami" => Command::WhoAmI,
        "report" => Command::Report,
        "health" => Command::Health,
        "stats" => Command::Stats,
        "pingdoc" => Command::PingDoc,
        "storetest" => Command::StoreTest,
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}

pub async fn handle_command(ctx: &BotContext, visitor: &Visitor, command: Command) -> Result<()> {
    let lang = ctx.language();
    info!(user_id = %visitor.id, command = ?command, "Received command");

    if command.is_operator_only() && !ctx.config.is_admin(visitor.id) {
        warn!(user_id = %visitor.id, command = ?command, "Operator command refused");
        ctx.messenger
            .send_text(visitor.id, &t_lang("command-unavailable", lang), None)
            .await?;
        return Ok(());
    }

    match command {
        Command::Start(payload) => handle_start(ctx, visitor, payload).await,
        Command::Guides => handle_guides(ctx, visitor).await,
        Command::WhoAmI => {
            ctx.messenger
                .send_text(
                    visitor.id,
                    &t_args_lang("whoami", &[("id", &visitor.id.to_string())], lang),
                    None,
                )
                .await?;
            Ok(())
        }
        Command::Report => handle_report(ctx, visitor).await,
        Command::Stats => handle_stats(ctx, visitor).await,
        Command::Health => handle_health(ctx, visitor).await,
        Command::PingDoc => handle_pingdoc(ctx, visitor).await,
        Command::StoreTest => handle_store_test(ctx, visitor).await,
        Command::Unknown(_) => {
            ctx.funnel.welcome(visitor.id).await;
            Ok(())
        }
    }
}

async fn handle_start(ctx: &BotContext, visitor: &Visitor, payload: Option<String>) -> Result<()> {
    let activation = payload
        .as_deref()
        .and_then(|payload| parse_activation(payload, &ctx.config.keywords));

    match activation {
        Some(activation) => {
            ctx.step(
                visitor,
                FunnelEvent::Activate {
                    trigger: Trigger::DeepLink,
                    payload: Some(activation.raw),
                    document: None,
                },
            )
            .await;
        }
        None => ctx.funnel.welcome(visitor.id).await,
    }
    Ok(())
}

async fn handle_guides(ctx: &BotContext, visitor: &Visitor) -> Result<()> {
    let lang = ctx.language();
    match ctx.ledger.active_catalog().await {
        Ok(entries) if entries.is_empty() => {
            ctx.messenger
                .send_text(visitor.id, &t_lang("catalog-empty", lang), None)
                .await?;
        }
        Ok(entries) => {
            ctx.messenger
                .send_text(
                    visitor.id,
                    &t_lang("catalog-title", lang),
                    Some(catalog_keyboard(&entries)),
                )
                .await?;
        }
        Err(e) => {
            error!(user_id = %visitor.id, error = %e, "Failed to load catalog");
            ctx.messenger
                .send_text(visitor.id, &t_lang("catalog-unavailable", lang), None)
                .await?;
        }
    }
    Ok(())
}

async fn handle_report(ctx: &BotContext, visitor: &Visitor) -> Result<()> {
    let lang = ctx.language();
    match ctx.aggregator.run().await {
        Ok(report) => {
            if ctx.config.alerts.chat_id != Some(visitor.id) {
                ctx.messenger
                    .send_text(visitor.id, &format_report(&report, lang), None)
                    .await?;
            }
        }
        Err(e) => {
            error!(user_id = %visitor.id, error = %e, "On-demand report failed");
            ctx.messenger
                .send_text(
                    visitor.id,
                    &t_args_lang("report-failed", &[("error", &e.to_string())], lang),
                    None,
                )
                .await?;
        }
    }
    Ok(())
}

async fn handle_stats(ctx: &BotContext, visitor: &Visitor) -> Result<()> {
    let lang = ctx.language();
    let date = ctx.ledger.today().format("%d.%m.%Y").to_string();
    let text = match ctx.ledger.count_today().await {
        Ok(counts) => format!(
            "{}\n\n{}",
            t_args_lang("stats-title", &[("date", &date)], lang),
            format_counts(&counts, lang)
        ),
        Err(e) => t_args_lang("report-failed", &[("error", &e.to_string())], lang),
    };
    ctx.messenger.send_text(visitor.id, &text, None).await?;
    Ok(())
}

fn status<T, E: std::fmt::Display>(result: &Result<T, E>) -> String {
    match result {
        Ok(_) => "ok".to_string(),
        Err(e) => e.to_string(),
    }
}

async fn handle_health(ctx: &BotContext, visitor: &Visitor) -> Result<()> {
    let lang = ctx.language();
    let transport = ctx.messenger.whoami().await;
    let channel = ctx.messenger.member_count(&ctx.config.channel_id).await;
    let store = ctx.ledger.ping().await;

    let transport_status = match &transport {
        Ok(name) => format!("ok (@{name})"),
        Err(e) => e.to_string(),
    };
    let channel_status = match &channel {
        Ok(count) => format!("ok ({count})"),
        Err(e) => e.to_string(),
    };

    let text = [
        t_lang("health-title", lang),
        t_args_lang("health-transport", &[("status", &transport_status)], lang),
        t_args_lang(
            "health-channel",
            &[("channel", &ctx.config.channel_id), ("status", &channel_status)],
            lang,
        ),
        t_args_lang(
            "health-store",
            &[("backend", ctx.ledger.backend()), ("status", &status(&store))],
            lang,
        ),
    ]
    .join("\n");

    ctx.messenger.send_text(visitor.id, &text, None).await?;
    Ok(())
}

async fn handle_store_test(ctx: &BotContext, visitor: &Visitor) -> Result<()> {
    let lang = ctx.language();
    let note = format!("write check by {} at {}", visitor.id, Utc::now().to_rfc3339());

    let text = match ctx.ledger.write_check(&note).await {
        Ok(()) => {
            info!(user_id = %visitor.id, backend = ctx.ledger.backend(), "Store write check passed");
            t_args_lang("storetest-ok", &[("backend", ctx.ledger.backend())], lang)
        }
        Err(e) => {
            error!(user_id = %visitor.id, error = %e, "Store write check failed");
            t_args_lang(
                "storetest-failed",
                &[("backend", ctx.ledger.backend()), ("error", &e.to_string())],
                lang,
            )
        }
    };
    ctx.messenger.send_text(visitor.id, &text, None).await?;
    Ok(())
}

async fn handle_pingdoc(ctx: &BotContext, visitor: &Visitor) -> Result<()> {
    let lang = ctx.language();
    let document = &ctx.funnel.settings().default_document;

    let (exists, size) = match &document.path {
        Some(path) => match tokio::fs::metadata(path).await {
            Ok(meta) => ("yes", meta.len()),
            Err(_) => ("no", 0),
        },
        None => ("-", 0),
    };
    let path = document
        .path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "-".to_string());

    let info = t_args_lang(
        "pingdoc-info",
        &[
            ("name", &document.name),
            ("file_id", document.file_ref.as_deref().unwrap_or("-")),
            ("path", &path),
            ("exists", exists),
            ("size", &size.to_string()),
        ],
        lang,
    );
    ctx.messenger.send_text(visitor.id, &info, None).await?;

    let outcome = DocumentDispatcher::new(ctx.messenger.clone())
        .send(visitor.id, document, &document.name)
        .await;
    let text = match outcome {
        Ok(delivery) => {
            info!(user_id = %visitor.id, delivery = ?delivery, "Document smoke test passed");
            t_lang("pingdoc-ok", lang)
        }
        Err(e) => t_args_lang("pingdoc-failed", &[("error", &e.to_string())], lang),
    };
    ctx.messenger.send_text(visitor.id, &text, None).await?;
    Ok(())
}
