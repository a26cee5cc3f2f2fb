//! Callback Handler module for processing inline keyboard callback queries

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, error, warn};

// Import localization
use crate::localization::t_lang;

use crate::dispatcher::GuideDocument;
use crate::funnel::{FunnelEvent, Visitor};
use crate::ledger::Trigger;

use super::ui_builder::{CATALOG_PICK_PREFIX, CHECK_SUBSCRIPTION, SKIP_EMAIL, SKIP_NAME};
use super::{visitor_from_user, BotContext};

/// Handle callback queries from inline keyboards
pub async fn callback_handler(
    bot: Bot,
    q: teloxide::types::CallbackQuery,
    ctx: Arc<BotContext>,
) -> Result<()> {
    debug!(user_id = %q.from.id, data = ?q.data, "Received callback query from user");

    // Answer the callback query to remove the loading state; a stale or
    // failed acknowledgement must not swallow the press
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!(user_id = %q.from.id, error = %e, "Failed to answer callback query");
    }

    let visitor = visitor_from_user(&q.from);
    route_callback(&ctx, &visitor, q.data.as_deref().unwrap_or("")).await
}

/// Route the data of one inline button press to the funnel
pub async fn route_callback(ctx: &BotContext, visitor: &Visitor, data: &str) -> Result<()> {
    match data {
        CHECK_SUBSCRIPTION => {
            ctx.step(
                visitor,
                FunnelEvent::Activate {
                    trigger: Trigger::ButtonRecheck,
                    payload: None,
                    document: None,
                },
            )
            .await;
        }
        SKIP_NAME => {
            ctx.step(visitor, FunnelEvent::SkipName).await;
        }
        SKIP_EMAIL => {
            ctx.step(visitor, FunnelEvent::SkipEmail).await;
        }
        other => match other
            .strip_prefix(CATALOG_PICK_PREFIX)
            .and_then(|index| index.parse::<usize>().ok())
        {
            Some(index) => handle_catalog_pick(ctx, visitor, index).await?,
            None => debug!(user_id = %visitor.id, data = other, "Ignoring unknown callback"),
        },
    }

    Ok(())
}

async fn handle_catalog_pick(ctx: &BotContext, visitor: &Visitor, index: usize) -> Result<()> {
    let entries = match ctx.ledger.active_catalog().await {
        Ok(entries) => entries,
        Err(e) => {
            error!(user_id = %visitor.id, error = %e, "Failed to load catalog");
            ctx.messenger
                .send_text(visitor.id, &t_lang("catalog-unavailable", ctx.language()), None)
                .await?;
            return Ok(());
        }
    };

    match entries.get(index) {
        Some(entry) => {
            ctx.step(
                visitor,
                FunnelEvent::Activate {
                    trigger: Trigger::CatalogPick,
                    payload: None,
                    document: Some(GuideDocument::from(entry)),
                },
            )
            .await;
        }
        None => {
            ctx.messenger
                .send_text(visitor.id, &t_lang("catalog-stale", ctx.language()), None)
                .await?;
        }
    }
    Ok(())
}
