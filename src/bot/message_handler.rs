//! Message Handler module for processing incoming Telegram messages

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::debug;

use crate::funnel::FunnelEvent;

use super::command_handler::{handle_command, parse_command};
use super::{visitor_from_user, BotContext};

pub async fn message_handler(msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    if !msg.chat.is_private() {
        debug!(chat_id = %msg.chat.id, "Ignoring message outside a private chat");
        return Ok(());
    }
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let visitor = visitor_from_user(user);

    match msg.text() {
        Some(text) => {
            debug!(user_id = %visitor.id, message_length = text.len(), "Received text message from user");
            match parse_command(text, &ctx.config.bot_username) {
                Some(command) => handle_command(&ctx, &visitor, command).await?,
                None => {
                    ctx.step(&visitor, FunnelEvent::Text(text.to_string()))
                        .await;
                }
            }
        }
        None => {
            debug!(user_id = %visitor.id, "Received non-text message from user");
            ctx.funnel.welcome(visitor.id).await;
        }
    }

    Ok(())
}
