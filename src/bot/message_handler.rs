//! Message Handler module for processing incoming Telegram messages

use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::debug;

use crate::localization::t;

use super::action::{Action, Command};
use super::context::{Actor, AppContext};
use super::dialogue_manager::handle_action;

/// Dispatcher endpoint for text messages
pub async fn message_handler(bot: Bot, msg: Message, ctx: Arc<AppContext>) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        debug!(user_id = %user.id, "Ignoring non-text message");
        return Ok(());
    };

    match Actor::from_user(msg.chat.id.0, user) {
        Some(actor) => handle_text(&ctx, &actor, text).await,
        None => {
            debug!(user_id = %user.id, "Message from a user without username");
            bot.send_message(msg.chat.id, t("no-username")).await?;
            Ok(())
        }
    }
}

/// Interpret one text message from a known actor
pub async fn handle_text(ctx: &AppContext, actor: &Actor, text: &str) -> Result<()> {
    match Command::parse(text, &ctx.bot_username) {
        Ok(command) => {
            debug!(user = %actor.username, command = ?command, "Command received");
            handle_action(ctx, actor, Action::from(command), text.trim()).await
        }
        Err(_) => {
            debug!(user = %actor.username, "Unrecognised text");
            ctx.transport
                .send_message(actor.chat_id, &t("unknown-command"), None)
                .await
        }
    }
}
