//! Callback Handler module for processing inline keyboard callback queries

use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use tracing::{debug, warn};

use crate::localization::t;

use super::action::Callback;
use super::context::{Actor, AppContext};
use super::dialogue_manager::{handle_action, handle_pin_digit};

/// Dispatcher endpoint for inline keyboard presses
pub async fn callback_handler(bot: Bot, q: CallbackQuery, ctx: Arc<AppContext>) -> Result<()> {
    debug!(user_id = %q.from.id, "Received callback query from user");

    // Answer first to remove the loading state on the button
    bot.answer_callback_query(q.id.clone()).await?;

    // Reply where the keyboard was shown; the presser's private chat otherwise
    let chat_id = q
        .message
        .as_ref()
        .map(|msg| msg.chat().id)
        .unwrap_or_else(|| ChatId::from(q.from.id));
    let Some(actor) = Actor::from_user(chat_id.0, &q.from) else {
        bot.send_message(chat_id, t("no-username")).await?;
        return Ok(());
    };
    let data = q.data.as_deref().unwrap_or("");
    handle_callback_data(&ctx, &actor, data).await
}

/// Route decoded button data to the PIN keypad or the gated actions
pub async fn handle_callback_data(ctx: &AppContext, actor: &Actor, data: &str) -> Result<()> {
    let Some(callback) = Callback::parse(data) else {
        warn!(user = %actor.username, data, "Unknown callback data");
        return Ok(());
    };
    let request = callback.to_string();
    debug!(user = %actor.username, "{request}");

    match callback {
        Callback::PinDigit(digit) => handle_pin_digit(ctx, actor, digit).await,
        other => match other.into_action() {
            Some(action) => handle_action(ctx, actor, action, &request).await,
            None => Ok(()),
        },
    }
}
