//! Outbound chat transport.
//!
//! Handlers talk to this trait instead of `teloxide::Bot` so the dialogue
//! logic can be driven without a network connection.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::InputFile;

use super::menu::Menu;
use super::ui_builder::create_menu_keyboard;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send text, with the menu rendered as an inline keyboard when given
    async fn send_message(&self, chat_id: i64, text: &str, menu: Option<&Menu>) -> Result<()>;

    async fn send_photo(&self, chat_id: i64, path: &Path) -> Result<()>;

    async fn send_document(&self, chat_id: i64, path: &Path) -> Result<()>;
}

/// Telegram Bot API transport
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_message(&self, chat_id: i64, text: &str, menu: Option<&Menu>) -> Result<()> {
        let request = self.bot.send_message(ChatId(chat_id), text);
        let sent = match menu {
            Some(menu) => request.reply_markup(create_menu_keyboard(menu)).await,
            None => request.await,
        };
        sent.with_context(|| format!("sending message to chat {}", chat_id))?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, path: &Path) -> Result<()> {
        self.bot
            .send_photo(ChatId(chat_id), InputFile::file(path))
            .await
            .with_context(|| format!("sending photo {} to chat {}", path.display(), chat_id))?;
        Ok(())
    }

    async fn send_document(&self, chat_id: i64, path: &Path) -> Result<()> {
        self.bot
            .send_document(ChatId(chat_id), InputFile::file(path))
            .await
            .with_context(|| format!("sending document {} to chat {}", path.display(), chat_id))?;
        Ok(())
    }
}
