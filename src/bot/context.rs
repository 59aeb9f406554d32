//! Shared state handed to every handler through the dispatcher dependencies

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::types::User;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info};

use crate::access::AccessGate;
use crate::config::BotConfig;
use crate::credentials::CredentialStore;
use crate::dashboard::{Dashboard, RunRecord};
use crate::errors::ConfigError;
use crate::localization::t;
use crate::session::SessionTable;
use crate::ticker::TickerRegistry;

/// The Telegram user behind an update
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    /// Telegram user id; sessions are keyed on it
    pub user_id: u64,
    /// Chat the update came from, where replies go
    pub chat_id: i64,
    /// Telegram username without the leading `@`
    pub username: String,
    pub first_name: String,
}

impl Actor {
    /// `None` when the user has no username; membership is keyed on it
    pub fn from_user(chat_id: i64, user: &User) -> Option<Self> {
        let username = user.username.as_deref()?.trim().trim_start_matches('@');
        if username.is_empty() {
            return None;
        }
        Some(Self {
            user_id: user.id.0,
            chat_id,
            username: username.to_string(),
            first_name: user.first_name.clone(),
        })
    }
}

/// Mutable state, guarded by a single lock
#[derive(Debug, Default)]
pub struct BotState {
    pub credentials: CredentialStore,
    pub sessions: SessionTable,
    /// Last non-empty run listing per instrument id
    pub runs: HashMap<String, BTreeMap<u64, RunRecord>>,
}

/// A configured instrument and its dashboard client
#[derive(Clone)]
pub struct Instrument {
    pub id: String,
    pub name: String,
    pub dashboard: Arc<dyn Dashboard>,
}

pub struct AppContext {
    pub state: Mutex<BotState>,
    config: BotConfig,
    config_path: PathBuf,
    pub transport: Arc<dyn super::Transport>,
    pub instruments: BTreeMap<String, Instrument>,
    pub tickers: TickerRegistry,
    pub gate: AccessGate,
    pub started_at: DateTime<Utc>,
    pub log_path: PathBuf,
    /// Bot username, used to accept `/command@botname`
    pub bot_username: String,
    shutdown: Notify,
}

impl AppContext {
    pub fn new(
        config: BotConfig,
        config_path: impl Into<PathBuf>,
        transport: Arc<dyn super::Transport>,
        instruments: Vec<Instrument>,
        log_path: impl Into<PathBuf>,
        bot_username: impl Into<String>,
    ) -> Self {
        let state = BotState {
            credentials: config.credentials(),
            ..BotState::default()
        };
        Self {
            state: Mutex::new(state),
            gate: AccessGate::new(config.comm.pin),
            config,
            config_path: config_path.into(),
            transport,
            instruments: instruments
                .into_iter()
                .map(|instrument| (instrument.id.clone(), instrument))
                .collect(),
            tickers: TickerRegistry::new(),
            started_at: Utc::now(),
            log_path: log_path.into(),
            bot_username: bot_username.into(),
            shutdown: Notify::new(),
        }
    }

    /// Write the credentials back to the configuration file.
    ///
    /// Called with the state lock held so concurrent changes land in order.
    pub fn persist(&self, credentials: &CredentialStore) -> Result<(), ConfigError> {
        self.config
            .with_credentials(credentials)
            .save(&self.config_path)
            .inspect_err(|e| error!(path = %self.config_path.display(), error = %e, "Failed to save configuration"))
    }

    pub fn start_message(&self) -> String {
        configured(&self.config.messages.start, "default-start")
    }

    pub fn kill_message(&self) -> String {
        configured(&self.config.messages.kill, "default-kill")
    }

    pub fn tick_message(&self) -> String {
        configured(&self.config.messages.tick, "default-tick")
    }

    pub fn untick_message(&self) -> String {
        configured(&self.config.messages.untick, "default-untick")
    }

    /// Reply to commands the user is not cleared for
    pub fn negate_message(&self) -> String {
        configured(&self.config.messages.negate, "default-negate")
    }

    /// Ask the dispatcher to stop
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.notify_one();
    }

    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }
}

fn configured(value: &Option<String>, default_key: &str) -> String {
    match value {
        Some(text) if !text.trim().is_empty() => text.clone(),
        _ => t(default_key),
    }
}
