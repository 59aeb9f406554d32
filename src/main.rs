use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ionwatcher::bot::{self, AppContext, Command, Instrument, TelegramTransport};
use ionwatcher::config::{BotConfig, InstrumentKind, DEFAULT_CONFIG_FILE, DEFAULT_LOG_FILE};
use ionwatcher::dashboard::{Dashboard, IonDashboard};

/// Log to stdout and to the file admins can download
fn init_tracing(log_path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;
    let json = env::var("IONWATCHER_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

fn build_instruments(config: &BotConfig) -> Result<Vec<Instrument>> {
    config
        .instruments
        .iter()
        .map(|(id, instrument)| -> Result<Instrument> {
            let password = instrument.resolve_password(id)?;
            let dashboard = match instrument.kind {
                InstrumentKind::Ion => IonDashboard::new(
                    &instrument.server,
                    &instrument.user,
                    password,
                    instrument.download_dir(id),
                )
                .with_context(|| format!("creating client for instrument {}", id))?,
            };
            Ok(Instrument {
                id: id.clone(),
                name: instrument.name.clone(),
                dashboard: Arc::new(dashboard),
            })
        })
        .collect()
}

/// Try every dashboard once so misconfigurations show up in the log early
async fn test_connections(instruments: &[Instrument]) {
    for instrument in instruments {
        match instrument.dashboard.list_runs().await {
            Ok(runs) => info!(instrument = %instrument.id, runs = runs.len(), "Connection to server OK"),
            Err(e) => warn!(instrument = %instrument.id, error = %e, "Could not connect to server"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let log_path = env::var("IONWATCHER_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_FILE));
    init_tracing(&log_path)?;

    info!("Starting IonWatcher bot v{}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("IONWATCHER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = BotConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let token = env::var("TELEGRAM_BOT_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty())
        .unwrap_or_else(|| config.network.token.clone());
    if token.trim().is_empty() {
        bail!("no bot token: set TELEGRAM_BOT_TOKEN or [network] token");
    }

    let instruments = build_instruments(&config)?;
    test_connections(&instruments).await;

    let bot = Bot::new(token);
    let me = bot.get_me().await.context("contacting Telegram")?;
    info!(bot = %me.username(), "Bot initialized");
    bot.set_my_commands(Command::bot_commands())
        .await
        .context("registering bot commands")?;

    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let ctx = Arc::new(AppContext::new(
        config,
        config_path,
        transport,
        instruments,
        log_path,
        me.username(),
    ));

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(bot::message_handler))
        .branch(Update::filter_callback_query().endpoint(bot::callback_handler));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![Arc::clone(&ctx)])
        .enable_ctrlc_handler()
        .build();

    // /kill stops the dispatcher from inside a handler
    let shutdown_token = dispatcher.shutdown_token();
    let shutdown_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        shutdown_ctx.shutdown_requested().await;
        match shutdown_token.shutdown() {
            Ok(done) => done.await,
            Err(e) => warn!(error = ?e, "Dispatcher was not running"),
        }
    });

    info!("Starting dispatcher");
    dispatcher.dispatch().await;

    ctx.tickers.stop_all().await;
    info!("Bot stopped");
    Ok(())
}
