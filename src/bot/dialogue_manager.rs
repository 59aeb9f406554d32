//! Dialogue Manager module: runs actions behind the access gate and drives
//! the PIN protocols.
//!
//! Every handler follows the same shape: take the state lock, update the
//! session and credentials, collect the replies, release the lock, send.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use fluent_bundle::FluentValue;
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info, warn};

use crate::access::Verdict;
use crate::credentials::{ApproveOutcome, BlockOutcome, JoinOutcome, Membership};
use crate::dashboard::REPORT_IMAGES;
use crate::errors::ConfigError;
use crate::localization::{t, t_args};
use crate::session::{ChatStatus, PinOutcome};
use crate::ticker::{format_uptime, TICK_PERIOD};

use super::action::{Action, Command, InstrumentCommand};
use super::context::{Actor, AppContext, BotState};
use super::menu::{present, Menu, MenuView};
use super::ui_builder::{format_qc_report, format_run_summary, menu_text};

/// A text message waiting to be sent once the state lock is released
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub chat_id: i64,
    pub text: String,
    pub menu: Option<Menu>,
}

impl Reply {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            menu: None,
        }
    }
}

async fn send_all(ctx: &AppContext, replies: Vec<Reply>) -> Result<()> {
    for reply in replies {
        ctx.transport
            .send_message(reply.chat_id, &reply.text, reply.menu.as_ref())
            .await?;
    }
    Ok(())
}

/// The menu the actor should see now, headed by its prompt
fn menu_reply(ctx: &AppContext, state: &BotState, actor: &Actor) -> Option<Reply> {
    let session = state.sessions.get(actor.user_id)?;
    let current_instrument = match (&session.context, session.status) {
        (Some(id), ChatStatus::Instr) => Some((
            id.as_str(),
            state
                .runs
                .get(id)
                .map(|runs| runs.keys().copied().collect())
                .unwrap_or_default(),
        )),
        _ => None,
    };
    let view = MenuView {
        status: session.status,
        membership: state.credentials.membership(&actor.username),
        queue: state.credentials.queue().collect(),
        instruments: ctx
            .instruments
            .values()
            .map(|instrument| (instrument.id.as_str(), instrument.name.as_str()))
            .collect(),
        current_instrument,
    };
    let menu = present(&view)?;
    Some(Reply {
        chat_id: actor.chat_id,
        text: menu_text(&menu.heading, &actor.first_name),
        menu: Some(menu),
    })
}

fn persist_failed(actor: &Actor, e: &ConfigError) -> Reply {
    Reply::text(actor.chat_id, t_args("persist-failed", &[("error", e.to_string().into())]))
}

/// Run an action behind the access gate.
///
/// `request` is what the user sent, a `/command` or `[Button_<data>]`,
/// and is what refusals are logged with.
pub async fn handle_action(ctx: &AppContext, actor: &Actor, action: Action, request: &str) -> Result<()> {
    let mut replies = Vec::new();
    let verdict = {
        let mut guard = ctx.state.lock().await;
        let state = &mut *guard;
        let session = state.sessions.entry(actor.user_id, actor.chat_id, &actor.username);
        let verdict = ctx
            .gate
            .evaluate(&state.credentials, &actor.username, session, action.clearance(), Utc::now());
        match verdict {
            Verdict::Allow => {}
            Verdict::Deny => {
                warn!(user = %actor.username, command = %request, "Refused command");
                replies.push(Reply::text(actor.chat_id, ctx.negate_message()));
            }
            Verdict::DenyBlocked => {
                warn!(user = %actor.username, command = %request, "Refused command from blocked user");
                replies.push(Reply::text(actor.chat_id, t("blocked-notice")));
            }
            Verdict::RegisterPin => {
                info!(user = %actor.username, "No PIN registered; asking for a new one");
                session.set_status(ChatStatus::NewPin);
                replies.push(Reply::text(actor.chat_id, t("pin-choose")));
                replies.extend(menu_reply(ctx, state, actor));
            }
            Verdict::VerifyPin => {
                info!(user = %actor.username, "PIN check due");
                session.set_status(ChatStatus::PinCheck);
                replies.push(Reply::text(actor.chat_id, t("pin-enter")));
                replies.extend(menu_reply(ctx, state, actor));
            }
        }
        verdict
    };

    if verdict != Verdict::Allow {
        return send_all(ctx, replies).await;
    }

    info!(user = %actor.username, command = %request, "Approved command");
    execute(ctx, actor, action).await
}

async fn execute(ctx: &AppContext, actor: &Actor, action: Action) -> Result<()> {
    match action {
        Action::Start => start(ctx, actor).await,
        Action::Help => {
            let text = Command::descriptions().to_string();
            ctx.transport.send_message(actor.chat_id, &text, None).await
        }
        Action::Join => join(ctx, actor).await,
        Action::Bye => bye(ctx, actor).await,
        Action::Admin => enter_status(ctx, actor, ChatStatus::Admin).await,
        Action::Approve(username) => approve(ctx, actor, &username).await,
        Action::Block(username) => block(ctx, actor, &username).await,
        Action::KillWarning => {
            ctx.transport
                .send_message(actor.chat_id, &t("kill-warning"), None)
                .await
        }
        Action::Kill => kill(ctx, actor).await,
        Action::SendLog => send_log(ctx, actor).await,
        Action::Tick => tick(ctx, actor).await,
        Action::Untick => untick(ctx, actor).await,
        Action::OpenInstrument(id) => open_instrument(ctx, actor, &id).await,
        Action::Instrument {
            id,
            command: InstrumentCommand::Monitor,
        } => monitor(ctx, actor, &id).await,
        Action::Instrument {
            id,
            command: InstrumentCommand::Run(run_id),
        } => run_report(ctx, actor, &id, run_id).await,
    }
}

async fn start(ctx: &AppContext, actor: &Actor) -> Result<()> {
    let mut replies = Vec::new();
    {
        let mut state = ctx.state.lock().await;
        match state.credentials.membership(&actor.username) {
            Membership::Admin | Membership::User | Membership::Blocked => {}
            Membership::Queued => replies.push(Reply::text(
                actor.chat_id,
                t_args("greeting-queued", &[("username", actor.username.as_str().into())]),
            )),
            Membership::Unknown => replies.push(Reply::text(actor.chat_id, ctx.start_message())),
        }
        state
            .sessions
            .entry(actor.user_id, actor.chat_id, &actor.username)
            .set_status(ChatStatus::Start);
        replies.extend(menu_reply(ctx, &state, actor));
    }
    send_all(ctx, replies).await
}

/// Switch status and show the matching menu
async fn enter_status(ctx: &AppContext, actor: &Actor, status: ChatStatus) -> Result<()> {
    let replies: Vec<Reply> = {
        let mut state = ctx.state.lock().await;
        state.sessions.entry(actor.user_id, actor.chat_id, &actor.username).set_status(status);
        menu_reply(ctx, &state, actor).into_iter().collect()
    };
    send_all(ctx, replies).await
}

async fn join(ctx: &AppContext, actor: &Actor) -> Result<()> {
    let mut replies = Vec::new();
    {
        let mut guard = ctx.state.lock().await;
        let state = &mut *guard;
        let username = actor.username.as_str();
        let (text, status) = match state.credentials.join(username) {
            JoinOutcome::Added => {
                info!(user = %username, "User added to the join queue");
                if let Err(e) = ctx.persist(&state.credentials) {
                    replies.push(persist_failed(actor, &e));
                }
                (t_args("queue-added", &[("username", username.into())]), ChatStatus::Join)
            }
            JoinOutcome::AlreadyQueued => (t_args("queue-already", &[("username", username.into())]), ChatStatus::Start),
            JoinOutcome::AlreadyMember { is_admin: true } => {
                let names: Vec<String> = state.credentials.queue().map(|name| format!("@{}", name)).collect();
                if names.is_empty() {
                    (t("queue-empty"), ChatStatus::Start)
                } else {
                    (t_args("queue-listing", &[("names", names.join("\n").into())]), ChatStatus::Join)
                }
            }
            JoinOutcome::AlreadyMember { is_admin: false } => {
                (t_args("queue-member", &[("username", username.into())]), ChatStatus::Start)
            }
            JoinOutcome::Blocked => (t("blocked-notice"), ChatStatus::Start),
        };
        replies.insert(0, Reply::text(actor.chat_id, text));
        state.sessions.entry(actor.user_id, actor.chat_id, username).set_status(status);
        replies.extend(menu_reply(ctx, state, actor));
    }
    send_all(ctx, replies).await
}

async fn bye(ctx: &AppContext, actor: &Actor) -> Result<()> {
    {
        let mut state = ctx.state.lock().await;
        state
            .sessions
            .entry(actor.user_id, actor.chat_id, &actor.username)
            .set_status(ChatStatus::Bye);
    }
    let text = t_args("goodbye", &[("name", actor.first_name.as_str().into())]);
    ctx.transport.send_message(actor.chat_id, &text, None).await
}

async fn approve(ctx: &AppContext, actor: &Actor, username: &str) -> Result<()> {
    let mut replies = Vec::new();
    {
        let mut guard = ctx.state.lock().await;
        let state = &mut *guard;
        match state.credentials.approve(username) {
            ApproveOutcome::Approved => {
                info!(user = %username, by = %actor.username, "User approved");
                replies.push(Reply::text(actor.chat_id, t_args("approved", &[("username", username.into())])));
                if let Err(e) = ctx.persist(&state.credentials) {
                    replies.push(persist_failed(actor, &e));
                }
                if let Some(chat_id) = state.sessions.chat_of(username) {
                    replies.push(Reply::text(chat_id, t_args("approved-notice", &[("username", username.into())])));
                }
            }
            ApproveOutcome::AlreadyApproved => replies.push(Reply::text(
                actor.chat_id,
                t_args("already-approved", &[("username", username.into())]),
            )),
        }
        replies.extend(menu_reply(ctx, state, actor));
    }
    send_all(ctx, replies).await
}

async fn block(ctx: &AppContext, actor: &Actor, username: &str) -> Result<()> {
    let mut replies = Vec::new();
    {
        let mut guard = ctx.state.lock().await;
        let state = &mut *guard;
        let args: [(&str, FluentValue); 1] = [("username", username.into())];
        match state.credentials.block(username) {
            BlockOutcome::Blocked => {
                info!(user = %username, by = %actor.username, "User blocked");
                replies.push(Reply::text(actor.chat_id, t_args("blocked", &args)));
                if let Err(e) = ctx.persist(&state.credentials) {
                    replies.push(persist_failed(actor, &e));
                }
            }
            BlockOutcome::AlreadyBlocked => replies.push(Reply::text(actor.chat_id, t_args("already-blocked", &args))),
            BlockOutcome::ProtectedAdmin => {
                warn!(user = %username, by = %actor.username, "Refused to block an administrator");
                replies.push(Reply::text(actor.chat_id, t_args("block-refused-admin", &args)));
            }
        }
        replies.extend(menu_reply(ctx, state, actor));
    }
    send_all(ctx, replies).await
}

async fn kill(ctx: &AppContext, actor: &Actor) -> Result<()> {
    info!(by = %actor.username, "Kill command received");
    ctx.transport
        .send_message(actor.chat_id, &ctx.kill_message(), None)
        .await?;
    ctx.tickers.stop_all().await;
    ctx.request_shutdown();
    Ok(())
}

async fn send_log(ctx: &AppContext, actor: &Actor) -> Result<()> {
    if tokio::fs::metadata(&ctx.log_path).await.is_ok() {
        ctx.transport.send_document(actor.chat_id, &ctx.log_path).await
    } else {
        warn!(path = %ctx.log_path.display(), "Log file requested but missing");
        ctx.transport.send_message(actor.chat_id, &t("log-missing"), None).await
    }
}

fn uptime_message(ctx_started: chrono::DateTime<Utc>) -> String {
    let (days, hms) = format_uptime(Utc::now() - ctx_started);
    t_args("tick-uptime", &[("days", days.into()), ("hms", hms.into())])
}

async fn tick(ctx: &AppContext, actor: &Actor) -> Result<()> {
    let chat_id = actor.chat_id;
    let transport = Arc::clone(&ctx.transport);
    let started_at = ctx.started_at;
    let started = ctx
        .tickers
        .start(chat_id, TICK_PERIOD, move || {
            let transport = Arc::clone(&transport);
            async move {
                if let Err(e) = transport.send_message(chat_id, &uptime_message(started_at), None).await {
                    warn!(chat_id, error = %e, "Failed to send uptime tick");
                }
            }
        })
        .await;

    if started {
        ctx.transport.send_message(chat_id, &ctx.tick_message(), None).await?;
    }
    ctx.transport
        .send_message(chat_id, &uptime_message(ctx.started_at), None)
        .await
}

async fn untick(ctx: &AppContext, actor: &Actor) -> Result<()> {
    let text = if ctx.tickers.stop(actor.chat_id).await {
        ctx.untick_message()
    } else {
        t("untick-idle")
    };
    ctx.transport.send_message(actor.chat_id, &text, None).await
}

async fn open_instrument(ctx: &AppContext, actor: &Actor, id: &str) -> Result<()> {
    let Some(instrument) = ctx.instruments.get(id) else {
        warn!(instrument = %id, user = %actor.username, "Unknown instrument requested");
        return enter_status(ctx, actor, ChatStatus::Start).await;
    };
    let mut replies = vec![Reply::text(
        actor.chat_id,
        t_args("entering-instrument", &[("name", instrument.name.as_str().into())]),
    )];
    {
        let mut state = ctx.state.lock().await;
        state
            .sessions
            .entry(actor.user_id, actor.chat_id, &actor.username)
            .enter_instrument(id);
        replies.extend(menu_reply(ctx, &state, actor));
    }
    send_all(ctx, replies).await
}

async fn monitor(ctx: &AppContext, actor: &Actor, id: &str) -> Result<()> {
    let Some(instrument) = ctx.instruments.get(id) else {
        warn!(instrument = %id, user = %actor.username, "Unknown instrument requested");
        return enter_status(ctx, actor, ChatStatus::Start).await;
    };

    let runs = match instrument.dashboard.list_runs().await {
        Ok(runs) => runs,
        Err(e) => {
            warn!(instrument = %id, error = %e, "Could not connect to the instrument server");
            ctx.transport
                .send_message(
                    actor.chat_id,
                    &t_args("monitor-no-connection", &[("name", actor.first_name.as_str().into())]),
                    None,
                )
                .await?;
            return enter_status(ctx, actor, ChatStatus::Start).await;
        }
    };
    info!(instrument = %id, count = runs.len(), "Runs listed");

    let mut replies = vec![Reply::text(
        actor.chat_id,
        t_args("monitor-found", &[("count", runs.len().into())]),
    )];
    replies.extend(runs.values().map(|run| Reply::text(actor.chat_id, format_run_summary(run))));
    {
        let mut state = ctx.state.lock().await;
        let cache = state.runs.entry(id.to_string()).or_default();
        if !runs.is_empty() {
            *cache = runs;
        } else if !cache.is_empty() {
            replies.push(Reply::text(
                actor.chat_id,
                t_args("monitor-cached", &[("count", cache.len().into())]),
            ));
        }
        state
            .sessions
            .entry(actor.user_id, actor.chat_id, &actor.username)
            .enter_instrument(id);
        replies.extend(menu_reply(ctx, &state, actor));
    }
    send_all(ctx, replies).await
}

async fn run_report(ctx: &AppContext, actor: &Actor, id: &str, run_id: u64) -> Result<()> {
    let (instrument, run) = {
        let state = ctx.state.lock().await;
        (
            ctx.instruments.get(id).cloned(),
            state.runs.get(id).and_then(|runs| runs.get(&run_id)).cloned(),
        )
    };
    let (Some(instrument), Some(run)) = (instrument, run) else {
        debug!(instrument = %id, run_id, "Run report requested for an unknown run");
        ctx.transport
            .send_message(actor.chat_id, &t_args("run-unknown", &[("run", run_id.into())]), None)
            .await?;
        return enter_status(ctx, actor, ChatStatus::Instr).await;
    };

    if run.analysismetrics.is_none() {
        ctx.transport.send_message(actor.chat_id, &t("run-no-analysis"), None).await?;
    }
    if run.libmetrics.is_none() {
        ctx.transport.send_message(actor.chat_id, &t("run-no-library"), None).await?;
    }
    if let (Some(analysis), Some(library)) = (&run.analysismetrics, &run.libmetrics) {
        let report = format_qc_report(&run, analysis, library);
        ctx.transport.send_message(actor.chat_id, &report, None).await?;

        for (name, description) in REPORT_IMAGES {
            match instrument.dashboard.fetch_image(run_id, name).await {
                Some(path) => ctx.transport.send_photo(actor.chat_id, &path).await?,
                None => {
                    ctx.transport
                        .send_message(
                            actor.chat_id,
                            &t_args("run-no-image", &[("description", (*description).into())]),
                            None,
                        )
                        .await?
                }
            }
        }
    }

    match instrument.dashboard.fetch_pdf(run_id).await {
        Some(path) => ctx.transport.send_document(actor.chat_id, &path).await?,
        None => {
            ctx.transport
                .send_message(actor.chat_id, &t("run-pdf-not-ready"), None)
                .await?
        }
    }

    let replies: Vec<Reply> = {
        let state = ctx.state.lock().await;
        menu_reply(ctx, &state, actor).into_iter().collect()
    };
    send_all(ctx, replies).await
}

/// Feed a keypad digit into the PIN protocols; digits bypass the access gate
pub async fn handle_pin_digit(ctx: &AppContext, actor: &Actor, digit: char) -> Result<()> {
    let mut replies = Vec::new();
    {
        let mut guard = ctx.state.lock().await;
        let state = &mut *guard;
        let stored = state.credentials.pin_hash(&actor.username).map(str::to_string);
        let session = state.sessions.entry(actor.user_id, actor.chat_id, &actor.username);
        let outcome = session.handle_pin_digit(digit, stored.as_deref(), Utc::now());
        debug!(user = %actor.username, outcome = ?outcome, "PIN digit received");

        let text = match &outcome {
            PinOutcome::NotEnteringPin => Some(t("pin-not-entering")),
            PinOutcome::InvalidDigit => Some(t("pin-invalid-digit")),
            PinOutcome::Collecting => None,
            PinOutcome::ConfirmNewPin => Some(t("pin-confirm")),
            PinOutcome::PinSaved { hash } => {
                info!(user = %actor.username, "New PIN registered");
                if state.credentials.set_pin_hash(&actor.username, hash.clone()) {
                    if let Err(e) = ctx.persist(&state.credentials) {
                        error!(user = %actor.username, "PIN hash kept in memory only");
                        replies.push(persist_failed(actor, &e));
                    }
                }
                Some(t("pin-saved"))
            }
            PinOutcome::PinMismatch => Some(t("pin-mismatch")),
            PinOutcome::Verified => {
                info!(user = %actor.username, "PIN verified");
                Some(t("pin-verified"))
            }
            PinOutcome::WrongPin { attempt } => {
                warn!(user = %actor.username, attempt, "Wrong PIN entered");
                Some(t_args("pin-wrong", &[("attempt", (*attempt).into())]))
            }
            PinOutcome::LockedOut => {
                warn!(user = %actor.username, "Too many wrong PINs; returning user to the queue");
                session.set_status(ChatStatus::Start);
                if state.credentials.evict_to_queue(&actor.username) {
                    if let Err(e) = ctx.persist(&state.credentials) {
                        replies.push(persist_failed(actor, &e));
                    }
                }
                Some(t("pin-locked"))
            }
        };
        if let Some(text) = text {
            replies.insert(0, Reply::text(actor.chat_id, text));
        }
        if outcome.offers_keyboard() {
            replies.extend(menu_reply(ctx, state, actor));
        }
    }
    send_all(ctx, replies).await
}
