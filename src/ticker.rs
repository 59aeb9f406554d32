//! # Ticker Module
//!
//! Periodic uptime notifications requested by administrators. Each chat owns
//! at most one ticker task; starting twice is a no-op and stopping aborts the
//! task.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Default tick period
pub const TICK_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Registry of running ticker tasks keyed by chat id
#[derive(Debug, Default)]
pub struct TickerRegistry {
    tasks: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl TickerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking for `chat_id`, calling `tick` every `period`.
    ///
    /// The first call happens one period after start. Returns `false`, and
    /// spawns nothing, when the chat already has a ticker.
    pub async fn start<F, Fut>(&self, chat_id: i64, period: Duration, tick: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        if tasks.get(&chat_id).is_some_and(|task| !task.is_finished()) {
            debug!(chat_id, "Ticker already running");
            return false;
        }

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        tasks.insert(chat_id, handle);
        info!(chat_id, period_secs = period.as_secs(), "Ticker started");
        true
    }

    /// Stop the ticker for `chat_id`; returns whether one was running
    pub async fn stop(&self, chat_id: i64) -> bool {
        match self.tasks.lock().await.remove(&chat_id) {
            Some(handle) => {
                handle.abort();
                info!(chat_id, "Ticker stopped");
                true
            }
            None => false,
        }
    }

    pub async fn is_ticking(&self, chat_id: i64) -> bool {
        self.tasks
            .lock()
            .await
            .get(&chat_id)
            .is_some_and(|task| !task.is_finished())
    }

    pub async fn stop_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}

/// Split an uptime into whole days and the remaining "HH:MM:SS"
pub fn format_uptime(elapsed: chrono::Duration) -> (i64, String) {
    let total = elapsed.num_seconds().max(0);
    let days = total / 86_400;
    let remainder = total % 86_400;
    let hms = format!(
        "{:02}:{:02}:{:02}",
        remainder / 3600,
        (remainder % 3600) / 60,
        remainder % 60
    );
    (days, hms)
}
