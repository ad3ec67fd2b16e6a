//! Periodic refresh tasks.
//!
//! The realtime channel only hints that data changed; dashboards keep a
//! poller per view so they stay current when no push arrives.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Intervals below this are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Refresh cadence per dashboard view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshIntervals {
    pub sensors: Duration,
    pub devices: Duration,
    pub statistics: Duration,
}

impl RefreshIntervals {
    pub const SENSORS: Duration = Duration::from_millis(5_000);
    pub const DEVICES: Duration = Duration::from_millis(10_000);
    pub const STATISTICS: Duration = Duration::from_millis(30_000);
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            sensors: Self::SENSORS,
            devices: Self::DEVICES,
            statistics: Self::STATISTICS,
        }
    }
}

/// Handle on a background refresh loop.
///
/// The first fetch runs immediately, then once per interval. Missed ticks
/// are delayed, not bursted. Dropping the handle cancels the loop.
#[derive(Debug)]
pub struct Poller {
    name: String,
    cancel: CancellationToken,
    wake: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

/// Cloneable handle that requests an immediate refresh.
#[derive(Clone, Debug)]
pub struct PollTrigger {
    wake: Arc<Notify>,
}

impl PollTrigger {
    pub fn trigger(&self) {
        self.wake.notify_one();
    }
}

impl Poller {
    /// Spawns the loop on the current tokio runtime.
    ///
    /// Every outcome is handed to `on_result`; failures are also logged.
    pub fn spawn<T, E, F, Fut, C>(
        name: impl Into<String>,
        interval: Duration,
        fetch: F,
        on_result: C,
    ) -> Self
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        C: FnMut(Result<T, E>) + Send + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let wake = Arc::new(Notify::new());
        let interval = interval.max(MIN_POLL_INTERVAL);

        debug!(
            event = "poll_started",
            poller = %name,
            interval_ms = interval.as_millis() as u64
        );
        let task = tokio::spawn(poll_loop(
            name.clone(),
            interval,
            cancel.clone(),
            Arc::clone(&wake),
            fetch,
            on_result,
        ));

        Self {
            name,
            cancel,
            wake,
            task: Some(task),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs a fetch now and restarts the interval from it. Requests made
    /// while a fetch is in flight collapse into one follow-up fetch.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    pub fn trigger_handle(&self) -> PollTrigger {
        PollTrigger {
            wake: Arc::clone(&self.wake),
        }
    }

    /// Stops the loop at its next await point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels and waits for the loop to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop<T, E, F, Fut, C>(
    name: String,
    interval: Duration,
    cancel: CancellationToken,
    wake: Arc<Notify>,
    mut fetch: F,
    mut on_result: C,
) where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(Result<T, E>),
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = wake.notified() => ticker.reset(),
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = fetch() => result,
        };
        if let Err(err) = &result {
            warn!(event = "poll_failed", poller = %name, error = %err);
        }
        on_result(result);
    }

    debug!(event = "poll_cancelled", poller = %name);
}
