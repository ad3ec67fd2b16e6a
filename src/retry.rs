//! Reconnect and timeout utilities.
//!
//! The helpers in this module are transport-agnostic: the realtime link
//! consumes [`ReconnectPolicy`] and the HTTP client races each transfer
//! through [`with_timeout`].

use std::future::Future;
use std::time::Duration;

/// Fixed-delay, bounded reconnection policy for the realtime link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum number of consecutive failed attempts before giving up.
    pub max_attempts: usize,
    /// Delay applied before every reconnection attempt.
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: usize = 5;
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(3000);

    /// Policy that never reconnects after the first failure.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
        }
    }

    /// Returns the delay to wait before reconnection attempt `attempt`, or
    /// `None` once the attempt budget is spent.
    ///
    /// `attempt` is 1-based and counts consecutive failures since the last
    /// successful connection.
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            delay: Self::DEFAULT_DELAY,
        }
    }
}

/// Applies a timeout to an async computation.
///
/// The inner future is dropped when the timer wins, which cancels whatever
/// I/O it was driving.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    future: Fut,
) -> Result<T, tokio::time::error::Elapsed>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{with_timeout, ReconnectPolicy};

    #[test]
    fn default_policy_allows_five_fixed_delay_attempts() {
        let policy = ReconnectPolicy::default();
        for attempt in 1..=5 {
            assert_eq!(
                policy.delay_for_attempt(attempt),
                Some(Duration::from_millis(3000))
            );
        }
        assert_eq!(policy.delay_for_attempt(6), None);
    }

    #[test]
    fn attempt_zero_is_not_a_reconnect() {
        assert_eq!(ReconnectPolicy::default().delay_for_attempt(0), None);
    }

    #[test]
    fn disabled_policy_never_reconnects() {
        assert_eq!(ReconnectPolicy::disabled().delay_for_attempt(1), None);
    }

    #[test]
    fn timeout_drops_the_pending_future() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let completed = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&completed);
            let result = with_timeout(Duration::from_millis(10), async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .await;

            assert!(result.is_err());
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(!completed.load(Ordering::SeqCst));
        });
    }

    #[test]
    fn timeout_passes_through_fast_results() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");

        let value = runtime
            .block_on(with_timeout(Duration::from_secs(1), async { 7 }))
            .expect("completes in time");
        assert_eq!(value, 7);
    }
}
