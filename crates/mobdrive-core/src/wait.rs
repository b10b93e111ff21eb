//! Bounded waits.
//!
//! Every blocking operation in the harness is bounded by a [`WaitPolicy`].
//! [`poll_until`] is the shared polling loop used by the locator and
//! interaction layers: it repeatedly runs a probe until the probe is ready,
//! aborts, or the deadline passes. A probe that is still running when the
//! deadline passes is cancelled.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::driver::DriverError;

/// Timeout budget for one wait-based operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Total time allowed for the wait.
    pub timeout: Duration,
    /// Delay between two probes.
    pub poll_interval: Duration,
}

impl WaitPolicy {
    /// Default budget for waits on elements expected to appear.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
    /// Budget for negative or absence checks.
    pub const SHORT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default delay between probes.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// The short (5 s) policy used for "is it there / is it gone" checks.
    pub fn short() -> Self {
        Self::new(Self::SHORT_TIMEOUT)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

/// Result of a single probe inside [`poll_until`].
pub(crate) enum Probe<T> {
    /// The condition holds; stop waiting.
    Ready(T),
    /// Not yet; keep polling. Carries the error that made this probe fail, if any.
    Pending(Option<DriverError>),
    /// Stop waiting immediately with this error.
    Abort(DriverError),
}

/// Why [`poll_until`] gave up.
#[derive(Debug)]
pub(crate) enum WaitError {
    /// The deadline passed. Carries the last error a probe reported.
    TimedOut { last_error: Option<DriverError> },
    /// A probe aborted the wait.
    Aborted(DriverError),
}

/// Roughly 30 years; budgets past this are treated as unbounded.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + timeout`, saturating at [`FAR_FUTURE`] instead of overflowing.
fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout.min(FAR_FUTURE))
        .unwrap_or(start)
}

/// Run `probe` every `policy.poll_interval` until it is ready or aborts, or
/// until `policy.timeout` elapses.
///
/// The probe always runs at least once.
pub(crate) async fn poll_until<T, F, Fut>(policy: &WaitPolicy, mut probe: F) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    let start = Instant::now();
    let deadline = deadline_after(start, policy.timeout);
    let mut last_error = None;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let outcome = match tokio::time::timeout_at(deadline, probe()).await {
            Ok(outcome) => outcome,
            // The probe itself outlived the budget.
            Err(_) => Probe::Pending(Some(DriverError::Timeout)),
        };

        match outcome {
            Probe::Ready(value) => {
                debug!(attempts, elapsed_ms = start.elapsed().as_millis() as u64, "wait satisfied");
                return Ok(value);
            }
            Probe::Abort(err) => return Err(WaitError::Aborted(err)),
            Probe::Pending(err) => {
                if err.is_some() {
                    last_error = err;
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            debug!(attempts, elapsed_ms = start.elapsed().as_millis() as u64, "wait timed out");
            return Err(WaitError::TimedOut { last_error });
        }
        tokio::time::sleep(policy.poll_interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_and_short_policies() {
        assert_eq!(WaitPolicy::default().timeout, Duration::from_secs(15));
        assert_eq!(WaitPolicy::short().timeout, Duration::from_secs(5));
        assert_eq!(WaitPolicy::default().poll_interval, Duration::from_millis(500));
        let custom = WaitPolicy::from_secs(2).with_poll_interval(Duration::from_millis(50));
        assert_eq!(custom.timeout, Duration::from_secs(2));
        assert_eq!(custom.poll_interval, Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_third_probe() {
        let calls = AtomicU32::new(0);
        let result = poll_until(&WaitPolicy::from_secs(5), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                Probe::Ready("found")
            } else {
                Probe::Pending(None)
            }
        })
        .await;
        assert_eq!(result.unwrap(), "found");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_last_error() {
        let start = Instant::now();
        let result: Result<(), _> = poll_until(&WaitPolicy::from_secs(2), || async {
            Probe::Pending(Some(DriverError::NoSuchElement("login".into())))
        })
        .await;
        match result {
            Err(WaitError::TimedOut { last_error: Some(DriverError::NoSuchElement(_)) }) => {}
            other => panic!("Expected TimedOut with NoSuchElement, got: {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = poll_until(&WaitPolicy::from_secs(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Probe::Abort(DriverError::InvalidSession("gone".into()))
        })
        .await;
        assert!(matches!(result, Err(WaitError::Aborted(DriverError::InvalidSession(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_timeout_does_not_overflow() {
        let start = Instant::now();
        let deadline = deadline_after(start, Duration::MAX);
        assert_eq!(deadline - start, FAR_FUTURE);

        let result = poll_until(&WaitPolicy::from_secs(u64::MAX), || async { Probe::Ready(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_is_cut_off_at_deadline() {
        let start = Instant::now();
        let result: Result<(), _> = poll_until(&WaitPolicy::from_secs(1), || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Probe::Ready(())
        })
        .await;
        assert!(matches!(
            result,
            Err(WaitError::TimedOut { last_error: Some(DriverError::Timeout) })
        ));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
