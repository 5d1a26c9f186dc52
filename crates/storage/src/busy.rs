//! Busy/retry policy for contended media
//!
//! When another handle holds the medium, a backend polls instead of failing:
//! it sleeps `polling_interval` between attempts and gives up with
//! [`KoyaError::Busy`] once `timeout` has elapsed. Without a timeout it waits
//! indefinitely, which callers should read as contention, not deadlock.

use std::thread;
use std::time::{Duration, Instant};

use koya_core::{KoyaError, KoyaResult};
use tracing::{debug, trace};

/// Default spacing between attempts.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(100);

/// How a backend waits for a busy medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyPolicy {
    /// Sleep between attempts
    pub polling_interval: Duration,
    /// Give up after this long; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for BusyPolicy {
    fn default() -> Self {
        BusyPolicy {
            polling_interval: DEFAULT_POLLING_INTERVAL,
            timeout: None,
        }
    }
}

impl BusyPolicy {
    /// Set the polling interval.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry `attempt` until it yields a value.
    ///
    /// `attempt` returns `Ok(None)` while the medium is busy. Errors end the
    /// wait immediately.
    pub fn acquire<T>(
        &self,
        what: &str,
        mut attempt: impl FnMut() -> KoyaResult<Option<T>>,
    ) -> KoyaResult<T> {
        let started = Instant::now();
        let mut polls: u64 = 0;
        loop {
            if let Some(value) = attempt()? {
                if polls > 0 {
                    debug!(target: "koya::storage", medium = what, polls, waited = ?started.elapsed(), "Busy medium acquired");
                }
                return Ok(value);
            }
            let waited = started.elapsed();
            if let Some(timeout) = self.timeout {
                if waited >= timeout {
                    debug!(target: "koya::storage", medium = what, polls, ?waited, "Busy timeout");
                    return Err(KoyaError::Busy { waited });
                }
            }
            polls += 1;
            trace!(target: "koya::storage", medium = what, polls, "Medium busy, polling");
            thread::sleep(self.polling_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_immediately() {
        let policy = BusyPolicy::default();
        let value = policy.acquire("test", || Ok(Some(7))).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_acquire_after_retries() {
        let policy = BusyPolicy::default().with_polling_interval(Duration::from_millis(1));
        let mut attempts = 0;
        let value = policy
            .acquire("test", || {
                attempts += 1;
                Ok(if attempts < 3 { None } else { Some(attempts) })
            })
            .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_timeout_reports_busy() {
        let policy = BusyPolicy::default()
            .with_polling_interval(Duration::from_millis(1))
            .with_timeout(Duration::from_millis(10));
        let err = policy.acquire::<()>("test", || Ok(None)).unwrap_err();
        assert!(err.is_busy());
    }

    #[test]
    fn test_error_stops_polling() {
        let policy = BusyPolicy::default();
        let err = policy
            .acquire::<()>("test", || Err(KoyaError::invalid_operation("nope")))
            .unwrap_err();
        assert!(matches!(err, KoyaError::InvalidOperation(_)));
    }
}
