//! Polling policy for the pull-only loops.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How often to poll and how long to keep trying.
///
/// A `timeout` of `None` polls forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether a loop that began at `started` has run out of time.
    pub fn expired(&self, started: Instant) -> bool {
        self.expired_after(started.elapsed())
    }

    pub fn expired_after(&self, elapsed: Duration) -> bool {
        self.timeout.map(|timeout| elapsed >= timeout).unwrap_or(false)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_never_expires() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert!(!policy.expired_after(Duration::from_secs(3600)));
    }

    #[test]
    fn test_timeout_expiry() {
        let policy = PollPolicy::new(Duration::from_millis(10)).with_timeout(Duration::from_secs(5));
        assert!(!policy.expired(Instant::now()));
        assert!(policy.expired_after(Duration::from_secs(6)));
    }
}
