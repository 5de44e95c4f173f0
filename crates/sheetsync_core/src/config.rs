//! Update engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff for commit conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Retry up to `max_attempts` times with the default delays.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the first delay and the cap.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Attempt budget, never zero.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the given failed attempt (1-based): `initial * 2^(attempt-1)`,
    /// capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << exponent)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Settings for [`crate::engine::UpdateEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Conflict retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Upper bound on one fetch.
    #[serde(with = "duration_ms", default = "default_fetch_timeout")]
    pub fetch_timeout: Duration,
    /// Upper bound on one conditional commit.
    #[serde(with = "duration_ms", default = "default_commit_timeout")]
    pub commit_timeout: Duration,
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_commit_timeout() -> Duration {
    Duration::from_secs(120)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            fetch_timeout: default_fetch_timeout(),
            commit_timeout: default_commit_timeout(),
        }
    }
}

impl EngineConfig {
    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Replace the commit timeout.
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.retry.max_backoff, Duration::from_secs(5));
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.commit_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(7), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).attempts(), 1);
    }

    #[test]
    fn test_config_from_json() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"retry":{"max_attempts":3,"initial_backoff":10,"max_backoff":50},"fetch_timeout":1000}"#,
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_for(4), Duration::from_millis(50));
        assert_eq!(config.fetch_timeout, Duration::from_secs(1));
        assert_eq!(config.commit_timeout, Duration::from_secs(120));
    }
}
