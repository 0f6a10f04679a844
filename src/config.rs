//! Configuration for the orchestration core.
//!
//! Values come from typed defaults overridable through `MOLDOCK_*`
//! environment variables. Per-task and per-tenant overrides (cache
//! threshold, timeouts) layer on top of these at the orchestration layer.

use crate::error::{MoldockError, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MoldockConfig {
    pub database_url: String,
    /// Minimum confidence score for a cache entry to be served as a hit.
    pub cache_confidence_threshold: f64,
    /// Default TTL applied to new cache entries. None disables expiry.
    pub cache_ttl: Option<Duration>,
    /// Retries allowed after the initial attempt for retryable failures.
    pub retry_limit: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Wall-clock bound on a single engine invocation.
    pub engine_timeout: Duration,
    /// How long a worker waits between empty queue polls.
    pub worker_poll_interval: Duration,
    /// Queue visibility lease; an unacked message is redelivered after this.
    pub queue_lease: Duration,
    /// Grace period for a cancelled RUNNING job to tear down before the
    /// cancellation escalates to a forced failure.
    pub cancellation_grace: Duration,
    /// RUNNING jobs without a heartbeat older than this are reaped to FAILED.
    pub stale_running_threshold: Duration,
    pub event_channel_capacity: usize,
}

impl Default for MoldockConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/moldock_development".to_string(),
            cache_confidence_threshold: 0.8,
            cache_ttl: None,
            retry_limit: 2,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            engine_timeout: Duration::from_secs(1800),
            worker_poll_interval: Duration::from_millis(250),
            queue_lease: Duration::from_secs(300),
            cancellation_grace: Duration::from_secs(30),
            stale_running_threshold: Duration::from_secs(3600),
            event_channel_capacity: 1000,
        }
    }
}

impl MoldockConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(threshold) = std::env::var("MOLDOCK_CACHE_CONFIDENCE_THRESHOLD") {
            config.cache_confidence_threshold = threshold.parse().map_err(|e| {
                MoldockError::Configuration(format!("Invalid cache_confidence_threshold: {e}"))
            })?;
            if !(0.0..=1.0).contains(&config.cache_confidence_threshold) {
                return Err(MoldockError::Configuration(
                    "cache_confidence_threshold must be within [0, 1]".to_string(),
                ));
            }
        }

        if let Ok(ttl_secs) = std::env::var("MOLDOCK_CACHE_TTL_SECS") {
            let secs: u64 = ttl_secs
                .parse()
                .map_err(|e| MoldockError::Configuration(format!("Invalid cache_ttl_secs: {e}")))?;
            config.cache_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Ok(retry_limit) = std::env::var("MOLDOCK_RETRY_LIMIT") {
            config.retry_limit = retry_limit
                .parse()
                .map_err(|e| MoldockError::Configuration(format!("Invalid retry_limit: {e}")))?;
        }

        if let Ok(base) = std::env::var("MOLDOCK_BACKOFF_BASE_MS") {
            config.backoff_base_ms = base
                .parse()
                .map_err(|e| MoldockError::Configuration(format!("Invalid backoff_base_ms: {e}")))?;
        }

        if let Ok(max) = std::env::var("MOLDOCK_BACKOFF_MAX_MS") {
            config.backoff_max_ms = max
                .parse()
                .map_err(|e| MoldockError::Configuration(format!("Invalid backoff_max_ms: {e}")))?;
        }

        if let Ok(timeout) = std::env::var("MOLDOCK_ENGINE_TIMEOUT_SECS") {
            let secs: u64 = timeout.parse().map_err(|e| {
                MoldockError::Configuration(format!("Invalid engine_timeout_secs: {e}"))
            })?;
            config.engine_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Exponential backoff delay for the given retry attempt (1-based),
    /// capped at `backoff_max_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MoldockConfig::default();
        assert_eq!(config.cache_confidence_threshold, 0.8);
        assert_eq!(config.retry_limit, 2);
        assert!(config.cache_ttl.is_none());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = MoldockConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 1000,
            ..MoldockConfig::default()
        };
        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(10), Duration::from_millis(1000));
        // Large attempt counts must not overflow the shift.
        assert_eq!(config.backoff_delay(100), Duration::from_millis(1000));
    }
}
