//! Configuration Module
//!
//! Handles loading engine configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace segment prefixed to every entry key
    pub namespace: String,
    /// Default TTL in seconds for read-through and write-through entries
    pub default_ttl: u64,
    /// Timeout applied to every backend call, in milliseconds
    pub backend_timeout_ms: u64,
    /// Write-behind flush period in milliseconds
    pub flush_interval_ms: u64,
    /// Maximum pending writes persisted per flush
    pub flush_batch_size: usize,
    /// Persist attempts before a pending write is dead-lettered
    pub flush_max_retries: u32,
    /// Base of the exponential flush retry backoff, in milliseconds
    pub flush_retry_backoff_ms: u64,
    /// Base of the jittered lock retry interval, in milliseconds
    pub lock_retry_interval_ms: u64,
    /// In-memory backend sweep interval in seconds
    pub cleanup_interval: u64,
    /// Pub/sub channel carrying invalidation events
    pub invalidation_channel: String,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAMESPACE` - Entry key namespace, no `:` allowed (default: app)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `BACKEND_TIMEOUT_MS` - Backend call timeout (default: 500)
    /// - `FLUSH_INTERVAL_MS` - Write-behind flush period (default: 200)
    /// - `FLUSH_BATCH_SIZE` - Pending writes per flush (default: 64)
    /// - `FLUSH_MAX_RETRIES` - Attempts before dead-lettering (default: 5)
    /// - `FLUSH_RETRY_BACKOFF_MS` - Base retry backoff (default: 100)
    /// - `LOCK_RETRY_INTERVAL_MS` - Base lock retry interval (default: 50)
    /// - `CLEANUP_INTERVAL` - In-memory sweep frequency in seconds (default: 1)
    /// - `INVALIDATION_CHANNEL` - Pub/sub channel (default: cache:invalidation)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            namespace: env::var("CACHE_NAMESPACE")
                .ok()
                .filter(|v| !v.is_empty() && !v.contains(':'))
                .unwrap_or(defaults.namespace),
            default_ttl: parse_var("DEFAULT_TTL").unwrap_or(defaults.default_ttl),
            backend_timeout_ms: parse_var("BACKEND_TIMEOUT_MS")
                .unwrap_or(defaults.backend_timeout_ms),
            flush_interval_ms: parse_var("FLUSH_INTERVAL_MS")
                .unwrap_or(defaults.flush_interval_ms),
            flush_batch_size: parse_var("FLUSH_BATCH_SIZE").unwrap_or(defaults.flush_batch_size),
            flush_max_retries: parse_var("FLUSH_MAX_RETRIES")
                .unwrap_or(defaults.flush_max_retries),
            flush_retry_backoff_ms: parse_var("FLUSH_RETRY_BACKOFF_MS")
                .unwrap_or(defaults.flush_retry_backoff_ms),
            lock_retry_interval_ms: parse_var("LOCK_RETRY_INTERVAL_MS")
                .unwrap_or(defaults.lock_retry_interval_ms),
            cleanup_interval: parse_var("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            invalidation_channel: env::var("INVALIDATION_CHANNEL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.invalidation_channel),
        }
    }

    /// Default TTL as a Duration.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    /// Backend call timeout as a Duration.
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    /// Write-behind flush period as a Duration, at least one millisecond.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    /// Base flush retry backoff as a Duration.
    pub fn flush_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.flush_retry_backoff_ms)
    }

    /// Base lock retry interval as a Duration.
    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "app".to_string(),
            default_ttl: 300,
            backend_timeout_ms: 500,
            flush_interval_ms: 200,
            flush_batch_size: 64,
            flush_max_retries: 5,
            flush_retry_backoff_ms: 100,
            lock_retry_interval_ms: 50,
            cleanup_interval: 1,
            invalidation_channel: "cache:invalidation".to_string(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.namespace, "app");
        assert_eq!(config.default_ttl, 300);
        assert_eq!(config.flush_batch_size, 64);
        assert_eq!(config.flush_max_retries, 5);
        assert_eq!(config.cleanup_interval, 1);
        assert_eq!(config.default_ttl(), Duration::from_secs(300));
        assert_eq!(config.backend_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_flush_interval_clamped() {
        let config = Config {
            flush_interval_ms: 0,
            ..Config::default()
        };
        assert_eq!(config.flush_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_config_from_env() {
        // Single test touches the environment so parallel tests don't race
        env::remove_var("DEFAULT_TTL");
        env::remove_var("FLUSH_BATCH_SIZE");
        env::remove_var("CACHE_NAMESPACE");

        let config = Config::from_env();
        assert_eq!(config.namespace, "app");
        assert_eq!(config.default_ttl, 300);

        env::set_var("CACHE_NAMESPACE", "app:orders");
        assert_eq!(Config::from_env().namespace, "app");

        env::set_var("CACHE_NAMESPACE", "orders");
        env::set_var("FLUSH_BATCH_SIZE", "8");
        env::set_var("DEFAULT_TTL", "not-a-number");

        let config = Config::from_env();
        assert_eq!(config.namespace, "orders");
        assert_eq!(config.flush_batch_size, 8);
        assert_eq!(config.default_ttl, 300);

        env::remove_var("CACHE_NAMESPACE");
        env::remove_var("FLUSH_BATCH_SIZE");
        env::remove_var("DEFAULT_TTL");
    }
}
