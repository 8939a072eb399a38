//! Cache behavior configuration.

use std::num::NonZeroUsize;

use serde::Deserialize;
use time::Duration;

use crate::util::backoff::Backoff;

// Default values for cache configuration
const DEFAULT_ENTRY_LIMIT: usize = 512;
const DEFAULT_STALE_AFTER_SECS: u64 = 30;
const DEFAULT_RETRY_LIMIT: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Cache and query behavior knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries in the store before LRU eviction.
    pub entry_limit: usize,
    /// Freshness window applied when a fetch plan does not override it.
    pub default_stale_after_secs: u64,
    /// Automatic retries for transient fetch failures.
    pub retry_limit: u32,
    /// First retry delay; later attempts back off exponentially.
    pub retry_base_delay_ms: u64,
    /// Ceiling on the backoff delay.
    pub retry_max_delay_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_limit: DEFAULT_ENTRY_LIMIT,
            default_stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            entry_limit: settings.entry_limit,
            default_stale_after_secs: settings.default_stale_after_secs,
            retry_limit: settings.retry_limit,
            retry_base_delay_ms: settings.retry_base_delay_ms,
            retry_max_delay_ms: settings.retry_max_delay_ms,
        }
    }
}

impl CacheConfig {
    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn entry_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.entry_limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn default_stale_after(&self) -> Duration {
        Duration::seconds(self.default_stale_after_secs as i64)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.retry_base_delay_ms, self.retry_max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.entry_limit, 512);
        assert_eq!(config.default_stale_after_secs, 30);
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.retry_base_delay_ms, 200);
        assert_eq!(config.retry_max_delay_ms, 5_000);
    }

    #[test]
    fn entry_limit_clamps_to_min() {
        let config = CacheConfig {
            entry_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.entry_limit_non_zero().get(), 1);
    }

    #[test]
    fn stale_window_converts_to_duration() {
        let config = CacheConfig {
            default_stale_after_secs: 90,
            ..Default::default()
        };
        assert_eq!(config.default_stale_after(), Duration::seconds(90));
    }
}
