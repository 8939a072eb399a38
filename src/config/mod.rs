//! Configuration layer: typed settings with layered precedence (file → env).
//!
//! Hosts embed tessera as a library, so there is no CLI layer here; the
//! embedding application may stack its own overrides on top of the
//! loaded [`Settings`].

use std::str::FromStr;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::PollPolicy;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tessera";
const ENV_PREFIX: &str = "TESSERA";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENTRY_LIMIT: usize = 512;
const DEFAULT_STALE_AFTER_SECS: u64 = 30;
const DEFAULT_RETRY_LIMIT: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_POLL_DEADLINE_SECS: u64 = 120;
const DEFAULT_POLL_MAX_CONSECUTIVE_ERRORS: u32 = 3;
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000/api";
const DEFAULT_TRANSPORT_TIMEOUT_SECS: u64 = 10;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub poll: PollSettings,
    pub transport: TransportSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub entry_limit: usize,
    pub default_stale_after_secs: u64,
    pub retry_limit: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub deadline: Duration,
    pub max_consecutive_errors: u32,
}

impl PollSettings {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.interval,
            deadline: self.deadline,
            max_consecutive_errors: self.max_consecutive_errors,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub base_url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment).
pub fn load() -> Result<Settings, LoadError> {
    let raw: RawSettings = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize()?;

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    poll: RawPollSettings,
    transport: RawTransportSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    entry_limit: Option<usize>,
    default_stale_after_secs: Option<u64>,
    retry_limit: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPollSettings {
    interval_ms: Option<u64>,
    deadline_secs: Option<u64>,
    max_consecutive_errors: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTransportSettings {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            logging: build_logging_settings(raw.logging)?,
            cache: build_cache_settings(raw.cache),
            poll: build_poll_settings(raw.poll)?,
            transport: build_transport_settings(raw.transport)?,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_raw(RawSettings::default()).expect("default settings are valid")
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level_str = logging.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
    let level = LevelFilter::from_str(level_str)
        .map_err(|_| LoadError::invalid("logging.level", format!("unknown level `{level_str}`")))?;

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> CacheSettings {
    CacheSettings {
        entry_limit: cache.entry_limit.unwrap_or(DEFAULT_ENTRY_LIMIT),
        default_stale_after_secs: cache
            .default_stale_after_secs
            .unwrap_or(DEFAULT_STALE_AFTER_SECS),
        retry_limit: cache.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT),
        retry_base_delay_ms: cache
            .retry_base_delay_ms
            .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
        retry_max_delay_ms: cache
            .retry_max_delay_ms
            .unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS),
    }
}

fn build_poll_settings(poll: RawPollSettings) -> Result<PollSettings, LoadError> {
    let interval_ms = poll.interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
    if interval_ms == 0 {
        return Err(LoadError::invalid(
            "poll.interval_ms",
            "interval must be positive",
        ));
    }
    let deadline_secs = poll.deadline_secs.unwrap_or(DEFAULT_POLL_DEADLINE_SECS);
    if deadline_secs == 0 {
        return Err(LoadError::invalid(
            "poll.deadline_secs",
            "deadline must be positive",
        ));
    }

    Ok(PollSettings {
        interval: Duration::from_millis(interval_ms),
        deadline: Duration::from_secs(deadline_secs),
        max_consecutive_errors: poll
            .max_consecutive_errors
            .unwrap_or(DEFAULT_POLL_MAX_CONSECUTIVE_ERRORS),
    })
}

fn build_transport_settings(
    transport: RawTransportSettings,
) -> Result<TransportSettings, LoadError> {
    let base_url_str = transport.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let base_url = Url::parse(base_url_str)
        .map_err(|err| LoadError::invalid("transport.base_url", err.to_string()))?;

    Ok(TransportSettings {
        base_url,
        timeout: Duration::from_secs(
            transport
                .timeout_secs
                .unwrap_or(DEFAULT_TRANSPORT_TIMEOUT_SECS),
        ),
    })
}
