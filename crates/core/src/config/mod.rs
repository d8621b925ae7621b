//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (TRENDMINE_*)
//! 2. TOML config file (if TRENDMINE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "TRENDMINE_CONFIG_FILE";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TRENDMINE_";

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (TRENDMINE_*)
/// 2. TOML config file (if TRENDMINE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory holding the cache index and payload files.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Provider origin. Overridden in tests to point at a mock server.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Browser User-Agent sent on every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    /// Provider UI language (`hl` parameter); also part of every fingerprint.
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Timezone offset in minutes (`tz` parameter).
    #[serde(default = "default_tz_offset")]
    pub tz_offset: i32,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Total request attempts per query, shared by throttle and transport retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_bootstrap_max_attempts")]
    pub bootstrap_max_attempts: u32,

    #[serde(default = "default_bootstrap_retry_delay_ms")]
    pub bootstrap_retry_delay_ms: u64,

    /// Base delay after a throttling response.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Base delay after a transport error or timeout.
    #[serde(default = "default_network_backoff_base_ms")]
    pub network_backoff_base_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Apply ±50% jitter to every backoff delay.
    #[serde(default = "default_true")]
    pub backoff_jitter: bool,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Minimum spacing between any two outbound requests, process-wide.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    /// Sliding one-minute request budget on top of the spacing; 0 disables it.
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,

    #[serde(default = "default_success_ttl_secs")]
    pub success_ttl_secs: u64,

    #[serde(default = "default_empty_ttl_secs")]
    pub empty_ttl_secs: u64,

    /// Bodies larger than this go to the payload directory.
    #[serde(default = "default_inline_payload_max_bytes")]
    pub inline_payload_max_bytes: usize,

    /// Stored body bytes (inline and file) before entries are evicted; 0 disables the cap.
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,

    /// Fetch missing entries during prewarm; when false prewarm only reports coverage.
    #[serde(default = "default_true")]
    pub offline_prewarm: bool,

    /// Consecutive failed queries before the session is rebuilt.
    #[serde(default = "default_session_failure_threshold")]
    pub session_failure_threshold: u32,

    /// A session with no success for this long is bootstrapped again.
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: u64,

    /// Count `empty` results toward the session failure threshold.
    #[serde(default)]
    pub count_empty_as_failure: bool,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./trendmine-cache")
}

fn default_base_url() -> String {
    "https://trends.google.com".into()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
        .into()
}

fn default_accept_language() -> String {
    "en-US,en;q=0.9".into()
}

fn default_locale() -> String {
    "en-US".into()
}

fn default_tz_offset() -> i32 {
    360
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_bootstrap_max_attempts() -> u32 {
    2
}

fn default_bootstrap_retry_delay_ms() -> u64 {
    2_000
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_network_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_backoff_cap_ms() -> u64 {
    120_000
}

fn default_min_request_interval_ms() -> u64 {
    5_000
}

fn default_max_requests_per_minute() -> u32 {
    8
}

fn default_success_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_empty_ttl_secs() -> u64 {
    60 * 60
}

fn default_inline_payload_max_bytes() -> usize {
    16 * 1024
}

fn default_max_cache_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_session_failure_threshold() -> u32 {
    3
}

fn default_session_max_age_secs() -> u64 {
    30 * 60
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            locale: default_locale(),
            tz_offset: default_tz_offset(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            max_retries: default_max_retries(),
            bootstrap_max_attempts: default_bootstrap_max_attempts(),
            bootstrap_retry_delay_ms: default_bootstrap_retry_delay_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            network_backoff_base_ms: default_network_backoff_base_ms(),
            backoff_factor: default_backoff_factor(),
            backoff_jitter: true,
            backoff_cap_ms: default_backoff_cap_ms(),
            min_request_interval_ms: default_min_request_interval_ms(),
            max_requests_per_minute: default_max_requests_per_minute(),
            success_ttl_secs: default_success_ttl_secs(),
            empty_ttl_secs: default_empty_ttl_secs(),
            inline_payload_max_bytes: default_inline_payload_max_bytes(),
            max_cache_bytes: default_max_cache_bytes(),
            offline_prewarm: true,
            session_failure_threshold: default_session_failure_threshold(),
            session_max_age_secs: default_session_max_age_secs(),
            count_empty_as_failure: false,
        }
    }
}

impl AppConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn success_ttl(&self) -> Duration {
        Duration::from_secs(self.success_ttl_secs)
    }

    pub fn empty_ttl(&self) -> Duration {
        Duration::from_secs(self.empty_ttl_secs)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed, or
    /// validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Self::figment()
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// The layered provider stack, before extraction.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var(CONFIG_FILE_ENV) {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }
}
