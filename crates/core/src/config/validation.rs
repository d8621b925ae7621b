//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CONFIG_ERROR: failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("CONFIG_ERROR: invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

fn check_timeout(field: &str, value: u64) -> Result<(), ConfigError> {
    if value < 100 {
        return Err(invalid(field, "must be at least 100ms"));
    }
    if value > 300_000 {
        return Err(invalid(field, "must not exceed 5 minutes (300000ms)"));
    }
    Ok(())
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for out-of-range timeouts, retry
    /// counts, backoff parameters or TTLs, a non-http(s) `base_url`, or an
    /// empty `user_agent`/`locale`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match url::Url::parse(&self.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => return Err(invalid("base_url", format!("unsupported scheme: {}", url.scheme()))),
            Err(e) => return Err(invalid("base_url", e.to_string())),
        }

        if self.user_agent.trim().is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        if self.locale.trim().is_empty() {
            return Err(invalid("locale", "must not be empty"));
        }
        if !(-840..=840).contains(&self.tz_offset) {
            return Err(invalid("tz_offset", "must be within -840..=840 minutes"));
        }

        check_timeout("connect_timeout_ms", self.connect_timeout_ms)?;
        check_timeout("read_timeout_ms", self.read_timeout_ms)?;

        if !(1..=10).contains(&self.max_retries) {
            return Err(invalid("max_retries", "must be between 1 and 10"));
        }
        if self.bootstrap_max_attempts == 0 {
            return Err(invalid("bootstrap_max_attempts", "must be at least 1"));
        }
        if self.session_failure_threshold == 0 {
            return Err(invalid("session_failure_threshold", "must be at least 1"));
        }

        if self.backoff_base_ms == 0 {
            return Err(invalid("backoff_base_ms", "must be greater than 0"));
        }
        if self.network_backoff_base_ms == 0 {
            return Err(invalid("network_backoff_base_ms", "must be greater than 0"));
        }
        if !(1.5..=2.0).contains(&self.backoff_factor) {
            return Err(invalid("backoff_factor", "must be between 1.5 and 2.0"));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(invalid("backoff_cap_ms", "must not be below backoff_base_ms"));
        }

        if self.max_cache_bytes != 0 && self.max_cache_bytes < self.inline_payload_max_bytes as u64 {
            return Err(invalid("max_cache_bytes", "must be 0 (unbounded) or at least inline_payload_max_bytes"));
        }

        if self.success_ttl_secs == 0 {
            return Err(invalid("success_ttl_secs", "must be greater than 0"));
        }
        if self.empty_ttl_secs == 0 {
            return Err(invalid("empty_ttl_secs", "must be greater than 0"));
        }
        if self.session_max_age_secs == 0 {
            return Err(invalid("session_max_age_secs", "must be greater than 0"));
        }

        if self.empty_ttl_secs > self.success_ttl_secs {
            tracing::warn!(
                empty_ttl_secs = self.empty_ttl_secs,
                success_ttl_secs = self.success_ttl_secs,
                "empty_ttl_secs exceeds success_ttl_secs; empty results will outlive real data"
            );
        }
        if self.min_request_interval_ms < 1_000 {
            tracing::warn!(
                min_request_interval_ms = self.min_request_interval_ms,
                "min_request_interval_ms below 1s is likely to trigger provider throttling"
            );
        }

        Ok(())
    }
}
