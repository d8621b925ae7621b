//! Backoff schedules with optional jitter.

use std::time::Duration;

use trendmine_core::AppConfig;

/// Delay schedule applied between retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay for every attempt.
    Fixed { delay: Duration },
    /// `base * factor^attempt`, jittered by ±50% when enabled, never above `max`.
    Exponential { base: Duration, factor: f64, max: Duration, jitter: bool },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(2),
            factor: 2.0,
            max: Duration::from_secs(120),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Schedule used after throttling responses.
    pub fn throttle_from_app(config: &AppConfig) -> Self {
        Self::Exponential {
            base: Duration::from_millis(config.backoff_base_ms),
            factor: config.backoff_factor,
            max: Duration::from_millis(config.backoff_cap_ms),
            jitter: config.backoff_jitter,
        }
    }

    /// Shorter schedule used after transport errors and timeouts.
    pub fn network_from_app(config: &AppConfig) -> Self {
        Self::Exponential {
            base: Duration::from_millis(config.network_backoff_base_ms),
            factor: config.backoff_factor,
            max: Duration::from_millis(config.backoff_cap_ms),
            jitter: config.backoff_jitter,
        }
    }

    /// Upper bound on any delay this schedule produces.
    pub fn cap(self) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential { max, .. } => max,
        }
    }

    /// Delay for the given retry attempt (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential { base, factor, max, jitter } => {
                let scale = factor.powi(attempt.min(64) as i32);
                let seconds = (base.as_secs_f64() * scale).min(max.as_secs_f64());
                let mut delay = Duration::from_secs_f64(seconds);

                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms = delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay.min(max)
            }
        }
    }
}
