//! Process-wide request rate limiter.
//!
//! One [`RateLimiter`] is shared (`Arc`) by every client in the process. It
//! enforces a minimum spacing between outbound requests, a per-minute budget
//! and a cooldown window after throttling signals:
//!
//! - `acquire()` releases only once `now >= max(last_request + min_interval, cooldown_until)`
//!   and fewer than `max_per_minute` releases fall in the trailing minute
//! - `report_rate_limited()` pushes `cooldown_until` out by a jittered exponential delay
//! - `report_success()` restarts the backoff growth
//!
//! Waiters queue on a fair async mutex, so callers are released roughly in
//! the order they called `acquire()`. The cooldown is re-checked after every
//! sleep; a throttle reported while a caller waits extends that caller's wait.

pub mod backoff;

pub use backoff::Backoff;

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use trendmine_core::AppConfig;

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterConfig {
    /// Minimum spacing between two releases (default: 5s).
    pub min_interval: Duration,
    /// Releases allowed in any sliding 60s window; 0 disables the window (default: 8).
    pub max_per_minute: u32,
    /// Cooldown schedule after throttling (default: 2s base, 2x, 120s cap, jitter).
    pub backoff: Backoff,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { min_interval: Duration::from_secs(5), max_per_minute: 8, backoff: Backoff::default() }
    }
}

impl LimiterConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            min_interval: config.min_request_interval(),
            max_per_minute: config.max_requests_per_minute,
            backoff: Backoff::throttle_from_app(config),
        }
    }
}

/// The caller-supplied deadline passed before the limiter could release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline exceeded while waiting for the rate limiter")]
pub struct DeadlineExceeded;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct LimiterState {
    last_request: Option<Instant>,
    cooldown_until: Option<Instant>,
    consecutive_throttles: u32,
    last_window: Duration,
    /// Release instants inside the trailing minute, oldest first.
    grants: VecDeque<Instant>,
    total_requests: u64,
    total_throttles: u64,
}

impl LimiterState {
    fn release_at(&mut self, config: &LimiterConfig, now: Instant) -> Option<Instant> {
        while self.grants.front().is_some_and(|granted| *granted + WINDOW <= now) {
            self.grants.pop_front();
        }

        let budget = config.max_per_minute as usize;
        let window = (budget > 0 && self.grants.len() >= budget)
            .then(|| self.grants[self.grants.len() - budget] + WINDOW);
        let spacing = self.last_request.map(|last| last + config.min_interval);

        [spacing, self.cooldown_until, window].into_iter().flatten().max()
    }

    fn grant(&mut self, now: Instant) -> Instant {
        let released = self.last_request.map_or(now, |last| last.max(now));
        self.last_request = Some(released);
        self.grants.push_back(released);
        self.total_requests = self.total_requests.saturating_add(1);
        released
    }
}

/// Point-in-time view of the limiter, for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSnapshot {
    pub consecutive_throttles: u32,
    pub cooldown_remaining: Option<Duration>,
    pub last_window: Duration,
    /// Releases within the trailing minute.
    pub window_requests: usize,
    pub total_requests: u64,
    pub total_throttles: u64,
}

/// Shared outbound request gate.
#[derive(Debug)]
pub struct RateLimiter {
    turnstile: Mutex<()>,
    state: StdMutex<LimiterState>,
    config: LimiterConfig,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self { turnstile: Mutex::new(()), state: StdMutex::new(LimiterState::default()), config }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until a request may be issued. Returns the release instant.
    pub async fn acquire(&self) -> Instant {
        match self.acquire_until(None).await {
            Ok(released) => released,
            // Unreachable without a deadline.
            Err(DeadlineExceeded) => Instant::now(),
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up once `deadline` passes.
    ///
    /// Fails immediately when the earliest possible release is already past
    /// the deadline, instead of sleeping until it.
    pub async fn acquire_until(&self, deadline: Option<Instant>) -> Result<Instant, DeadlineExceeded> {
        let _turn = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.turnstile.lock())
                .await
                .map_err(|_| DeadlineExceeded)?,
            None => self.turnstile.lock().await,
        };

        loop {
            let now = Instant::now();
            let release_at = self.state().release_at(&self.config, now);

            match release_at {
                Some(at) if at > now => {
                    if let Some(deadline) = deadline
                        && at > deadline
                    {
                        tracing::debug!(wait_ms = (at - now).as_millis() as u64, "Rate limiter wait exceeds deadline");
                        return Err(DeadlineExceeded);
                    }
                    tracing::debug!(wait_ms = (at - now).as_millis() as u64, "Rate limiter holding request");
                    tokio::time::sleep_until(at).await;
                }
                _ => return Ok(self.state().grant(now)),
            }
        }
    }

    /// Record a throttling response and open (or extend) the cooldown window.
    ///
    /// `retry_after` from the provider acts as a floor. Consecutive reports
    /// produce strictly growing windows until the cap. Returns the window
    /// applied.
    pub fn report_rate_limited(&self, retry_after: Option<Duration>) -> Duration {
        let cap = self.config.backoff.cap();
        let now = Instant::now();
        let mut state = self.state();

        let attempt = state.consecutive_throttles;
        let mut window = self.config.backoff.delay(attempt);
        if let Some(retry_after) = retry_after {
            window = window.max(retry_after);
        }
        if attempt > 0 {
            window = window.max(state.last_window + Duration::from_millis(1));
        }
        window = window.min(cap);

        let until = now + window;
        state.cooldown_until = Some(state.cooldown_until.map_or(until, |existing| existing.max(until)));
        state.consecutive_throttles = attempt.saturating_add(1);
        state.total_throttles = state.total_throttles.saturating_add(1);
        state.last_window = window;

        tracing::warn!(
            consecutive_throttles = state.consecutive_throttles,
            cooldown_ms = window.as_millis() as u64,
            "Provider throttled; cooling down"
        );
        window
    }

    /// Reset backoff growth after a successful request.
    pub fn report_success(&self) {
        let mut state = self.state();
        if state.consecutive_throttles > 0 {
            tracing::debug!(consecutive_throttles = state.consecutive_throttles, "Throttle streak cleared");
        }
        state.consecutive_throttles = 0;
        state.last_window = Duration::ZERO;
    }

    pub fn snapshot(&self) -> LimiterSnapshot {
        let now = Instant::now();
        let state = self.state();
        LimiterSnapshot {
            consecutive_throttles: state.consecutive_throttles,
            cooldown_remaining: state.cooldown_until.filter(|until| *until > now).map(|until| until - now),
            last_window: state.last_window,
            window_requests: state.grants.iter().filter(|granted| **granted + WINDOW > now).count(),
            total_requests: state.total_requests,
            total_throttles: state.total_throttles,
        }
    }

    /// Forget spacing, cooldown, window and counters.
    pub fn reset(&self) {
        *self.state() = LimiterState::default();
        tracing::debug!("Rate limiter reset");
    }
}
