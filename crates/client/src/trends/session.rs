//! HTTP session state: cookie jar, anti-forgery token and health counters.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::redirect::{Attempt, Policy};
use tokio::time::Instant;
use trendmine_core::Error;

use super::TrendsConfig;

const MAX_REDIRECTS: usize = 5;

fn redirect_policy() -> Policy {
    Policy::custom(|attempt: Attempt| {
        // Surface the block page to the caller as a throttle instead of following it.
        if attempt.url().path().starts_with("/sorry") {
            attempt.stop()
        } else if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else {
            attempt.follow()
        }
    })
}

fn default_headers(config: &TrendsConfig) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
    let language = HeaderValue::from_str(&config.accept_language)
        .map_err(|e| Error::InvalidInput(format!("invalid accept_language: {e}")))?;
    headers.insert(header::ACCEPT_LANGUAGE, language);
    Ok(headers)
}

/// One provider session. Rebuilt from scratch on reset.
#[derive(Debug)]
pub struct Session {
    pub(crate) http: reqwest::Client,
    pub(crate) token: Option<String>,
    pub(crate) bootstrapped_at: Option<Instant>,
    pub(crate) last_success: Option<Instant>,
    pub(crate) consecutive_failures: u32,
    pub(crate) stale: bool,
}

impl Session {
    pub fn new(config: &TrendsConfig) -> Result<Self, Error> {
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar)
            .user_agent(&config.user_agent)
            .default_headers(default_headers(config)?)
            .connect_timeout(config.connect_timeout)
            .redirect(redirect_policy())
            .build()
            .map_err(|e| Error::NetworkError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            token: None,
            bootstrapped_at: None,
            last_success: None,
            consecutive_failures: 0,
            stale: false,
        })
    }

    /// Whether a bootstrap is required before the next request.
    pub fn needs_bootstrap(&self, max_age: Duration) -> bool {
        let Some(bootstrapped_at) = self.bootstrapped_at else {
            return true;
        };
        if self.stale {
            return true;
        }
        let last_good = self.last_success.unwrap_or(bootstrapped_at);
        last_good.elapsed() >= max_age
    }

    pub(crate) fn mark_bootstrapped(&mut self, token: Option<String>) {
        self.token = token;
        self.bootstrapped_at = Some(Instant::now());
        self.stale = false;
    }

    pub(crate) fn record_success(&mut self) {
        self.last_success = Some(Instant::now());
        self.consecutive_failures = 0;
    }

    /// Count a failed query. Returns true once `threshold` is reached.
    pub(crate) fn record_failure(&mut self, threshold: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trendmine_core::AppConfig;

    fn session() -> Session {
        Session::new(&TrendsConfig::from_app(&AppConfig::default())).unwrap()
    }

    #[test]
    fn test_default_headers() {
        let headers = default_headers(&TrendsConfig::from_app(&AppConfig::default())).unwrap();
        assert_eq!(headers[header::ACCEPT], "*/*");
        assert_eq!(headers[header::ACCEPT_LANGUAGE], "en-US,en;q=0.9");

        let config = TrendsConfig { accept_language: "bad\nvalue".into(), ..TrendsConfig::default() };
        assert!(default_headers(&config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_needs_bootstrap() {
        let mut session = session();
        assert!(session.needs_bootstrap(Duration::from_secs(60)));

        session.mark_bootstrapped(Some("tok".into()));
        assert!(!session.needs_bootstrap(Duration::from_secs(60)));
        assert_eq!(session.token.as_deref(), Some("tok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_ages_out_without_success() {
        let mut session = session();
        session.mark_bootstrapped(None);

        tokio::time::advance(Duration::from_secs(30)).await;
        session.record_success();
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(!session.needs_bootstrap(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(session.needs_bootstrap(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_flag_forces_bootstrap() {
        let mut session = session();
        session.mark_bootstrapped(None);
        session.stale = true;
        assert!(session.needs_bootstrap(Duration::from_secs(3600)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_threshold() {
        let mut session = session();
        assert!(!session.record_failure(3));
        assert!(!session.record_failure(3));
        assert!(session.record_failure(3));

        session.record_success();
        assert_eq!(session.consecutive_failures, 0);
    }
}
