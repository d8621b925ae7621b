//! Trend data acquisition client.
//!
//! [`TrendsClient::execute`] drives one query through an explicit state
//! machine:
//!
//! ```text
//! INIT -> BOOTSTRAP -> REQUEST -> DONE
//!            ^  |        |  ^
//!            |  v        |  |
//!          (retry)  (throttle / transient retry)
//!            ^           |
//!            +-- 401/403 +
//! ```
//!
//! - **BOOTSTRAP** loads the landing page and the explore page to collect
//!   session cookies and the anti-forgery token. Runs when the session is new,
//!   stale, or older than `session_max_age` without a success.
//! - **REQUEST** performs the data calls. Every outbound request, bootstrap
//!   included, goes through the shared [`RateLimiter`].
//! - **DONE** carries the terminal [`FetchOutcome`]. Session health is
//!   settled there.
//!
//! A 2xx answer whose body is empty or not JSON is EMPTY, never retried.
//!
//! `max_retries` bounds the total number of REQUEST attempts. Throttling
//! (HTTP 429, or a redirect to the provider block page) is reported to the
//! limiter, which holds every caller in the process until the cooldown ends.
//! Transport errors and 5xx back off on a shorter local schedule. 401/403
//! mark the session stale and send the machine back to BOOTSTRAP.

pub mod outcome;
pub mod request;
pub mod response;
pub mod session;

pub use outcome::{FailureKind, FetchFailure, FetchOutcome};
pub use request::Endpoints;
pub use response::TrendPayload;
pub use session::Session;

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use tokio::time::Instant;
use trendmine_core::{AppConfig, Error, QueryFingerprint};
use url::Url;

use crate::limiter::{Backoff, RateLimiter};
use request::Plan;
use response::{ExploreResponse, strip_guard};

/// Header carrying the anti-forgery token on API calls.
const TOKEN_HEADER: &str = "x-goog-csrf-token";

/// Where the token sits in the explore page HTML.
const TOKEN_PATTERN: &str = r#""SNlM0e":"([^"]+)""#;

const NAVIGATION_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const API_ACCEPT: &str = "application/json, text/plain, */*";

/// Client configuration, derived from [`AppConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrendsConfig {
    pub base_url: String,
    pub user_agent: String,
    pub accept_language: String,
    pub locale: String,
    pub tz_offset: i32,
    pub connect_timeout: Duration,
    /// Per-request read timeout. A caller deadline can shorten it.
    pub read_timeout: Duration,
    /// Total REQUEST attempts per query.
    pub max_retries: u32,
    pub bootstrap_max_attempts: u32,
    pub bootstrap_retry_delay: Duration,
    /// Local schedule after transport errors and 5xx.
    pub network_backoff: Backoff,
    /// Consecutive failed queries before the session is rebuilt.
    pub failure_threshold: u32,
    pub session_max_age: Duration,
    pub count_empty_as_failure: bool,
}

impl TrendsConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            user_agent: config.user_agent.clone(),
            accept_language: config.accept_language.clone(),
            locale: config.locale.clone(),
            tz_offset: config.tz_offset,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            max_retries: config.max_retries.max(1),
            bootstrap_max_attempts: config.bootstrap_max_attempts.max(1),
            bootstrap_retry_delay: Duration::from_millis(config.bootstrap_retry_delay_ms),
            network_backoff: Backoff::network_from_app(config),
            failure_threshold: config.session_failure_threshold.max(1),
            session_max_age: Duration::from_secs(config.session_max_age_secs),
            count_empty_as_failure: config.count_empty_as_failure,
        }
    }
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

/// Result of one HTTP exchange (or one data call sequence), before the
/// state machine decides what to do with it.
#[derive(Debug)]
enum Attempt {
    Body(String),
    NoData,
    Throttled(Option<Duration>),
    SessionRejected(StatusCode),
    Transient { kind: FailureKind, message: String },
    /// Non-retryable provider answer.
    Rejected(String),
    DeadlineExceeded,
}

impl Attempt {
    fn describe(&self) -> String {
        match self {
            Attempt::Body(_) => "ok".into(),
            Attempt::NoData => "no data".into(),
            Attempt::Throttled(_) => "throttled".into(),
            Attempt::SessionRejected(status) => format!("session rejected (HTTP {})", status.as_u16()),
            Attempt::Transient { message, .. } | Attempt::Rejected(message) => message.clone(),
            Attempt::DeadlineExceeded => "deadline exceeded".into(),
        }
    }
}

impl From<Error> for Attempt {
    fn from(err: Error) -> Self {
        Attempt::Rejected(err.to_string())
    }
}

#[derive(Debug)]
enum State {
    Init,
    Bootstrap { attempt: u32 },
    Request,
    Done(FetchOutcome),
}

#[derive(Debug, Clone, Copy)]
enum RequestKind {
    Navigation,
    Api,
}

/// Parse `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    delta.to_std().ok()
}

fn redirects_to_block_page(response: &Response) -> bool {
    if Endpoints::is_block_page(response.url()) {
        return true;
    }
    response.status().is_redirection()
        && response
            .headers()
            .get(header::LOCATION)
            .and_then(|loc| loc.to_str().ok())
            .and_then(|loc| response.url().join(loc).ok())
            .is_some_and(|target| Endpoints::is_block_page(&target))
}

/// Sleep for `delay` unless that would overrun `deadline`.
async fn sleep_within(delay: Duration, deadline: Option<Instant>) -> bool {
    if let Some(deadline) = deadline
        && Instant::now() + delay > deadline
    {
        return false;
    }
    tokio::time::sleep(delay).await;
    true
}

/// Stateful client for the trends provider.
///
/// One instance owns one session. `execute` takes `&mut self`; share it
/// behind a mutex. The rate limiter is shared process-wide.
#[derive(Debug)]
pub struct TrendsClient {
    config: TrendsConfig,
    endpoints: Endpoints,
    limiter: Arc<RateLimiter>,
    session: Session,
    token_pattern: Regex,
    /// Explore page URL sent as `Referer` on API calls.
    referer: Url,
}

impl TrendsClient {
    pub fn new(config: TrendsConfig, limiter: Arc<RateLimiter>) -> Result<Self, Error> {
        let endpoints = Endpoints::new(&config.base_url, &config.locale, config.tz_offset)?;
        let session = Session::new(&config)?;
        let token_pattern =
            Regex::new(TOKEN_PATTERN).map_err(|e| Error::InvalidInput(format!("invalid token pattern: {e}")))?;
        let referer = endpoints.referer()?;
        Ok(Self { config, endpoints, limiter, session, token_pattern, referer })
    }

    pub fn config(&self) -> &TrendsConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Acquire data for one fingerprint.
    ///
    /// Never returns an error: every failure mode ends in
    /// [`FetchOutcome::Failed`]. `deadline` bounds limiter waits, request
    /// timeouts and backoff sleeps.
    pub async fn execute(&mut self, fingerprint: &QueryFingerprint, deadline: Option<Instant>) -> FetchOutcome {
        let mut state = State::Init;
        let mut request_attempts = 0u32;
        let mut network_failures = 0u32;
        let mut retry_after = None;

        loop {
            state = match state {
                State::Init => {
                    if self.session.needs_bootstrap(self.config.session_max_age) {
                        State::Bootstrap { attempt: 1 }
                    } else {
                        State::Request
                    }
                }

                State::Bootstrap { attempt } => match self.bootstrap(deadline).await {
                    Ok(()) => State::Request,
                    Err(Attempt::DeadlineExceeded) => {
                        State::Done(FetchOutcome::failed(FailureKind::Timeout, "deadline exceeded during bootstrap"))
                    }
                    Err(failed) => {
                        if let Attempt::Throttled(hint) = &failed {
                            retry_after = hint.or(retry_after);
                            self.limiter.report_rate_limited(*hint);
                        }
                        tracing::warn!(attempt, reason = %failed.describe(), "Session bootstrap failed");

                        if attempt >= self.config.bootstrap_max_attempts {
                            self.reset_session();
                            State::Done(FetchOutcome::failed(
                                FailureKind::BootstrapFailed,
                                format!("bootstrap failed after {attempt} attempts: {}", failed.describe()),
                            ))
                        } else if sleep_within(self.config.bootstrap_retry_delay, deadline).await {
                            State::Bootstrap { attempt: attempt + 1 }
                        } else {
                            State::Done(FetchOutcome::failed(
                                FailureKind::Timeout,
                                "deadline exceeded before bootstrap retry",
                            ))
                        }
                    }
                },

                State::Request => {
                    request_attempts += 1;
                    let exhausted = request_attempts >= self.config.max_retries;

                    match self.request(fingerprint, deadline).await {
                        Attempt::Body(body) => State::Done(FetchOutcome::Success(body)),
                        Attempt::NoData => State::Done(FetchOutcome::Empty),
                        Attempt::Throttled(hint) => {
                            retry_after = hint.or(retry_after);
                            self.limiter.report_rate_limited(hint);
                            if exhausted {
                                State::Done(FetchOutcome::Failed(FetchFailure {
                                    kind: FailureKind::RateLimited,
                                    retry_after,
                                    message: format!("throttled on all {request_attempts} attempts"),
                                }))
                            } else {
                                State::Request
                            }
                        }
                        Attempt::SessionRejected(status) => {
                            tracing::warn!(status = status.as_u16(), "Provider rejected session; bootstrapping again");
                            self.session.stale = true;
                            if exhausted {
                                State::Done(FetchOutcome::failed(
                                    FailureKind::NetworkError,
                                    format!("HTTP {} after {request_attempts} attempts", status.as_u16()),
                                ))
                            } else {
                                State::Bootstrap { attempt: 1 }
                            }
                        }
                        Attempt::Transient { kind, message } => {
                            if exhausted {
                                State::Done(FetchOutcome::failed(
                                    kind,
                                    format!("{message} (after {request_attempts} attempts)"),
                                ))
                            } else {
                                let delay = self.config.network_backoff.delay(network_failures);
                                network_failures += 1;
                                tracing::debug!(
                                    attempt = request_attempts,
                                    delay_ms = delay.as_millis() as u64,
                                    reason = %message,
                                    "Transient failure; retrying"
                                );
                                if sleep_within(delay, deadline).await {
                                    State::Request
                                } else {
                                    State::Done(FetchOutcome::failed(
                                        FailureKind::Timeout,
                                        format!("deadline exceeded before retry: {message}"),
                                    ))
                                }
                            }
                        }
                        Attempt::Rejected(message) => {
                            State::Done(FetchOutcome::failed(FailureKind::NetworkError, message))
                        }
                        Attempt::DeadlineExceeded => {
                            State::Done(FetchOutcome::failed(FailureKind::Timeout, "deadline exceeded"))
                        }
                    }
                }

                State::Done(outcome) => {
                    self.settle(&outcome);
                    tracing::info!(
                        query = %fingerprint,
                        status = %outcome.status(),
                        attempts = request_attempts,
                        "Acquisition finished"
                    );
                    return outcome;
                }
            };
        }
    }

    /// Session and limiter bookkeeping for a finished query.
    fn settle(&mut self, outcome: &FetchOutcome) {
        let failed = match outcome {
            FetchOutcome::Success(_) => {
                self.session.record_success();
                self.limiter.report_success();
                return;
            }
            FetchOutcome::Empty => {
                self.limiter.report_success();
                self.config.count_empty_as_failure
            }
            FetchOutcome::Failed(failure) => failure.kind != FailureKind::BootstrapFailed,
        };

        if failed && self.session.record_failure(self.config.failure_threshold) {
            tracing::warn!(
                consecutive_failures = self.session.consecutive_failures,
                "Session failure threshold reached; resetting session"
            );
            self.reset_session();
        }
    }

    fn reset_session(&mut self) {
        match Session::new(&self.config) {
            Ok(session) => self.session = session,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to rebuild session; forcing bootstrap on the old one");
                self.session.token = None;
                self.session.stale = true;
            }
        }
    }

    async fn bootstrap(&mut self, deadline: Option<Instant>) -> Result<(), Attempt> {
        let home = self.endpoints.home()?;
        let response = self.send(home, RequestKind::Navigation, deadline).await?;
        let landing = Self::read_body(response).await?;

        let explore = self.endpoints.explore_page()?;
        let response = self.send(explore, RequestKind::Navigation, deadline).await?;
        let explore_html = Self::read_body(response).await?;

        let token = self.extract_token(&landing).or_else(|| self.extract_token(&explore_html));
        if token.is_none() {
            tracing::debug!("Explore page carried no anti-forgery token; continuing without it");
        }

        self.session.mark_bootstrapped(token);
        tracing::debug!("Session bootstrapped");
        Ok(())
    }

    fn extract_token(&self, html: &str) -> Option<String> {
        self.token_pattern
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    async fn request(&self, fingerprint: &QueryFingerprint, deadline: Option<Instant>) -> Attempt {
        let body = match self.fetch_body(fingerprint, deadline).await {
            Ok(body) => body,
            Err(attempt) => return attempt,
        };

        let stripped = strip_guard(&body);
        if stripped.is_empty() {
            return Attempt::NoData;
        }
        if serde_json::from_str::<serde_json::Value>(stripped).is_err() {
            tracing::debug!(query = %fingerprint, "Response body is not JSON; treating as no data");
            return Attempt::NoData;
        }
        match TrendPayload::parse(fingerprint.kind(), stripped) {
            Some(_) => Attempt::Body(stripped.to_string()),
            None => Attempt::NoData,
        }
    }

    async fn fetch_body(&self, fingerprint: &QueryFingerprint, deadline: Option<Instant>) -> Result<String, Attempt> {
        match Plan::for_kind(fingerprint.kind()) {
            Plan::Direct => {
                let url = self.endpoints.direct(fingerprint)?;
                let response = self.send(url, RequestKind::Api, deadline).await?;
                Self::read_body(response).await
            }
            Plan::Widget { prefix, data_path } => {
                let url = self.endpoints.explore(fingerprint)?;
                let response = self.send(url, RequestKind::Api, deadline).await?;
                let body = Self::read_body(response).await?;

                let explore: ExploreResponse = serde_json::from_str(strip_guard(&body)).map_err(|e| {
                    tracing::debug!(error = %e, "Explore response is not JSON; treating as no data");
                    Attempt::NoData
                })?;
                let Some(widget) = explore.widget(prefix) else {
                    tracing::debug!(widget = prefix, "Explore returned no matching widget");
                    return Err(Attempt::NoData);
                };

                let url = self.endpoints.widget_data(data_path, widget)?;
                let response = self.send(url, RequestKind::Api, deadline).await?;
                Self::read_body(response).await
            }
        }
    }

    /// One rate-limited GET, classified by status.
    async fn send(&self, url: Url, kind: RequestKind, deadline: Option<Instant>) -> Result<Response, Attempt> {
        self.limiter
            .acquire_until(deadline)
            .await
            .map_err(|_| Attempt::DeadlineExceeded)?;

        let (timeout, bounded_by_deadline) = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                (remaining.min(self.config.read_timeout), remaining < self.config.read_timeout)
            }
            None => (self.config.read_timeout, false),
        };
        if timeout.is_zero() {
            return Err(Attempt::DeadlineExceeded);
        }

        let path = url.path().to_string();
        let mut builder = self.session.http.get(url).timeout(timeout);
        builder = match kind {
            RequestKind::Navigation => builder
                .header(header::ACCEPT, NAVIGATION_ACCEPT)
                .header("upgrade-insecure-requests", "1"),
            RequestKind::Api => {
                let mut builder = builder.header(header::ACCEPT, API_ACCEPT).header(header::REFERER, self.referer.as_str());
                if let Some(token) = &self.session.token
                    && let Ok(value) = HeaderValue::from_str(token)
                {
                    builder = builder.header(TOKEN_HEADER, value);
                }
                builder
            }
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() && bounded_by_deadline {
                Attempt::DeadlineExceeded
            } else if e.is_timeout() {
                Attempt::Transient { kind: FailureKind::Timeout, message: format!("request to {path} timed out") }
            } else {
                Attempt::Transient { kind: FailureKind::NetworkError, message: format!("request to {path} failed: {e}") }
            }
        })?;

        let status = response.status();
        tracing::debug!(path = %path, status = status.as_u16(), "Provider response");

        if status == StatusCode::TOO_MANY_REQUESTS || redirects_to_block_page(&response) {
            return Err(Attempt::Throttled(parse_retry_after(response.headers())));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Attempt::SessionRejected(status));
        }
        if status.is_server_error() {
            return Err(Attempt::Transient {
                kind: FailureKind::NetworkError,
                message: format!("HTTP {} from {path}", status.as_u16()),
            });
        }
        if !status.is_success() {
            return Err(Attempt::Rejected(format!("HTTP {} from {path}", status.as_u16())));
        }
        Ok(response)
    }

    async fn read_body(response: Response) -> Result<String, Attempt> {
        response.text().await.map_err(|e| {
            let kind = if e.is_timeout() { FailureKind::Timeout } else { FailureKind::NetworkError };
            Attempt::Transient { kind, message: format!("failed to read response body: {e}") }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::limiter::LimiterConfig;
    use trendmine_core::{FetchStatus, QueryKind};
    use wiremock::matchers::{header as header_eq, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) const TOKEN: &str = "tok-123";

    pub(crate) const TIMELINE_BODY: &str = r#")]}',
{"default":{"timelineData":[{"time":"1704067200","formattedTime":"Jan 1, 2024","value":[42],"hasData":[true]}]}}"#;

    pub(crate) fn explore_body() -> String {
        format!(
            ")]}}'\n{}",
            serde_json::json!({"widgets": [
                {"id": "TIMESERIES", "token": "w-ts", "request": {"time": "today 3-m"}},
                {"id": "RELATED_QUERIES", "token": "w-rq", "request": {"restriction": {}}},
                {"id": "RELATED_TOPICS", "token": "w-rt", "request": {"restriction": {}}}
            ]})
        )
    }

    pub(crate) fn fast_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(LimiterConfig {
            min_interval: Duration::from_millis(1),
            max_per_minute: 0,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(5),
                factor: 2.0,
                max: Duration::from_millis(40),
                jitter: false,
            },
        }))
    }

    pub(crate) fn test_config(base_url: &str) -> TrendsConfig {
        TrendsConfig {
            base_url: base_url.to_string(),
            read_timeout: Duration::from_secs(5),
            bootstrap_retry_delay: Duration::from_millis(5),
            network_backoff: Backoff::Fixed { delay: Duration::from_millis(5) },
            ..TrendsConfig::default()
        }
    }

    pub(crate) async fn mount_bootstrap(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<script>window.WIZ_global_data = {{\"SNlM0e\":\"{TOKEN}\",\"x\":1}};</script>"
            )))
            .mount(server)
            .await;
    }

    pub(crate) async fn mount_timeline(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string(explore_body()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/widgetdata/multiline"))
            .and(header_eq(TOKEN_HEADER, TOKEN))
            .respond_with(ResponseTemplate::new(200).set_body_string(TIMELINE_BODY))
            .mount(server)
            .await;
    }

    fn client(server: &MockServer) -> TrendsClient {
        TrendsClient::new(test_config(&server.uri()), fast_limiter()).unwrap()
    }

    fn fp(kind: QueryKind) -> QueryFingerprint {
        let keywords: &[&str] = if kind.requires_keywords() { &["rust"] } else { &[] };
        QueryFingerprint::new(keywords, "today 3-m", "", "en-US", kind).unwrap()
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));

        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_config_from_app() {
        let config = TrendsConfig::from_app(&AppConfig { max_retries: 0, ..Default::default() });
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.session_max_age, Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_interest_over_time_success() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        mount_timeline(&server).await;

        let mut client = client(&server);
        let outcome = client.execute(&fp(QueryKind::InterestOverTime), None).await;

        let FetchOutcome::Success(body) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert!(body.starts_with('{'));
        assert!(matches!(
            TrendPayload::parse(QueryKind::InterestOverTime, &body),
            Some(TrendPayload::InterestOverTime { ref timeline }) if timeline[0].values == vec![42]
        ));
        assert_eq!(client.session().token.as_deref(), Some(TOKEN));
    }

    #[tokio::test]
    async fn test_session_reused_across_queries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/explore"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string(explore_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/widgetdata/multiline"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TIMELINE_BODY))
            .expect(2)
            .mount(&server)
            .await;

        let mut client = client(&server);
        assert_eq!(client.execute(&fp(QueryKind::InterestOverTime), None).await.status(), FetchStatus::Success);
        assert_eq!(client.execute(&fp(QueryKind::InterestOverTime), None).await.status(), FetchStatus::Success);
        // No token on the page: requests proceed without the header.
        assert!(client.session().token.is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_cookies_are_sent_on_api_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "NID=session-1; Path=/"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/explore"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/dailytrends"))
            .and(header_eq("cookie", "NID=session-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"default\":{\"trendingSearchesDays\":[{\"trendingSearches\":[{\"title\":{\"query\":\"a\"}}]}]}}",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client(&server);
        assert_eq!(client.execute(&fp(QueryKind::TrendingNow), None).await.status(), FetchStatus::Success);
    }

    #[tokio::test]
    async fn test_persistent_throttling_is_rate_limited() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .expect(3)
            .mount(&server)
            .await;

        let limiter = fast_limiter();
        let mut client = TrendsClient::new(test_config(&server.uri()), Arc::clone(&limiter)).unwrap();
        let outcome = client.execute(&fp(QueryKind::InterestOverTime), None).await;

        let FetchOutcome::Failed(failure) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(failure.kind, FailureKind::RateLimited);
        assert_eq!(failure.retry_after, Some(Duration::ZERO));
        assert_eq!(limiter.snapshot().consecutive_throttles, 3);
    }

    #[tokio::test]
    async fn test_throttle_then_success() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_timeline(&server).await;

        let limiter = fast_limiter();
        let mut client = TrendsClient::new(test_config(&server.uri()), Arc::clone(&limiter)).unwrap();
        let outcome = client.execute(&fp(QueryKind::InterestOverTime), None).await;

        assert_eq!(outcome.status(), FetchStatus::Success);
        assert_eq!(limiter.snapshot().consecutive_throttles, 0);
    }

    #[tokio::test]
    async fn test_block_page_redirect_counts_as_throttle() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/sorry/index?continue=x"))
            .mount(&server)
            .await;
        Mock::given(path_regex("^/sorry"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut client = client(&server);
        let outcome = client.execute(&fp(QueryKind::InterestOverTime), None).await;
        assert_eq!(outcome.status(), FetchStatus::RateLimited);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let mut client = client(&server);
        let outcome = client.execute(&fp(QueryKind::InterestOverTime), None).await;
        assert_eq!(outcome.status(), FetchStatus::BootstrapFailed);
        assert!(client.session().bootstrapped_at.is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        mount_timeline(&server).await;

        let mut client = client(&server);
        assert_eq!(client.execute(&fp(QueryKind::InterestOverTime), None).await.status(), FetchStatus::Success);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client(&server);
        let outcome = client.execute(&fp(QueryKind::InterestOverTime), None).await;
        let FetchOutcome::Failed(failure) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(failure.kind, FailureKind::NetworkError);
        assert!(failure.message.contains("400"));
    }

    #[tokio::test]
    async fn test_forbidden_triggers_rebootstrap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/explore"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(403))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string(explore_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/widgetdata/multiline"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TIMELINE_BODY))
            .mount(&server)
            .await;

        let mut client = client(&server);
        assert_eq!(client.execute(&fp(QueryKind::InterestOverTime), None).await.status(), FetchStatus::Success);
    }

    #[tokio::test]
    async fn test_empty_related_queries() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string(explore_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/widgetdata/relatedsearches"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(")]}',\n{\"default\":{\"rankedList\":[{\"rankedKeyword\":[]},{\"rankedKeyword\":[]}]}}"),
            )
            .mount(&server)
            .await;

        let mut client = client(&server);
        assert_eq!(client.execute(&fp(QueryKind::RelatedQueries), None).await, FetchOutcome::Empty);
    }

    #[tokio::test]
    async fn test_missing_widget_is_empty() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string(")]}'\n{\"widgets\":[]}"))
            .mount(&server)
            .await;

        let mut client = client(&server);
        assert_eq!(client.execute(&fp(QueryKind::RelatedTopics), None).await, FetchOutcome::Empty);
    }

    #[tokio::test]
    async fn test_trending_now_direct_call() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/dailytrends"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                ")]}',\n{\"default\":{\"trendingSearchesDays\":[{\"trendingSearches\":[{\"title\":{\"query\":\"eclipse\"}}]}]}}",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client(&server);
        assert_eq!(client.execute(&fp(QueryKind::TrendingNow), None).await.status(), FetchStatus::Success);
    }

    #[tokio::test]
    async fn test_deadline_bounds_slow_response() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let mut client = client(&server);
        let started = Instant::now();
        let outcome = client
            .execute(&fp(QueryKind::InterestOverTime), Some(started + Duration::from_millis(300)))
            .await;

        assert_eq!(outcome.status(), FetchStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_failure_threshold_resets_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/explore"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = TrendsConfig { failure_threshold: 1, ..test_config(&server.uri()) };
        let mut client = TrendsClient::new(config, fast_limiter()).unwrap();
        assert_eq!(client.execute(&fp(QueryKind::InterestOverTime), None).await.status(), FetchStatus::NetworkError);
        assert!(client.session().bootstrapped_at.is_none());
        assert_eq!(client.execute(&fp(QueryKind::InterestOverTime), None).await.status(), FetchStatus::NetworkError);
    }

    #[tokio::test]
    async fn test_empty_counts_as_failure_when_configured() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"widgets\":[]}"))
            .mount(&server)
            .await;

        let mut client = client(&server);
        client.execute(&fp(QueryKind::InterestOverTime), None).await;
        assert_eq!(client.session().consecutive_failures, 0);

        let config = TrendsConfig { count_empty_as_failure: true, ..test_config(&server.uri()) };
        let mut client = TrendsClient::new(config, fast_limiter()).unwrap();
        client.execute(&fp(QueryKind::InterestOverTime), None).await;
        assert_eq!(client.session().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_malformed_widget_body_is_empty_without_retry() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string(explore_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/widgetdata/multiline"))
            .respond_with(ResponseTemplate::new(200).set_body_string(")]}',\n<html>not json"))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client(&server);
        assert_eq!(client.execute(&fp(QueryKind::InterestOverTime), None).await, FetchOutcome::Empty);
    }

    #[tokio::test]
    async fn test_malformed_explore_body_is_empty_without_retry() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>unavailable</html>"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/widgetdata/multiline"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TIMELINE_BODY))
            .expect(0)
            .mount(&server)
            .await;

        let mut client = client(&server);
        assert_eq!(client.execute(&fp(QueryKind::InterestOverTime), None).await, FetchOutcome::Empty);
    }

    #[tokio::test]
    async fn test_api_calls_carry_browser_headers() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        let referer = format!("{}/trends/explore", server.uri());
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .and(header_eq("referer", referer.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(explore_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/widgetdata/multiline"))
            .and(header_eq("referer", referer.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(TIMELINE_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client(&server);
        assert_eq!(client.execute(&fp(QueryKind::InterestOverTime), None).await.status(), FetchStatus::Success);

        let requests = server.received_requests().await.unwrap();
        let api_calls: Vec<_> = requests.iter().filter(|r| r.url.path().starts_with("/trends/api/")).collect();
        assert_eq!(api_calls.len(), 2);
        for request in api_calls {
            assert_eq!(request.headers.get("accept").unwrap().to_str().unwrap(), API_ACCEPT);
            assert_eq!(request.headers.get("accept-language").unwrap().to_str().unwrap(), "en-US,en;q=0.9");
        }

        let landing = requests.iter().find(|r| r.url.path() == "/").unwrap();
        assert_eq!(landing.headers.get("accept").unwrap().to_str().unwrap(), NAVIGATION_ACCEPT);
        assert!(landing.headers.get("referer").is_none());
    }
}
