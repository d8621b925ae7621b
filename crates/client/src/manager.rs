//! Trend manager: the single entry point for trend data.
//!
//! Looks up the cache first, falls back to a live fetch through the
//! [`TrendsClient`], and writes successful or empty results back. It is the
//! only component that writes the cache. Fetch failures are returned to the
//! caller as typed errors and never cached.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use trendmine_core::cache::{CacheHit, CoverageReport, PrewarmReport};
use trendmine_core::{
    AppConfig, EntryStatus, Error, FetchStatus, PersistentCache, QueryFingerprint, Source, TrendRequest,
};

use crate::limiter::RateLimiter;
use crate::trends::{FetchOutcome, TrendPayload, TrendsClient, TrendsConfig};

/// TTLs and locale applied by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerPolicy {
    pub success_ttl: Duration,
    pub empty_ttl: Duration,
    pub locale: String,
    /// When false, prewarm only reports coverage and fetches nothing.
    pub offline_prewarm: bool,
}

impl ManagerPolicy {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            success_ttl: config.success_ttl(),
            empty_ttl: config.empty_ttl(),
            locale: config.locale.clone(),
            offline_prewarm: config.offline_prewarm,
        }
    }
}

impl Default for ManagerPolicy {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

/// Result of a successful `get_trend_data` call.
#[derive(Debug, Clone, PartialEq, Serialize, schemars::JsonSchema)]
pub struct TrendData {
    pub source: Source,
    /// `success` or `empty`.
    pub status: FetchStatus,
    pub query: String,
    pub fingerprint_hash: String,
    /// Normalized payload; `None` for empty results.
    pub payload: Option<TrendPayload>,
    /// Guard-stripped provider body exactly as fetched (and cached).
    #[serde(skip)]
    pub raw: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// What a prewarm call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PrewarmSummary {
    Fetched(PrewarmReport),
    /// Offline prewarm disabled: readiness only.
    CoverageOnly(CoverageReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct BatchFailure {
    pub query: String,
    /// Fetch failure subkind; absent for rejected input.
    pub status: Option<FetchStatus>,
    pub error: String,
}

/// Run-level summary of [`TrendManager::run_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct BatchReport {
    pub total: usize,
    pub cache_hits: usize,
    pub by_status: BTreeMap<FetchStatus, usize>,
    pub invalid: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn count(&self, status: FetchStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

fn describe(request: &TrendRequest) -> String {
    format!("{}[{}] {}", request.kind, request.keywords.join(", "), request.timeframe)
}

/// Cache-first orchestrator over one client session.
#[derive(Debug)]
pub struct TrendManager {
    cache: PersistentCache,
    client: Mutex<TrendsClient>,
    policy: ManagerPolicy,
}

impl TrendManager {
    pub fn new(cache: PersistentCache, client: TrendsClient, policy: ManagerPolicy) -> Self {
        Self { cache, client: Mutex::new(client), policy }
    }

    /// Open the cache and build a client from application config.
    pub async fn from_app(config: &AppConfig, limiter: Arc<RateLimiter>) -> Result<Self, Error> {
        let cache = PersistentCache::open(&config.cache_dir, config.inline_payload_max_bytes)
            .await?
            .with_max_bytes(config.max_cache_bytes);
        let client = TrendsClient::new(TrendsConfig::from_app(config), limiter)?;
        Ok(Self::new(cache, client, ManagerPolicy::from_app(config)))
    }

    pub fn cache(&self) -> &PersistentCache {
        &self.cache
    }

    pub fn policy(&self) -> &ManagerPolicy {
        &self.policy
    }

    /// Normalize a request into its cache key.
    pub fn fingerprint(&self, request: &TrendRequest) -> Result<QueryFingerprint, Error> {
        request.fingerprint(&self.policy.locale)
    }

    /// Fetch trend data for one query.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for requests that do not normalize. `RateLimited`,
    /// `NetworkError`, `BootstrapFailed` or `FetchTimeout` when the live fetch
    /// fails; nothing is cached in that case.
    pub async fn get_trend_data(&self, request: &TrendRequest) -> Result<TrendData, Error> {
        let fingerprint = self.fingerprint(request)?;
        let deadline = request.deadline.map(|d| Instant::now() + d);

        if request.use_cache
            && let Some(hit) = self.cache.get(&fingerprint).await
        {
            return Ok(self.data_from_hit(&fingerprint, hit));
        }
        self.fetch_live(&fingerprint, deadline, request.use_cache).await
    }

    fn data_from_hit(&self, fingerprint: &QueryFingerprint, hit: CacheHit) -> TrendData {
        let payload = hit.body.as_deref().and_then(|body| TrendPayload::parse(fingerprint.kind(), body));
        TrendData {
            source: Source::Cache,
            status: hit.entry.status.into(),
            query: fingerprint.to_string(),
            fingerprint_hash: hit.entry.fingerprint_hash,
            payload,
            raw: hit.body,
            fetched_at: DateTime::from_timestamp_millis(hit.entry.fetched_at).unwrap_or_else(|| self.cache.now()),
        }
    }

    /// Fetch through the client. With `recheck`, a result cached by whoever
    /// held the client before us is served instead of fetching again.
    async fn fetch_live(
        &self, fingerprint: &QueryFingerprint, deadline: Option<Instant>, recheck: bool,
    ) -> Result<TrendData, Error> {
        let mut client = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.client.lock())
                .await
                .map_err(|_| Error::FetchTimeout(format!("deadline exceeded waiting for client: {fingerprint}")))?,
            None => self.client.lock().await,
        };
        if recheck && let Some(hit) = self.cache.peek(fingerprint).await {
            drop(client);
            tracing::debug!(query = %fingerprint, "Filled while waiting for client; serving cached result");
            return Ok(self.data_from_hit(fingerprint, hit));
        }
        let outcome = client.execute(fingerprint, deadline).await;

        let hash = fingerprint.hash();
        let (status, raw) = match outcome {
            FetchOutcome::Success(body) => {
                self.cache.put(fingerprint, Some(&body), EntryStatus::Success, self.policy.success_ttl).await;
                (FetchStatus::Success, Some(body))
            }
            FetchOutcome::Empty => {
                self.cache.put(fingerprint, None, EntryStatus::Empty, self.policy.empty_ttl).await;
                (FetchStatus::Empty, None)
            }
            FetchOutcome::Failed(failure) => {
                tracing::warn!(query = %fingerprint, fingerprint = %hash, status = %FetchStatus::from(failure.kind), "Live fetch failed; not cached");
                return Err(failure.into());
            }
        };
        // Stored before the client is released so waiters find it on recheck.
        drop(client);

        Ok(TrendData {
            source: Source::Live,
            status,
            query: fingerprint.to_string(),
            fingerprint_hash: hash,
            payload: raw.as_deref().and_then(|body| TrendPayload::parse(fingerprint.kind(), body)),
            raw,
            fetched_at: self.cache.now(),
        })
    }

    /// Populate the cache for every fingerprint not already fresh.
    ///
    /// With offline prewarm disabled, reports coverage instead.
    pub async fn prewarm_batch(&self, fingerprints: &[QueryFingerprint]) -> PrewarmSummary {
        if !self.policy.offline_prewarm {
            return PrewarmSummary::CoverageOnly(self.cache.coverage(fingerprints).await);
        }

        let report = self
            .cache
            .prewarm(fingerprints, move |fingerprint| async move {
                match self.fetch_live(&fingerprint, None, true).await {
                    Ok(data) => data.status,
                    Err(e) => e.fetch_status().unwrap_or(FetchStatus::NetworkError),
                }
            })
            .await;
        PrewarmSummary::Fetched(report)
    }

    /// Run `requests` one after another and tally the outcomes.
    ///
    /// A failed query is logged with its subkind and the run continues.
    pub async fn run_batch(&self, requests: &[TrendRequest]) -> BatchReport {
        let mut report = BatchReport { total: requests.len(), ..Default::default() };

        for request in requests {
            match self.get_trend_data(request).await {
                Ok(data) => {
                    if data.source == Source::Cache {
                        report.cache_hits += 1;
                    }
                    *report.by_status.entry(data.status).or_default() += 1;
                }
                Err(e) => {
                    let status = e.fetch_status();
                    match status {
                        Some(status) => {
                            *report.by_status.entry(status).or_default() += 1;
                            tracing::warn!(query = %describe(request), status = %status, "Batch query failed; continuing");
                        }
                        None => {
                            report.invalid += 1;
                            tracing::warn!(query = %describe(request), error = %e, "Batch query rejected");
                        }
                    }
                    report.failures.push(BatchFailure { query: describe(request), status, error: e.to_string() });
                }
            }
        }

        tracing::info!(
            total = report.total,
            cache_hits = report.cache_hits,
            success = report.count(FetchStatus::Success),
            empty = report.count(FetchStatus::Empty),
            failed = report.failures.len(),
            "Batch run complete"
        );
        report
    }

    /// Drop the cached entry for `request`. Returns true if one existed.
    pub async fn invalidate(&self, request: &TrendRequest) -> Result<bool, Error> {
        let fingerprint = self.fingerprint(request)?;
        Ok(self.cache.invalidate(&fingerprint).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trends::tests::{TIMELINE_BODY, explore_body, fast_limiter, mount_bootstrap, mount_timeline, test_config};
    use std::sync::atomic::{AtomicI64, Ordering};
    use trendmine_core::QueryKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EMPTY_RELATED: &str = ")]}',\n{\"default\":{\"rankedList\":[{\"rankedKeyword\":[]},{\"rankedKeyword\":[]}]}}";

    struct Harness {
        manager: TrendManager,
        clock: Arc<AtomicI64>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn advance(&self, by: Duration) {
            self.clock.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
        }
    }

    async fn harness(server: &MockServer, policy: ManagerPolicy) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(AtomicI64::new(Utc::now().timestamp_millis()));
        let reading = Arc::clone(&clock);
        let cache = PersistentCache::open(dir.path(), 64)
            .await
            .unwrap()
            .with_clock(Arc::new(move || {
                DateTime::from_timestamp_millis(reading.load(Ordering::SeqCst)).unwrap_or_default()
            }));
        let client = TrendsClient::new(test_config(&server.uri()), fast_limiter()).unwrap();
        Harness { manager: TrendManager::new(cache, client, policy), clock, _dir: dir }
    }

    fn ai_tools() -> TrendRequest {
        TrendRequest::new(["ai tools"], QueryKind::InterestOverTime).timeframe("today 3-m")
    }

    async fn mount_related(server: &MockServer, body: &str, expected: u64) {
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string(crate::trends::tests::explore_body()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/widgetdata/relatedsearches"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_live_then_cached() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        mount_timeline(&server).await;
        let h = harness(&server, ManagerPolicy::default()).await;

        let live = h.manager.get_trend_data(&ai_tools()).await.unwrap();
        assert_eq!(live.source, Source::Live);
        assert_eq!(live.status, FetchStatus::Success);
        assert!(matches!(live.payload, Some(TrendPayload::InterestOverTime { .. })));

        let entry = h.manager.cache().entry(&live.fingerprint_hash).await.unwrap().unwrap();
        assert_eq!(entry.ttl_expiry - entry.fetched_at, 24 * 60 * 60 * 1000);

        let requests_before = server.received_requests().await.unwrap().len();
        let cached = h.manager.get_trend_data(&ai_tools()).await.unwrap();
        assert_eq!(cached.source, Source::Cache);
        assert_eq!(cached.status, FetchStatus::Success);
        assert_eq!(cached.raw, live.raw);
        assert_eq!(cached.payload, live.payload);
        assert_eq!(server.received_requests().await.unwrap().len(), requests_before);
    }

    #[tokio::test]
    async fn test_equivalent_queries_share_entry() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        mount_timeline(&server).await;
        let h = harness(&server, ManagerPolicy::default()).await;

        h.manager.get_trend_data(&ai_tools()).await.unwrap();
        let again = TrendRequest::new(["  AI   Tools "], QueryKind::InterestOverTime).timeframe("TODAY 3-m");
        assert_eq!(h.manager.get_trend_data(&again).await.unwrap().source, Source::Cache);
    }

    #[tokio::test]
    async fn test_throttling_is_not_cached() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;
        let h = harness(&server, ManagerPolicy::default()).await;

        let err = h.manager.get_trend_data(&ai_tools()).await.unwrap_err();
        assert_eq!(err.fetch_status(), Some(FetchStatus::RateLimited));

        let hash = h.manager.fingerprint(&ai_tools()).unwrap().hash();
        assert!(h.manager.cache().entry(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_result_expires_after_an_hour() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        mount_related(&server, EMPTY_RELATED, 2).await;
        let h = harness(&server, ManagerPolicy::default()).await;
        let request = TrendRequest::new(["ai tools"], QueryKind::RelatedQueries).timeframe("today 3-m");

        let first = h.manager.get_trend_data(&request).await.unwrap();
        assert_eq!((first.source, first.status), (Source::Live, FetchStatus::Empty));
        assert!(first.payload.is_none());

        let entry = h.manager.cache().entry(&first.fingerprint_hash).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Empty);
        assert_eq!(entry.ttl_expiry - entry.fetched_at, 60 * 60 * 1000);

        let cached = h.manager.get_trend_data(&request).await.unwrap();
        assert_eq!((cached.source, cached.status), (Source::Cache, FetchStatus::Empty));

        h.advance(Duration::from_secs(2 * 60 * 60));
        let refetched = h.manager.get_trend_data(&request).await.unwrap();
        assert_eq!(refetched.source, Source::Live);
    }

    #[tokio::test]
    async fn test_malformed_body_is_cached_as_empty() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string(explore_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/widgetdata/multiline"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>temporarily unavailable</html>"))
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server, ManagerPolicy::default()).await;

        let data = h.manager.get_trend_data(&ai_tools()).await.unwrap();
        assert_eq!((data.source, data.status), (Source::Live, FetchStatus::Empty));
        assert!(data.raw.is_none());

        let entry = h.manager.cache().entry(&data.fingerprint_hash).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Empty);
        assert_eq!(entry.ttl_expiry - entry.fetched_at, 60 * 60 * 1000);
    }

    #[tokio::test]
    async fn test_concurrent_identical_queries_fetch_once() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string(explore_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/widgetdata/multiline"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TIMELINE_BODY))
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server, ManagerPolicy::default()).await;

        let request = ai_tools();
        let (a, b) = tokio::join!(h.manager.get_trend_data(&request), h.manager.get_trend_data(&request));
        let mut sources = vec![a.unwrap().source, b.unwrap().source];
        sources.sort_by_key(|s| *s == Source::Cache);
        assert_eq!(sources, vec![Source::Live, Source::Cache]);

        let stats = h.manager.cache().stats().await.unwrap();
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test]
    async fn test_use_cache_false_forces_live_fetch() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        mount_timeline(&server).await;
        let h = harness(&server, ManagerPolicy::default()).await;

        h.manager.get_trend_data(&ai_tools()).await.unwrap();
        let forced = h.manager.get_trend_data(&ai_tools().use_cache(false)).await.unwrap();
        assert_eq!(forced.source, Source::Live);
    }

    #[tokio::test]
    async fn test_large_payload_round_trips_through_file_tier() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        mount_timeline(&server).await;
        // Inline limit in the harness is 64 bytes, so the timeline body lands on disk.
        let h = harness(&server, ManagerPolicy::default()).await;

        let live = h.manager.get_trend_data(&ai_tools()).await.unwrap();
        let stats = h.manager.cache().stats().await.unwrap();
        assert_eq!(stats.payload_files, 1);

        let cached = h.manager.get_trend_data(&ai_tools()).await.unwrap();
        assert_eq!(cached.source, Source::Cache);
        assert_eq!(cached.raw, live.raw);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let server = MockServer::start().await;
        let h = harness(&server, ManagerPolicy::default()).await;

        let err = h
            .manager
            .get_trend_data(&TrendRequest::new(Vec::<String>::new(), QueryKind::InterestOverTime))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prewarm_is_idempotent() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        mount_related(&server, EMPTY_RELATED, 2).await;
        let h = harness(&server, ManagerPolicy::default()).await;

        let fingerprints: Vec<QueryFingerprint> = ["k1", "k2"]
            .iter()
            .map(|k| h.manager.fingerprint(&TrendRequest::new([*k], QueryKind::RelatedQueries)).unwrap())
            .collect();

        let PrewarmSummary::Fetched(first) = h.manager.prewarm_batch(&fingerprints).await else {
            panic!("expected a fetching prewarm");
        };
        assert_eq!(first.fetched, 2);
        assert_eq!(first.count(FetchStatus::Empty), 2);

        let PrewarmSummary::Fetched(second) = h.manager.prewarm_batch(&fingerprints).await else {
            panic!("expected a fetching prewarm");
        };
        assert_eq!(second.fetched, 0);
        assert_eq!(second.already_cached, 2);
    }

    #[tokio::test]
    async fn test_prewarm_reports_coverage_when_offline_disabled() {
        let server = MockServer::start().await;
        let policy = ManagerPolicy { offline_prewarm: false, ..Default::default() };
        let h = harness(&server, policy).await;
        let fingerprint = h.manager.fingerprint(&ai_tools()).unwrap();

        let PrewarmSummary::CoverageOnly(coverage) = h.manager.prewarm_batch(&[fingerprint]).await else {
            panic!("expected coverage only");
        };
        assert_eq!(coverage.total, 1);
        assert!(!coverage.offline_ready);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_batch_tallies_by_status() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        mount_timeline(&server).await;
        mount_related(&server, EMPTY_RELATED, 1).await;
        let h = harness(&server, ManagerPolicy::default()).await;

        let requests = vec![
            ai_tools(),
            ai_tools(),
            TrendRequest::new(["ai tools"], QueryKind::RelatedQueries),
            TrendRequest::new(["a", "b", "c", "d", "e", "f"], QueryKind::InterestOverTime),
        ];
        let report = h.manager.run_batch(&requests).await;

        assert_eq!(report.total, 4);
        assert_eq!(report.cache_hits, 1);
        assert_eq!(report.count(FetchStatus::Success), 2);
        assert_eq!(report.count(FetchStatus::Empty), 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].status.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        mount_timeline(&server).await;
        let h = harness(&server, ManagerPolicy::default()).await;

        h.manager.get_trend_data(&ai_tools()).await.unwrap();
        assert!(h.manager.invalidate(&ai_tools()).await.unwrap());
        assert!(!h.manager.invalidate(&ai_tools()).await.unwrap());
        assert_eq!(h.manager.get_trend_data(&ai_tools()).await.unwrap().source, Source::Live);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_is_timeout_and_uncached() {
        let server = MockServer::start().await;
        mount_bootstrap(&server).await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;
        let h = harness(&server, ManagerPolicy::default()).await;

        let request = ai_tools().deadline(Duration::from_millis(500));
        let started = std::time::Instant::now();
        let err = h.manager.get_trend_data(&request).await.unwrap_err();

        assert_eq!(err.fetch_status(), Some(FetchStatus::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
        let hash = h.manager.fingerprint(&ai_tools()).unwrap().hash();
        assert!(h.manager.cache().entry(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_failure_surfaces_subkind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let h = harness(&server, ManagerPolicy::default()).await;

        let err = h.manager.get_trend_data(&ai_tools()).await.unwrap_err();
        assert!(matches!(err, Error::BootstrapFailed(_)));
    }
}
