//! Offline mode: bulk population of the cache ahead of a batch run.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;

use serde::{Deserialize, Serialize};

use super::PersistentCache;
use crate::query::QueryFingerprint;
use crate::status::FetchStatus;

/// A fingerprint that could not be fetched during prewarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PrewarmFailure {
    pub query: String,
    pub fingerprint_hash: String,
    pub status: FetchStatus,
}

/// Summary of one prewarm pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PrewarmReport {
    /// Distinct fingerprints requested.
    pub requested: usize,
    /// Already fresh in the cache; not fetched.
    pub already_cached: usize,
    /// Fetches attempted.
    pub fetched: usize,
    pub by_status: BTreeMap<FetchStatus, usize>,
    pub failures: Vec<PrewarmFailure>,
}

impl PrewarmReport {
    pub fn count(&self, status: FetchStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Offline readiness of a set of fingerprints, without fetching anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CoverageReport {
    pub total: usize,
    pub cached: usize,
    pub missing: Vec<String>,
    pub offline_ready: bool,
}

fn dedupe(fingerprints: &[QueryFingerprint]) -> Vec<(String, &QueryFingerprint)> {
    let mut seen = HashSet::new();
    fingerprints
        .iter()
        .filter_map(|fp| {
            let hash = fp.hash();
            seen.insert(hash.clone()).then_some((hash, fp))
        })
        .collect()
}

impl PersistentCache {
    async fn fresh_set(&self, hashes: Vec<String>) -> HashSet<String> {
        match self.db.fresh_hashes(hashes, self.now().timestamp_millis()).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!(error = %e, "Cache freshness check failed; treating all as missing");
                HashSet::new()
            }
        }
    }

    /// Drive `fetch_fn` sequentially for every fingerprint that is not
    /// already fresh in the cache.
    ///
    /// `fetch_fn` is responsible for writing its result back (through the
    /// manager) and reports the status it ended with. Failures are recorded
    /// and the pass continues.
    pub async fn prewarm<F, Fut>(&self, fingerprints: &[QueryFingerprint], mut fetch_fn: F) -> PrewarmReport
    where
        F: FnMut(QueryFingerprint) -> Fut,
        Fut: Future<Output = FetchStatus>,
    {
        let unique = dedupe(fingerprints);
        let fresh = self.fresh_set(unique.iter().map(|(hash, _)| hash.clone()).collect()).await;

        let mut report = PrewarmReport { requested: unique.len(), ..Default::default() };
        for (hash, fingerprint) in unique {
            if fresh.contains(&hash) {
                report.already_cached += 1;
                continue;
            }

            report.fetched += 1;
            let status = fetch_fn(fingerprint.clone()).await;
            *report.by_status.entry(status).or_default() += 1;

            if status.is_failure() {
                tracing::warn!(query = %fingerprint, status = %status, "Prewarm fetch failed; continuing");
                report.failures.push(PrewarmFailure {
                    query: fingerprint.to_string(),
                    fingerprint_hash: hash,
                    status,
                });
            }
        }

        tracing::info!(
            requested = report.requested,
            already_cached = report.already_cached,
            fetched = report.fetched,
            failed = report.failures.len(),
            "Prewarm pass complete"
        );
        report
    }

    /// Report which fingerprints can be served offline right now.
    pub async fn coverage(&self, fingerprints: &[QueryFingerprint]) -> CoverageReport {
        let unique = dedupe(fingerprints);
        let fresh = self.fresh_set(unique.iter().map(|(hash, _)| hash.clone()).collect()).await;

        let missing: Vec<String> = unique
            .iter()
            .filter(|(hash, _)| !fresh.contains(hash))
            .map(|(_, fp)| fp.to_string())
            .collect();

        CoverageReport {
            total: unique.len(),
            cached: unique.len() - missing.len(),
            offline_ready: missing.is_empty(),
            missing,
        }
    }
}
