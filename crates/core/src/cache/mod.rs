//! Two-tier persistent cache for trend query results.
//!
//! - SQLite index (tokio-rusqlite, WAL) keyed by fingerprint hash, holding
//!   metadata and small payloads inline
//! - Flat payload files for bodies above the inline limit
//! - TTL checked at read time; expired rows are misses
//! - Purge strategies (expired, keyword, LRU) and an orphan sweep
//! - Optional size cap enforced after every write: expired entries go first,
//!   then least recently used
//!
//! [`PersistentCache`] is the facade the manager talks to. It never returns
//! storage errors from `get`/`put`/`invalidate`: failures are logged and the
//! operation degrades to a miss.

pub mod connection;
pub mod entries;
pub mod hash;
pub mod migrations;
pub mod payloads;
pub mod prewarm;
pub mod stats;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::{IndexEntry, PayloadRef, PurgedRows};
pub use payloads::{PayloadStore, SweepReport};
pub use prewarm::{CoverageReport, PrewarmFailure, PrewarmReport};
pub use stats::CacheStats;

use crate::query::QueryFingerprint;
use crate::status::EntryStatus;

/// Index database file name inside the cache root.
pub const INDEX_FILE: &str = "index.sqlite";

/// Payload directory name inside the cache root.
pub const PAYLOAD_DIR: &str = "payloads";

const TOP_KEYWORDS: usize = 10;

/// Source of wall-clock time for TTL decisions.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A fresh cache entry with its body loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub entry: IndexEntry,
    /// Raw response body; `None` for empty results.
    pub body: Option<String>,
}

/// Cache facade combining the index and the payload files.
#[derive(Clone)]
pub struct PersistentCache {
    db: CacheDb,
    payloads: PayloadStore,
    inline_max: usize,
    /// Stored body bytes allowed before eviction; 0 means unbounded.
    max_bytes: u64,
    clock: Clock,
}

impl fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentCache")
            .field("payload_dir", &self.payloads.dir())
            .field("inline_max", &self.inline_max)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

impl PersistentCache {
    /// Open the cache rooted at `root`, creating the index and payload directory.
    pub async fn open(root: impl AsRef<Path>, inline_max: usize) -> Result<Self, Error> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root).await?;
        let db = CacheDb::open(root.join(INDEX_FILE)).await?;
        let payloads = PayloadStore::open(root.join(PAYLOAD_DIR)).await?;
        tracing::info!(root = %root.display(), inline_max, "Opened trend cache");
        Ok(Self::from_parts(db, payloads, inline_max))
    }

    /// Assemble a cache from already opened tiers.
    pub fn from_parts(db: CacheDb, payloads: PayloadStore, inline_max: usize) -> Self {
        Self { db, payloads, inline_max, max_bytes: 0, clock: Arc::new(Utc::now) }
    }

    /// Cap stored body bytes; 0 disables the cap.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Replace the wall clock used for TTL decisions.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    pub fn payload_dir(&self) -> PathBuf {
        self.payloads.dir().to_path_buf()
    }

    fn today(&self) -> String {
        self.now().format("%Y-%m-%d").to_string()
    }

    /// Fresh entry for `fingerprint`, or `None` on miss, expiry or storage failure.
    pub async fn get(&self, fingerprint: &QueryFingerprint) -> Option<CacheHit> {
        let hash = fingerprint.hash();
        let now_ms = self.now().timestamp_millis();

        let hit = match self.lookup(&hash, now_ms).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(fingerprint = %hash, error = %e, "Cache read failed; treating as miss");
                None
            }
        };

        if let Err(e) = self.db.record_lookup(&self.today(), hit.is_some()).await {
            tracing::warn!(error = %e, "Failed to record cache statistics");
        }
        if hit.is_some()
            && let Err(e) = self.db.record_hit(&hash, now_ms).await
        {
            tracing::warn!(fingerprint = %hash, error = %e, "Failed to record cache hit");
        }

        tracing::debug!(fingerprint = %hash, hit = hit.is_some(), "Cache lookup");
        hit
    }

    /// Like [`get`](Self::get), but leaves hit counters and statistics untouched.
    pub async fn peek(&self, fingerprint: &QueryFingerprint) -> Option<CacheHit> {
        let hash = fingerprint.hash();
        match self.lookup(&hash, self.now().timestamp_millis()).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(fingerprint = %hash, error = %e, "Cache read failed; treating as miss");
                None
            }
        }
    }

    async fn lookup(&self, hash: &str, now_ms: i64) -> Result<Option<CacheHit>, Error> {
        let Some(entry) = self.db.get_entry(hash).await? else {
            return Ok(None);
        };
        if !entry.is_fresh(now_ms) {
            return Ok(None);
        }

        let body = match &entry.payload {
            PayloadRef::None => None,
            PayloadRef::Inline(body) => Some(body.clone()),
            PayloadRef::File(name) => Some(self.payloads.read(name).await?),
        };
        Ok(Some(CacheHit { entry, body }))
    }

    /// Upsert the entry for `fingerprint`.
    ///
    /// Large bodies are written to the payload directory before the index row
    /// commits. Returns false if the write did not complete.
    pub async fn put(
        &self, fingerprint: &QueryFingerprint, payload: Option<&str>, status: EntryStatus, ttl: Duration,
    ) -> bool {
        let hash = fingerprint.hash();
        match self.try_put(fingerprint, &hash, payload, status, ttl).await {
            Ok(()) => {
                tracing::debug!(fingerprint = %hash, status = status.as_str(), ttl_secs = ttl.as_secs(), "Cached result");
                if let Err(e) = self.enforce_size_cap(&hash).await {
                    tracing::warn!(error = %e, "Cache size enforcement failed");
                }
                true
            }
            Err(e) => {
                tracing::warn!(fingerprint = %hash, error = %e, "Cache write failed");
                false
            }
        }
    }

    async fn try_put(
        &self, fingerprint: &QueryFingerprint, hash: &str, payload: Option<&str>, status: EntryStatus, ttl: Duration,
    ) -> Result<(), Error> {
        let fetched_at = self.now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);
        let ttl_expiry = fetched_at.saturating_add(ttl_ms);

        let (payload_ref, payload_bytes) = match payload {
            None => (PayloadRef::None, 0),
            Some(body) if body.len() > self.inline_max => {
                let name = self.payloads.write(hash, body).await?;
                (PayloadRef::File(name), body.len() as u64)
            }
            Some(body) => (PayloadRef::Inline(body.to_string()), body.len() as u64),
        };

        let entry = IndexEntry {
            fingerprint_hash: hash.to_string(),
            query_kind: fingerprint.kind(),
            keyword_summary: fingerprint.keyword_summary(),
            geo: fingerprint.geo().to_string(),
            timeframe: fingerprint.timeframe().to_string(),
            locale: fingerprint.locale().to_string(),
            payload: payload_ref,
            payload_bytes,
            status,
            fetched_at,
            ttl_expiry,
            hit_count: 0,
            last_accessed: None,
        };

        if let Some(stale) = self.db.upsert_entry(&entry).await? {
            self.remove_files(&[stale]).await;
        }
        Ok(())
    }

    /// Bring stored bytes back under the cap, sparing the entry just written.
    async fn enforce_size_cap(&self, keep: &str) -> Result<(), Error> {
        if self.max_bytes == 0 || self.db.total_payload_bytes().await? <= self.max_bytes {
            return Ok(());
        }

        let expired = self.purge_expired().await?;
        let evicted = self.db.evict_to_size(self.max_bytes, keep).await?;
        self.remove_files(&evicted.payload_files).await;
        tracing::info!(expired, evicted = evicted.count, max_bytes = self.max_bytes, "Cache over size cap; evicted entries");
        Ok(())
    }

    /// Remove the entry for `fingerprint`. Returns true if one existed.
    pub async fn invalidate(&self, fingerprint: &QueryFingerprint) -> bool {
        let hash = fingerprint.hash();
        match self.db.delete_entry(&hash).await {
            Ok(purged) => {
                self.remove_files(&purged.payload_files).await;
                tracing::debug!(fingerprint = %hash, removed = purged.count, "Invalidated cache entry");
                purged.count > 0
            }
            Err(e) => {
                tracing::warn!(fingerprint = %hash, error = %e, "Cache invalidation failed");
                false
            }
        }
    }

    /// Index metadata for a fingerprint hash, fresh or expired.
    pub async fn entry(&self, hash: &str) -> Result<Option<IndexEntry>, Error> {
        if !hash::is_valid_hash(hash) {
            return Err(Error::InvalidInput(format!("invalid fingerprint hash: {hash}")));
        }
        self.db.get_entry(hash).await
    }

    /// Delete expired entries and their payload files.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let purged = self.db.purge_expired_entries(self.now().timestamp_millis()).await?;
        self.remove_files(&purged.payload_files).await;
        Ok(purged.count)
    }

    /// Delete entries whose keywords contain `pattern`.
    pub async fn purge_keyword(&self, pattern: &str) -> Result<u64, Error> {
        let purged = self.db.purge_entries_by_keyword(pattern).await?;
        self.remove_files(&purged.payload_files).await;
        Ok(purged.count)
    }

    /// Keep at most `max_entries`, evicting least recently used first.
    pub async fn purge_lru(&self, max_entries: usize) -> Result<u64, Error> {
        let purged = self.db.purge_lru_entries(max_entries).await?;
        self.remove_files(&purged.payload_files).await;
        Ok(purged.count)
    }

    /// Reclaim payload files left behind by interrupted writes.
    pub async fn sweep_orphans(&self) -> Result<SweepReport, Error> {
        let referenced = self.db.referenced_payload_files().await?;
        self.payloads.sweep(&referenced).await
    }

    pub async fn stats(&self) -> Result<CacheStats, Error> {
        let mut stats = self
            .db
            .index_stats(&self.today(), self.now().timestamp_millis(), TOP_KEYWORDS)
            .await?;
        let files = self.payloads.list().await?;
        stats.payload_files = files.len() as u64;
        stats.payload_file_bytes = files.iter().map(|(_, size)| size).sum();
        Ok(stats)
    }

    async fn remove_files(&self, names: &[String]) {
        for name in names {
            if let Err(e) = self.payloads.remove(name).await {
                tracing::warn!(file = %name, error = %e, "Failed to remove payload file; sweep will reclaim it");
            }
        }
    }
}
