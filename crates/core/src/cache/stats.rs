//! Daily read statistics and index summaries.

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

/// Aggregate view of the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CacheStats {
    pub total_entries: u64,
    pub success_entries: u64,
    pub empty_entries: u64,
    pub expired_entries: u64,
    pub inline_bytes: u64,
    /// Files currently in the payload directory.
    pub payload_files: u64,
    pub payload_file_bytes: u64,
    pub hits_today: u64,
    pub misses_today: u64,
    pub hit_rate_today: f64,
    /// Most read keyword summaries with their hit counts.
    pub top_keywords: Vec<(String, u64)>,
}

impl CacheDb {
    /// Count one read against today's statistics.
    pub async fn record_lookup(&self, day: &str, hit: bool) -> Result<(), Error> {
        let day = day.to_string();
        let (hits, misses) = if hit { (1i64, 0i64) } else { (0, 1) };
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_stats (day, hits, misses) VALUES (?1, ?2, ?3)
                     ON CONFLICT(day) DO UPDATE SET
                        hits = hits + excluded.hits,
                        misses = misses + excluded.misses",
                    params![day, hits, misses],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Index-derived statistics. Payload directory figures are left at zero
    /// for the caller to fill in.
    pub async fn index_stats(&self, day: &str, now_ms: i64, top_n: usize) -> Result<CacheStats, Error> {
        let day = day.to_string();
        let top_n = top_n as i64;
        self.conn
            .call(move |conn| -> Result<CacheStats, Error> {
                let (total, success, empty, expired, inline_bytes): (i64, i64, i64, i64, i64) = conn.query_row(
                    "SELECT
                        COUNT(*),
                        COALESCE(SUM(status = 'success'), 0),
                        COALESCE(SUM(status = 'empty'), 0),
                        COALESCE(SUM(ttl_expiry <= ?1), 0),
                        COALESCE(SUM(CASE WHEN payload_inline IS NOT NULL THEN payload_bytes ELSE 0 END), 0)
                     FROM cache_index",
                    params![now_ms],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )?;

                let (hits, misses): (i64, i64) = conn
                    .query_row("SELECT hits, misses FROM cache_stats WHERE day = ?1", params![day], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })
                    .or_else(|e| match e {
                        tokio_rusqlite::rusqlite::Error::QueryReturnedNoRows => Ok((0, 0)),
                        e => Err(e),
                    })?;

                let mut stmt = conn.prepare(
                    "SELECT keyword_summary, SUM(hit_count) AS hits FROM cache_index
                     GROUP BY keyword_summary HAVING hits > 0
                     ORDER BY hits DESC, keyword_summary ASC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![top_n], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
                let mut top_keywords = Vec::new();
                for row in rows {
                    let (keywords, count) = row?;
                    top_keywords.push((keywords, count.max(0) as u64));
                }

                let lookups = hits + misses;
                Ok(CacheStats {
                    total_entries: total as u64,
                    success_entries: success as u64,
                    empty_entries: empty as u64,
                    expired_entries: expired as u64,
                    inline_bytes: inline_bytes as u64,
                    payload_files: 0,
                    payload_file_bytes: 0,
                    hits_today: hits as u64,
                    misses_today: misses as u64,
                    hit_rate_today: if lookups > 0 { hits as f64 / lookups as f64 } else { 0.0 },
                    top_keywords,
                })
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entries::PayloadRef;
    use crate::cache::entries::tests::make_entry;
    use crate::status::EntryStatus;

    #[tokio::test]
    async fn test_empty_stats() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let stats = db.index_stats("2026-01-01", 0, 5).await.unwrap();
        assert_eq!(stats, CacheStats::default());
    }

    #[tokio::test]
    async fn test_lookup_counters() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.record_lookup("2026-01-01", true).await.unwrap();
        db.record_lookup("2026-01-01", true).await.unwrap();
        db.record_lookup("2026-01-01", false).await.unwrap();
        db.record_lookup("2026-01-02", false).await.unwrap();

        let stats = db.index_stats("2026-01-01", 0, 5).await.unwrap();
        assert_eq!(stats.hits_today, 2);
        assert_eq!(stats.misses_today, 1);
        assert!((stats.hit_rate_today - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_entry_breakdown() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry(&make_entry("h1", "ai tools", PayloadRef::Inline("{\"x\":1}".into()), 1_000, 100))
            .await
            .unwrap();
        let mut empty = make_entry("h2", "gardening", PayloadRef::None, 1_000, 10_000);
        empty.status = EntryStatus::Empty;
        db.upsert_entry(&empty).await.unwrap();
        db.record_hit("h2", 1_500).await.unwrap();

        let stats = db.index_stats("2026-01-01", 2_000, 5).await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.success_entries, 1);
        assert_eq!(stats.empty_entries, 1);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.inline_bytes, 7);
        assert_eq!(stats.top_keywords, vec![("gardening".to_string(), 1)]);
    }
}
