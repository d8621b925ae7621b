//! Index row operations.
//!
//! Every statement that both reads payload references and deletes rows runs
//! inside one transaction so the caller gets back exactly the files it is now
//! responsible for removing.

use std::collections::HashSet;

use super::connection::CacheDb;
use crate::Error;
use crate::query::QueryKind;
use crate::status::EntryStatus;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row};

/// Where a cached payload body lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PayloadRef {
    /// No body (empty results).
    None,
    /// Body stored in the index row.
    Inline(String),
    /// Body stored in the payload directory under this file name.
    File(String),
}

impl PayloadRef {
    pub fn file_name(&self) -> Option<&str> {
        match self {
            PayloadRef::File(name) => Some(name),
            _ => None,
        }
    }
}

/// One row of the cache index.
///
/// Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct IndexEntry {
    pub fingerprint_hash: String,
    pub query_kind: QueryKind,
    pub keyword_summary: String,
    pub geo: String,
    pub timeframe: String,
    pub locale: String,
    pub payload: PayloadRef,
    pub payload_bytes: u64,
    pub status: EntryStatus,
    pub fetched_at: i64,
    pub ttl_expiry: i64,
    pub hit_count: i64,
    pub last_accessed: Option<i64>,
}

impl IndexEntry {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms < self.ttl_expiry
    }
}

/// Rows removed by a purge, plus the payload files they referenced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgedRows {
    pub count: u64,
    pub payload_files: Vec<String>,
}

const ENTRY_COLUMNS: &str = "fingerprint_hash, query_kind, keyword_summary, geo, timeframe, locale,
    payload_inline, payload_path, payload_bytes, status, fetched_at, ttl_expiry, hit_count, last_accessed";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<IndexEntry> {
    let kind: String = row.get(1)?;
    let query_kind = kind
        .parse::<QueryKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.to_string().into()))?;

    let status: String = row.get(9)?;
    let status = EntryStatus::from_db(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("unknown entry status: {status}").into(),
        )
    })?;

    let inline: Option<String> = row.get(6)?;
    let path: Option<String> = row.get(7)?;
    let payload = match (inline, path) {
        (Some(body), _) => PayloadRef::Inline(body),
        (None, Some(name)) => PayloadRef::File(name),
        (None, None) => PayloadRef::None,
    };

    Ok(IndexEntry {
        fingerprint_hash: row.get(0)?,
        query_kind,
        keyword_summary: row.get(2)?,
        geo: row.get(3)?,
        timeframe: row.get(4)?,
        locale: row.get(5)?,
        payload,
        payload_bytes: row.get::<_, i64>(8)?.max(0) as u64,
        status,
        fetched_at: row.get(10)?,
        ttl_expiry: row.get(11)?,
        hit_count: row.get(12)?,
        last_accessed: row.get(13)?,
    })
}

fn delete_returning_files(
    tx: &rusqlite::Transaction<'_>, select_sql: &str, delete_sql: &str, params: &[&dyn rusqlite::ToSql],
) -> Result<PurgedRows, Error> {
    let payload_files = {
        let mut stmt = tx.prepare(select_sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, Option<String>>(0))?;
        let mut files = Vec::new();
        for row in rows {
            if let Some(name) = row? {
                files.push(name);
            }
        }
        files
    };
    let count = tx.execute(delete_sql, params)?;
    Ok(PurgedRows { count: count as u64, payload_files })
}

impl CacheDb {
    /// Insert or replace the index row for `entry.fingerprint_hash`.
    ///
    /// Hit counters restart from zero. Returns the payload file the previous
    /// row referenced, if any, so the caller can drop it when the new entry no
    /// longer points at it.
    pub async fn upsert_entry(&self, entry: &IndexEntry) -> Result<Option<String>, Error> {
        if entry.ttl_expiry <= entry.fetched_at {
            return Err(Error::InvalidInput(format!(
                "ttl_expiry ({}) must be after fetched_at ({})",
                entry.ttl_expiry, entry.fetched_at
            )));
        }

        let entry = entry.clone();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let tx = conn.transaction()?;
                let previous: Option<String> = tx
                    .query_row(
                        "SELECT payload_path FROM cache_index WHERE fingerprint_hash = ?1",
                        params![&entry.fingerprint_hash],
                        |row| row.get(0),
                    )
                    .optional()?
                    .flatten();

                let (inline, path) = match &entry.payload {
                    PayloadRef::None => (None, None),
                    PayloadRef::Inline(body) => (Some(body.as_str()), None),
                    PayloadRef::File(name) => (None, Some(name.as_str())),
                };

                tx.execute(
                    "INSERT INTO cache_index (
                        fingerprint_hash, query_kind, keyword_summary, geo, timeframe, locale,
                        payload_inline, payload_path, payload_bytes, status, fetched_at, ttl_expiry,
                        hit_count, last_accessed
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, NULL)
                    ON CONFLICT(fingerprint_hash) DO UPDATE SET
                        query_kind = excluded.query_kind,
                        keyword_summary = excluded.keyword_summary,
                        geo = excluded.geo,
                        timeframe = excluded.timeframe,
                        locale = excluded.locale,
                        payload_inline = excluded.payload_inline,
                        payload_path = excluded.payload_path,
                        payload_bytes = excluded.payload_bytes,
                        status = excluded.status,
                        fetched_at = excluded.fetched_at,
                        ttl_expiry = excluded.ttl_expiry,
                        hit_count = 0,
                        last_accessed = NULL",
                    params![
                        &entry.fingerprint_hash,
                        entry.query_kind.as_str(),
                        &entry.keyword_summary,
                        &entry.geo,
                        &entry.timeframe,
                        &entry.locale,
                        inline,
                        path,
                        entry.payload_bytes as i64,
                        entry.status.as_str(),
                        entry.fetched_at,
                        entry.ttl_expiry,
                    ],
                )?;
                tx.commit()?;

                Ok(previous.filter(|prev| Some(prev.as_str()) != path))
            })
            .await
            .map_err(Error::from)
    }

    /// Get an index row by fingerprint hash, fresh or not.
    ///
    /// Returns None if the hash doesn't exist in the index.
    pub async fn get_entry(&self, hash: &str) -> Result<Option<IndexEntry>, Error> {
        let hash = hash.to_string();
        self.conn
            .call(move |conn| -> Result<Option<IndexEntry>, Error> {
                let sql = format!("SELECT {ENTRY_COLUMNS} FROM cache_index WHERE fingerprint_hash = ?1");
                let mut stmt = conn.prepare(&sql)?;
                let result = stmt.query_row(params![hash], entry_from_row);

                match result {
                    Ok(entry) => Ok(Some(entry)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Bump the read counters of an entry.
    pub async fn record_hit(&self, hash: &str, now_ms: i64) -> Result<(), Error> {
        let hash = hash.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "UPDATE cache_index SET hit_count = hit_count + 1, last_accessed = ?2
                     WHERE fingerprint_hash = ?1",
                    params![hash, now_ms],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Remove one entry. Returns the payload file it referenced, if any.
    pub async fn delete_entry(&self, hash: &str) -> Result<PurgedRows, Error> {
        let hash = hash.to_string();
        self.conn
            .call(move |conn| -> Result<PurgedRows, Error> {
                let tx = conn.transaction()?;
                let purged = delete_returning_files(
                    &tx,
                    "SELECT payload_path FROM cache_index WHERE fingerprint_hash = ?1",
                    "DELETE FROM cache_index WHERE fingerprint_hash = ?1",
                    &[&hash],
                )?;
                tx.commit()?;
                Ok(purged)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete entries whose TTL has passed.
    pub async fn purge_expired_entries(&self, now_ms: i64) -> Result<PurgedRows, Error> {
        self.conn
            .call(move |conn| -> Result<PurgedRows, Error> {
                let tx = conn.transaction()?;
                let purged = delete_returning_files(
                    &tx,
                    "SELECT payload_path FROM cache_index WHERE ttl_expiry <= ?1",
                    "DELETE FROM cache_index WHERE ttl_expiry <= ?1",
                    &[&now_ms],
                )?;
                tx.commit()?;
                Ok(purged)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete entries whose keyword summary contains `pattern`.
    pub async fn purge_entries_by_keyword(&self, pattern: &str) -> Result<PurgedRows, Error> {
        let pattern = format!("%{}%", pattern.trim().to_lowercase());
        self.conn
            .call(move |conn| -> Result<PurgedRows, Error> {
                let tx = conn.transaction()?;
                let purged = delete_returning_files(
                    &tx,
                    "SELECT payload_path FROM cache_index WHERE keyword_summary LIKE ?1",
                    "DELETE FROM cache_index WHERE keyword_summary LIKE ?1",
                    &[&pattern],
                )?;
                tx.commit()?;
                Ok(purged)
            })
            .await
            .map_err(Error::from)
    }

    /// Evict least recently used entries until count <= max_entries.
    ///
    /// Entries never read rank by fetch time.
    pub async fn purge_lru_entries(&self, max_entries: usize) -> Result<PurgedRows, Error> {
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<PurgedRows, Error> {
                let tx = conn.transaction()?;
                let count: i64 = tx.query_row("SELECT COUNT(*) FROM cache_index", [], |row| row.get(0))?;
                if count <= max {
                    return Ok(PurgedRows::default());
                }

                let to_delete = count - max;
                let victims = "SELECT fingerprint_hash FROM cache_index
                    ORDER BY COALESCE(last_accessed, fetched_at) ASC, hit_count ASC LIMIT ?1";
                let purged = delete_returning_files(
                    &tx,
                    &format!("SELECT payload_path FROM cache_index WHERE fingerprint_hash IN ({victims})"),
                    &format!("DELETE FROM cache_index WHERE fingerprint_hash IN ({victims})"),
                    &[&to_delete],
                )?;
                tx.commit()?;
                Ok(purged)
            })
            .await
            .map_err(Error::from)
    }

    /// Stored body bytes across all entries, inline and file.
    pub async fn total_payload_bytes(&self) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let total: i64 =
                    conn.query_row("SELECT COALESCE(SUM(payload_bytes), 0) FROM cache_index", [], |row| row.get(0))?;
                Ok(total.max(0) as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Evict least recently used entries until stored body bytes fit in
    /// `max_bytes`. The entry for `keep` is never chosen.
    pub async fn evict_to_size(&self, max_bytes: u64, keep: &str) -> Result<PurgedRows, Error> {
        let keep = keep.to_string();
        self.conn
            .call(move |conn| -> Result<PurgedRows, Error> {
                let tx = conn.transaction()?;
                let total: i64 =
                    tx.query_row("SELECT COALESCE(SUM(payload_bytes), 0) FROM cache_index", [], |row| row.get(0))?;
                let mut total = total.max(0) as u64;
                if total <= max_bytes {
                    return Ok(PurgedRows::default());
                }

                let mut victims = Vec::new();
                {
                    let mut stmt = tx.prepare(
                        "SELECT fingerprint_hash, payload_path, payload_bytes FROM cache_index
                         WHERE fingerprint_hash != ?1
                         ORDER BY COALESCE(last_accessed, fetched_at) ASC, hit_count ASC",
                    )?;
                    let rows = stmt.query_map(params![keep], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, i64>(2)?))
                    })?;
                    for row in rows {
                        if total <= max_bytes {
                            break;
                        }
                        let (hash, path, bytes) = row?;
                        total = total.saturating_sub(bytes.max(0) as u64);
                        victims.push((hash, path));
                    }
                }

                let mut purged = PurgedRows::default();
                {
                    let mut delete = tx.prepare("DELETE FROM cache_index WHERE fingerprint_hash = ?1")?;
                    for (hash, path) in victims {
                        purged.count += delete.execute(params![hash])? as u64;
                        purged.payload_files.extend(path);
                    }
                }
                tx.commit()?;
                Ok(purged)
            })
            .await
            .map_err(Error::from)
    }

    /// Subset of `hashes` that have an entry fresh at `now_ms`.
    pub async fn fresh_hashes(&self, hashes: Vec<String>, now_ms: i64) -> Result<HashSet<String>, Error> {
        self.conn
            .call(move |conn| -> Result<HashSet<String>, Error> {
                let mut stmt =
                    conn.prepare("SELECT 1 FROM cache_index WHERE fingerprint_hash = ?1 AND ttl_expiry > ?2")?;
                let mut fresh = HashSet::new();
                for hash in hashes {
                    if stmt.exists(params![&hash, now_ms])? {
                        fresh.insert(hash);
                    }
                }
                Ok(fresh)
            })
            .await
            .map_err(Error::from)
    }

    /// Every payload file name referenced by the index.
    pub async fn referenced_payload_files(&self) -> Result<HashSet<String>, Error> {
        self.conn
            .call(move |conn| -> Result<HashSet<String>, Error> {
                let mut stmt = conn.prepare("SELECT payload_path FROM cache_index WHERE payload_path IS NOT NULL")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut files = HashSet::new();
                for row in rows {
                    files.insert(row?);
                }
                Ok(files)
            })
            .await
            .map_err(Error::from)
    }
}
