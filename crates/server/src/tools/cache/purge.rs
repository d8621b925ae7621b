//! cache_purge tool implementation.
//!
//! Purges cache entries by expiry, keyword, or count, and sweeps orphaned
//! payload files.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use trendmine_core::{Error, PersistentCache};

use crate::tools::json_result;

/// Parameters for the cache_purge tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {
    /// Purge entries whose TTL has passed.
    #[serde(default)]
    pub expired: bool,

    /// Purge entries whose keywords contain this text.
    pub keyword: Option<String>,

    /// Keep only the N most recently used entries (LRU purge).
    pub max_entries: Option<usize>,

    /// Delete payload files no index row refers to.
    #[serde(default)]
    pub sweep_orphans: bool,
}

/// Output from the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    /// Number of index entries deleted.
    pub deleted: u64,
    /// Orphaned payload files removed by the sweep.
    pub orphans_removed: u64,
    pub orphan_bytes: u64,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(cache: &PersistentCache, params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    if !params.expired && params.keyword.is_none() && params.max_entries.is_none() && !params.sweep_orphans {
        return Err(Error::InvalidInput(
            "At least one of expired, keyword, max_entries, or sweep_orphans must be specified".to_string(),
        )
        .into());
    }

    if params.keyword.as_deref().is_some_and(|keyword| keyword.trim().is_empty()) {
        return Err(Error::InvalidInput("keyword must not be empty".to_string()).into());
    }

    let mut deleted_total = 0u64;

    if params.expired {
        deleted_total += cache.purge_expired().await?;
    }

    if let Some(keyword) = params.keyword.as_deref() {
        deleted_total += cache.purge_keyword(keyword).await?;
    }

    if let Some(max_entries) = params.max_entries {
        deleted_total += cache.purge_lru(max_entries).await?;
    }

    let (orphans_removed, orphan_bytes) = if params.sweep_orphans {
        let report = cache.sweep_orphans().await?;
        (report.removed_files, report.removed_bytes)
    } else {
        (0, 0)
    };

    tracing::info!(deleted = deleted_total, orphans_removed, "Cache purge complete");
    json_result(&CachePurgeOutput { deleted: deleted_total, orphans_removed, orphan_bytes })
}
