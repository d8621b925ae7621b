//! cache_get tool implementation.
//!
//! Retrieves index metadata for a cached query by fingerprint hash.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use trendmine_core::cache::IndexEntry;
use trendmine_core::{Error, PersistentCache};

use crate::tools::json_result;

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// Fingerprint hash of the cached query (64 hex chars).
    pub hash: String,
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetOutput {
    pub entry: IndexEntry,
    /// Whether the entry would be served right now.
    pub fresh: bool,
}

/// Implementation of the cache_get tool.
pub async fn get_impl(cache: &PersistentCache, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    let entry = cache
        .entry(&params.hash)
        .await?
        .ok_or_else(|| Error::CacheMiss(params.hash.clone()))?;

    let fresh = entry.is_fresh(cache.now().timestamp_millis());
    json_result(&CacheGetOutput { entry, fresh })
}
