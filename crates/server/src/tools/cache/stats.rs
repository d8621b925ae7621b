//! cache_stats tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use trendmine_core::PersistentCache;

use crate::tools::json_result;

/// Implementation of the cache_stats tool.
pub async fn stats_impl(cache: &PersistentCache) -> Result<CallToolResult, McpError> {
    let stats = cache.stats().await?;
    json_result(&stats)
}
