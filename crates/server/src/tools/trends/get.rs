//! trends_get tool implementation.
//!
//! Answers one trend query, from the cache when fresh.

use std::time::Duration;

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use trendmine_client::TrendManager;

use super::TrendQuery;
use crate::tools::json_result;

/// Parameters for the trends_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrendsGetParams {
    #[serde(flatten)]
    pub query: TrendQuery,

    /// Skip the cache lookup and fetch live.
    #[serde(default)]
    pub force_refresh: bool,

    /// Give up after this many milliseconds, including time spent waiting
    /// for the shared rate budget.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// Implementation of the trends_get tool.
pub async fn get_impl(manager: &TrendManager, params: TrendsGetParams) -> Result<CallToolResult, McpError> {
    let mut request = params.query.to_request().use_cache(!params.force_refresh);
    if let Some(ms) = params.deadline_ms {
        request = request.deadline(Duration::from_millis(ms));
    }

    let data = manager.get_trend_data(&request).await?;
    json_result(&data)
}
