//! trends_batch tool implementation.
//!
//! Runs many queries sequentially and returns a run summary.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use trendmine_client::TrendManager;
use trendmine_core::{Error, TrendRequest};

use super::TrendQuery;
use crate::tools::json_result;

/// Parameters for the trends_batch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrendsBatchParams {
    pub queries: Vec<TrendQuery>,

    /// Bypass the cache for every query.
    #[serde(default)]
    pub force_refresh: bool,
}

/// Implementation of the trends_batch tool.
pub async fn batch_impl(manager: &TrendManager, params: TrendsBatchParams) -> Result<CallToolResult, McpError> {
    if params.queries.is_empty() {
        return Err(Error::InvalidInput("queries must not be empty".to_string()).into());
    }

    let requests: Vec<TrendRequest> = params
        .queries
        .iter()
        .map(|query| query.to_request().use_cache(!params.force_refresh))
        .collect();

    let report = manager.run_batch(&requests).await;
    json_result(&report)
}
