//! trends_prewarm tool implementation.
//!
//! Populates the cache ahead of a batch run.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use trendmine_client::TrendManager;
use trendmine_core::{Error, QueryFingerprint};

use super::TrendQuery;
use crate::tools::json_result;

/// Parameters for the trends_prewarm tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrendsPrewarmParams {
    /// Queries to make available offline.
    pub queries: Vec<TrendQuery>,
}

/// Implementation of the trends_prewarm tool.
pub async fn prewarm_impl(manager: &TrendManager, params: TrendsPrewarmParams) -> Result<CallToolResult, McpError> {
    if params.queries.is_empty() {
        return Err(Error::InvalidInput("queries must not be empty".to_string()).into());
    }

    let fingerprints = params
        .queries
        .iter()
        .map(|query| manager.fingerprint(&query.to_request()))
        .collect::<Result<Vec<QueryFingerprint>, Error>>()?;

    let summary = manager.prewarm_batch(&fingerprints).await;
    json_result(&summary)
}
