//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.

use std::sync::Arc;

use crate::tools::cache::{CacheGetParams, CachePurgeParams, get_impl, purge_impl, stats_impl};
use crate::tools::trends::{
    TrendsBatchParams, TrendsGetParams, TrendsPrewarmParams, batch_impl, get_impl as trends_get_impl, prewarm_impl,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use trendmine_client::TrendManager;

/// The main MCP server handler for trendmine.
#[derive(Clone)]
pub struct TrendServer {
    tool_router: ToolRouter<Self>,
    manager: Arc<TrendManager>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl TrendServer {
    /// Create a new server handler over a shared manager.
    pub fn new(manager: Arc<TrendManager>) -> Self {
        Self { tool_router: Self::tool_router(), manager }
    }

    #[tool(
        description = "Get trend data for up to 5 keywords: interest over time, related queries/topics, trending searches or suggestions. Served from cache when fresh; failures report rate_limited, network_error, bootstrap_failed or timeout."
    )]
    async fn trends_get(&self, params: Parameters<TrendsGetParams>) -> Result<CallToolResult, McpError> {
        trends_get_impl(&self.manager, params.0).await
    }

    #[tool(
        description = "Pre-populate the cache for a list of queries ahead of a batch run. Skips queries already cached. Reports coverage only when offline prewarm is disabled."
    )]
    async fn trends_prewarm(&self, params: Parameters<TrendsPrewarmParams>) -> Result<CallToolResult, McpError> {
        prewarm_impl(&self.manager, params.0).await
    }

    #[tool(
        description = "Run a list of trend queries sequentially and return a summary: counts by status, cache hits and per-query failures."
    )]
    async fn trends_batch(&self, params: Parameters<TrendsBatchParams>) -> Result<CallToolResult, McpError> {
        batch_impl(&self.manager, params.0).await
    }

    #[tool(description = "Get cache index metadata for a fingerprint hash.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        get_impl(self.manager.cache(), params.0).await
    }

    #[tool(description = "Purge cache entries: expired, by keyword, down to max_entries (LRU), and/or sweep orphaned payload files.")]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        purge_impl(self.manager.cache(), params.0).await
    }

    #[tool(description = "Cache statistics: entries by status, payload files, today's hit rate and most read keywords.")]
    async fn cache_stats(&self) -> Result<CallToolResult, McpError> {
        stats_impl(self.manager.cache()).await
    }
}

impl ServerHandler for TrendServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "trendmine".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
