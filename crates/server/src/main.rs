//! trendmine server entry point.
//!
//! This is the main binary that boots the MCP server on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;
use trendmine_client::{LimiterConfig, RateLimiter, TrendManager};
use trendmine_core::{AppConfig, PersistentCache};

mod handler;
mod tools;

/// How often expired rows and orphaned payload files are reclaimed.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

async fn maintain(cache: &PersistentCache) {
    match cache.purge_expired().await {
        Ok(purged) if purged > 0 => tracing::info!(purged, "Purged expired cache entries"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Expired entry purge failed"),
    }
    if let Err(e) = cache.sweep_orphans().await {
        tracing::warn!(error = %e, "Orphan sweep failed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(cache_dir = %config.cache_dir.display(), base_url = %config.base_url, "Starting trendmine server on stdio transport");

    let limiter = Arc::new(RateLimiter::new(LimiterConfig::from_app(&config)));
    let manager = Arc::new(TrendManager::from_app(&config, limiter).await?);

    let cache = manager.cache().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            interval.tick().await;
            maintain(&cache).await;
        }
    });

    let handler = handler::TrendServer::new(manager);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
