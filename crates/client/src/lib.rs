//! Acquisition side of trendmine.
//!
//! This crate provides the process-wide rate limiter, the HTTP acquisition
//! client for the trends provider, and the trend manager that ties both to
//! the persistent cache from `trendmine-core`.

pub mod limiter;
pub mod manager;
pub mod trends;

pub use limiter::{Backoff, DeadlineExceeded, LimiterConfig, RateLimiter};
pub use manager::{BatchReport, ManagerPolicy, PrewarmSummary, TrendData, TrendManager};
pub use trends::{FetchOutcome, TrendPayload, TrendsClient, TrendsConfig};
