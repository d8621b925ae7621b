//! Core types and shared functionality for trendmine.
//!
//! This crate provides:
//! - Query model and fingerprint normalization
//! - Two-tier persistent cache (SQLite index + payload files)
//! - Unified error types and result codes
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod query;
pub mod status;

pub use cache::{CacheDb, CacheHit, PersistentCache};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use query::{QueryFingerprint, QueryKind, Timeframe, TrendRequest};
pub use status::{EntryStatus, FetchStatus, Source};
