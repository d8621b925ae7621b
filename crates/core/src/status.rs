//! Result codes shared by the client, cache and manager.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one logical query, as surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    Empty,
    RateLimited,
    NetworkError,
    BootstrapFailed,
    Timeout,
}

impl FetchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Empty => "empty",
            FetchStatus::RateLimited => "rate_limited",
            FetchStatus::NetworkError => "network_error",
            FetchStatus::BootstrapFailed => "bootstrap_failed",
            FetchStatus::Timeout => "timeout",
        }
    }

    /// Whether this status describes a failed fetch (nothing cached).
    pub fn is_failure(self) -> bool {
        !matches!(self, FetchStatus::Success | FetchStatus::Empty)
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status stored with a cache entry. Only these two outcomes are ever cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Success,
    Empty,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Success => "success",
            EntryStatus::Empty => "empty",
        }
    }

    /// Parse the value stored in the `status` column.
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "success" => Some(EntryStatus::Success),
            "empty" => Some(EntryStatus::Empty),
            _ => None,
        }
    }
}

impl From<EntryStatus> for FetchStatus {
    fn from(status: EntryStatus) -> Self {
        match status {
            EntryStatus::Success => FetchStatus::Success,
            EntryStatus::Empty => FetchStatus::Empty,
        }
    }
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Cache,
    Live,
}
