//! Terminal outcomes of one acquisition.

use std::fmt;
use std::time::Duration;

use trendmine_core::{Error, FetchStatus};

/// Why an acquisition produced no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimited,
    NetworkError,
    BootstrapFailed,
    Timeout,
}

impl From<FailureKind> for FetchStatus {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::RateLimited => FetchStatus::RateLimited,
            FailureKind::NetworkError => FetchStatus::NetworkError,
            FailureKind::BootstrapFailed => FetchStatus::BootstrapFailed,
            FailureKind::Timeout => FetchStatus::Timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub kind: FailureKind,
    /// Last provider-supplied `Retry-After`, if any.
    pub retry_after: Option<Duration>,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, retry_after: None, message: message.into() }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", FetchStatus::from(self.kind), self.message)
    }
}

impl From<FetchFailure> for Error {
    fn from(failure: FetchFailure) -> Self {
        match failure.kind {
            FailureKind::RateLimited => Error::RateLimited(failure.message),
            FailureKind::NetworkError => Error::NetworkError(failure.message),
            FailureKind::BootstrapFailed => Error::BootstrapFailed(failure.message),
            FailureKind::Timeout => Error::FetchTimeout(failure.message),
        }
    }
}

/// Result of [`TrendsClient::execute`](super::TrendsClient::execute).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Guard-stripped JSON body with at least one data point.
    Success(String),
    /// The provider answered but had no data for the query.
    Empty,
    Failed(FetchFailure),
}

impl FetchOutcome {
    pub fn status(&self) -> FetchStatus {
        match self {
            FetchOutcome::Success(_) => FetchStatus::Success,
            FetchOutcome::Empty => FetchStatus::Empty,
            FetchOutcome::Failed(failure) => failure.kind.into(),
        }
    }

    pub(crate) fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        FetchOutcome::Failed(FetchFailure::new(kind, message))
    }
}
