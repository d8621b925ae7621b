//! Trend query tools.

pub mod batch;
pub mod get;
pub mod prewarm;

pub use batch::{TrendsBatchParams, batch_impl};
pub use get::{TrendsGetParams, get_impl};
pub use prewarm::{TrendsPrewarmParams, prewarm_impl};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use trendmine_core::{QueryKind, TrendRequest, query::DEFAULT_TIMEFRAME};

/// One trend query as accepted by the tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrendQuery {
    /// Keywords to compare (1-5; may be empty for trending_now).
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Timeframe token, e.g. "now 7-d", "today 3-m", "today 12-m" (default),
    /// or a "YYYY-MM-DD YYYY-MM-DD" range.
    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    /// ISO country code (e.g. "US", "GB-ENG"); empty for worldwide.
    #[serde(default)]
    pub geo: String,

    /// interest_over_time (default), related_queries, related_topics,
    /// trending_now or suggestions.
    #[serde(default = "default_kind")]
    pub kind: QueryKind,
}

fn default_timeframe() -> String {
    DEFAULT_TIMEFRAME.to_string()
}

fn default_kind() -> QueryKind {
    QueryKind::InterestOverTime
}

impl TrendQuery {
    pub fn to_request(&self) -> TrendRequest {
        TrendRequest::new(self.keywords.iter().cloned(), self.kind)
            .timeframe(self.timeframe.clone())
            .geo(self.geo.clone())
    }
}
