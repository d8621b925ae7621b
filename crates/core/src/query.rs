//! Query model and fingerprint normalization.
//!
//! A [`QueryFingerprint`] is the only cache key in the system. Two requests
//! that differ only in keyword casing, spacing or ordering produce the same
//! fingerprint and therefore share a cache entry.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::hash::fingerprint_hash;

/// Provider comparison limit for a single explore request.
pub const MAX_KEYWORDS: usize = 5;

/// Timeframe used when the caller does not pick one.
pub const DEFAULT_TIMEFRAME: &str = "today 12-m";

const TIMEFRAME_TOKENS: &[&str] = &[
    "now 1-H",
    "now 4-H",
    "now 1-d",
    "now 7-d",
    "today 1-m",
    "today 3-m",
    "today 12-m",
    "today 5-y",
    "all",
];

/// Kind of data requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    InterestOverTime,
    RelatedQueries,
    RelatedTopics,
    TrendingNow,
    Suggestions,
}

impl QueryKind {
    pub const ALL: [QueryKind; 5] = [
        QueryKind::InterestOverTime,
        QueryKind::RelatedQueries,
        QueryKind::RelatedTopics,
        QueryKind::TrendingNow,
        QueryKind::Suggestions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::InterestOverTime => "interest_over_time",
            QueryKind::RelatedQueries => "related_queries",
            QueryKind::RelatedTopics => "related_topics",
            QueryKind::TrendingNow => "trending_now",
            QueryKind::Suggestions => "suggestions",
        }
    }

    /// Whether this kind needs at least one keyword.
    pub fn requires_keywords(self) -> bool {
        !matches!(self, QueryKind::TrendingNow)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| Error::InvalidInput(format!("unknown query kind: {s}")))
    }
}

/// Canonical timeframe token.
///
/// Accepts the provider's preset tokens (case-insensitive, any spacing) and
/// custom `YYYY-MM-DD YYYY-MM-DD` ranges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe(String);

impl Timeframe {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            return Ok(Self::default());
        }

        if let Some(token) = TIMEFRAME_TOKENS.iter().find(|t| t.eq_ignore_ascii_case(&collapsed)) {
            return Ok(Self((*token).to_string()));
        }

        if let Some((start, end)) = collapsed.split_once(' ')
            && let Ok(start) = NaiveDate::parse_from_str(start, "%Y-%m-%d")
            && let Ok(end) = NaiveDate::parse_from_str(end, "%Y-%m-%d")
        {
            if start > end {
                return Err(Error::InvalidInput(format!("timeframe range is reversed: {collapsed}")));
            }
            return Ok(Self(format!("{} {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))));
        }

        Err(Error::InvalidInput(format!("unknown timeframe: {raw}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self(DEFAULT_TIMEFRAME.to_string())
    }
}

impl TryFrom<String> for Timeframe {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.0
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static GEO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}(-[A-Z0-9]{1,3})?$").expect("geo pattern is valid"));

/// Normalize a geo code: trimmed, uppercased, `CC` or `CC-SUB`, or empty for worldwide.
pub fn normalize_geo(raw: &str) -> Result<String, Error> {
    let geo = raw.trim().to_ascii_uppercase();
    if geo.is_empty() {
        return Ok(geo);
    }

    if !GEO_PATTERN.is_match(&geo) {
        return Err(Error::InvalidInput(format!("invalid geo code: {raw}")));
    }
    Ok(geo)
}

/// Normalize keywords: trimmed, lowercased, inner whitespace collapsed,
/// empties dropped, deduplicated and sorted.
pub fn normalize_keywords<S: AsRef<str>>(keywords: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = keywords
        .iter()
        .map(|k| k.as_ref().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Deterministic, normalized cache key for one logical query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFingerprint {
    keywords: Vec<String>,
    geo: String,
    timeframe: Timeframe,
    locale: String,
    kind: QueryKind,
}

impl QueryFingerprint {
    /// Build a fingerprint from raw query parameters.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the keyword count is out of range for
    /// the kind, or the timeframe or geo code is malformed.
    pub fn new<S: AsRef<str>>(
        keywords: &[S], timeframe: &str, geo: &str, locale: &str, kind: QueryKind,
    ) -> Result<Self, Error> {
        let keywords = normalize_keywords(keywords);
        if kind.requires_keywords() && keywords.is_empty() {
            return Err(Error::InvalidInput(format!("{kind} requires at least one keyword")));
        }
        if keywords.len() > MAX_KEYWORDS {
            return Err(Error::InvalidInput(format!(
                "too many keywords: {} (max {MAX_KEYWORDS})",
                keywords.len()
            )));
        }

        let locale = locale.trim();
        if locale.is_empty() {
            return Err(Error::InvalidInput("locale cannot be empty".into()));
        }

        Ok(Self {
            keywords,
            geo: normalize_geo(geo)?,
            timeframe: Timeframe::parse(timeframe)?,
            locale: locale.to_string(),
            kind,
        })
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn geo(&self) -> &str {
        &self.geo
    }

    pub fn timeframe(&self) -> &Timeframe {
        &self.timeframe
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// SHA-256 hex digest identifying this fingerprint in the cache index.
    pub fn hash(&self) -> String {
        fingerprint_hash(
            self.kind.as_str(),
            &self.keywords,
            &self.geo,
            self.timeframe.as_str(),
            &self.locale,
        )
    }

    /// Human-readable keyword list stored alongside the index row.
    pub fn keyword_summary(&self) -> String {
        self.keywords.join(", ")
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let geo = if self.geo.is_empty() { "world" } else { &self.geo };
        write!(f, "{}[{}] {} {}", self.kind, self.keyword_summary(), geo, self.timeframe)
    }
}

/// Caller-facing query parameters for the trend manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRequest {
    pub keywords: Vec<String>,
    pub timeframe: String,
    pub geo: String,
    pub kind: QueryKind,
    pub use_cache: bool,
    /// Upper bound on the whole call, including time spent waiting on the
    /// shared rate budget.
    pub deadline: Option<Duration>,
}

impl TrendRequest {
    pub fn new<S: Into<String>>(keywords: impl IntoIterator<Item = S>, kind: QueryKind) -> Self {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            timeframe: DEFAULT_TIMEFRAME.to_string(),
            geo: String::new(),
            kind,
            use_cache: true,
            deadline: None,
        }
    }

    pub fn timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = timeframe.into();
        self
    }

    pub fn geo(mut self, geo: impl Into<String>) -> Self {
        self.geo = geo.into();
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn fingerprint(&self, locale: &str) -> Result<QueryFingerprint, Error> {
        QueryFingerprint::new(self.keywords.as_slice(), &self.timeframe, &self.geo, locale, self.kind)
    }
}
