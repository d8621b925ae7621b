//! Provider response shapes and normalization.
//!
//! Every endpoint prefixes its JSON with an anti-hijacking guard (`)]}'`,
//! sometimes followed by a comma). [`strip_guard`] removes it before parsing.
//! Each query kind has its own raw shape; [`TrendPayload::parse`] returns
//! `None` when the body is malformed or the recognized shape holds no data,
//! and falls back to [`TrendPayload::Opaque`] for well-formed JSON it does not
//! recognize.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use trendmine_core::QueryKind;

const GUARD: &str = ")]}'";

/// Remove the non-JSON guard prefix and surrounding whitespace.
pub fn strip_guard(body: &str) -> &str {
    let trimmed = body.trim_start();
    match trimmed.strip_prefix(GUARD) {
        Some(rest) => rest.trim_start().strip_prefix(',').unwrap_or(rest).trim(),
        None => trimmed.trim_end(),
    }
}

/// Raw explore response: widget descriptors for the follow-up requests.
#[derive(Debug, Deserialize)]
pub struct ExploreResponse {
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

/// One explore widget.
#[derive(Debug, Clone, Deserialize)]
pub struct Widget {
    pub id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub request: Option<Value>,
}

impl ExploreResponse {
    /// First widget whose id starts with `prefix` and carries a token and request.
    pub fn widget(&self, prefix: &str) -> Option<&Widget> {
        self.widgets
            .iter()
            .find(|w| w.id.starts_with(prefix) && w.token.is_some() && w.request.is_some())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    default: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTimeline {
    #[serde(default)]
    timeline_data: Vec<RawTimelinePoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTimelinePoint {
    #[serde(default)]
    time: String,
    #[serde(default)]
    formatted_time: String,
    #[serde(default)]
    value: Vec<i64>,
    #[serde(default)]
    has_data: Vec<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRanked {
    #[serde(default)]
    ranked_list: Vec<RawRankedList>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRankedList {
    #[serde(default)]
    ranked_keyword: Vec<RawRankedKeyword>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRankedKeyword {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    topic: Option<RawTopic>,
    #[serde(default)]
    value: i64,
    #[serde(default)]
    formatted_value: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTopic {
    #[serde(default)]
    mid: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDaily {
    #[serde(default)]
    trending_searches_days: Vec<RawDay>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDay {
    #[serde(default)]
    trending_searches: Vec<RawTrendingSearch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrendingSearch {
    title: RawQueryText,
    #[serde(default)]
    formatted_traffic: Option<String>,
    #[serde(default)]
    related_queries: Vec<RawQueryText>,
}

#[derive(Debug, Deserialize)]
struct RawQueryText {
    query: String,
}

#[derive(Debug, Deserialize)]
struct RawTopics {
    #[serde(default)]
    topics: Vec<RawTopic>,
}

/// One point of an interest-over-time series. Values are relative (0-100),
/// one per keyword in fingerprint order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TimelinePoint {
    pub time: String,
    pub formatted_time: String,
    pub values: Vec<i64>,
    pub partial: bool,
}

/// A related query or topic with its relative weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RankedItem {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub value: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TrendingSearch {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Suggestion {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
}

/// Normalized payload, one variant per query kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrendPayload {
    InterestOverTime { timeline: Vec<TimelinePoint> },
    RelatedQueries { top: Vec<RankedItem>, rising: Vec<RankedItem> },
    RelatedTopics { top: Vec<RankedItem>, rising: Vec<RankedItem> },
    TrendingNow { searches: Vec<TrendingSearch> },
    Suggestions { topics: Vec<Suggestion> },
    /// Well-formed JSON in a shape the parsers do not recognize.
    Opaque { body: Value },
}

impl From<RawRankedKeyword> for RankedItem {
    fn from(raw: RawRankedKeyword) -> Self {
        let (title, topic_type, mid) = match (raw.query, raw.topic) {
            (Some(query), _) => (query, None, None),
            (None, Some(topic)) => (topic.title, topic.kind, topic.mid),
            (None, None) => (String::new(), None, None),
        };
        RankedItem { title, topic_type, mid, value: raw.value, formatted_value: raw.formatted_value, link: raw.link }
    }
}

fn ranked(body: &str) -> Option<(Vec<RankedItem>, Vec<RankedItem>)> {
    let raw: Envelope<RawRanked> = serde_json::from_str(body).ok()?;
    let mut lists = raw.default.ranked_list.into_iter();
    let top: Vec<RankedItem> = lists.next().unwrap_or_default().ranked_keyword.into_iter().map(Into::into).collect();
    let rising: Vec<RankedItem> = lists.next().unwrap_or_default().ranked_keyword.into_iter().map(Into::into).collect();
    Some((top, rising))
}

impl TrendPayload {
    /// Parse a guard-stripped body for `kind`.
    ///
    /// Returns `None` for empty or malformed bodies and for recognized shapes
    /// without any data points.
    pub fn parse(kind: QueryKind, body: &str) -> Option<Self> {
        let body = strip_guard(body);
        if body.is_empty() {
            return None;
        }
        let value: Value = serde_json::from_str(body).ok()?;
        if value.is_null() || value.as_object().is_some_and(|o| o.is_empty()) {
            return None;
        }

        let typed = match kind {
            QueryKind::InterestOverTime => serde_json::from_str::<Envelope<RawTimeline>>(body).ok().map(|raw| {
                let timeline = raw
                    .default
                    .timeline_data
                    .into_iter()
                    .map(|p| TimelinePoint {
                        partial: p.has_data.iter().any(|has| !has),
                        time: p.time,
                        formatted_time: p.formatted_time,
                        values: p.value,
                    })
                    .collect();
                TrendPayload::InterestOverTime { timeline }
            }),
            QueryKind::RelatedQueries => ranked(body).map(|(top, rising)| TrendPayload::RelatedQueries { top, rising }),
            QueryKind::RelatedTopics => ranked(body).map(|(top, rising)| TrendPayload::RelatedTopics { top, rising }),
            QueryKind::TrendingNow => serde_json::from_str::<Envelope<RawDaily>>(body).ok().map(|raw| {
                let searches = raw
                    .default
                    .trending_searches_days
                    .into_iter()
                    .flat_map(|day| day.trending_searches)
                    .map(|s| TrendingSearch {
                        title: s.title.query,
                        traffic: s.formatted_traffic,
                        related_queries: s.related_queries.into_iter().map(|q| q.query).collect(),
                    })
                    .collect();
                TrendPayload::TrendingNow { searches }
            }),
            QueryKind::Suggestions => serde_json::from_str::<Envelope<RawTopics>>(body).ok().map(|raw| {
                let topics = raw
                    .default
                    .topics
                    .into_iter()
                    .map(|t| Suggestion { title: t.title, topic_type: t.kind, mid: t.mid })
                    .collect();
                TrendPayload::Suggestions { topics }
            }),
        };

        match typed {
            Some(payload) if payload.is_empty() => None,
            Some(payload) => Some(payload),
            None => Some(TrendPayload::Opaque { body: value }),
        }
    }

    /// Whether the payload carries no data points.
    pub fn is_empty(&self) -> bool {
        match self {
            TrendPayload::InterestOverTime { timeline } => timeline.is_empty(),
            TrendPayload::RelatedQueries { top, rising } | TrendPayload::RelatedTopics { top, rising } => {
                top.is_empty() && rising.is_empty()
            }
            TrendPayload::TrendingNow { searches } => searches.is_empty(),
            TrendPayload::Suggestions { topics } => topics.is_empty(),
            TrendPayload::Opaque { .. } => false,
        }
    }
}
