//! Endpoint URLs for the provider API.
//!
//! Keyword queries take two round trips: an explore call that hands out a
//! widget (request descriptor plus token), then a widget-data call for it.
//! Trending-now and suggestions are single calls.

use serde_json::{Value, json};
use trendmine_core::{Error, QueryFingerprint, QueryKind};
use url::Url;

use super::response::Widget;

/// Landing page fetched first during bootstrap.
pub const HOME_PATH: &str = "/";
/// Explore page whose HTML carries the anti-forgery token.
pub const EXPLORE_PAGE_PATH: &str = "/trends/explore";
pub const EXPLORE_API_PATH: &str = "/trends/api/explore";
const MULTILINE_PATH: &str = "/trends/api/widgetdata/multiline";
const RELATED_PATH: &str = "/trends/api/widgetdata/relatedsearches";
const DAILY_PATH: &str = "/trends/api/dailytrends";
const AUTOCOMPLETE_PATH: &str = "/trends/api/autocomplete/";

/// Geo used by trending-now when the query has none.
const DEFAULT_TRENDING_GEO: &str = "US";

/// How a fingerprint is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Explore first, then fetch the widget with this id prefix.
    Widget { prefix: &'static str, data_path: &'static str },
    /// One direct call.
    Direct,
}

impl Plan {
    pub fn for_kind(kind: QueryKind) -> Self {
        match kind {
            QueryKind::InterestOverTime => Plan::Widget { prefix: "TIMESERIES", data_path: MULTILINE_PATH },
            QueryKind::RelatedQueries => Plan::Widget { prefix: "RELATED_QUERIES", data_path: RELATED_PATH },
            QueryKind::RelatedTopics => Plan::Widget { prefix: "RELATED_TOPICS", data_path: RELATED_PATH },
            QueryKind::TrendingNow | QueryKind::Suggestions => Plan::Direct,
        }
    }
}

/// Builds provider URLs against a configurable origin.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
    locale: String,
    tz: String,
}

impl Endpoints {
    pub fn new(base_url: &str, locale: &str, tz_offset: i32) -> Result<Self, Error> {
        let base = Url::parse(base_url).map_err(|e| Error::InvalidInput(format!("invalid base_url {base_url}: {e}")))?;
        Ok(Self { base, locale: locale.to_string(), tz: tz_offset.to_string() })
    }

    fn path(&self, path: &str) -> Result<Url, Error> {
        self.base
            .join(path)
            .map_err(|e| Error::InvalidInput(format!("invalid endpoint path {path}: {e}")))
    }

    fn with_locale(&self, path: &str) -> Result<Url, Error> {
        let mut url = self.path(path)?;
        url.query_pairs_mut().append_pair("hl", &self.locale).append_pair("tz", &self.tz);
        Ok(url)
    }

    pub fn home(&self) -> Result<Url, Error> {
        self.path(HOME_PATH)
    }

    pub fn explore_page(&self) -> Result<Url, Error> {
        let mut url = self.path(EXPLORE_PAGE_PATH)?;
        url.query_pairs_mut().append_pair("hl", &self.locale);
        Ok(url)
    }

    /// Explore page without query parameters, as a browser would send it in `Referer`.
    pub fn referer(&self) -> Result<Url, Error> {
        self.path(EXPLORE_PAGE_PATH)
    }

    /// Explore call listing the widgets for a keyword query.
    pub fn explore(&self, fingerprint: &QueryFingerprint) -> Result<Url, Error> {
        let mut url = self.with_locale(EXPLORE_API_PATH)?;
        url.query_pairs_mut().append_pair("req", &explore_request(fingerprint).to_string());
        Ok(url)
    }

    /// Widget-data call for a widget returned by explore.
    pub fn widget_data(&self, data_path: &str, widget: &Widget) -> Result<Url, Error> {
        let request = widget.request.as_ref().map(Value::to_string).unwrap_or_default();
        let token = widget.token.as_deref().unwrap_or_default();
        let mut url = self.with_locale(data_path)?;
        url.query_pairs_mut().append_pair("req", &request).append_pair("token", token);
        Ok(url)
    }

    /// Single-call endpoints (trending-now, suggestions).
    pub fn direct(&self, fingerprint: &QueryFingerprint) -> Result<Url, Error> {
        match fingerprint.kind() {
            QueryKind::TrendingNow => {
                let geo = if fingerprint.geo().is_empty() { DEFAULT_TRENDING_GEO } else { fingerprint.geo() };
                let mut url = self.with_locale(DAILY_PATH)?;
                url.query_pairs_mut().append_pair("geo", geo).append_pair("ns", "15");
                Ok(url)
            }
            QueryKind::Suggestions => {
                let mut url = self.with_locale(AUTOCOMPLETE_PATH)?;
                url.path_segments_mut()
                    .map_err(|()| Error::InvalidInput("base_url cannot carry a path".into()))?
                    .pop_if_empty()
                    .push(&fingerprint.keywords().join(" "));
                Ok(url)
            }
            kind => Err(Error::InvalidInput(format!("{kind} requires an explore round trip"))),
        }
    }

    /// Path prefix used to spot a redirect to the provider's block page.
    pub fn is_block_page(url: &Url) -> bool {
        url.path().starts_with("/sorry")
    }
}

/// `req` parameter of the explore call: one comparison item per keyword.
pub fn explore_request(fingerprint: &QueryFingerprint) -> Value {
    let items: Vec<Value> = fingerprint
        .keywords()
        .iter()
        .map(|keyword| json!({ "keyword": keyword, "geo": fingerprint.geo(), "time": fingerprint.timeframe().as_str() }))
        .collect();
    json!({ "comparisonItem": items, "category": 0, "property": "" })
}
