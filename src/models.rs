//! Core data types for the browsing index.
//!
//! Two item kinds share a row shape: a visit record carries domain, last
//! visit time, and visit count; a bookmark record carries folder and the
//! bookmarked-at timestamp. Timestamps are unix seconds throughout and are
//! rendered ISO-8601 only at the output edge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which record table a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Visits,
    Bookmarks,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Visits => "visits",
            ItemKind::Bookmarks => "bookmarks",
        }
    }

    /// The only group-by field valid for this kind.
    pub fn group_field(&self) -> &'static str {
        match self {
            ItemKind::Visits => "domain",
            ItemKind::Bookmarks => "folder",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retrieval signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Structured,
    Fulltext,
    Vector,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Structured => "structured",
            Method::Fulltext => "fulltext",
            Method::Vector => "vector",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structured" => Ok(Method::Structured),
            "fulltext" => Ok(Method::Fulltext),
            "vector" => Ok(Method::Vector),
            other => anyhow::bail!(
                "Unknown search method: '{}'. Use structured, fulltext, or vector.",
                other
            ),
        }
    }
}

/// A stored row, read back from either record table. Kind-specific columns
/// are `None`/zero for the other kind.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub browser: Option<String>,
    pub domain: Option<String>,
    pub last_visit_time: Option<i64>,
    pub visit_count: i64,
    pub folder: Option<String>,
    pub added_at: Option<i64>,
}

impl Record {
    /// The kind's natural recency field.
    pub fn recency(&self, kind: ItemKind) -> Option<i64> {
        match kind {
            ItemKind::Visits => self.last_visit_time,
            ItemKind::Bookmarks => self.added_at,
        }
    }
}

/// Raw visit row as read from the browser's History database.
#[derive(Debug, Clone)]
pub struct RawVisit {
    pub url: String,
    pub title: Option<String>,
    pub domain: Option<String>,
    pub last_visit_time: Option<i64>,
    pub visit_count: i64,
}

/// Raw bookmark as read from the browser's Bookmarks file.
#[derive(Debug, Clone)]
pub struct RawBookmark {
    pub url: String,
    pub title: Option<String>,
    pub folder: Option<String>,
    pub added_at: Option<i64>,
}

/// One fused search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub kind: ItemKind,
    pub title: String,
    pub snippet: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visit_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    /// Per-method score in [0,1], one entry per method that surfaced the record.
    pub scores: BTreeMap<Method, f64>,
    /// Contributing methods in first-seen order.
    pub methods: Vec<Method>,
    /// Final fused score.
    pub score: f64,
}

/// One `(group value, count)` row from an aggregate query.
#[derive(Debug, Clone, Serialize)]
pub struct GroupCount {
    pub group_value: String,
    pub count: i64,
}

/// Render a unix-seconds timestamp as ISO-8601 UTC.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
