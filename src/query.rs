//! Request orchestration across both item kinds.
//!
//! One [`SearchRequest`] fans out to a per-kind [`SearchEngine`] for each
//! selected kind, then merges the per-kind rankings with the same fusion
//! ordering. Per-method timings are namespaced `visits.` / `bookmarks.` in
//! the merged response. `count` and `aggregate` modes reuse the same filter
//! vocabulary without running retrieval.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::embedding::Embedder;
use crate::filter::{parse_filters, RawFilter};
use crate::models::{GroupCount, ItemKind, Method, SearchHit};
use crate::search::{cap_top_k, SearchEngine};
use crate::store::{BookmarkStore, VisitStore};

/// What the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Search,
    Count,
    Aggregate,
}

/// One search/count/aggregate request. Every field has a serde default so
/// `{}` is a valid (if empty) request.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub query: String,
    /// Explicit method list; `None` means auto-select from query and filters.
    pub methods: Option<Vec<Method>>,
    pub filters: Vec<RawFilter>,
    pub top_k: usize,
    pub search_visits: bool,
    pub search_bookmarks: bool,
    pub mode: Mode,
    pub group_by: Option<String>,
    pub aggregate_top_n: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            methods: None,
            filters: Vec::new(),
            top_k: 10,
            search_visits: true,
            search_bookmarks: true,
            mode: Mode::Search,
            group_by: None,
            aggregate_top_n: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    /// Merged candidates before truncation to `top_k`.
    pub total_available: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregates: Option<Vec<GroupCount>>,
    pub methods_executed: Vec<Method>,
    pub timing_ms: BTreeMap<String, f64>,
}

impl SearchResponse {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            total_available: 0,
            count: None,
            aggregates: None,
            methods_executed: Vec::new(),
            timing_ms: BTreeMap::new(),
        }
    }
}

/// A request that failed. Caller errors are reported as such so the HTTP
/// layer can map them to 400 instead of 500.
#[derive(Debug)]
pub enum QueryError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::BadRequest(msg) => write!(f, "{msg}"),
            QueryError::Internal(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<anyhow::Error> for QueryError {
    fn from(e: anyhow::Error) -> Self {
        QueryError::Internal(e)
    }
}

pub async fn run_query(
    visits: &VisitStore,
    bookmarks: &BookmarkStore,
    embedder: &dyn Embedder,
    req: &SearchRequest,
) -> Result<SearchResponse, QueryError> {
    if !req.search_visits && !req.search_bookmarks {
        return Err(QueryError::BadRequest(
            "At least one of search_visits or search_bookmarks must be true".to_string(),
        ));
    }
    let filters = parse_filters(&req.filters).map_err(|e| QueryError::BadRequest(format!("{e:#}")))?;

    let visit_engine = SearchEngine::new(visits, embedder);
    let bookmark_engine = SearchEngine::new(bookmarks, embedder);

    match req.mode {
        Mode::Count => {
            let mut total = 0i64;
            if req.search_visits {
                total += visit_engine.count(&filters).await?;
            }
            if req.search_bookmarks {
                total += bookmark_engine.count(&filters).await?;
            }
            Ok(SearchResponse {
                count: Some(total),
                ..SearchResponse::empty()
            })
        }
        Mode::Aggregate => {
            let group_by = req
                .group_by
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    QueryError::BadRequest("Aggregate mode requires group_by".to_string())
                })?;

            let mut valid_fields: Vec<&str> = Vec::new();
            if req.search_visits {
                valid_fields.push(ItemKind::Visits.group_field());
            }
            if req.search_bookmarks {
                valid_fields.push(ItemKind::Bookmarks.group_field());
            }
            if !valid_fields.contains(&group_by) {
                return Err(QueryError::BadRequest(format!(
                    "Unsupported group_by '{}'; expected one of: {}",
                    group_by,
                    valid_fields.join(", ")
                )));
            }

            // Each kind answers only for its own group field, so at most
            // one of these contributes rows.
            let mut aggregates = Vec::new();
            if req.search_visits {
                aggregates.extend(
                    visit_engine
                        .aggregate(group_by, &filters, req.aggregate_top_n)
                        .await?,
                );
            }
            if req.search_bookmarks {
                aggregates.extend(
                    bookmark_engine
                        .aggregate(group_by, &filters, req.aggregate_top_n)
                        .await?,
                );
            }
            Ok(SearchResponse {
                aggregates: Some(aggregates),
                ..SearchResponse::empty()
            })
        }
        Mode::Search => {
            let top_k = cap_top_k(req.top_k);
            let methods = req.methods.as_deref();
            let mut merged: Vec<SearchHit> = Vec::new();
            let mut timing_ms: BTreeMap<String, f64> = BTreeMap::new();
            let mut methods_executed: Vec<Method> = Vec::new();

            if req.search_visits {
                let outcome = visit_engine
                    .search(&req.query, methods, &filters, top_k)
                    .await?;
                absorb(
                    ItemKind::Visits,
                    outcome.results,
                    outcome.timing_ms,
                    outcome.methods_executed,
                    &mut merged,
                    &mut timing_ms,
                    &mut methods_executed,
                );
            }
            if req.search_bookmarks {
                let outcome = bookmark_engine
                    .search(&req.query, methods, &filters, top_k)
                    .await?;
                absorb(
                    ItemKind::Bookmarks,
                    outcome.results,
                    outcome.timing_ms,
                    outcome.methods_executed,
                    &mut merged,
                    &mut timing_ms,
                    &mut methods_executed,
                );
            }

            // Re-rank the combined list with the same ordering each engine
            // used; ids are per-table, so kind breaks cross-kind ties.
            merged.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.id.cmp(&b.id))
                    .then(a.kind.as_str().cmp(b.kind.as_str()))
            });
            let total_available = merged.len();
            merged.truncate(top_k);

            Ok(SearchResponse {
                results: merged,
                total_available,
                count: None,
                aggregates: None,
                methods_executed,
                timing_ms,
            })
        }
    }
}

fn absorb(
    kind: ItemKind,
    results: Vec<SearchHit>,
    timings: BTreeMap<String, f64>,
    executed: Vec<Method>,
    merged: &mut Vec<SearchHit>,
    timing_ms: &mut BTreeMap<String, f64>,
    methods_executed: &mut Vec<Method>,
) {
    merged.extend(results);
    for (name, ms) in timings {
        timing_ms.insert(format!("{kind}.{name}"), ms);
    }
    for m in executed {
        if !methods_executed.contains(&m) {
            methods_executed.push(m);
        }
    }
}

// ============ Capabilities ============

#[derive(Debug, Clone, Serialize)]
pub struct MethodInfo {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterInfo {
    pub field: &'static str,
    pub value_type: &'static str,
    pub applies_to: &'static str,
    pub description: &'static str,
}

/// Self-describing query surface, served to clients so they can build
/// requests without guessing field names.
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub methods: Vec<MethodInfo>,
    pub filters: Vec<FilterInfo>,
    pub modes: Vec<&'static str>,
    pub group_by: BTreeMap<&'static str, &'static str>,
    pub default_limit: usize,
    pub max_limit: usize,
}

pub fn capabilities() -> Capabilities {
    Capabilities {
        methods: vec![
            MethodInfo {
                name: "structured",
                description: "Filtered select ordered by recency; no query text needed",
            },
            MethodInfo {
                name: "fulltext",
                description: "Lexical match over title, snippet, grouping field, and URL",
            },
            MethodInfo {
                name: "vector",
                description: "Semantic nearest-neighbor over embedded records",
            },
        ],
        filters: vec![
            FilterInfo {
                field: "date_after",
                value_type: "date or date-time",
                applies_to: "visits, bookmarks",
                description: "Inclusive lower bound on the record's recency time",
            },
            FilterInfo {
                field: "date_before",
                value_type: "date or date-time",
                applies_to: "visits, bookmarks",
                description: "Inclusive upper bound; a bare date means end of that day",
            },
            FilterInfo {
                field: "domain",
                value_type: "string",
                applies_to: "visits",
                description: "Case-insensitive substring match on the visit domain",
            },
            FilterInfo {
                field: "folder",
                value_type: "string",
                applies_to: "bookmarks",
                description: "Case-insensitive substring match on the bookmark folder path",
            },
        ],
        modes: vec!["search", "count", "aggregate"],
        group_by: BTreeMap::from([
            (ItemKind::Visits.as_str(), ItemKind::Visits.group_field()),
            (
                ItemKind::Bookmarks.as_str(),
                ItemKind::Bookmarks.group_field(),
            ),
        ]),
        default_limit: SearchRequest::default().top_k,
        max_limit: crate::search::MAX_TOP_K,
    }
}
