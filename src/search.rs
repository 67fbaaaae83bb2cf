//! Hybrid retrieval engine: structured + fulltext + vector over one kind.
//!
//! Each requested method runs independently against the store and yields
//! `(record, method-local score in [0,1])` candidates. Candidates are merged
//! by record identity, accumulating one score per contributing method, then
//! fused into a single ranking.
//!
//! Fusion is a weighted average over contributing methods only, with fixed
//! weights `structured 1.0, fulltext 0.85, vector 0.70`. A method that did
//! not surface a record neither helps nor hurts it.
//!
//! A failing sub-query is logged and contributes zero candidates; it never
//! aborts the search.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::embedding::{is_zero_vector, Embedder};
use crate::filter::Filter;
use crate::models::{format_ts_iso, GroupCount, ItemKind, Method, Record, SearchHit};
use crate::store::RecordStore;

/// Hard bounds on result list sizes.
pub const MAX_TOP_K: usize = 100;

/// Clamp a requested result count to `[1, 100]`.
pub fn cap_top_k(top_k: usize) -> usize {
    top_k.clamp(1, MAX_TOP_K)
}

fn method_weight(method: Method) -> f64 {
    match method {
        Method::Structured => 1.0,
        Method::Fulltext => 0.85,
        Method::Vector => 0.70,
    }
}

/// Weighted-average fusion over contributing methods only:
/// `Σ(score·weight) / Σ(weight)`. Pure and deterministic.
pub fn fuse_scores(scores: &BTreeMap<Method, f64>) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for (method, score) in scores {
        let w = method_weight(*method);
        num += score * w;
        den += w;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Method auto-selection when the caller names none: `structured` iff
/// filters are present, `fulltext` + `vector` iff the query is non-empty
/// after trimming, `structured` alone when neither holds.
pub fn auto_select_methods(query: &str, filters: &[Filter]) -> Vec<Method> {
    let mut methods = Vec::new();
    if !filters.is_empty() {
        methods.push(Method::Structured);
    }
    if !query.trim().is_empty() {
        methods.push(Method::Fulltext);
        methods.push(Method::Vector);
    }
    if methods.is_empty() {
        methods.push(Method::Structured);
    }
    methods
}

/// Output of one engine search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchHit>,
    /// Per-method wall-clock milliseconds, plus `total`.
    pub timing_ms: BTreeMap<String, f64>,
    /// Methods that actually ran, in execution order.
    pub methods_executed: Vec<Method>,
}

struct Candidate {
    record: Record,
    scores: BTreeMap<Method, f64>,
    methods: Vec<Method>,
}

/// One engine instance per item kind; stateless and read-only per call.
pub struct SearchEngine<'a, S: RecordStore> {
    store: &'a S,
    embedder: &'a dyn Embedder,
}

impl<'a, S: RecordStore> SearchEngine<'a, S> {
    pub fn new(store: &'a S, embedder: &'a dyn Embedder) -> Self {
        Self { store, embedder }
    }

    pub fn kind(&self) -> ItemKind {
        self.store.kind()
    }

    pub async fn search(
        &self,
        query: &str,
        methods: Option<&[Method]>,
        filters: &[Filter],
        top_k: usize,
    ) -> Result<SearchOutcome> {
        let top_k = cap_top_k(top_k);
        let candidate_k = (top_k * 2) as i64;
        let selected = match methods {
            Some(m) if !m.is_empty() => m.to_vec(),
            _ => auto_select_methods(query, filters),
        };

        let mut timing_ms: BTreeMap<String, f64> = BTreeMap::new();
        let mut methods_executed: Vec<Method> = Vec::new();
        let mut merged: HashMap<i64, Candidate> = HashMap::new();
        let has_query = !query.trim().is_empty();

        let t_start = Instant::now();
        for method in selected {
            // Fulltext and vector need query text; structured always runs.
            if method != Method::Structured && !has_query {
                continue;
            }
            let t0 = Instant::now();
            let batch = match self.run_method(method, query, filters, candidate_k).await {
                Ok(batch) => batch,
                Err(e) => {
                    eprintln!(
                        "Warning: {} search failed on {}: {:#}",
                        method,
                        self.kind(),
                        e
                    );
                    Vec::new()
                }
            };
            timing_ms.insert(method.as_str().to_string(), elapsed_ms(t0));
            methods_executed.push(method);

            for (record, score) in batch {
                let entry = merged.entry(record.id).or_insert_with(|| Candidate {
                    record,
                    scores: BTreeMap::new(),
                    methods: Vec::new(),
                });
                entry.scores.entry(method).or_insert(score);
                if !entry.methods.contains(&method) {
                    entry.methods.push(method);
                }
            }
        }

        let kind = self.kind();
        let mut fused: Vec<SearchHit> = merged
            .into_values()
            .map(|c| {
                let score = fuse_scores(&c.scores);
                record_to_hit(kind, c.record, c.scores, c.methods, score)
            })
            .collect();

        // Score descending, id ascending for a deterministic order.
        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        fused.truncate(top_k);

        timing_ms.insert("total".to_string(), elapsed_ms(t_start));

        Ok(SearchOutcome {
            results: fused,
            timing_ms,
            methods_executed,
        })
    }

    async fn run_method(
        &self,
        method: Method,
        query: &str,
        filters: &[Filter],
        candidate_k: i64,
    ) -> Result<Vec<(Record, f64)>> {
        match method {
            Method::Structured => self.structured(filters, candidate_k).await,
            Method::Fulltext => self.fulltext(query, filters, candidate_k).await,
            Method::Vector => self.vector(query, filters, candidate_k).await,
        }
    }

    /// Recency-ordered records with a rank-decayed score.
    async fn structured(&self, filters: &[Filter], limit: i64) -> Result<Vec<(Record, f64)>> {
        let rows = self.store.select_structured(filters, limit).await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, record)| (record, (1.0 - i as f64 * 0.03).max(0.3)))
            .collect())
    }

    /// Lexical matches; bm25 rank (more negative = better) is negated and
    /// clamped into [0.1, 1.0].
    async fn fulltext(
        &self,
        query: &str,
        filters: &[Filter],
        limit: i64,
    ) -> Result<Vec<(Record, f64)>> {
        let rows = self.store.select_lexical(query, filters, limit).await?;
        Ok(rows
            .into_iter()
            .map(|(record, rank)| (record, (-rank).clamp(0.1, 1.0)))
            .collect())
    }

    /// Nearest-by-cosine over embedded records. An unconfigured backend or
    /// an all-zero query vector yields no candidates, not an error.
    async fn vector(
        &self,
        query: &str,
        filters: &[Filter],
        limit: i64,
    ) -> Result<Vec<(Record, f64)>> {
        if !self.embedder.is_enabled() {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed_query(query).await?;
        if is_zero_vector(&query_vec) {
            return Ok(Vec::new());
        }
        let rows = self.store.select_nearest(&query_vec, filters, limit).await?;
        Ok(rows
            .into_iter()
            .map(|(record, distance)| (record, (1.0 - distance).clamp(0.0, 1.0)))
            .collect())
    }

    /// Total matching records; ignores query and methods.
    pub async fn count(&self, filters: &[Filter]) -> Result<i64> {
        self.store.count(filters).await
    }

    /// Top groups by count. Only the kind's own group field is valid;
    /// anything else returns an empty list, not an error.
    pub async fn aggregate(
        &self,
        group_by: &str,
        filters: &[Filter],
        top_n: usize,
    ) -> Result<Vec<GroupCount>> {
        if group_by != self.kind().group_field() {
            return Ok(Vec::new());
        }
        self.store
            .group_count(filters, cap_top_k(top_n) as i64)
            .await
    }
}

fn elapsed_ms(t: Instant) -> f64 {
    (t.elapsed().as_secs_f64() * 1000.0 * 10.0).round() / 10.0
}

fn record_to_hit(
    kind: ItemKind,
    record: Record,
    scores: BTreeMap<Method, f64>,
    methods: Vec<Method>,
    score: f64,
) -> SearchHit {
    let timestamp = record.recency(kind).map(format_ts_iso);
    SearchHit {
        id: record.id,
        kind,
        title: record.title.unwrap_or_else(|| "No title".to_string()),
        snippet: record.snippet.unwrap_or_default(),
        url: record.url,
        timestamp,
        domain: record.domain,
        folder: record.folder,
        visit_count: (kind == ItemKind::Visits).then_some(record.visit_count),
        browser: record.browser,
        scores,
        methods,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(entries: &[(Method, f64)]) -> BTreeMap<Method, f64> {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_auto_select_no_query_no_filters() {
        assert_eq!(auto_select_methods("", &[]), vec![Method::Structured]);
        assert_eq!(auto_select_methods("   ", &[]), vec![Method::Structured]);
    }

    #[test]
    fn test_auto_select_query_only() {
        assert_eq!(
            auto_select_methods("x", &[]),
            vec![Method::Fulltext, Method::Vector]
        );
    }

    #[test]
    fn test_auto_select_query_and_filters() {
        let filters = vec![Filter::DomainContains("rust".to_string())];
        assert_eq!(
            auto_select_methods("x", &filters),
            vec![Method::Structured, Method::Fulltext, Method::Vector]
        );
    }

    #[test]
    fn test_auto_select_filters_only() {
        let filters = vec![Filter::DateAfter(0)];
        assert_eq!(auto_select_methods("", &filters), vec![Method::Structured]);
    }

    #[test]
    fn test_cap_top_k_bounds() {
        assert_eq!(cap_top_k(0), 1);
        assert_eq!(cap_top_k(10), 10);
        assert_eq!(cap_top_k(1000), 100);
    }

    #[test]
    fn test_fusion_single_method_is_identity() {
        let s = scores(&[(Method::Vector, 0.8)]);
        assert!((fuse_scores(&s) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_fusion_weighted_average() {
        // (1.0·1.0 + 0.5·0.85) / (1.0 + 0.85)
        let s = scores(&[(Method::Structured, 1.0), (Method::Fulltext, 0.5)]);
        let expected = (1.0 + 0.5 * 0.85) / 1.85;
        assert!((fuse_scores(&s) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_fusion_all_three_methods() {
        let s = scores(&[
            (Method::Structured, 0.9),
            (Method::Fulltext, 0.6),
            (Method::Vector, 0.3),
        ]);
        let expected = (0.9 + 0.6 * 0.85 + 0.3 * 0.70) / (1.0 + 0.85 + 0.70);
        assert!((fuse_scores(&s) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_fusion_deterministic() {
        let s = scores(&[(Method::Structured, 0.42), (Method::Vector, 0.77)]);
        assert_eq!(fuse_scores(&s), fuse_scores(&s.clone()));
    }

    #[test]
    fn test_fusion_empty_map_is_zero() {
        assert_eq!(fuse_scores(&BTreeMap::new()), 0.0);
    }

    #[test]
    fn test_fusion_missing_method_does_not_dilute() {
        // A record found only by vector is scored against vector's weight
        // alone, not dragged down by methods that never saw it.
        let only_vector = scores(&[(Method::Vector, 0.9)]);
        let with_structured = scores(&[(Method::Vector, 0.9), (Method::Structured, 0.9)]);
        assert!((fuse_scores(&only_vector) - 0.9).abs() < 1e-9);
        assert!((fuse_scores(&with_structured) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_structured_rank_decay() {
        // max(0.3, 1.0 − index·0.03)
        let score_at = |i: usize| (1.0 - i as f64 * 0.03).max(0.3);
        assert!((score_at(0) - 1.0).abs() < 1e-9);
        assert!((score_at(10) - 0.7).abs() < 1e-9);
        assert!((score_at(50) - 0.3).abs() < 1e-9);
    }
}
