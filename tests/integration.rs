//! End-to-end tests over a real temporary SQLite database: ingestion
//! idempotency, identity keys, embedding backfill, hybrid retrieval, and
//! query orchestration.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use tempfile::TempDir;

use pagetrail::config::Config;
use pagetrail::db;
use pagetrail::embedding::Embedder;
use pagetrail::filter::{parse_filters, RawFilter};
use pagetrail::migrate::apply_schema;
use pagetrail::models::{Method, RawBookmark, RawVisit};
use pagetrail::query::{run_query, Mode, QueryError, SearchRequest};
use pagetrail::search::SearchEngine;
use pagetrail::store::{BookmarkStore, RecordStore, VisitStore};
use pagetrail::{backfill, query};

// ============ Fixtures ============

async fn setup() -> (TempDir, sqlx::SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path().join("index.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    apply_schema(&pool).await.unwrap();
    (tmp, pool)
}

fn visit(url: &str, title: &str, domain: &str, when: i64) -> RawVisit {
    RawVisit {
        url: url.to_string(),
        title: Some(title.to_string()),
        domain: Some(domain.to_string()),
        last_visit_time: Some(when),
        visit_count: 1,
    }
}

fn bookmark(url: &str, title: &str, folder: &str) -> RawBookmark {
    RawBookmark {
        url: url.to_string(),
        title: Some(title.to_string()),
        folder: Some(folder.to_string()),
        added_at: Some(1_700_000_000),
    }
}

/// Programmable embedding backend. Vectors are keyed off marker words so
/// tests can steer nearest-neighbor results deterministically.
struct StubEmbedder {
    enabled: bool,
    mode: Mutex<StubMode>,
}

enum StubMode {
    Normal,
    /// Every batch call fails.
    FailBatches,
    /// Every query call fails; batches still succeed.
    FailQueries,
    /// Texts containing this marker get a wrong-length vector.
    ShortFor(String),
}

impl StubEmbedder {
    fn new() -> Self {
        Self {
            enabled: true,
            mode: Mutex::new(StubMode::Normal),
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if text.contains("kernel") {
            vec![1.0, 0.0, 0.0, 0.0]
        } else if text.contains("garden") {
            vec![0.0, 1.0, 0.0, 0.0]
        } else {
            vec![0.0, 0.0, 1.0, 0.0]
        }
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn dims(&self) -> usize {
        4
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mode = self.mode.lock().unwrap();
        match &*mode {
            StubMode::FailBatches => anyhow::bail!("stub backend down"),
            StubMode::ShortFor(marker) => Ok(texts
                .iter()
                .map(|t| {
                    if t.contains(marker.as_str()) {
                        vec![1.0]
                    } else {
                        self.vector_for(t)
                    }
                })
                .collect()),
            StubMode::Normal | StubMode::FailQueries => {
                Ok(texts.iter().map(|t| self.vector_for(t)).collect())
            }
        }
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if matches!(*self.mode.lock().unwrap(), StubMode::FailQueries) {
            anyhow::bail!("stub backend down");
        }
        Ok(self.vector_for(text))
    }
}

/// An embedder that was never configured.
struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn is_enabled(&self) -> bool {
        false
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("not configured")
    }
    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("not configured")
    }
}

// ============ Ingestion ============

#[tokio::test]
async fn reingest_does_not_duplicate_rows() {
    let (_tmp, pool) = setup().await;
    let store = VisitStore::new(pool.clone());
    let rows = vec![
        visit("https://a.example/one", "One", "a.example", 1_700_000_100),
        visit("https://a.example/two", "Two", "a.example", 1_700_000_200),
    ];

    store.upsert_batch("vivaldi", &rows).await.unwrap();
    store.upsert_batch("vivaldi", &rows).await.unwrap();

    assert_eq!(store.count(&[]).await.unwrap(), 2);
}

#[tokio::test]
async fn mutable_fields_refresh_in_place() {
    let (_tmp, pool) = setup().await;
    let store = VisitStore::new(pool.clone());
    let before = visit("https://a.example/page", "Old title", "a.example", 100);
    store.upsert_batch("vivaldi", &[before]).await.unwrap();

    let mut after = visit("https://a.example/page", "New title", "a.example", 200);
    after.visit_count = 7;
    store.upsert_batch("vivaldi", &[after]).await.unwrap();

    assert_eq!(store.count(&[]).await.unwrap(), 1);
    let records = store.select_structured(&[], 10).await.unwrap();
    assert_eq!(records[0].title.as_deref(), Some("New title"));
    assert_eq!(records[0].visit_count, 7);
}

#[tokio::test]
async fn same_url_different_browser_is_a_new_row() {
    let (_tmp, pool) = setup().await;
    let store = VisitStore::new(pool.clone());
    let row = visit("https://a.example/page", "Page", "a.example", 100);
    store.upsert_batch("vivaldi", &[row.clone()]).await.unwrap();
    store.upsert_batch("chromium", &[row]).await.unwrap();

    assert_eq!(store.count(&[]).await.unwrap(), 2);
}

#[tokio::test]
async fn bookmark_folder_is_part_of_identity() {
    let (_tmp, pool) = setup().await;
    let store = BookmarkStore::new(pool.clone());
    let rows = vec![
        bookmark("https://a.example/doc", "Doc", "Bookmarks bar/Work"),
        bookmark("https://a.example/doc", "Doc", "Other"),
    ];
    store.upsert_batch("vivaldi", &rows).await.unwrap();
    store.upsert_batch("vivaldi", &rows).await.unwrap();

    assert_eq!(store.count(&[]).await.unwrap(), 2);
}

// ============ Embedding backfill ============

#[tokio::test]
async fn backfill_embeds_all_pending_records() {
    let (_tmp, pool) = setup().await;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    visits
        .upsert_batch(
            "vivaldi",
            &[
                visit("https://a.example/kernel", "kernel notes", "a.example", 100),
                visit("https://b.example/garden", "garden log", "b.example", 200),
            ],
        )
        .await
        .unwrap();
    bookmarks
        .upsert_batch("vivaldi", &[bookmark("https://c.example", "c", "Other")])
        .await
        .unwrap();

    let embedder = StubEmbedder::new();
    let report = backfill::run_backfill(&visits, &bookmarks, &embedder, 2)
        .await
        .unwrap();

    assert_eq!(report.visits_embedded, 2);
    assert_eq!(report.bookmarks_embedded, 1);
    assert!(visits.select_unembedded(10).await.unwrap().is_empty());
    assert!(bookmarks.select_unembedded(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn backfill_failure_persists_nothing_and_terminates() {
    let (_tmp, pool) = setup().await;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    visits
        .upsert_batch(
            "vivaldi",
            &[visit("https://a.example/one", "One", "a.example", 100)],
        )
        .await
        .unwrap();

    let embedder = StubEmbedder::new();
    *embedder.mode.lock().unwrap() = StubMode::FailBatches;
    let report = backfill::run_backfill(&visits, &bookmarks, &embedder, 10)
        .await
        .unwrap();

    assert_eq!(report.visits_embedded, 0);
    assert_eq!(visits.select_unembedded(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn backfill_rejects_single_wrong_length_vector() {
    let (_tmp, pool) = setup().await;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    visits
        .upsert_batch(
            "vivaldi",
            &[
                visit("https://a.example/kernel", "kernel notes", "a.example", 100),
                visit("https://b.example/bad", "stunted entry", "b.example", 200),
                visit("https://c.example/garden", "garden log", "c.example", 300),
            ],
        )
        .await
        .unwrap();

    let embedder = StubEmbedder::new();
    *embedder.mode.lock().unwrap() = StubMode::ShortFor("stunted".to_string());
    let report = backfill::run_backfill(&visits, &bookmarks, &embedder, 10)
        .await
        .unwrap();

    // The two good vectors land; the short one is rejected and the loop
    // stops once a pass makes no progress.
    assert_eq!(report.visits_embedded, 2);
    let remaining = visits.select_unembedded(10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].title.as_deref(), Some("stunted entry"));
}

// ============ Retrieval ============

#[tokio::test]
async fn fulltext_finds_records_by_title() {
    let (_tmp, pool) = setup().await;
    let store = VisitStore::new(pool.clone());
    store
        .upsert_batch(
            "vivaldi",
            &[
                visit(
                    "https://a.example/async",
                    "Async runtimes compared",
                    "a.example",
                    100,
                ),
                visit("https://b.example/salsa", "Salsa recipes", "b.example", 200),
            ],
        )
        .await
        .unwrap();

    let embedder = DisabledEmbedder;
    let engine = SearchEngine::new(&store, &embedder);
    let outcome = engine
        .search("async", Some(&[Method::Fulltext]), &[], 10)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].title, "Async runtimes compared");
    let score = outcome.results[0].scores[&Method::Fulltext];
    assert!((0.1..=1.0).contains(&score));
}

#[tokio::test]
async fn fulltext_index_follows_updates() {
    let (_tmp, pool) = setup().await;
    let store = VisitStore::new(pool.clone());
    store
        .upsert_batch(
            "vivaldi",
            &[visit("https://a.example/p", "Original topic", "a.example", 100)],
        )
        .await
        .unwrap();
    store
        .upsert_batch(
            "vivaldi",
            &[visit("https://a.example/p", "Replacement subject", "a.example", 200)],
        )
        .await
        .unwrap();

    let embedder = DisabledEmbedder;
    let engine = SearchEngine::new(&store, &embedder);
    let old = engine
        .search("original", Some(&[Method::Fulltext]), &[], 10)
        .await
        .unwrap();
    let new = engine
        .search("replacement", Some(&[Method::Fulltext]), &[], 10)
        .await
        .unwrap();

    assert!(old.results.is_empty());
    assert_eq!(new.results.len(), 1);
}

#[tokio::test]
async fn vector_search_orders_by_similarity() {
    let (_tmp, pool) = setup().await;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    visits
        .upsert_batch(
            "vivaldi",
            &[
                visit("https://a.example/kernel", "kernel notes", "a.example", 100),
                visit("https://b.example/garden", "garden log", "b.example", 200),
            ],
        )
        .await
        .unwrap();

    let embedder = StubEmbedder::new();
    backfill::run_backfill(&visits, &bookmarks, &embedder, 10)
        .await
        .unwrap();

    let engine = SearchEngine::new(&visits, &embedder);
    let outcome = engine
        .search("kernel", Some(&[Method::Vector]), &[], 10)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results[0].url.contains("kernel"));
    // Identical vector: distance 0, score 1. Orthogonal: score 0.
    assert!((outcome.results[0].scores[&Method::Vector] - 1.0).abs() < 1e-6);
    assert!(outcome.results[1].scores[&Method::Vector].abs() < 1e-6);
}

#[tokio::test]
async fn vector_failure_degrades_to_partial_results() {
    let (_tmp, pool) = setup().await;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    visits
        .upsert_batch(
            "vivaldi",
            &[visit("https://a.example/kernel", "kernel notes", "a.example", 100)],
        )
        .await
        .unwrap();

    let embedder = StubEmbedder::new();
    backfill::run_backfill(&visits, &bookmarks, &embedder, 10)
        .await
        .unwrap();

    // Backend configured but the query embedding call fails: the vector
    // method contributes zero candidates and the search still succeeds
    // on fulltext alone.
    *embedder.mode.lock().unwrap() = StubMode::FailQueries;
    let engine = SearchEngine::new(&visits, &embedder);
    let outcome = engine.search("kernel", None, &[], 10).await.unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].title, "kernel notes");
    assert!(outcome.results[0].scores.contains_key(&Method::Fulltext));
    assert!(!outcome.results[0].scores.contains_key(&Method::Vector));
    assert_eq!(
        outcome.methods_executed,
        vec![Method::Fulltext, Method::Vector]
    );
}

#[tokio::test]
async fn auto_selection_runs_expected_methods() {
    let (_tmp, pool) = setup().await;
    let store = VisitStore::new(pool.clone());
    store
        .upsert_batch(
            "vivaldi",
            &[visit("https://a.example/p", "Page", "a.example", 100)],
        )
        .await
        .unwrap();

    let embedder = DisabledEmbedder;
    let engine = SearchEngine::new(&store, &embedder);

    let bare = engine.search("", None, &[], 10).await.unwrap();
    assert_eq!(bare.methods_executed, vec![Method::Structured]);
    assert_eq!(bare.results.len(), 1);

    let with_query = engine.search("page", None, &[], 10).await.unwrap();
    assert_eq!(
        with_query.methods_executed,
        vec![Method::Fulltext, Method::Vector]
    );

    let filters = parse_filters(&[RawFilter {
        field: "domain".to_string(),
        value: "a.example".to_string(),
    }])
    .unwrap();
    let with_both = engine.search("page", None, &filters, 10).await.unwrap();
    assert_eq!(
        with_both.methods_executed,
        vec![Method::Structured, Method::Fulltext, Method::Vector]
    );
}

#[tokio::test]
async fn date_before_bare_date_is_inclusive() {
    let (_tmp, pool) = setup().await;
    let store = VisitStore::new(pool.clone());
    // Noon UTC on 2026-02-10.
    let noon = 1_770_724_800;
    store
        .upsert_batch(
            "vivaldi",
            &[visit("https://a.example/p", "Page", "a.example", noon)],
        )
        .await
        .unwrap();

    let same_day = parse_filters(&[RawFilter {
        field: "date_before".to_string(),
        value: "2026-02-10".to_string(),
    }])
    .unwrap();
    let prev_day = parse_filters(&[RawFilter {
        field: "date_before".to_string(),
        value: "2026-02-09".to_string(),
    }])
    .unwrap();

    assert_eq!(store.count(&same_day).await.unwrap(), 1);
    assert_eq!(store.count(&prev_day).await.unwrap(), 0);
}

#[tokio::test]
async fn soft_deleted_rows_are_invisible() {
    let (_tmp, pool) = setup().await;
    let store = VisitStore::new(pool.clone());
    store
        .upsert_batch(
            "vivaldi",
            &[
                visit("https://a.example/keep", "Keep me", "a.example", 100),
                visit("https://a.example/gone", "Gone entry", "a.example", 200),
            ],
        )
        .await
        .unwrap();

    sqlx::query("UPDATE visits SET deleted_at = 300 WHERE url = 'https://a.example/gone'")
        .execute(&pool)
        .await
        .unwrap();

    assert_eq!(store.count(&[]).await.unwrap(), 1);
    let embedder = DisabledEmbedder;
    let engine = SearchEngine::new(&store, &embedder);
    let outcome = engine.search("", None, &[], 10).await.unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].url, "https://a.example/keep");

    // Deleted rows fall out of aggregates too: both records share the
    // domain, but only the live one is counted.
    let groups = engine.aggregate("domain", &[], 10).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].group_value, "a.example");
    assert_eq!(groups[0].count, 1);
}

// ============ Query orchestration ============

#[tokio::test]
async fn query_merges_both_kinds() {
    let (_tmp, pool) = setup().await;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    visits
        .upsert_batch(
            "vivaldi",
            &[visit("https://a.example/v", "Visit", "a.example", 100)],
        )
        .await
        .unwrap();
    bookmarks
        .upsert_batch("vivaldi", &[bookmark("https://b.example/b", "Mark", "Other")])
        .await
        .unwrap();

    let embedder = DisabledEmbedder;
    let resp = run_query(&visits, &bookmarks, &embedder, &SearchRequest::default())
        .await
        .unwrap();

    assert_eq!(resp.results.len(), 2);
    assert!(resp.timing_ms.keys().any(|k| k.starts_with("visits.")));
    assert!(resp.timing_ms.keys().any(|k| k.starts_with("bookmarks.")));
}

#[tokio::test]
async fn query_rejects_zero_kinds() {
    let (_tmp, pool) = setup().await;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    let embedder = DisabledEmbedder;

    let req = SearchRequest {
        search_visits: false,
        search_bookmarks: false,
        ..Default::default()
    };
    let err = run_query(&visits, &bookmarks, &embedder, &req)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::BadRequest(_)));
}

#[tokio::test]
async fn query_clamps_top_k() {
    let (_tmp, pool) = setup().await;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    visits
        .upsert_batch(
            "vivaldi",
            &[
                visit("https://a.example/one", "One", "a.example", 100),
                visit("https://a.example/two", "Two", "a.example", 200),
            ],
        )
        .await
        .unwrap();

    let embedder = DisabledEmbedder;
    let req = SearchRequest {
        top_k: 0,
        search_bookmarks: false,
        ..Default::default()
    };
    let resp = run_query(&visits, &bookmarks, &embedder, &req)
        .await
        .unwrap();
    assert_eq!(resp.results.len(), 1);
    assert_eq!(resp.total_available, 2);
}

#[tokio::test]
async fn count_mode_sums_selected_kinds() {
    let (_tmp, pool) = setup().await;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    visits
        .upsert_batch(
            "vivaldi",
            &[visit("https://a.example/v", "Visit", "a.example", 100)],
        )
        .await
        .unwrap();
    bookmarks
        .upsert_batch(
            "vivaldi",
            &[
                bookmark("https://b.example/1", "B1", "Other"),
                bookmark("https://b.example/2", "B2", "Other"),
            ],
        )
        .await
        .unwrap();

    let embedder = DisabledEmbedder;
    let req = SearchRequest {
        mode: Mode::Count,
        ..Default::default()
    };
    let resp = run_query(&visits, &bookmarks, &embedder, &req)
        .await
        .unwrap();
    assert_eq!(resp.count, Some(3));
}

#[tokio::test]
async fn aggregate_groups_visits_by_domain() {
    let (_tmp, pool) = setup().await;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    visits
        .upsert_batch(
            "vivaldi",
            &[
                visit("https://a.example/1", "A1", "a.example", 100),
                visit("https://a.example/2", "A2", "a.example", 200),
                visit("https://b.example/1", "B1", "b.example", 300),
            ],
        )
        .await
        .unwrap();

    let embedder = DisabledEmbedder;
    let req = SearchRequest {
        mode: Mode::Aggregate,
        group_by: Some("domain".to_string()),
        ..Default::default()
    };
    let resp = run_query(&visits, &bookmarks, &embedder, &req)
        .await
        .unwrap();
    let aggregates = resp.aggregates.unwrap();
    assert_eq!(aggregates.len(), 2);
    assert_eq!(aggregates[0].group_value, "a.example");
    assert_eq!(aggregates[0].count, 2);
}

#[tokio::test]
async fn aggregate_rejects_unsupported_group_by() {
    let (_tmp, pool) = setup().await;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    let embedder = DisabledEmbedder;

    // An unknown field is a caller error, not an empty success.
    let req = SearchRequest {
        mode: Mode::Aggregate,
        group_by: Some("color".to_string()),
        ..Default::default()
    };
    let err = run_query(&visits, &bookmarks, &embedder, &req)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::BadRequest(_)));

    // A field valid for a kind that is not selected is rejected too.
    let req = SearchRequest {
        mode: Mode::Aggregate,
        group_by: Some("folder".to_string()),
        search_bookmarks: false,
        ..Default::default()
    };
    let err = run_query(&visits, &bookmarks, &embedder, &req)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::BadRequest(_)));

    // The matching field for the selected kind still works.
    let req = SearchRequest {
        mode: Mode::Aggregate,
        group_by: Some("domain".to_string()),
        search_bookmarks: false,
        ..Default::default()
    };
    let resp = run_query(&visits, &bookmarks, &embedder, &req)
        .await
        .unwrap();
    assert!(resp.aggregates.unwrap().is_empty());
}

#[test]
fn capabilities_matches_query_surface() {
    let caps = query::capabilities();
    assert!(caps.methods.iter().any(|m| m.name == "vector"));
    assert!(caps.filters.iter().any(|f| f.field == "folder"));
}
