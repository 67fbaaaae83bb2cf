//! Typed access to the two record tables.
//!
//! [`RecordStore`] is the capability the retrieval engine and the backfill
//! loop are written against: upsert-by-identity-key, filtered select,
//! lexical-rank select, nearest-neighbor select, count, and group-count.
//! [`VisitStore`] and [`BookmarkStore`] implement it over the same SQLite
//! pool; they differ only in table, recency column, and identity key.
//!
//! All reads exclude soft-deleted rows (`deleted_at IS NOT NULL`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_distance};
use crate::filter::Filter;
use crate::models::{GroupCount, ItemKind, RawBookmark, RawVisit, Record};

/// Content hash of a raw URL, hex-encoded. Identity keys use this instead
/// of the URL itself because raw URLs can exceed sane index key sizes.
pub fn content_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Turn free text into an FTS5 MATCH expression. Each whitespace token is
/// double-quoted so user input can never be parsed as FTS5 syntax.
pub fn fts_match_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "")))
        .filter(|tok| tok.len() > 2)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Store session capability shared by both item kinds.
#[async_trait]
pub trait RecordStore: Send + Sync {
    type Raw: Send + Sync;

    fn kind(&self) -> ItemKind;

    /// Upsert a batch by identity key inside one transaction. Mutable fields
    /// are refreshed on conflict; identity and `created_at` never change.
    /// Returns the number of records processed.
    async fn upsert_batch(&self, browser: &str, rows: &[Self::Raw]) -> Result<usize>;

    /// Records passing the filters, ordered by the kind's recency field
    /// descending with nulls last.
    async fn select_structured(&self, filters: &[Filter], limit: i64) -> Result<Vec<Record>>;

    /// Records whose lexical index matches the query, with the store's raw
    /// relevance rank (bm25; more negative is better), best first.
    async fn select_lexical(
        &self,
        query: &str,
        filters: &[Filter],
        limit: i64,
    ) -> Result<Vec<(Record, f64)>>;

    /// Embedded records ordered by ascending cosine distance to the query
    /// vector. Records without an embedding are not eligible.
    async fn select_nearest(
        &self,
        query_vec: &[f32],
        filters: &[Filter],
        limit: i64,
    ) -> Result<Vec<(Record, f64)>>;

    async fn count(&self, filters: &[Filter]) -> Result<i64>;

    /// Top groups by count for this kind's group field.
    async fn group_count(&self, filters: &[Filter], top_n: i64) -> Result<Vec<GroupCount>>;

    /// Oldest-first batch of live records still lacking an embedding.
    async fn select_unembedded(&self, limit: i64) -> Result<Vec<Record>>;

    /// Persist one verified vector together with its computed-at timestamp.
    async fn write_embedding(&self, id: i64, blob: &[u8], computed_at: i64) -> Result<()>;

    /// The text sent to the embedding service for one record.
    fn embedding_text(&self, rec: &Record) -> String;
}

/// SQL fragment values bound positionally after the static parts.
enum Arg {
    I(i64),
    S(String),
}

/// Table-shape differences between the two kinds.
struct TableSpec {
    table: &'static str,
    fts: &'static str,
    recency_col: &'static str,
    group_col: &'static str,
}

const VISITS: TableSpec = TableSpec {
    table: "visits",
    fts: "visits_fts",
    recency_col: "last_visit_time",
    group_col: "domain",
};

const BOOKMARKS: TableSpec = TableSpec {
    table: "bookmarks",
    fts: "bookmarks_fts",
    recency_col: "added_at",
    group_col: "folder",
};

impl TableSpec {
    /// Column list yielding the unified [`Record`] shape from either table.
    fn record_cols(&self, alias: &str) -> String {
        match self.table {
            "visits" => format!(
                "{a}.id, {a}.url, {a}.title, {a}.snippet, {a}.browser, \
                 {a}.domain, {a}.last_visit_time, {a}.visit_count, \
                 NULL AS folder, NULL AS added_at",
                a = alias
            ),
            _ => format!(
                "{a}.id, {a}.url, {a}.title, {a}.snippet, {a}.browser, \
                 NULL AS domain, NULL AS last_visit_time, 0 AS visit_count, \
                 {a}.folder, {a}.added_at",
                a = alias
            ),
        }
    }

    /// WHERE fragments (each starting with `AND`) plus their bind values.
    /// Filters that do not apply to this kind are ignored.
    fn filter_clauses(&self, alias: &str, filters: &[Filter]) -> (String, Vec<Arg>) {
        let mut sql = String::new();
        let mut args = Vec::new();
        for f in filters {
            match f {
                Filter::DateAfter(ts) => {
                    sql.push_str(&format!(" AND {alias}.{} >= ?", self.recency_col));
                    args.push(Arg::I(*ts));
                }
                Filter::DateBefore(ts) => {
                    sql.push_str(&format!(" AND {alias}.{} <= ?", self.recency_col));
                    args.push(Arg::I(*ts));
                }
                Filter::DomainContains(s) if self.table == "visits" => {
                    sql.push_str(&format!(" AND instr(lower({alias}.domain), lower(?)) > 0"));
                    args.push(Arg::S(s.clone()));
                }
                Filter::FolderContains(s) if self.table == "bookmarks" => {
                    sql.push_str(&format!(" AND instr(lower({alias}.folder), lower(?)) > 0"));
                    args.push(Arg::S(s.clone()));
                }
                _ => {}
            }
        }
        (sql, args)
    }
}

fn row_to_record(row: &SqliteRow) -> Record {
    Record {
        id: row.get("id"),
        url: row.get("url"),
        title: row.get("title"),
        snippet: row.get("snippet"),
        browser: row.get("browser"),
        domain: row.get("domain"),
        last_visit_time: row.get("last_visit_time"),
        visit_count: row.get("visit_count"),
        folder: row.get("folder"),
        added_at: row.get("added_at"),
    }
}

fn bind_args<'q>(
    mut q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    args: &'q [Arg],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for a in args {
        q = match a {
            Arg::I(v) => q.bind(v),
            Arg::S(s) => q.bind(s),
        };
    }
    q
}

// ============ Shared query implementations ============

async fn structured_impl(
    pool: &SqlitePool,
    spec: &TableSpec,
    filters: &[Filter],
    limit: i64,
) -> Result<Vec<Record>> {
    let (clauses, args) = spec.filter_clauses("t", filters);
    let sql = format!(
        "SELECT {cols} FROM {table} t
         WHERE t.deleted_at IS NULL{clauses}
         ORDER BY (t.{recency} IS NULL) ASC, t.{recency} DESC
         LIMIT ?",
        cols = spec.record_cols("t"),
        table = spec.table,
        recency = spec.recency_col,
    );
    let rows = bind_args(sqlx::query(&sql), &args)
        .bind(limit)
        .fetch_all(pool)
        .await
        .with_context(|| format!("structured select on {} failed", spec.table))?;
    Ok(rows.iter().map(row_to_record).collect())
}

async fn lexical_impl(
    pool: &SqlitePool,
    spec: &TableSpec,
    query: &str,
    filters: &[Filter],
    limit: i64,
) -> Result<Vec<(Record, f64)>> {
    let match_expr = fts_match_query(query);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }
    let (clauses, args) = spec.filter_clauses("t", filters);
    let sql = format!(
        "SELECT {cols}, bm25({fts}) AS rank
         FROM {fts}
         JOIN {table} t ON t.id = {fts}.rowid
         WHERE {fts} MATCH ?
           AND t.deleted_at IS NULL{clauses}
         ORDER BY rank ASC, (t.{recency} IS NULL) ASC, t.{recency} DESC
         LIMIT ?",
        cols = spec.record_cols("t"),
        fts = spec.fts,
        table = spec.table,
        recency = spec.recency_col,
    );
    let mut q = sqlx::query(&sql).bind(&match_expr);
    q = bind_args(q, &args).bind(limit);
    let rows = q
        .fetch_all(pool)
        .await
        .with_context(|| format!("fulltext select on {} failed", spec.table))?;
    Ok(rows
        .iter()
        .map(|row| (row_to_record(row), row.get::<f64, _>("rank")))
        .collect())
}

async fn nearest_impl(
    pool: &SqlitePool,
    spec: &TableSpec,
    query_vec: &[f32],
    filters: &[Filter],
    limit: i64,
) -> Result<Vec<(Record, f64)>> {
    let (clauses, args) = spec.filter_clauses("t", filters);
    let sql = format!(
        "SELECT {cols}, t.embedding AS embedding FROM {table} t
         WHERE t.deleted_at IS NULL AND t.embedding IS NOT NULL{clauses}",
        cols = spec.record_cols("t"),
        table = spec.table,
    );
    let rows = bind_args(sqlx::query(&sql), &args)
        .fetch_all(pool)
        .await
        .with_context(|| format!("vector select on {} failed", spec.table))?;

    let mut scored: Vec<(Record, f64)> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let dist = cosine_distance(query_vec, &blob_to_vec(&blob));
            (row_to_record(row), dist)
        })
        .collect();

    // Ascending distance, id ascending breaking ties deterministically.
    scored.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.id.cmp(&b.0.id))
    });
    scored.truncate(limit.max(0) as usize);
    Ok(scored)
}

async fn count_impl(pool: &SqlitePool, spec: &TableSpec, filters: &[Filter]) -> Result<i64> {
    let (clauses, args) = spec.filter_clauses("t", filters);
    let sql = format!(
        "SELECT COUNT(*) FROM {table} t WHERE t.deleted_at IS NULL{clauses}",
        table = spec.table,
    );
    let total: i64 = bind_args(sqlx::query(&sql), &args)
        .fetch_one(pool)
        .await
        .with_context(|| format!("count on {} failed", spec.table))?
        .get(0);
    Ok(total)
}

async fn group_count_impl(
    pool: &SqlitePool,
    spec: &TableSpec,
    filters: &[Filter],
    top_n: i64,
) -> Result<Vec<GroupCount>> {
    let (clauses, args) = spec.filter_clauses("t", filters);
    let sql = format!(
        "SELECT t.{group} AS group_value, COUNT(*) AS cnt FROM {table} t
         WHERE t.deleted_at IS NULL
           AND t.{group} IS NOT NULL AND t.{group} != ''{clauses}
         GROUP BY t.{group}
         ORDER BY cnt DESC
         LIMIT ?",
        group = spec.group_col,
        table = spec.table,
    );
    let rows = bind_args(sqlx::query(&sql), &args)
        .bind(top_n)
        .fetch_all(pool)
        .await
        .with_context(|| format!("aggregate on {} failed", spec.table))?;
    Ok(rows
        .iter()
        .map(|row| GroupCount {
            group_value: row.get("group_value"),
            count: row.get("cnt"),
        })
        .collect())
}

async fn unembedded_impl(
    pool: &SqlitePool,
    spec: &TableSpec,
    limit: i64,
) -> Result<Vec<Record>> {
    let sql = format!(
        "SELECT {cols} FROM {table} t
         WHERE t.embedding IS NULL AND t.deleted_at IS NULL
         ORDER BY t.id ASC
         LIMIT ?",
        cols = spec.record_cols("t"),
        table = spec.table,
    );
    let rows = sqlx::query(&sql)
        .bind(limit)
        .fetch_all(pool)
        .await
        .with_context(|| format!("unembedded select on {} failed", spec.table))?;
    Ok(rows.iter().map(row_to_record).collect())
}

async fn write_embedding_impl(
    pool: &SqlitePool,
    spec: &TableSpec,
    id: i64,
    blob: &[u8],
    computed_at: i64,
) -> Result<()> {
    sqlx::query(&format!(
        "UPDATE {} SET embedding = ?, embedding_computed_at = ? WHERE id = ?",
        spec.table
    ))
    .bind(blob)
    .bind(computed_at)
    .bind(id)
    .execute(pool)
    .await
    .with_context(|| format!("embedding write on {} id {} failed", spec.table, id))?;
    Ok(())
}

// ============ Visit records ============

#[derive(Clone)]
pub struct VisitStore {
    pool: SqlitePool,
}

impl VisitStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for VisitStore {
    type Raw = RawVisit;

    fn kind(&self) -> ItemKind {
        ItemKind::Visits
    }

    async fn upsert_batch(&self, browser: &str, rows: &[RawVisit]) -> Result<usize> {
        let mut tx = self.pool.begin().await.context("begin visit upsert")?;
        let now = chrono::Utc::now().timestamp();

        for r in rows {
            let hash = content_hash(&r.url);
            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM visits WHERE url_hash = ? AND COALESCE(browser, '') = ?",
            )
            .bind(&hash)
            .bind(browser)
            .fetch_optional(&mut *tx)
            .await
            .context("visit identity lookup failed")?;

            match existing {
                Some(id) => {
                    sqlx::query(
                        "UPDATE visits
                         SET title = ?, domain = ?, last_visit_time = ?, visit_count = ?,
                             updated_at = ?
                         WHERE id = ?",
                    )
                    .bind(&r.title)
                    .bind(&r.domain)
                    .bind(r.last_visit_time)
                    .bind(r.visit_count)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("visit update failed for {}", r.url))?;
                }
                None => {
                    sqlx::query(
                        "INSERT INTO visits
                         (url, url_hash, title, snippet, domain, last_visit_time,
                          visit_count, browser, created_at, updated_at)
                         VALUES (?, ?, ?, NULL, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&r.url)
                    .bind(&hash)
                    .bind(&r.title)
                    .bind(&r.domain)
                    .bind(r.last_visit_time)
                    .bind(r.visit_count)
                    .bind(browser)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("visit insert failed for {}", r.url))?;
                }
            }
        }

        tx.commit().await.context("commit visit upsert")?;
        Ok(rows.len())
    }

    async fn select_structured(&self, filters: &[Filter], limit: i64) -> Result<Vec<Record>> {
        structured_impl(&self.pool, &VISITS, filters, limit).await
    }

    async fn select_lexical(
        &self,
        query: &str,
        filters: &[Filter],
        limit: i64,
    ) -> Result<Vec<(Record, f64)>> {
        lexical_impl(&self.pool, &VISITS, query, filters, limit).await
    }

    async fn select_nearest(
        &self,
        query_vec: &[f32],
        filters: &[Filter],
        limit: i64,
    ) -> Result<Vec<(Record, f64)>> {
        nearest_impl(&self.pool, &VISITS, query_vec, filters, limit).await
    }

    async fn count(&self, filters: &[Filter]) -> Result<i64> {
        count_impl(&self.pool, &VISITS, filters).await
    }

    async fn group_count(&self, filters: &[Filter], top_n: i64) -> Result<Vec<GroupCount>> {
        group_count_impl(&self.pool, &VISITS, filters, top_n).await
    }

    async fn select_unembedded(&self, limit: i64) -> Result<Vec<Record>> {
        unembedded_impl(&self.pool, &VISITS, limit).await
    }

    async fn write_embedding(&self, id: i64, blob: &[u8], computed_at: i64) -> Result<()> {
        write_embedding_impl(&self.pool, &VISITS, id, blob, computed_at).await
    }

    fn embedding_text(&self, rec: &Record) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(ref t) = rec.title {
            if !t.is_empty() {
                parts.push(t);
            }
        }
        parts.push(&rec.url);
        parts.join(" ")
    }
}

// ============ Bookmark records ============

#[derive(Clone)]
pub struct BookmarkStore {
    pool: SqlitePool,
}

impl BookmarkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for BookmarkStore {
    type Raw = RawBookmark;

    fn kind(&self) -> ItemKind {
        ItemKind::Bookmarks
    }

    async fn upsert_batch(&self, browser: &str, rows: &[RawBookmark]) -> Result<usize> {
        let mut tx = self.pool.begin().await.context("begin bookmark upsert")?;
        let now = chrono::Utc::now().timestamp();

        for r in rows {
            let hash = content_hash(&r.url);
            let folder_key = r.folder.as_deref().unwrap_or("");
            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM bookmarks
                 WHERE url_hash = ? AND COALESCE(folder, '') = ? AND COALESCE(browser, '') = ?",
            )
            .bind(&hash)
            .bind(folder_key)
            .bind(browser)
            .fetch_optional(&mut *tx)
            .await
            .context("bookmark identity lookup failed")?;

            match existing {
                Some(id) => {
                    sqlx::query(
                        "UPDATE bookmarks SET title = ?, added_at = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(&r.title)
                    .bind(r.added_at)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("bookmark update failed for {}", r.url))?;
                }
                None => {
                    sqlx::query(
                        "INSERT INTO bookmarks
                         (url, url_hash, title, snippet, folder, added_at,
                          browser, created_at, updated_at)
                         VALUES (?, ?, ?, NULL, ?, ?, ?, ?, ?)",
                    )
                    .bind(&r.url)
                    .bind(&hash)
                    .bind(&r.title)
                    .bind(&r.folder)
                    .bind(r.added_at)
                    .bind(browser)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("bookmark insert failed for {}", r.url))?;
                }
            }
        }

        tx.commit().await.context("commit bookmark upsert")?;
        Ok(rows.len())
    }

    async fn select_structured(&self, filters: &[Filter], limit: i64) -> Result<Vec<Record>> {
        structured_impl(&self.pool, &BOOKMARKS, filters, limit).await
    }

    async fn select_lexical(
        &self,
        query: &str,
        filters: &[Filter],
        limit: i64,
    ) -> Result<Vec<(Record, f64)>> {
        lexical_impl(&self.pool, &BOOKMARKS, query, filters, limit).await
    }

    async fn select_nearest(
        &self,
        query_vec: &[f32],
        filters: &[Filter],
        limit: i64,
    ) -> Result<Vec<(Record, f64)>> {
        nearest_impl(&self.pool, &BOOKMARKS, query_vec, filters, limit).await
    }

    async fn count(&self, filters: &[Filter]) -> Result<i64> {
        count_impl(&self.pool, &BOOKMARKS, filters).await
    }

    async fn group_count(&self, filters: &[Filter], top_n: i64) -> Result<Vec<GroupCount>> {
        group_count_impl(&self.pool, &BOOKMARKS, filters, top_n).await
    }

    async fn select_unembedded(&self, limit: i64) -> Result<Vec<Record>> {
        unembedded_impl(&self.pool, &BOOKMARKS, limit).await
    }

    async fn write_embedding(&self, id: i64, blob: &[u8], computed_at: i64) -> Result<()> {
        write_embedding_impl(&self.pool, &BOOKMARKS, id, blob, computed_at).await
    }

    fn embedding_text(&self, rec: &Record) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(ref t) = rec.title {
            if !t.is_empty() {
                parts.push(t);
            }
        }
        parts.push(&rec.url);
        if let Some(ref f) = rec.folder {
            if !f.is_empty() {
                parts.push(f);
            }
        }
        parts.join(" ")
    }
}
