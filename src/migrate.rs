//! Schema setup for the browsing index.
//!
//! Two record tables (`visits`, `bookmarks`) share the same shape apart from
//! their kind-specific columns. Each has an FTS5 external-content table kept
//! in sync by triggers, so the lexical index is regenerated by the store on
//! every write rather than by application code.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables, indexes, and triggers. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS visits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL,
            url_hash TEXT NOT NULL,
            title TEXT,
            snippet TEXT,
            domain TEXT,
            last_visit_time INTEGER,
            visit_count INTEGER NOT NULL DEFAULT 0,
            browser TEXT,
            embedding BLOB,
            embedding_computed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bookmarks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL,
            url_hash TEXT NOT NULL,
            title TEXT,
            snippet TEXT,
            folder TEXT,
            added_at INTEGER,
            browser TEXT,
            embedding BLOB,
            embedding_computed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Identity keys: the hash stands in for the raw URL so oversized URLs
    // never become index keys. Empty string stands in for a missing browser
    // or folder so the key is total.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_visits_identity
         ON visits(url_hash, COALESCE(browser, ''))",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_bookmarks_identity
         ON bookmarks(url_hash, COALESCE(folder, ''), COALESCE(browser, ''))",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_visits_last_visit ON visits(last_visit_time DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bookmarks_added ON bookmarks(added_at DESC)")
        .execute(pool)
        .await?;

    create_fts(pool, "visits", &["title", "snippet", "domain", "url"]).await?;
    create_fts(pool, "bookmarks", &["title", "snippet", "folder", "url"]).await?;

    Ok(())
}

/// Create an FTS5 external-content table plus the insert/delete/update
/// triggers that keep it consistent with the record table.
/// FTS5 CREATE is not idempotent natively, so we check sqlite_master first.
async fn create_fts(pool: &SqlitePool, table: &str, columns: &[&str]) -> Result<()> {
    let fts = format!("{table}_fts");

    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
    )
    .bind(&fts)
    .fetch_one(pool)
    .await?;

    let cols = columns.join(", ");
    if !fts_exists {
        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE {fts} USING fts5({cols}, content='{table}', content_rowid='id')"
        ))
        .execute(pool)
        .await?;
    }

    let new_vals = columns
        .iter()
        .map(|c| format!("new.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let old_vals = columns
        .iter()
        .map(|c| format!("old.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    sqlx::query(&format!(
        "CREATE TRIGGER IF NOT EXISTS {table}_fts_ai AFTER INSERT ON {table} BEGIN
             INSERT INTO {fts}(rowid, {cols}) VALUES (new.id, {new_vals});
         END"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TRIGGER IF NOT EXISTS {table}_fts_ad AFTER DELETE ON {table} BEGIN
             INSERT INTO {fts}({fts}, rowid, {cols}) VALUES ('delete', old.id, {old_vals});
         END"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TRIGGER IF NOT EXISTS {table}_fts_au AFTER UPDATE ON {table} BEGIN
             INSERT INTO {fts}({fts}, rowid, {cols}) VALUES ('delete', old.id, {old_vals});
             INSERT INTO {fts}(rowid, {cols}) VALUES (new.id, {new_vals});
         END"
    ))
    .execute(pool)
    .await?;

    Ok(())
}
