//! Index statistics for the `stats` command.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::models::{format_ts_iso, ItemKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct KindStats {
    pub total: i64,
    pub embedded: i64,
    pub deleted: i64,
    pub latest_update: Option<i64>,
}

impl KindStats {
    pub fn embedded_pct(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.embedded as f64 * 100.0 / self.total as f64
        }
    }
}

pub async fn kind_stats(pool: &SqlitePool, kind: ItemKind) -> Result<KindStats> {
    let table = kind.as_str();
    let row = sqlx::query(&format!(
        "SELECT
            COUNT(*) FILTER (WHERE deleted_at IS NULL) AS total,
            COUNT(*) FILTER (WHERE deleted_at IS NULL AND embedding IS NOT NULL) AS embedded,
            COUNT(*) FILTER (WHERE deleted_at IS NOT NULL) AS deleted,
            MAX(updated_at) AS latest_update
         FROM {table}"
    ))
    .fetch_one(pool)
    .await
    .with_context(|| format!("stats query on {table} failed"))?;

    Ok(KindStats {
        total: row.get("total"),
        embedded: row.get("embedded"),
        deleted: row.get("deleted"),
        latest_update: row.get("latest_update"),
    })
}

pub async fn print_stats(config: &Config, pool: &SqlitePool) -> Result<()> {
    println!("Database: {}", config.db.path.display());
    if let Ok(meta) = std::fs::metadata(&config.db.path) {
        println!("Size:     {:.1} MB", meta.len() as f64 / 1_048_576.0);
    }
    println!();
    println!(
        "{:<12} {:>8} {:>10} {:>9} {:>22}",
        "kind", "records", "embedded%", "deleted", "last update"
    );

    for kind in [ItemKind::Visits, ItemKind::Bookmarks] {
        let s = kind_stats(pool, kind).await?;
        println!(
            "{:<12} {:>8} {:>9.1}% {:>9} {:>22}",
            kind.as_str(),
            s.total,
            s.embedded_pct(),
            s.deleted,
            s.latest_update.map(format_ts_iso).unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_pct_handles_empty() {
        assert_eq!(KindStats::default().embedded_pct(), 0.0);
        let s = KindStats {
            total: 4,
            embedded: 3,
            ..Default::default()
        };
        assert!((s.embedded_pct() - 75.0).abs() < 1e-9);
    }
}
