//! Browser profile readers.
//!
//! Chromium-family browsers keep visit history in a SQLite file named
//! `History` and bookmarks in a JSON file named `Bookmarks`, both inside the
//! profile directory. Both readers are read-only and never touch the live
//! files beyond opening them immutably; a missing file aborts only that
//! read. Rows without a URL are dropped here, before ingestion.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Row};
use std::path::Path;

use crate::models::{RawBookmark, RawVisit};

/// Chromium timestamps are microseconds since 1601-01-01 UTC.
const CHROMIUM_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

fn chromium_time_to_unix(microseconds: i64) -> Option<i64> {
    if microseconds <= 0 {
        return None;
    }
    Some(microseconds / 1_000_000 - CHROMIUM_EPOCH_OFFSET_SECS)
}

fn domain_from_url(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Read the profile's `History` database: one row per URL, already
/// aggregated by the browser into `last_visit_time` and `visit_count`.
pub async fn read_visits(profile_dir: &Path) -> Result<Vec<RawVisit>> {
    let history_path = profile_dir.join("History");
    if !history_path.exists() {
        anyhow::bail!("Browser History not found at {}", history_path.display());
    }

    let mut conn = SqliteConnectOptions::new()
        .filename(&history_path)
        .read_only(true)
        .immutable(true)
        .connect()
        .await
        .with_context(|| format!("Failed to open {}", history_path.display()))?;

    let rows = sqlx::query(
        "SELECT url, title, visit_count, last_visit_time
         FROM urls
         WHERE url IS NOT NULL AND TRIM(url) != ''
         ORDER BY last_visit_time DESC",
    )
    .fetch_all(&mut conn)
    .await
    .context("Failed to read urls table from History")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let url: String = row.get::<Option<String>, _>("url").unwrap_or_default();
        let url = url.trim().to_string();
        if url.is_empty() {
            continue;
        }
        let title: Option<String> = row.get("title");
        let title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let visit_count: i64 = row.get::<Option<i64>, _>("visit_count").unwrap_or(0);
        let last_visit_time = row
            .get::<Option<i64>, _>("last_visit_time")
            .and_then(chromium_time_to_unix);

        out.push(RawVisit {
            domain: domain_from_url(&url),
            url,
            title,
            last_visit_time,
            visit_count,
        });
    }

    Ok(out)
}

/// Read the profile's `Bookmarks` JSON: recursively walk the bookmark-bar,
/// other, and synced roots, tracking folder paths like `Bookmarks bar/Work`.
pub fn read_bookmarks(profile_dir: &Path) -> Result<Vec<RawBookmark>> {
    let bookmarks_path = profile_dir.join("Bookmarks");
    if !bookmarks_path.exists() {
        anyhow::bail!(
            "Browser Bookmarks not found at {}",
            bookmarks_path.display()
        );
    }

    let data = std::fs::read_to_string(&bookmarks_path)
        .with_context(|| format!("Failed to read {}", bookmarks_path.display()))?;
    let root: Value = serde_json::from_str(&data).context("Bookmarks file invalid or busy")?;

    let roots = root.get("roots").and_then(Value::as_object);
    let mut out = Vec::new();
    if let Some(roots) = roots {
        for (key, display) in [
            ("bookmark_bar", "Bookmarks bar"),
            ("other", "Other"),
            ("synced", "Synced"),
        ] {
            // The root node's own title duplicates the display label, so
            // walk its children directly.
            if let Some(children) = roots
                .get(key)
                .and_then(|n| n.get("children"))
                .and_then(Value::as_array)
            {
                for child in children {
                    walk_bookmarks(child, display, &mut out);
                }
            }
        }
    }
    Ok(out)
}

fn walk_bookmarks(node: &Value, folder_path: &str, out: &mut Vec<RawBookmark>) {
    let title = node
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");

    if let Some(url) = node.get("url").and_then(Value::as_str) {
        let url = url.trim();
        if url.is_empty() {
            return;
        }
        out.push(RawBookmark {
            url: url.to_string(),
            title: (!title.is_empty()).then(|| title.to_string()),
            folder: (!folder_path.is_empty()).then(|| folder_path.to_string()),
            added_at: node.get("date_added").and_then(parse_date_added),
        });
        return;
    }

    let child_path = if folder_path.is_empty() {
        title.to_string()
    } else if title.is_empty() {
        folder_path.to_string()
    } else {
        format!("{folder_path}/{title}")
    };
    if let Some(children) = node.get("children").and_then(Value::as_array) {
        for child in children {
            walk_bookmarks(child, &child_path, out);
        }
    }
}

/// `date_added` is usually a decimal string of Chromium microseconds, but
/// some exports carry milliseconds since the unix epoch instead.
fn parse_date_added(value: &Value) -> Option<i64> {
    let n = match value {
        Value::String(s) => s.parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    if n <= 0 {
        return None;
    }
    if n > 1_000_000_000_000 {
        chromium_time_to_unix(n)
    } else {
        Some(n / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chromium_epoch_conversion() {
        // 2020-01-01T00:00:00Z in Chromium microseconds.
        let us = (1_577_836_800 + CHROMIUM_EPOCH_OFFSET_SECS) * 1_000_000;
        assert_eq!(chromium_time_to_unix(us), Some(1_577_836_800));
        assert_eq!(chromium_time_to_unix(0), None);
        assert_eq!(chromium_time_to_unix(-5), None);
    }

    #[test]
    fn test_domain_extraction() {
        assert_eq!(
            domain_from_url("https://Docs.Rs/sqlx/latest"),
            Some("docs.rs".to_string())
        );
        assert_eq!(domain_from_url("not a url"), None);
    }

    #[test]
    fn test_bookmark_walk_tracks_folder_paths() {
        let children = [
            json!({ "title": "Rust", "url": "https://rust-lang.org", "date_added": "13200000000000000" }),
            json!({
                "title": "Work",
                "children": [
                    { "title": "CI", "url": "https://ci.example.com" }
                ]
            }),
        ];
        let mut out = Vec::new();
        for child in &children {
            walk_bookmarks(child, "Bookmarks bar", &mut out);
        }

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].folder.as_deref(), Some("Bookmarks bar"));
        assert!(out[0].added_at.is_some());
        assert_eq!(out[1].folder.as_deref(), Some("Bookmarks bar/Work"));
        assert_eq!(out[1].url, "https://ci.example.com");
        assert_eq!(out[1].added_at, None);
    }

    #[test]
    fn test_bookmark_without_url_is_skipped() {
        let node = json!({ "title": "leaf", "url": "  " });
        let mut out = Vec::new();
        walk_bookmarks(&node, "root", &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_date_added_millisecond_fallback() {
        assert_eq!(
            parse_date_added(&json!(1_577_836_800_000i64)),
            Some(1_577_836_800)
        );
    }
}
