//! Ingestion pipeline: browser profile -> record tables -> embeddings.
//!
//! One run reads the requested sources, upserts each batch by identity key,
//! then backfills missing embeddings. A source that cannot be read is
//! skipped with a warning as long as the other requested source succeeds;
//! the run fails only when nothing could be read at all.

use anyhow::Result;
use std::path::PathBuf;

use crate::backfill::run_backfill;
use crate::config::Config;
use crate::embedding::{Embedder, HttpEmbedder};
use crate::models::{RawBookmark, RawVisit};
use crate::reader;
use crate::store::{BookmarkStore, RecordStore, VisitStore};

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Profile directory override; config/default otherwise.
    pub profile: Option<PathBuf>,
    pub visits_only: bool,
    pub bookmarks_only: bool,
    /// Upsert without running the embedding backfill.
    pub skip_embed: bool,
    /// Read and report counts without writing anything.
    pub dry_run: bool,
    pub embed_batch_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    pub visits_read: usize,
    pub bookmarks_read: usize,
    pub visits_upserted: usize,
    pub bookmarks_upserted: usize,
    pub visits_embedded: u64,
    pub bookmarks_embedded: u64,
}

pub async fn run_ingest(
    config: &Config,
    visits: &VisitStore,
    bookmarks: &BookmarkStore,
    opts: &IngestOptions,
) -> Result<IngestReport> {
    let profile_dir = match &opts.profile {
        Some(p) => p.clone(),
        None => config.browser.profile_dir()?,
    };
    let want_visits = !opts.bookmarks_only;
    let want_bookmarks = !opts.visits_only;
    if !want_visits && !want_bookmarks {
        anyhow::bail!("--visits-only and --bookmarks-only are mutually exclusive");
    }

    println!("Ingesting from profile: {}", profile_dir.display());

    let mut raw_visits: Option<Vec<RawVisit>> = None;
    let mut raw_bookmarks: Option<Vec<RawBookmark>> = None;

    if want_visits {
        match reader::read_visits(&profile_dir).await {
            Ok(rows) => raw_visits = Some(rows),
            Err(e) => eprintln!("Warning: skipping visits: {e:#}"),
        }
    }
    if want_bookmarks {
        match reader::read_bookmarks(&profile_dir) {
            Ok(rows) => raw_bookmarks = Some(rows),
            Err(e) => eprintln!("Warning: skipping bookmarks: {e:#}"),
        }
    }
    if raw_visits.is_none() && raw_bookmarks.is_none() {
        anyhow::bail!(
            "No readable sources in {} (tried{}{})",
            profile_dir.display(),
            if want_visits { " History" } else { "" },
            if want_bookmarks { " Bookmarks" } else { "" },
        );
    }

    let mut report = IngestReport {
        visits_read: raw_visits.as_ref().map_or(0, Vec::len),
        bookmarks_read: raw_bookmarks.as_ref().map_or(0, Vec::len),
        ..Default::default()
    };

    if opts.dry_run {
        println!(
            "Dry run: {} visits, {} bookmarks would be upserted",
            report.visits_read, report.bookmarks_read
        );
        return Ok(report);
    }

    let label = config.browser.label.as_str();
    if let Some(rows) = &raw_visits {
        report.visits_upserted = visits.upsert_batch(label, rows).await?;
        println!("  visits: {} upserted", report.visits_upserted);
    }
    if let Some(rows) = &raw_bookmarks {
        report.bookmarks_upserted = bookmarks.upsert_batch(label, rows).await?;
        println!("  bookmarks: {} upserted", report.bookmarks_upserted);
    }

    if !opts.skip_embed {
        let embedder = HttpEmbedder::new(&config.embedding);
        let batch_size = opts
            .embed_batch_size
            .unwrap_or(config.embedding.batch_size)
            .max(1);
        let backfill = run_backfill(visits, bookmarks, &embedder, batch_size).await?;
        report.visits_embedded = backfill.visits_embedded;
        report.bookmarks_embedded = backfill.bookmarks_embedded;
        if embedder.is_enabled() {
            println!(
                "  embeddings: {} visits, {} bookmarks",
                report.visits_embedded, report.bookmarks_embedded
            );
        }
    }

    println!("ok");
    Ok(report)
}
