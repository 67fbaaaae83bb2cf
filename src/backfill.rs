//! Incremental embedding backfill.
//!
//! Selects records without an embedding in bounded batches, embeds each
//! batch with one remote call, and writes back verified vectors. A failed
//! remote call abandons the whole batch without persisting anything — the
//! loop then reports zero progress and stops, leaving retry policy to the
//! caller. A single wrong-length vector rejects only that record.

use anyhow::Result;
use chrono::Utc;

use crate::embedding::{vec_to_blob, Embedder};
use crate::store::{BookmarkStore, RecordStore, VisitStore};

/// Per-kind totals from one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub visits_embedded: u64,
    pub bookmarks_embedded: u64,
}

/// Run backfill to exhaustion for both kinds, sequentially. Skipped
/// entirely (with a warning) when no embedding endpoint is configured.
pub async fn run_backfill(
    visits: &VisitStore,
    bookmarks: &BookmarkStore,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<BackfillReport> {
    if !embedder.is_enabled() {
        eprintln!("Warning: embedding endpoint not configured; skipping backfill");
        return Ok(BackfillReport::default());
    }

    Ok(BackfillReport {
        visits_embedded: backfill_kind(visits, embedder, batch_size).await?,
        bookmarks_embedded: backfill_kind(bookmarks, embedder, batch_size).await?,
    })
}

/// Drain one kind: batches are sequential because each batch's "none
/// remain" check depends on the previous batch's writes being visible.
/// Terminates on the first batch that embeds zero records.
pub async fn backfill_kind<S: RecordStore>(
    store: &S,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let n = backfill_batch(store, embedder, batch_size).await?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Embed one batch. Returns the number of records newly embedded; a remote
/// failure or a response/request length mismatch yields `Ok(0)` with
/// nothing persisted.
async fn backfill_batch<S: RecordStore>(
    store: &S,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<u64> {
    let records = store.select_unembedded(batch_size as i64).await?;
    if records.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = records.iter().map(|r| store.embedding_text(r)).collect();

    let vectors = match embedder.embed_batch(&texts).await {
        Ok(v) => v,
        Err(e) => {
            eprintln!(
                "Warning: embedding batch failed for {}: {:#}",
                store.kind(),
                e
            );
            return Ok(0);
        }
    };
    if vectors.len() != records.len() {
        eprintln!(
            "Warning: embedding batch for {} returned {} vectors for {} records; dropping batch",
            store.kind(),
            vectors.len(),
            records.len()
        );
        return Ok(0);
    }

    let now = Utc::now().timestamp();
    let mut written = 0u64;
    for (record, vector) in records.iter().zip(vectors.iter()) {
        if vector.len() != embedder.dims() {
            eprintln!(
                "Warning: rejecting embedding of length {} (expected {}) for {} id {}",
                vector.len(),
                embedder.dims(),
                store.kind(),
                record.id
            );
            continue;
        }
        store
            .write_embedding(record.id, &vec_to_blob(vector), now)
            .await?;
        written += 1;
    }

    Ok(written)
}
