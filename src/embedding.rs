//! Remote embedding service client and vector utilities.
//!
//! The index talks to a TEI-shaped endpoint: `POST {endpoint}/embed` with
//! `{"inputs": [...]}` returns one fixed-length float vector per input.
//! An unconfigured endpoint is a valid, detectable state — callers check
//! [`Embedder::is_enabled`] and degrade vector search gracefully.
//!
//! Vectors are persisted as little-endian f32 BLOBs; cosine distance is
//! computed in-process when the store scans for nearest neighbors.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// The embedding backend seam. Production uses [`HttpEmbedder`]; tests
/// substitute a stub to exercise backfill and search failure paths.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Whether an endpoint is configured at all.
    fn is_enabled(&self) -> bool;

    /// Expected vector length. Vectors of any other length are rejected.
    fn dims(&self) -> usize;

    /// Embed a batch of texts in one request. Uses the generous batch
    /// timeout. The response must contain exactly one vector per input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string with the short query timeout.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Client for a remote text-embeddings-inference style service.
pub struct HttpEmbedder {
    endpoint: Option<String>,
    dims: usize,
    batch_timeout: Duration,
    query_timeout: Duration,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            dims: config.dims,
            batch_timeout: Duration::from_secs(config.batch_timeout_secs),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
        }
    }

    async fn post_embed(&self, texts: &[String], timeout: Duration) -> Result<Vec<Vec<f32>>> {
        let endpoint = match self.endpoint {
            Some(ref e) => e.trim_end_matches('/'),
            None => bail!("Embedding endpoint is not configured"),
        };

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let response = client
            .post(format!("{}/embed", endpoint))
            .json(&serde_json::json!({ "inputs": texts }))
            .send()
            .await
            .with_context(|| format!("Embedding request to {} failed", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Embedding service error {}: {}", status, body);
        }

        let vectors: Vec<Vec<f32>> = response
            .json()
            .await
            .context("Malformed embedding response (expected array of float arrays)")?;

        if vectors.len() != texts.len() {
            bail!(
                "Embedding response length mismatch: sent {} texts, got {} vectors",
                texts.len(),
                vectors.len()
            );
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.post_embed(texts, self.batch_timeout).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self
            .post_embed(&[text.to_string()], self.query_timeout)
            .await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine distance in [0, 2]: `1 − cos(a, b)`. Returns 1.0 (orthogonal)
/// for empty or mismatched vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}

/// Cosine similarity in [-1, 1]. Returns 0.0 for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// An all-zero or empty query vector signals an unavailable embedding
/// backend, not an error.
pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|x| *x == 0.0)
}
