//! Embedding generation and the similarity primitive.
//!
//! The pipeline is polymorphic over the [`Embedder`] capability so any
//! model provider can be substituted without touching chunking or
//! indexing. [`HashEmbedder`] provides deterministic offline vectors
//! (used throughout the test suite); [`HttpEmbedder`] talks to an
//! OpenAI-compatible `/embeddings` endpoint.

pub mod hash;
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::{PipelineError, Result};

pub use hash::HashEmbedder;
pub use http::HttpEmbedder;

/// Capability interface for turning text into fixed-dimension vectors.
///
/// Dimensionality is constant within one instance; the vector store
/// enforces the cross-component invariant on insert.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output vector dimensionality.
    fn dimensions(&self) -> usize;

    /// Embeds a batch of texts, order-preserving, one vector per input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embeds a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Progress callback for long-running batch embedding: receives the
/// cumulative count of texts processed. Purely informational; it cannot
/// pause or abort the batch.
pub type ProgressFn = Arc<dyn Fn(usize) + Send + Sync>;

/// Wraps an [`Embedder`] with fixed-size batching.
///
/// Batch boundaries bound peak memory and drive progress reporting only:
/// output order and values are identical to embedding one text at a
/// time. A failure on any batch aborts the whole call — partially
/// embedded results would corrupt downstream indexing.
#[derive(Clone)]
pub struct BatchedEmbedder {
    inner: Arc<dyn Embedder>,
    batch_size: usize,
}

impl BatchedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed_query(text).await
    }

    /// Embeds all texts in `batch_size` groups, reporting cumulative
    /// progress after each group.
    pub async fn embed_all(
        &self,
        texts: &[String],
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut processed = 0usize;
        for batch in texts.chunks(self.batch_size) {
            let mut batch_vectors = self.inner.embed_batch(batch).await?;
            if batch_vectors.len() != batch.len() {
                return Err(PipelineError::Embedding(format!(
                    "backend returned {} vectors for {} texts",
                    batch_vectors.len(),
                    batch.len()
                )));
            }
            vectors.append(&mut batch_vectors);
            processed += batch.len();
            if let Some(report) = progress {
                report(processed);
            }
        }
        tracing::debug!(texts = texts.len(), "embedded batch");
        Ok(vectors)
    }
}

/// Shared counter suitable as a [`ProgressFn`] target in callers that
/// poll progress from another thread.
#[derive(Clone, Default)]
pub struct ProgressCounter {
    processed: Arc<Mutex<usize>>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> ProgressFn {
        let processed = Arc::clone(&self.processed);
        Arc::new(move |count| {
            *processed.lock() = count;
        })
    }

    pub fn processed(&self) -> usize {
        *self.processed.lock()
    }
}

/// Cosine similarity of one query vector against each candidate.
///
/// A zero-norm query or candidate has no defined direction; that is an
/// input-validation error, never silently coerced to zero.
pub fn cosine_similarity(query: &[f32], candidates: &[Vec<f32>]) -> Result<Vec<f32>> {
    let query_norm = norm(query);
    if query_norm == 0.0 {
        return Err(PipelineError::Embedding(
            "query vector has zero norm".into(),
        ));
    }
    let mut scores = Vec::with_capacity(candidates.len());
    for (index, candidate) in candidates.iter().enumerate() {
        if candidate.len() != query.len() {
            return Err(PipelineError::Embedding(format!(
                "candidate {index} has dimension {} but query has {}",
                candidate.len(),
                query.len()
            )));
        }
        let candidate_norm = norm(candidate);
        if candidate_norm == 0.0 {
            return Err(PipelineError::Embedding(format!(
                "candidate {index} has zero norm"
            )));
        }
        let dot: f32 = query.iter().zip(candidate).map(|(q, d)| q * d).sum();
        scores.push(dot / (query_norm * candidate_norm));
    }
    Ok(scores)
}

fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batching_is_invisible_to_the_caller() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
        let texts: Vec<String> = (0..7).map(|i| format!("text number {i}")).collect();

        let singles = {
            let mut out = Vec::new();
            for text in &texts {
                out.push(embedder.embed_query(text).await.unwrap());
            }
            out
        };

        for batch_size in [1, 2, 3, 7, 32] {
            let batched = BatchedEmbedder::new(Arc::clone(&embedder), batch_size);
            let vectors = batched.embed_all(&texts, None).await.unwrap();
            assert_eq!(vectors, singles, "batch_size {batch_size} altered output");
        }
    }

    #[tokio::test]
    async fn progress_reports_cumulative_counts() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(32));
        let batched = BatchedEmbedder::new(embedder, 2);
        let texts: Vec<String> = (0..5).map(|i| format!("doc {i}")).collect();

        let counter = ProgressCounter::new();
        batched
            .embed_all(&texts, Some(&counter.callback()))
            .await
            .unwrap();
        assert_eq!(counter.processed(), 5);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5, 0.5, 0.0];
        let scores = cosine_similarity(&v, &[v.clone()]).unwrap();
        assert!((scores[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let scores =
            cosine_similarity(&[1.0, 0.0], &[vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        assert!(scores[0].abs() < 1e-6);
        assert!((scores[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_norm_candidate_is_a_hard_error() {
        let err = cosine_similarity(&[1.0, 0.0], &[vec![0.0, 0.0]]).unwrap_err();
        assert!(matches!(err, PipelineError::Embedding(_)));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let err = cosine_similarity(&[1.0, 0.0], &[vec![1.0, 0.0, 0.0]]).unwrap_err();
        assert!(matches!(err, PipelineError::Embedding(_)));
    }
}
