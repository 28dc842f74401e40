//! Tunable knobs for chunking, embedding throughput, and bulk ingestion.

use std::time::Duration;

use crate::types::{PipelineError, Result};

/// Configuration shared across the ingestion and retrieval pipeline.
///
/// Defaults mirror the values the pipeline was tuned with: 1000-character
/// chunks with a 200-character overlap, 100-character minimum, embedding
/// batches of 32, and four concurrent documents during bulk ingestion.
///
/// # Examples
///
/// ```
/// use citedex::config::PipelineConfig;
///
/// let config = PipelineConfig::default()
///     .with_chunk_size(500)
///     .with_chunk_overlap(50);
/// assert_eq!(config.chunk_size, 500);
/// ```
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Target upper bound on chunk length, in characters.
    pub chunk_size: usize,
    /// Characters carried over from the tail of the previous chunk.
    pub chunk_overlap: usize,
    /// Chunks shorter than this are only allowed as a document's final chunk.
    pub min_chunk_size: usize,
    /// Number of texts embedded per backend call.
    pub batch_size: usize,
    /// Maximum documents ingested concurrently by `ingest_batch`.
    pub max_workers: usize,
    /// Retries for a failed embedding batch, applied at the orchestrator.
    pub embed_retries: usize,
    /// Delay between embedding retries.
    pub embed_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: 100,
            batch_size: 32,
            max_workers: 4,
            embed_retries: 2,
            embed_backoff: Duration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = chunk_overlap;
        self
    }

    #[must_use]
    pub fn with_min_chunk_size(mut self, min_chunk_size: usize) -> Self {
        self.min_chunk_size = min_chunk_size;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    #[must_use]
    pub fn with_embed_retries(mut self, retries: usize, backoff: Duration) -> Self {
        self.embed_retries = retries;
        self.embed_backoff = backoff;
        self
    }

    /// Validates internal consistency of the configured sizes.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::Chunking("chunk_size must be non-zero".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PipelineError::Chunking(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::Embedding("batch_size must be non-zero".into()));
        }
        if self.max_workers == 0 {
            return Err(PipelineError::Index("max_workers must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let config = PipelineConfig::default()
            .with_chunk_size(100)
            .with_chunk_overlap(100);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config = PipelineConfig::default().with_batch_size(0);
        assert!(config.validate().is_err());
    }
}
