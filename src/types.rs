//! Crate-wide error taxonomy and result alias.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the ingestion and retrieval pipeline.
///
/// Variants map to distinct failure classes with different propagation
/// policies: per-file errors (`UnsupportedFormat`, `SourceNotFound`,
/// `Extraction`) are caught and reported individually during bulk
/// ingestion, while `Embedding` and `Index` errors abort the enclosing
/// ingest call to keep the store consistent with the document's chunks.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The file extension has no registered extractor.
    #[error("unsupported format: '{extension}' has no registered extractor")]
    UnsupportedFormat { extension: String },

    /// The source path does not exist.
    #[error("source not found: {0}")]
    SourceNotFound(PathBuf),

    /// A format-specific parser failed on the source file.
    #[error("extraction failed for {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    /// The splitter produced an inconsistent result. Should not occur on
    /// valid text; treated as a defect when it does.
    #[error("chunking failed: {0}")]
    Chunking(String),

    /// The embedding backend errored or rejected its input.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The vector store is unavailable or a validation invariant
    /// (id/length/dimensionality) was violated.
    #[error("index error: {0}")]
    Index(String),

    /// An ingest worker terminated abnormally (panicked or was
    /// cancelled) during bulk ingestion.
    #[error("ingest worker failed: {0}")]
    Worker(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Convenience constructor for extraction failures.
    pub fn extraction(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for errors that should be reported per-file in a
    /// bulk batch rather than aborting the batch.
    pub fn is_per_document(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat { .. }
                | Self::SourceNotFound(_)
                | Self::Extraction { .. }
                | Self::Chunking(_)
                | Self::Worker(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
