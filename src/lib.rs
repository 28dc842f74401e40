//! Document ingestion and semantic retrieval pipeline.
//!
//! ```text
//! Source files ──► extract (pdf / docx / text / markdown / csv / xlsx)
//!                       │
//!                       ▼
//!                  chunking::splitter ──► chunking::attribute
//!                       │                       │
//!                       ▼                       ▼
//!                  embeddings (batched, pluggable backend)
//!                       │
//!                       ▼
//!                  stores::SqliteVectorStore (sqlite-vec cosine index)
//!                       │
//!                       ▼
//!                  pipeline::Pipeline ──► Citations / SearchResults
//! ```
//!
//! [`pipeline::Pipeline`] is the entry point: construct it over an
//! [`embeddings::Embedder`] and a [`stores::VectorStore`], then call
//! `ingest` and `query`.

pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod extract;
pub mod pipeline;
pub mod stores;
pub mod types;

pub use config::PipelineConfig;
pub use embeddings::{BatchedEmbedder, Embedder, HashEmbedder, HttpEmbedder};
pub use pipeline::{Citation, IngestOptions, IngestOutcome, IngestSummary, Pipeline};
pub use stores::{
    FilterOp, IndexedRecord, InsertBatch, MetadataFilter, SearchResult, SqliteVectorStore,
    VectorStore,
};
pub use types::{PipelineError, Result};
