//! Vector index storage.
//!
//! The pipeline is polymorphic over the [`VectorStore`] capability so the
//! index implementation can be swapped without touching chunking or
//! embedding logic. The bundled backend is
//! [`sqlite::SqliteVectorStore`], SQLite with cosine ranking via the
//! `sqlite-vec` extension.

pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{PipelineError, Result};

pub use sqlite::SqliteVectorStore;

/// The persisted unit in the vector index.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IndexedRecord {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub vector: Vec<f32>,
}

/// Read-only projection returned by similarity queries; never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    /// Lower is more similar. `None` when the backend reports no distance.
    pub distance: Option<f32>,
}

/// Equality/membership predicate over record metadata, evaluated before
/// ranking so filtering never starves `top_k`.
#[derive(Clone, Debug, Default)]
pub struct MetadataFilter {
    clauses: BTreeMap<String, FilterOp>,
}

#[derive(Clone, Debug)]
pub enum FilterOp {
    Eq(Value),
    OneOf(Vec<Value>),
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `metadata[key] == value`.
    #[must_use]
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.insert(key.into(), FilterOp::Eq(value.into()));
        self
    }

    /// Requires `metadata[key]` to be one of `values`.
    #[must_use]
    pub fn one_of(
        mut self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.clauses
            .insert(key.into(), FilterOp::OneOf(values.into_iter().collect()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> impl Iterator<Item = (&String, &FilterOp)> {
        self.clauses.iter()
    }

    /// Evaluates the predicate against a metadata map. Backends with a
    /// native filter push-down (like the SQLite store) do not use this;
    /// it exists for in-memory implementations and for tests.
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.clauses.iter().all(|(key, op)| match op {
            FilterOp::Eq(expected) => metadata.get(key) == Some(expected),
            FilterOp::OneOf(values) => metadata
                .get(key)
                .is_some_and(|actual| values.contains(actual)),
        })
    }
}

/// A validated batch of records ready for insertion.
///
/// `ids`, `texts`, `metadatas`, and `vectors` lengths must agree where
/// provided; omitted ids are generated (UUIDv4) and omitted metadata is
/// stamped with an ingestion timestamp.
#[derive(Clone, Debug, Default)]
pub struct InsertBatch {
    pub ids: Option<Vec<String>>,
    pub texts: Vec<String>,
    pub metadatas: Option<Vec<Map<String, Value>>>,
    pub vectors: Vec<Vec<f32>>,
}

impl InsertBatch {
    pub fn new(texts: Vec<String>, vectors: Vec<Vec<f32>>) -> Self {
        Self {
            ids: None,
            texts,
            metadatas: None,
            vectors,
        }
    }

    #[must_use]
    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    #[must_use]
    pub fn with_metadatas(mut self, metadatas: Vec<Map<String, Value>>) -> Self {
        self.metadatas = Some(metadatas);
        self
    }

    /// Resolves the batch into concrete records, enforcing the length
    /// and dimensionality invariants.
    pub fn into_records(self) -> Result<Vec<IndexedRecord>> {
        let count = self.texts.len();
        if self.vectors.len() != count {
            return Err(PipelineError::Index(format!(
                "{} texts but {} vectors",
                count,
                self.vectors.len()
            )));
        }
        if let Some(ids) = &self.ids {
            if ids.len() != count {
                return Err(PipelineError::Index(format!(
                    "{} texts but {} ids",
                    count,
                    ids.len()
                )));
            }
        }
        if let Some(metadatas) = &self.metadatas {
            if metadatas.len() != count {
                return Err(PipelineError::Index(format!(
                    "{} texts but {} metadata entries",
                    count,
                    metadatas.len()
                )));
            }
        }
        if let Some(first) = self.vectors.first() {
            let dimension = first.len();
            if dimension == 0 {
                return Err(PipelineError::Index("zero-dimension vector".into()));
            }
            if let Some(position) = self.vectors.iter().position(|v| v.len() != dimension) {
                return Err(PipelineError::Index(format!(
                    "vector {position} has dimension {} but the batch started with {dimension}",
                    self.vectors[position].len()
                )));
            }
        }

        let ids = self
            .ids
            .unwrap_or_else(|| (0..count).map(|_| uuid::Uuid::new_v4().to_string()).collect());
        let metadatas = self.metadatas.unwrap_or_else(|| {
            let stamp = chrono::Utc::now().to_rfc3339();
            (0..count)
                .map(|_| {
                    let mut metadata = Map::new();
                    metadata.insert("timestamp".to_string(), Value::String(stamp.clone()));
                    metadata
                })
                .collect()
        });

        Ok(ids
            .into_iter()
            .zip(self.texts)
            .zip(metadatas)
            .zip(self.vectors)
            .map(|(((id, content), metadata), vector)| IndexedRecord {
                id,
                content,
                metadata,
                vector,
            })
            .collect())
    }
}

/// Capability interface for persistent vector collections.
///
/// Implementations serialize writes internally; concurrent readers see
/// either the pre-insert or post-insert state of any record, never a
/// half-written vector/metadata pair.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts a batch, returning the record ids in batch order.
    async fn insert(&self, batch: InsertBatch) -> Result<Vec<String>>;

    /// Nearest-neighbor query, ascending distance, filter applied before
    /// ranking.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>>;

    /// Fetches one record by id.
    async fn get(&self, id: &str) -> Result<Option<IndexedRecord>>;

    /// Full replace of an existing record's content, metadata, and vector.
    async fn update(
        &self,
        id: &str,
        content: &str,
        metadata: Map<String, Value>,
        vector: Vec<f32>,
    ) -> Result<()>;

    /// Deletes records; unknown ids are a no-op success.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Number of records in the collection.
    async fn count(&self) -> Result<usize>;
}
