//! Retrieval orchestrator: composes extraction, chunking, attribution,
//! embedding, and indexing into the two calls an outer layer needs —
//! ingest and search.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunking::{attribute_units, Chunk, TextSplitter};
use crate::config::PipelineConfig;
use crate::embeddings::{BatchedEmbedder, Embedder, ProgressFn};
use crate::extract::{self, Format};
use crate::stores::{InsertBatch, MetadataFilter, SearchResult, VectorStore};
use crate::types::{PipelineError, Result};

/// Summary returned by a successful ingest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestSummary {
    pub document_id: String,
    pub chunk_count: usize,
    pub format: String,
    pub title: Option<String>,
}

/// Per-file outcome of a bulk ingest; one bad file never fails the batch.
#[derive(Debug)]
pub struct IngestOutcome {
    pub path: PathBuf,
    pub result: Result<IngestSummary>,
}

/// User-facing pointer from a retrieved chunk back to its source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub title: Option<String>,
    /// 1-based page/row the chunk was attributed to.
    pub page: Option<u64>,
    /// `1 − distance`; higher is more relevant.
    pub relevance_score: f32,
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// Per-ingest options: caller metadata merged over extractor metadata,
/// and an optional embedding progress callback.
#[derive(Clone, Default)]
pub struct IngestOptions {
    pub metadata_overrides: Map<String, Value>,
    pub progress: Option<ProgressFn>,
}

impl IngestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_metadata(mut self, overrides: Map<String, Value>) -> Self {
        self.metadata_overrides = overrides;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// The document ingestion and semantic retrieval pipeline.
///
/// Polymorphic over its embedding backend and vector index through the
/// [`Embedder`] and [`VectorStore`] capabilities; constructed once at
/// process start and shared by reference — no ambient global state.
#[derive(Clone)]
pub struct Pipeline {
    embedder: BatchedEmbedder,
    store: Arc<dyn VectorStore>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            embedder: BatchedEmbedder::new(embedder, config.batch_size),
            store,
            config,
        })
    }

    /// Ingests one document: extract → chunk → attribute → embed →
    /// index.
    ///
    /// The insert only runs once the full vector batch is available, so
    /// an embedding failure leaves nothing partially indexed.
    pub async fn ingest(&self, path: &Path, options: IngestOptions) -> Result<IngestSummary> {
        let extracted = extract::extract(path)?;
        let format = Format::from_path(path)?;

        let mut metadata = extracted.metadata.clone();
        for (key, value) in options.metadata_overrides {
            extract::insert_nonempty(&mut metadata, &key, value);
        }
        let document_id = uuid::Uuid::new_v4().to_string();
        metadata.insert("doc_id".to_string(), Value::String(document_id.clone()));
        metadata.insert(
            "processed_at".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );

        let chunks = self.chunk_document(&extracted, format)?;
        if chunks.is_empty() {
            return Err(PipelineError::Chunking(format!(
                "document produced no chunks: {}",
                path.display()
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let vectors = self
            .embed_with_retry(&texts, options.progress.as_ref())
            .await?;

        let ids: Vec<String> = (0..chunks.len())
            .map(|index| format!("{document_id}:{index}"))
            .collect();
        let metadatas: Vec<Map<String, Value>> = chunks
            .iter()
            .map(|chunk| chunk_metadata(&metadata, chunk))
            .collect();

        self.store
            .insert(
                InsertBatch::new(texts, vectors)
                    .with_ids(ids)
                    .with_metadatas(metadatas),
            )
            .await?;

        let summary = IngestSummary {
            document_id,
            chunk_count: chunks.len(),
            format: format.label().to_string(),
            title: metadata
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        tracing::info!(
            path = %path.display(),
            chunks = summary.chunk_count,
            "ingested document"
        );
        Ok(summary)
    }

    /// Ingests many documents concurrently, bounded by
    /// `config.max_workers`, returning per-file outcomes in input order.
    pub async fn ingest_batch(
        &self,
        paths: Vec<PathBuf>,
        options: IngestOptions,
    ) -> Vec<IngestOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks = JoinSet::new();
        let mut slots: HashMap<tokio::task::Id, (usize, PathBuf)> = HashMap::new();

        for (position, path) in paths.into_iter().enumerate() {
            let pipeline = self.clone();
            let options = options.clone();
            let semaphore = Arc::clone(&semaphore);
            let task_path = path.clone();
            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = pipeline.ingest(&task_path, options).await;
                if let Err(err) = &result {
                    tracing::warn!(path = %task_path.display(), error = %err, "ingest failed");
                }
                result
            });
            slots.insert(handle.id(), (position, path));
        }

        let mut outcomes: Vec<Option<IngestOutcome>> = Vec::new();
        outcomes.resize_with(slots.len(), || None);
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                // A panicked worker still owes its file an outcome.
                Err(join_err) => (
                    join_err.id(),
                    Err(PipelineError::Worker(join_err.to_string())),
                ),
            };
            if let Some((position, path)) = slots.remove(&id) {
                outcomes[position] = Some(IngestOutcome { path, result });
            }
        }
        outcomes.into_iter().flatten().collect()
    }

    /// Semantic search returning user-facing citations, most relevant
    /// first. An empty result set is a valid outcome of zero matches.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Citation>> {
        let results = self.search(text, top_k, filter).await?;
        Ok(results.into_iter().map(to_citation).collect())
    }

    /// Raw similarity search over the store.
    pub async fn search(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let query_vector = self.embedder.embed_query(text).await?;
        self.store.query(&query_vector, top_k, filter).await
    }

    /// Finds chunks related to a previously indexed chunk by re-querying
    /// with its own content, excluding the chunk itself.
    pub async fn find_related(&self, chunk_id: &str, top_k: usize) -> Result<Vec<Citation>> {
        let record = self
            .store
            .get(chunk_id)
            .await?
            .ok_or_else(|| PipelineError::Index(format!("no record with id '{chunk_id}'")))?;

        let results = self
            .store
            .query(&record.vector, top_k + 1, None)
            .await?
            .into_iter()
            .filter(|result| result.id != chunk_id)
            .take(top_k)
            .map(to_citation)
            .collect();
        Ok(results)
    }

    /// Replaces an indexed chunk's content and metadata, re-embedding
    /// the new content.
    pub async fn update_chunk(
        &self,
        chunk_id: &str,
        content: &str,
        metadata: Map<String, Value>,
    ) -> Result<()> {
        let vector = self.embedder.embed_query(content).await?;
        self.store.update(chunk_id, content, metadata, vector).await
    }

    /// Removes chunks by id; absent ids are a no-op.
    pub async fn delete_chunks(&self, ids: &[String]) -> Result<()> {
        self.store.delete(ids).await
    }

    fn chunk_document(&self, extracted: &extract::Extracted, format: Format) -> Result<Vec<Chunk>> {
        if format.is_tabular() {
            // Rows are already retrieval-sized units; each becomes one
            // chunk attributed to itself.
            let mut chunks = Chunk::from_pieces(extracted.units.clone());
            for (position, chunk) in chunks.iter_mut().enumerate() {
                chunk.unit_number = Some(position + 1);
            }
            return Ok(chunks);
        }

        let splitter = TextSplitter::new(
            self.config.chunk_size,
            self.config.chunk_overlap,
            self.config.min_chunk_size,
        )?;
        let mut chunks = Chunk::from_pieces(splitter.split(&extracted.full_text)?);
        attribute_units(&mut chunks, &extracted.units);
        Ok(chunks)
    }

    /// Embedding failures are retried here with backoff; the engine
    /// itself never retries.
    async fn embed_with_retry(
        &self,
        texts: &[String],
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;
        loop {
            match self.embedder.embed_all(texts, progress).await {
                Ok(vectors) => return Ok(vectors),
                Err(err @ PipelineError::Embedding(_)) if attempt < self.config.embed_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %err, "embedding failed; retrying");
                    tokio::time::sleep(self.config.embed_backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn chunk_metadata(document: &Map<String, Value>, chunk: &Chunk) -> Map<String, Value> {
    let mut metadata = document.clone();
    metadata.insert("chunk_index".to_string(), Value::Number(chunk.index.into()));
    metadata.insert("chunk_size".to_string(), Value::Number(chunk.size.into()));
    metadata.insert(
        "total_chunks".to_string(),
        Value::Number(chunk.total_chunks.into()),
    );
    if let Some(unit) = chunk.unit_number {
        metadata.insert("page_number".to_string(), Value::Number(unit.into()));
    }
    metadata
}

fn to_citation(result: SearchResult) -> Citation {
    // No reported distance means no basis for a score; 0.0 keeps the
    // transform monotonic for backends that do report one.
    let relevance_score = result.distance.map_or(0.0, |distance| 1.0 - distance);
    Citation {
        id: result.id,
        title: result
            .metadata
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string),
        page: result.metadata.get("page_number").and_then(Value::as_u64),
        relevance_score,
        content: result.content,
        metadata: result.metadata,
    }
}
