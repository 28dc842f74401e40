use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use citedex::{
    Embedder, HashEmbedder, IngestOptions, MetadataFilter, Pipeline, PipelineConfig,
    PipelineError, SqliteVectorStore, VectorStore,
};

/// Wraps the deterministic embedder with a configurable number of
/// leading failures.
struct FlakyEmbedder {
    inner: HashEmbedder,
    failures_left: AtomicUsize,
}

impl FlakyEmbedder {
    fn failing(failures: usize) -> Self {
        Self {
            inner: HashEmbedder::new(64),
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> citedex::Result<Vec<Vec<f32>>> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(PipelineError::Embedding("backend outage".into()));
        }
        self.inner.embed_batch(texts).await
    }

    async fn embed_query(&self, text: &str) -> citedex::Result<Vec<f32>> {
        self.inner.embed_query(text).await
    }
}

struct PanickingEmbedder;

#[async_trait]
impl Embedder for PanickingEmbedder {
    fn dimensions(&self) -> usize {
        8
    }

    async fn embed_batch(&self, _texts: &[String]) -> citedex::Result<Vec<Vec<f32>>> {
        panic!("embedding backend is broken")
    }

    async fn embed_query(&self, _text: &str) -> citedex::Result<Vec<f32>> {
        panic!("embedding backend is broken")
    }
}

async fn pipeline(config: PipelineConfig) -> Pipeline {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let store = SqliteVectorStore::open_in_memory().await.unwrap();
    Pipeline::new(Arc::new(HashEmbedder::new(64)), Arc::new(store), config).unwrap()
}

fn repeat_to(sentence: &str, target_chars: usize) -> String {
    let mut text = String::new();
    while text.len() < target_chars {
        text.push_str(sentence);
        text.push(' ');
    }
    text
}

/// Three pages with disjoint vocabularies, form-feed delimited.
fn write_three_page_doc(dir: &TempDir, name: &str) -> PathBuf {
    let page_one = repeat_to("Solar photovoltaic panels convert sunlight into power.", 800);
    let page_two = repeat_to("Wind turbines harvest kinetic energy from moving air.", 800);
    let page_three = repeat_to("Lattice cryptography resists quantum computer attacks.", 800);
    let path = dir.path().join(name);
    std::fs::write(
        &path,
        format!("{page_one}\u{0c}{page_two}\u{0c}{page_three}"),
    )
    .unwrap();
    path
}

#[tokio::test]
async fn ingest_and_query_text_document_with_page_citations() {
    let dir = TempDir::new().unwrap();
    let path = write_three_page_doc(&dir, "energy_report.txt");
    let pipeline = pipeline(PipelineConfig::default()).await;

    let summary = pipeline
        .ingest(&path, IngestOptions::new())
        .await
        .unwrap();
    assert!(summary.chunk_count >= 3, "got {}", summary.chunk_count);
    assert_eq!(summary.format, "txt");
    assert_eq!(summary.title.as_deref(), Some("energy_report"));

    let citations = pipeline
        .query("quantum computer lattice cryptography", 3, None)
        .await
        .unwrap();
    assert!(!citations.is_empty());
    let top = &citations[0];
    assert!(top.content.contains("cryptography"), "top: {}", top.content);
    assert_eq!(top.page, Some(3));
    assert_eq!(top.metadata["doc_id"], json!(summary.document_id));
    assert!(top.metadata.contains_key("processed_at"));
    assert_eq!(
        top.metadata["total_chunks"],
        json!(summary.chunk_count as u64)
    );
}

#[tokio::test]
async fn metadata_overrides_flow_into_filterable_chunk_metadata() {
    let dir = TempDir::new().unwrap();
    let alpha = dir.path().join("alpha.txt");
    let beta = dir.path().join("beta.txt");
    std::fs::write(&alpha, repeat_to("Forest canopy ecology field notes.", 300)).unwrap();
    std::fs::write(&beta, repeat_to("Deep sea hydrothermal vent survey.", 300)).unwrap();

    let pipeline = pipeline(PipelineConfig::default()).await;
    let mut overrides = Map::new();
    overrides.insert("topic".to_string(), json!("forestry"));
    pipeline
        .ingest(&alpha, IngestOptions::new().with_metadata(overrides))
        .await
        .unwrap();
    let mut overrides = Map::new();
    overrides.insert("topic".to_string(), json!("oceanography"));
    pipeline
        .ingest(&beta, IngestOptions::new().with_metadata(overrides))
        .await
        .unwrap();

    let filter = MetadataFilter::new().eq("topic", "forestry");
    let results = pipeline
        .query("hydrothermal vent survey", 10, Some(&filter))
        .await
        .unwrap();
    assert!(!results.is_empty());
    for citation in &results {
        assert_eq!(citation.metadata["topic"], json!("forestry"));
    }
}

#[tokio::test]
async fn find_related_prefers_sibling_chunks() {
    let dir = TempDir::new().unwrap();
    let glaciers = dir.path().join("glaciers.txt");
    let markets = dir.path().join("markets.txt");
    std::fs::write(
        &glaciers,
        repeat_to("Glacier ice cores record ancient climate layers.", 2200),
    )
    .unwrap();
    std::fs::write(
        &markets,
        repeat_to("Commodity futures markets hedge seasonal price risk.", 600),
    )
    .unwrap();

    let pipeline = pipeline(PipelineConfig::default()).await;
    let glacier_summary = pipeline
        .ingest(&glaciers, IngestOptions::new())
        .await
        .unwrap();
    assert!(glacier_summary.chunk_count >= 2);
    pipeline.ingest(&markets, IngestOptions::new()).await.unwrap();

    let first_chunk = format!("{}:0", glacier_summary.document_id);
    let related = pipeline.find_related(&first_chunk, 2).await.unwrap();
    assert!(!related.is_empty());
    assert!(related.iter().all(|c| c.id != first_chunk));
    assert_eq!(
        related[0].metadata["doc_id"],
        json!(glacier_summary.document_id)
    );

    let err = pipeline.find_related("unknown:0", 2).await.unwrap_err();
    assert!(matches!(err, PipelineError::Index(_)));
}

#[tokio::test]
async fn bulk_ingest_reports_per_file_outcomes_in_order() {
    let dir = TempDir::new().unwrap();
    let good = write_three_page_doc(&dir, "good.txt");
    let unsupported = dir.path().join("slides.odt");
    std::fs::write(&unsupported, "opaque bytes").unwrap();
    let missing = dir.path().join("never_written.txt");

    let pipeline = pipeline(PipelineConfig::default().with_max_workers(2)).await;
    let outcomes = pipeline
        .ingest_batch(
            vec![good.clone(), unsupported.clone(), missing.clone()],
            IngestOptions::new(),
        )
        .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].path, good);
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(
        outcomes[1].result.as_ref().unwrap_err(),
        PipelineError::UnsupportedFormat { .. }
    ));
    assert!(matches!(
        outcomes[2].result.as_ref().unwrap_err(),
        PipelineError::SourceNotFound(_)
    ));
}

#[tokio::test]
async fn csv_rows_become_row_attributed_chunks() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inventory.csv");
    std::fs::write(
        &path,
        "sku,name,stock\nA1,Widget,12\nB2,Sprocket,3\nC3,Gadget,40\n",
    )
    .unwrap();

    let pipeline = pipeline(PipelineConfig::default()).await;
    let summary = pipeline.ingest(&path, IngestOptions::new()).await.unwrap();
    assert_eq!(summary.chunk_count, 3);

    let citations = pipeline.query("Sprocket stock", 1, None).await.unwrap();
    assert_eq!(citations.len(), 1);
    assert!(citations[0].content.contains("Sprocket"));
    assert_eq!(citations[0].page, Some(2));
}

#[tokio::test]
async fn empty_index_queries_return_empty_not_error() {
    let pipeline = pipeline(PipelineConfig::default()).await;
    let citations = pipeline.query("anything at all", 5, None).await.unwrap();
    assert!(citations.is_empty());
}

#[tokio::test]
async fn update_chunk_re_embeds_new_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("note.txt");
    std::fs::write(&path, repeat_to("Original note about river deltas.", 300)).unwrap();

    let pipeline = pipeline(PipelineConfig::default()).await;
    let summary = pipeline.ingest(&path, IngestOptions::new()).await.unwrap();
    let chunk_id = format!("{}:0", summary.document_id);

    let mut metadata = Map::new();
    metadata.insert("revised".to_string(), Value::Bool(true));
    pipeline
        .update_chunk(&chunk_id, "Replacement text about desert dunes.", metadata)
        .await
        .unwrap();

    let results = pipeline.query("desert dunes", 1, None).await.unwrap();
    assert_eq!(results[0].id, chunk_id);
    assert!(results[0].content.contains("desert dunes"));
    assert_eq!(results[0].metadata["revised"], json!(true));
}

#[tokio::test]
async fn transient_embedding_failure_is_retried_to_success() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("note.txt");
    std::fs::write(&path, repeat_to("Field notes on migratory birds.", 300)).unwrap();

    let store = SqliteVectorStore::open_in_memory().await.unwrap();
    let pipeline = Pipeline::new(
        Arc::new(FlakyEmbedder::failing(1)),
        Arc::new(store.clone()),
        PipelineConfig::default().with_embed_retries(2, Duration::from_millis(1)),
    )
    .unwrap();

    let summary = pipeline.ingest(&path, IngestOptions::new()).await.unwrap();
    assert_eq!(store.count().await.unwrap(), summary.chunk_count);
}

#[tokio::test]
async fn persistent_embedding_failure_aborts_and_indexes_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("note.txt");
    std::fs::write(&path, repeat_to("Field notes on migratory birds.", 300)).unwrap();

    let store = SqliteVectorStore::open_in_memory().await.unwrap();
    let pipeline = Pipeline::new(
        Arc::new(FlakyEmbedder::failing(usize::MAX)),
        Arc::new(store.clone()),
        PipelineConfig::default().with_embed_retries(1, Duration::from_millis(1)),
    )
    .unwrap();

    let err = pipeline.ingest(&path, IngestOptions::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Embedding(_)), "got {err}");
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn crashed_ingest_worker_still_yields_an_outcome_per_file() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");
    std::fs::write(&first, repeat_to("Notes on tidal patterns.", 300)).unwrap();
    std::fs::write(&second, repeat_to("Notes on soil acidity.", 300)).unwrap();

    let store = SqliteVectorStore::open_in_memory().await.unwrap();
    let pipeline = Pipeline::new(
        Arc::new(PanickingEmbedder),
        Arc::new(store),
        PipelineConfig::default(),
    )
    .unwrap();

    let outcomes = pipeline
        .ingest_batch(vec![first.clone(), second.clone()], IngestOptions::new())
        .await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].path, first);
    assert_eq!(outcomes[1].path, second);
    for outcome in &outcomes {
        assert!(matches!(
            outcome.result.as_ref().unwrap_err(),
            PipelineError::Worker(_)
        ));
    }
}

#[tokio::test]
async fn progress_callback_reports_cumulative_counts() {
    let dir = TempDir::new().unwrap();
    let path = write_three_page_doc(&dir, "progress.txt");

    let pipeline = pipeline(PipelineConfig::default().with_batch_size(2)).await;
    let counter = citedex::embeddings::ProgressCounter::new();
    let summary = pipeline
        .ingest(&path, IngestOptions::new().with_progress(counter.callback()))
        .await
        .unwrap();
    assert_eq!(counter.processed(), summary.chunk_count);
}
