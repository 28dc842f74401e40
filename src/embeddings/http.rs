//! HTTP embedding provider for OpenAI-compatible `/embeddings` endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::types::{PipelineError, Result};

/// Remote embedding backend speaking the OpenAI embeddings wire format.
///
/// Any service exposing `POST {base_url}/embeddings` with a
/// `{ model, input: [...] }` request body can be plugged in.
#[derive(Clone, Debug)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            dimensions,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Builds a provider from `EMBEDDINGS_BASE_URL`, `EMBEDDINGS_MODEL`,
    /// `EMBEDDINGS_DIMENSIONS`, and optional `EMBEDDINGS_API_KEY`,
    /// loading a `.env` file when present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let base_url = std::env::var("EMBEDDINGS_BASE_URL")
            .map_err(|_| PipelineError::Embedding("EMBEDDINGS_BASE_URL is not set".into()))?;
        let model = std::env::var("EMBEDDINGS_MODEL")
            .map_err(|_| PipelineError::Embedding("EMBEDDINGS_MODEL is not set".into()))?;
        let dimensions = std::env::var("EMBEDDINGS_DIMENSIONS")
            .map_err(|_| PipelineError::Embedding("EMBEDDINGS_DIMENSIONS is not set".into()))?
            .parse::<usize>()
            .map_err(|err| {
                PipelineError::Embedding(format!("invalid EMBEDDINGS_DIMENSIONS: {err}"))
            })?;

        let mut embedder = Self::new(base_url, model, dimensions);
        if let Ok(api_key) = std::env::var("EMBEDDINGS_API_KEY") {
            embedder = embedder.with_api_key(api_key);
        }
        Ok(embedder)
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| PipelineError::Embedding(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Embedding(format!(
                "embedding backend returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::Embedding(err.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(PipelineError::Embedding(format!(
                "backend returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);
        let mut vectors = Vec::with_capacity(items.len());
        for item in items {
            if item.embedding.len() != self.dimensions {
                return Err(PipelineError::Embedding(format!(
                    "backend returned dimension {} but {} was configured",
                    item.embedding.len(),
                    self.dimensions
                )));
            }
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(std::slice::from_ref(&text.to_string())).await?;
        Ok(vectors.remove(0))
    }
}
