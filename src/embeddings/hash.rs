//! Deterministic token-hash embeddings for offline use and tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use super::Embedder;
use crate::types::Result;

/// Embeds text by hashing lowercase tokens into dimension buckets and
/// normalizing to unit length.
///
/// The result is deterministic and similarity-preserving in a crude
/// bag-of-words sense: identical texts map to identical vectors, and
/// texts sharing vocabulary land in overlapping buckets. That is enough
/// for ranking to behave sensibly without a model download or network
/// access, which keeps the test suite hermetic.
#[derive(Clone, Debug)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let digest = hasher.finish();
            let bucket = (digest % self.dimensions as u64) as usize;
            // Sign derived from a second hash bit decorrelates buckets.
            let sign = if digest & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            // Token-free input still needs a valid direction.
            vector[0] = 1.0;
            return vector;
        }
        vector.iter().map(|v| v / norm).collect()
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }
}
