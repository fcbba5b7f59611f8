//! Embedding generation using fastembed (local, no API keys)

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};

/// Text-to-vector contract used by the workflows.
///
/// Kept as a trait so tests can swap in a deterministic embedder instead of
/// loading the real model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimensions
    fn dimensions(&self) -> usize;
}

/// Embedding service backed by a local fastembed model
pub struct FastembedEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    dimensions: usize,
}

impl FastembedEmbedder {
    /// Create a new embedding service with local model
    pub fn new(config: &Config) -> Result<Self> {
        // Use all-MiniLM-L6-v2 by default (384 dimensions, fast, good quality)
        // Model downloads automatically on first use to ~/.cache/fastembed
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(true),
        )
        .map_err(|e| Error::embedding(format!("Failed to load embedding model: {}", e)))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dimensions: config.embedding_dimensions,
        })
    }
}

#[async_trait]
impl Embedder for FastembedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let text = text.to_string();

        // Lock the model and run embedding
        let mut guard = model.lock().await;
        let embeddings = guard
            .embed(vec![text], None)
            .map_err(|e| Error::embedding(format!("Embedding failed: {}", e)))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("No embedding returned"))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Deterministic embedder for tests: hashes character trigrams into a
/// fixed-size vector so similar strings land near each other.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();
        for window in chars.windows(3) {
            let mut hash: u64 = 1469598103934665603;
            for c in window {
                hash ^= *c as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            vector[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
