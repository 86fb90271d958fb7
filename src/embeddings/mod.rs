//! Query embedding
//!
//! The harness only needs one vector per query text. [`EmbeddingEngine`] is the
//! seam; [`OnnxEmbedder`] runs a BERT-style encoder through ONNX Runtime.

mod onnx;

pub use onnx::{mean_pooling, normalize, OnnxEmbedder};

use anyhow::Result;

use crate::config::EmbeddingConfig;

/// Trait for embedding generation engines
///
/// `Send` so an engine can be built on one thread and driven from another.
pub trait EmbeddingEngine: Send {
    /// Generate embedding for a single text
    fn embed(&mut self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding for a query text (with model-specific prefix if needed)
    ///
    /// Symmetric models embed queries exactly like any other text.
    fn embed_query(&mut self, text: &str) -> Result<Vec<f32>> {
        self.embed(text)
    }

    /// Embedding dimension (384 for gte-small)
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Create the configured embedder
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingEngine>> {
    Ok(Box::new(OnnxEmbedder::from_config(config)?))
}
