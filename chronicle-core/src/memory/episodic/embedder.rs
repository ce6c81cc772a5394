//! Text embedding models.
//!
//! The archive only needs `encode(text) -> vector` with a fixed dimension that
//! is deterministic for identical input. The local model lives in `onnx`;
//! this module holds the trait and the adapter for any OpenAI-compatible
//! `/embeddings` endpoint.

use async_trait::async_trait;
use chat::Chat;
use thiserror::Error;

/// Dimensionality of the default local model.
pub const DEFAULT_DIMENSIONS: usize = super::onnx::MINILM_DIMENSIONS;

/// Errors from embedding text.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Embedding service error: {0}")]
    Api(#[from] chat::Error),

    #[error("Embedding has {found} dimensions, model declares {expected}")]
    Dimension { expected: usize, found: usize },

    #[error("Embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding inference failed: {0}")]
    Inference(String),
}

/// A text embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier stored alongside every record produced by this model.
    fn model_id(&self) -> &str;

    /// Length of every vector this model produces.
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct ApiEmbedder {
    client: Chat,
    model: String,
    dimensions: usize,
}

impl ApiEmbedder {
    pub fn new(client: Chat, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.client.embed(&self.model, &[text]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| EmbedError::Unavailable("empty embedding response".to_string()))?;

        if vector.len() != self.dimensions {
            return Err(EmbedError::Dimension {
                expected: self.dimensions,
                found: vector.len(),
            });
        }
        Ok(vector)
    }
}
