/// Embedding and summarization provider traits
///
/// Pluggable interfaces for the two LLM capabilities the core invokes:
/// embedding text into fixed-dimension vectors (serving path) and
/// summarize-and-analyze (ingestion path, external — only the contract
/// lives here). Supports a local feature-hash embedder (default, no API
/// key) and the Gemini API.

pub mod gemini;
pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Sentiment;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Embedding generation failure (inference or transport error)
    #[error("Embedding generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Core trait for embedding text into fixed-dimension float vectors.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g., Arc<dyn EmbeddingProvider>).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Return the model name identifier.
    fn model_name(&self) -> &str;

    /// Return the dimension of the embedding vectors produced by this model.
    fn dimension(&self) -> usize;
}

/// Result of summarize-and-analyze over an article title and body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    pub sentiment: Sentiment,
    /// Short keyword strings, at most 15
    pub keywords: Vec<String>,
}

/// The summarization capability the ingestion pipeline provides. The core
/// never calls it on the serving path; it is declared here so both LLM
/// capabilities share one provider module.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize_and_analyze(
        &self,
        title: &str,
        body: &str,
    ) -> Result<Summary, EmbeddingError>;
}
