/// Gemini embedding provider
///
/// Calls the Gemini embedContent API using reqwest.
/// Supports text-embedding-004 (768 dimensions) by default.
/// Requires NEWSCORE_EMBEDDING__GEMINI_API_KEY env var or gemini_api_key
/// in newscore.toml.

use async_trait::async_trait;

use super::{EmbeddingError, EmbeddingProvider};

/// Request body for the Gemini embedContent API
#[derive(serde::Serialize)]
struct EmbedRequest {
    content: Content,
}

#[derive(serde::Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(serde::Serialize)]
struct Part {
    text: String,
}

/// Response from the Gemini embedContent API
#[derive(serde::Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(serde::Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini-backed embedding provider.
///
/// Requires a valid API key — validated on construction, not at embed time.
pub struct GeminiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dim: usize,
}

impl GeminiEmbeddingProvider {
    /// Create a new GeminiEmbeddingProvider.
    ///
    /// # Errors
    /// Returns `EmbeddingError::NotConfigured` if api_key is empty.
    pub fn new(api_key: String, model: String, dim: usize) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured(
                "Gemini API key is required when using the gemini embedding provider. \
                 Set NEWSCORE_EMBEDDING__GEMINI_API_KEY or gemini_api_key in newscore.toml"
                    .to_string(),
            ));
        }

        Ok(GeminiEmbeddingProvider {
            client: reqwest::Client::new(),
            api_key,
            model,
            dim,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbedRequest {
            content: Content {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            },
        };

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent?key={}",
            self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Generation(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EmbeddingError::Api {
                status,
                message: body,
            });
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Generation(format!("Failed to parse API response: {}", e)))?;

        if embed_response.embedding.values.len() != self.dim {
            return Err(EmbeddingError::Generation(format!(
                "API returned {}-dimension vector, expected {}",
                embed_response.embedding.values.len(),
                self.dim
            )));
        }

        Ok(embed_response.embedding.values)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}
