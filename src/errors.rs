/// Domain-specific error types for newscore
///
/// User-facing callers (the HTTP layer) map these onto status codes:
/// NotFound -> 404, Validation -> 400, everything else -> 500.
/// Internal callers prefer tagged degradation over propagation — see the
/// similarity and personalization engines.

#[derive(Debug, thiserror::Error)]
pub enum NewscoreError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Search index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for NewscoreError {
    fn from(e: redis::RedisError) -> Self {
        NewscoreError::StoreUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for NewscoreError {
    fn from(e: serde_json::Error) -> Self {
        NewscoreError::Internal(format!("JSON codec error: {}", e))
    }
}

impl From<crate::embedding::EmbeddingError> for NewscoreError {
    fn from(e: crate::embedding::EmbeddingError) -> Self {
        NewscoreError::Internal(e.to_string())
    }
}

impl NewscoreError {
    /// Helper to create validation errors with field names
    pub fn validation(field: &str, message: &str) -> Self {
        NewscoreError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }

    /// Helper for missing articles (the most common NotFound).
    pub fn article_not_found(id: &str) -> Self {
        NewscoreError::NotFound {
            resource: "Article",
            id: id.to_string(),
        }
    }

    /// Helper for missing user preference documents.
    pub fn preferences_not_found(user_id: &str) -> Self {
        NewscoreError::NotFound {
            resource: "User preferences",
            id: user_id.to_string(),
        }
    }
}
