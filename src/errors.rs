// src/errors.rs
use thiserror::Error;

/// Crate-wide error type. Variants carry `String` representations of the
/// underlying errors so the whole enum stays `Clone` for replay into
/// campaign history and run records.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    // --- Request/Input Errors ---
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    // --- External Service Errors ---
    #[error("LLM API error: {0}")]
    GeminiError(String),

    #[error("LLM Client Error: {0}")]
    LlmClientError(String),

    #[error("LLM Embedding Error: {0}")]
    EmbeddingError(String),

    #[error("Vector DB Error: {0}")]
    VectorDbError(String),

    #[error("HTTP Request Error: {0}")]
    HttpRequestError(String),

    // --- Persistence Errors ---
    #[error("Storage Error: {0}")]
    StorageError(String),

    // --- General/Internal Errors ---
    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Serialization Error: {0}")]
    SerializationError(String),

    #[error("Internal Server Error: {0}")]
    InternalError(String),

    #[error("API Rate Limit Exceeded")]
    RateLimited,
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::HttpRequestError(err.to_string())
    }
}

impl From<genai::Error> for AppError {
    fn from(err: genai::Error) -> Self {
        AppError::LlmClientError(err.to_string())
    }
}

impl AppError {
    /// True for upstream completion-service failures that warrant a
    /// delay-then-retry (rate limit or overload).
    pub fn is_retryable_llm_error(&self) -> bool {
        match self {
            AppError::RateLimited => true,
            AppError::LlmClientError(msg) | AppError::GeminiError(msg) => {
                msg.contains("429")
                    || msg.contains("503")
                    || msg.contains("RESOURCE_EXHAUSTED")
                    || msg.contains("UNAVAILABLE")
                    || msg.to_lowercase().contains("overloaded")
            }
            _ => false,
        }
    }
}
