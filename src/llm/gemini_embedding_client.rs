// Gemini Embedding Client using REST API

use crate::config::Config;
use crate::errors::AppError;
use crate::llm::EmbeddingClient;
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, instrument};

// --- Request Structs ---

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    #[serde(rename = "taskType")] // Match API naming
    task_type: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

// --- Response Structs ---

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Embedding,
}

#[derive(Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

#[derive(Deserialize, Debug)]
struct GeminiApiErrorResponse {
    error: GeminiApiError,
}

#[derive(Deserialize, Debug)]
#[allow(dead_code)]
struct GeminiApiError {
    code: i32,
    message: String,
    status: String,
}

#[derive(Clone)]
pub struct RestGeminiEmbeddingClient {
    reqwest_client: ReqwestClient,
    config: Arc<Config>,
}

#[async_trait]
impl EmbeddingClient for RestGeminiEmbeddingClient {
    #[instrument(skip(self, text), fields(task_type, model_name = %self.config.embedding_model), err)]
    async fn embed_content(&self, text: &str, task_type: &str) -> Result<Vec<f32>, AppError> {
        let api_key = self.config.gemini_api_key.as_ref().ok_or_else(|| {
            error!("GEMINI_API_KEY not configured");
            AppError::ConfigError("GEMINI_API_KEY not configured".to_string())
        })?;

        // e.g. ".../v1beta/models/text-embedding-004:embedContent?key=..."
        let url = format!(
            "{}/{}:embedContent?key={}",
            self.config.gemini_api_base_url, self.config.embedding_model, api_key
        );

        let request_body = EmbeddingRequest {
            model: &self.config.embedding_model,
            content: Content {
                parts: vec![Part { text }],
            },
            task_type,
        };

        let response = self
            .reqwest_client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP request to Gemini Embedding API failed");
                AppError::HttpRequestError(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.json::<GeminiApiErrorResponse>().await;
            error!(status = %status, error_details = ?error_body, "Gemini Embedding API returned error status");
            let error_message = error_body
                .map(|b| b.error.message)
                .unwrap_or_else(|e| format!("Failed to parse error body: {}", e));
            return Err(AppError::GeminiError(format!(
                "Gemini API error ({}): {}",
                status, error_message
            )));
        }

        let embedding_response = response.json::<EmbeddingResponse>().await.map_err(|e| {
            error!(error = %e, "Failed to parse successful Gemini Embedding API response");
            AppError::SerializationError(format!(
                "Failed to parse Gemini embedding response: {}",
                e
            ))
        })?;

        Ok(embedding_response.embedding.values)
    }
}

#[async_trait]
impl EmbeddingClient for Arc<RestGeminiEmbeddingClient> {
    async fn embed_content(&self, text: &str, task_type: &str) -> Result<Vec<f32>, AppError> {
        (**self).embed_content(text, task_type).await
    }
}

pub fn build_gemini_embedding_client(
    config: Arc<Config>,
) -> Result<RestGeminiEmbeddingClient, AppError> {
    let reqwest_client = ReqwestClient::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| AppError::InternalError(format!("Failed to build Reqwest client: {}", e)))?;

    Ok(RestGeminiEmbeddingClient {
        reqwest_client,
        config,
    })
}
