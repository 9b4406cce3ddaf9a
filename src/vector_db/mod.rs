// src/vector_db/mod.rs

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AppError;

pub mod qdrant_client;

/// Metadata filter for similarity queries. `None` fields are unconstrained;
/// the context router relaxes these progressively when a filtered query
/// fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorFilter {
    pub project_id: Option<String>,
    pub doc_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

/// Trait defining the interface for the knowledge vector index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), AppError>;

    async fn query(
        &self,
        embedding: &[f32],
        filter: Option<&VectorFilter>,
        top_k: u64,
    ) -> Result<Vec<VectorMatch>, AppError>;

    async fn delete_by_filter(&self, filter: &VectorFilter) -> Result<(), AppError>;

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), AppError>;
}
