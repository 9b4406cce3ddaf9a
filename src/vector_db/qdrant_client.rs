// src/vector_db/qdrant_client.rs

use crate::config::Config;
use crate::errors::AppError;
use crate::vector_db::{VectorFilter, VectorMatch, VectorPoint, VectorStore};
use async_trait::async_trait;
use qdrant_client::qdrant::vectors_config::Config as QdrantVectorsConfig;
use qdrant_client::qdrant::{
    Condition, CreateCollection, DeletePoints, Distance, Filter, PointStruct, PointsIdsList,
    PointsSelector, ScoredPoint, VectorParams, VectorsConfig,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Clone)]
pub struct QdrantVectorStore {
    client: Arc<Qdrant>,
    collection_name: String,
    embedding_dimension: u64,
}

impl QdrantVectorStore {
    #[instrument(skip(config), name = "qdrant_store_new")]
    pub async fn new(config: Arc<Config>) -> Result<Self, AppError> {
        let qdrant_url = config.qdrant_url.as_ref().ok_or_else(|| {
            error!("QDRANT_URL is not configured");
            AppError::ConfigError("QDRANT_URL is not configured".to_string())
        })?;

        info!("Connecting to Qdrant at URL: {}", qdrant_url);

        let qdrant_client = Qdrant::from_url(qdrant_url).build().map_err(|e| {
            error!(error = %e, "Failed to build Qdrant client");
            AppError::VectorDbError(format!("Failed to build Qdrant client: {}", e))
        })?;

        let store = Self {
            client: Arc::new(qdrant_client),
            collection_name: config.qdrant_collection_name.clone(),
            embedding_dimension: config.embedding_dimension,
        };

        store.ensure_collection_exists().await?;

        Ok(store)
    }

    #[instrument(skip(self), name = "qdrant_ensure_collection")]
    async fn ensure_collection_exists(&self) -> Result<(), AppError> {
        let collection_exists = self
            .client
            .collection_exists(&self.collection_name)
            .await
            .map_err(|e| {
                error!(error = %e, collection = %self.collection_name, "Failed to check if Qdrant collection exists");
                AppError::VectorDbError(format!(
                    "Failed to check Qdrant collection existence: {}",
                    e
                ))
            })?;

        if collection_exists {
            info!("Collection '{}' already exists.", self.collection_name);
            return Ok(());
        }

        info!(
            "Collection '{}' does not exist. Creating...",
            self.collection_name
        );
        let create_result = self
            .client
            .create_collection(CreateCollection {
                collection_name: self.collection_name.clone(),
                vectors_config: Some(VectorsConfig {
                    config: Some(QdrantVectorsConfig::Params(VectorParams {
                        size: self.embedding_dimension,
                        distance: Distance::Cosine.into(),
                        hnsw_config: None,
                        quantization_config: None,
                        on_disk: None,
                        datatype: None,
                        multivector_config: None,
                        memory: None,
                    })),
                }),
                ..Default::default()
            })
            .await;

        match create_result {
            Ok(_) => {
                info!("Successfully created collection '{}'", self.collection_name);
                Ok(())
            }
            Err(e) if e.to_string().contains("already exists") => {
                warn!(collection = %self.collection_name, "Attempted to create collection, but it already exists (ignoring error).");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, collection = %self.collection_name, "Failed to create Qdrant collection");
                Err(AppError::VectorDbError(format!(
                    "Failed to create Qdrant collection '{}': {}",
                    self.collection_name, e
                )))
            }
        }
    }

    fn build_filter(filter: &VectorFilter) -> Option<Filter> {
        let mut conditions = Vec::new();
        if let Some(project_id) = &filter.project_id {
            conditions.push(Condition::matches("project_id", project_id.clone()));
        }
        if let Some(doc_type) = &filter.doc_type {
            conditions.push(Condition::matches("type", doc_type.clone()));
        }
        if conditions.is_empty() {
            None
        } else {
            Some(Filter::must(conditions))
        }
    }
}

fn to_point_struct(point: VectorPoint) -> Result<PointStruct, AppError> {
    if !point.payload.is_object() {
        error!("Vector payload must be a JSON object");
        return Err(AppError::SerializationError(
            "Vector payload must be a JSON object".to_string(),
        ));
    }
    let qdrant_payload: HashMap<String, qdrant_client::qdrant::Value> =
        serde_json::from_value(point.payload).map_err(|e| {
            error!(error = %e, "Failed to deserialize JSON payload into Qdrant Value map");
            AppError::SerializationError(format!(
                "Failed to deserialize payload for Qdrant: {}",
                e
            ))
        })?;

    Ok(PointStruct {
        id: Some(point.id.into()),
        vectors: Some(point.vector.into()),
        payload: qdrant_payload,
    })
}

fn to_vector_match(point: ScoredPoint) -> VectorMatch {
    let id = point
        .id
        .as_ref()
        .and_then(|id| id.point_id_options.as_ref())
        .map(|opts| match opts {
            qdrant_client::qdrant::point_id::PointIdOptions::Num(n) => n.to_string(),
            qdrant_client::qdrant::point_id::PointIdOptions::Uuid(s) => s.clone(),
        })
        .unwrap_or_default();

    let payload = serde_json::to_value(&point.payload).unwrap_or(serde_json::Value::Null);

    VectorMatch {
        id,
        score: point.score,
        payload,
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    #[instrument(skip(self, points), fields(count = points.len()), name = "qdrant_upsert_points")]
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), AppError> {
        if points.is_empty() {
            return Ok(());
        }
        let points = points
            .into_iter()
            .map(to_point_struct)
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Upserting {} points into collection '{}'",
            points.len(),
            self.collection_name
        );
        self.client
            .upsert_points(qdrant_client::qdrant::UpsertPoints {
                collection_name: self.collection_name.clone(),
                wait: Some(true),
                points,
                ordering: None,
                shard_key_selector: None,
                timeout: None,
                update_filter: None,
                update_mode: None,
            })
            .await
            .map_err(|e| {
                error!(error = %e, collection = %self.collection_name, "Failed to upsert points to Qdrant");
                AppError::VectorDbError(format!("Failed to upsert points: {}", e))
            })?;
        Ok(())
    }

    #[instrument(skip(self, embedding, filter), fields(top_k), name = "qdrant_search_points")]
    async fn query(
        &self,
        embedding: &[f32],
        filter: Option<&VectorFilter>,
        top_k: u64,
    ) -> Result<Vec<VectorMatch>, AppError> {
        let qdrant_filter = filter.and_then(Self::build_filter);

        let search_request = qdrant_client::qdrant::SearchPoints {
            collection_name: self.collection_name.clone(),
            vector: embedding.to_vec(),
            limit: top_k,
            with_payload: Some(true.into()),
            filter: qdrant_filter,
            offset: None,
            score_threshold: None,
            params: None,
            vector_name: None,
            with_vectors: None,
            read_consistency: None,
            timeout: None,
            shard_key_selector: None,
            sparse_indices: None,
        };

        let search_result = self
            .client
            .search_points(search_request)
            .await
            .map_err(|e| {
                error!(error = %e, collection = %self.collection_name, "Failed to search points in Qdrant");
                AppError::VectorDbError(format!("Failed to search points: {}", e))
            })?;

        Ok(search_result
            .result
            .into_iter()
            .map(to_vector_match)
            .collect())
    }

    #[instrument(skip(self), name = "qdrant_delete_by_filter")]
    async fn delete_by_filter(&self, filter: &VectorFilter) -> Result<(), AppError> {
        let Some(qdrant_filter) = Self::build_filter(filter) else {
            return Err(AppError::InvalidInput(
                "delete_by_filter requires at least one filter field".to_string(),
            ));
        };

        self.client
            .delete_points(DeletePoints {
                collection_name: self.collection_name.clone(),
                wait: Some(true),
                points: Some(PointsSelector {
                    points_selector_one_of: Some(
                        qdrant_client::qdrant::points_selector::PointsSelectorOneOf::Filter(
                            qdrant_filter,
                        ),
                    ),
                }),
                ordering: None,
                shard_key_selector: None,
                timeout: None,
            })
            .await
            .map_err(|e| {
                error!(error = %e, collection = %self.collection_name, "Failed to delete points by filter");
                AppError::VectorDbError(format!("Failed to delete points by filter: {}", e))
            })?;
        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), name = "qdrant_delete_by_ids")]
    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        let point_ids = ids.iter().map(|id| id.clone().into()).collect();

        self.client
            .delete_points(DeletePoints {
                collection_name: self.collection_name.clone(),
                wait: Some(true),
                points: Some(PointsSelector {
                    points_selector_one_of: Some(
                        qdrant_client::qdrant::points_selector::PointsSelectorOneOf::Points(
                            PointsIdsList { ids: point_ids },
                        ),
                    ),
                }),
                ordering: None,
                shard_key_selector: None,
                timeout: None,
            })
            .await
            .map_err(|e| {
                error!(error = %e, collection = %self.collection_name, "Failed to delete points by ids");
                AppError::VectorDbError(format!("Failed to delete points by ids: {}", e))
            })?;
        Ok(())
    }
}
