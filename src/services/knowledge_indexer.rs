// src/services/knowledge_indexer.rs
//
// Turns normalized project knowledge into embedded, filterable vectors:
// chunk each document's sections, embed, upsert in batches, and track the
// written ids in a manifest so a later reindex can clear stale vectors.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::errors::AppError;
use crate::llm::EmbeddingClient;
use crate::services::knowledge::{
    build_knowledge_documents, normalize_intake_to_knowledge, KnowledgeDocument, ProjectKnowledge,
};
use crate::services::usage::{self, UsageEvent, UsageOperation};
use crate::storage::{KnowledgeRecord, KnowledgeStore, UsageStore, VectorManifest};
use crate::text_processing::chunking::{chunk_text, ChunkConfig};
use crate::vector_db::{VectorFilter, VectorPoint, VectorStore};

const VECTOR_UPSERT_BATCH: usize = 50;

#[derive(Debug, Clone)]
pub struct KnowledgeChunk {
    pub text: String,
    pub section_id: String,
    pub section_title: String,
    pub order: usize,
}

/// Splits a document's sections into embedding-sized chunks, preserving
/// section provenance.
pub fn chunk_knowledge_document(
    document: &KnowledgeDocument,
    config: &ChunkConfig,
) -> Vec<KnowledgeChunk> {
    let mut order = 0;
    let mut chunks = Vec::new();
    for section in &document.sections {
        let section_text = format!("{}\n{}", section.title, section.content);
        for text in chunk_text(&section_text, config) {
            chunks.push(KnowledgeChunk {
                text,
                section_id: section.id.clone(),
                section_title: section.title.clone(),
                order,
            });
            order += 1;
        }
    }
    chunks
}

pub fn build_vector_id(
    project_id: &str,
    doc_type: &str,
    version: u32,
    chunk_index: usize,
) -> String {
    format!("project-{project_id}-{doc_type}-v{version}-{chunk_index}")
}

pub struct KnowledgeIndexer {
    embedding_client: Arc<dyn EmbeddingClient>,
    vector_store: Arc<dyn VectorStore>,
    knowledge_store: Arc<dyn KnowledgeStore>,
    usage_store: Arc<dyn UsageStore>,
    config: Arc<Config>,
}

impl KnowledgeIndexer {
    pub fn new(
        embedding_client: Arc<dyn EmbeddingClient>,
        vector_store: Arc<dyn VectorStore>,
        knowledge_store: Arc<dyn KnowledgeStore>,
        usage_store: Arc<dyn UsageStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            embedding_client,
            vector_store,
            knowledge_store,
            usage_store,
            config,
        }
    }

    fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: self.config.chunking_max_size,
            overlap: self.config.chunking_overlap,
        }
    }

    async fn embed(&self, project_id: &str, text: &str) -> Result<Vec<f32>, AppError> {
        let embedding = self
            .embedding_client
            .embed_content(text, "RETRIEVAL_DOCUMENT")
            .await?;
        let input_tokens = usage::estimate_tokens(text);
        usage::log_usage_event(
            &self.usage_store,
            UsageEvent {
                model: self.config.embedding_model.clone(),
                operation: UsageOperation::Embed.as_str(),
                input_tokens,
                output_tokens: 0,
                total_tokens: input_tokens,
                source: Some("knowledge_index".to_string()),
                project_id: Some(project_id.to_string()),
                run_id: None,
                metadata: Some(json!({ "operation": "index_knowledge" })),
            },
        )
        .await;
        Ok(embedding)
    }

    /// Stores normalized knowledge for a project, bumping the version unless
    /// an explicit override is higher.
    pub async fn upsert_knowledge(
        &self,
        project_id: &str,
        knowledge: ProjectKnowledge,
        version_override: Option<u32>,
    ) -> Result<KnowledgeRecord, AppError> {
        let existing = self.knowledge_store.get(project_id).await?;
        let next_version = match (&existing, version_override) {
            (Some(record), Some(requested)) => record.version.max(requested),
            (Some(record), None) => record.version + 1,
            (None, Some(requested)) => requested,
            (None, None) => 1,
        };

        let record = KnowledgeRecord {
            project_id: project_id.to_string(),
            knowledge,
            version: next_version,
            last_indexed_at: existing.and_then(|r| r.last_indexed_at),
            updated_at: Utc::now().timestamp_millis(),
        };
        self.knowledge_store.put(record.clone()).await?;
        Ok(record)
    }

    /// Embeds and upserts all chunks of the given documents, then writes the
    /// vector-id manifest.
    #[instrument(skip(self, docs), fields(project_id, version))]
    pub async fn index_documents(
        &self,
        project_id: &str,
        version: u32,
        docs: &[KnowledgeDocument],
    ) -> Result<usize, AppError> {
        let chunk_config = self.chunk_config();
        let mut points = Vec::new();
        let mut vector_ids = Vec::new();

        let mut chunk_index = 0;
        for doc in docs {
            let doc_type = doc.doc_type.as_str();
            for chunk in chunk_knowledge_document(doc, &chunk_config) {
                let embedding = self.embed(project_id, &chunk.text).await?;
                let id = build_vector_id(project_id, doc_type, version, chunk_index);
                vector_ids.push(id.clone());
                points.push(VectorPoint {
                    id,
                    vector: embedding,
                    payload: json!({
                        "project_id": project_id,
                        "type": doc_type,
                        "version": version,
                        "chunk": chunk_index,
                        "section_id": chunk.section_id,
                        "section_title": chunk.section_title,
                        "content": chunk.text,
                    }),
                });
                chunk_index += 1;
            }
        }

        let total = points.len();
        for batch in points.chunks(VECTOR_UPSERT_BATCH) {
            self.vector_store.upsert(batch.to_vec()).await?;
        }

        self.knowledge_store
            .put_manifest(VectorManifest {
                project_id: project_id.to_string(),
                version,
                vector_ids,
                updated_at: Utc::now().timestamp_millis(),
            })
            .await?;

        info!(project_id, version, total, "Indexed knowledge documents");
        Ok(total)
    }

    /// Clears the project's existing vectors. Filtered deletion first;
    /// manifest ids as fallback when the filter path fails.
    pub async fn delete_vectors_by_manifest(&self, project_id: &str) -> Result<(), AppError> {
        let manifest = self.knowledge_store.get_manifest(project_id).await?;
        let Some(manifest) = manifest else {
            return Ok(());
        };

        let filter = VectorFilter {
            project_id: Some(project_id.to_string()),
            doc_type: None,
        };
        match self.vector_store.delete_by_filter(&filter).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(project_id, error = %e, "deleteByFilter failed; falling back to manifest ids");
            }
        }

        for batch in manifest.vector_ids.chunks(VECTOR_UPSERT_BATCH) {
            if let Err(e) = self.vector_store.delete_by_ids(batch).await {
                warn!(project_id, error = %e, "deleteByIds failed");
                break;
            }
        }
        Ok(())
    }

    /// Full intake sync: normalize, persist the knowledge record and
    /// documents, and optionally (re)index. Indexing failure is reported in
    /// the return value, not as an error.
    #[instrument(skip(self, intake), fields(project_id))]
    pub async fn sync_from_intake(
        &self,
        project_id: &str,
        intake: &serde_json::Value,
        version_override: Option<u32>,
        should_index: bool,
    ) -> Result<(KnowledgeRecord, bool), AppError> {
        let knowledge = normalize_intake_to_knowledge(intake);
        let record = self
            .upsert_knowledge(project_id, knowledge.clone(), version_override)
            .await?;

        let docs = build_knowledge_documents(project_id, record.version, &knowledge);
        self.knowledge_store
            .put_documents(project_id, docs.clone())
            .await?;

        let mut indexed = false;
        if should_index {
            let index_result = async {
                self.delete_vectors_by_manifest(project_id).await?;
                self.index_documents(project_id, record.version, &docs).await?;
                self.knowledge_store
                    .set_last_indexed(project_id, Utc::now().timestamp_millis())
                    .await
            }
            .await;

            match index_result {
                Ok(()) => indexed = true,
                Err(e) => {
                    error!(project_id, version = record.version, error = %e, "Knowledge indexing failed");
                }
            }
        }

        Ok((record, indexed))
    }

    /// Rebuilds the vector index from stored documents, regenerating them
    /// from the knowledge record if the document cache is empty.
    #[instrument(skip(self), fields(project_id))]
    pub async fn reindex_project(&self, project_id: &str) -> Result<(), AppError> {
        let record = self
            .knowledge_store
            .get(project_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Project knowledge not found".to_string()))?;

        let mut docs = self.knowledge_store.get_documents(project_id).await?;
        if docs.is_empty() {
            docs = build_knowledge_documents(project_id, record.version, &record.knowledge);
            self.knowledge_store
                .put_documents(project_id, docs.clone())
                .await?;
        }

        self.delete_vectors_by_manifest(project_id).await?;
        self.index_documents(project_id, record.version, &docs)
            .await?;
        self.knowledge_store
            .set_last_indexed(project_id, Utc::now().timestamp_millis())
            .await?;
        Ok(())
    }
}
