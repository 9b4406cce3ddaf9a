// src/services/context_router.rs
//
// Deterministic retrieval routing for agent invocations. The task text is
// classified by keyword into a task type; the task type maps to an
// allow-list of knowledge context types; vector queries are filtered to
// those types, relaxing the filter when the backend rejects its shape and
// re-checking every result client-side.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::errors::AppError;
use crate::llm::EmbeddingClient;
use crate::services::knowledge::build_knowledge_summary;
use crate::services::usage::{self, UsageEvent, UsageOperation};
use crate::storage::{KnowledgeStore, UsageStore};
use crate::vector_db::{VectorFilter, VectorMatch, VectorStore};

const DEFAULT_TOP_K: u64 = 5;
const MAX_TOP_K: u64 = 50;
const MAX_FALLBACK_TOP_K: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    CreativeDraft,
    ContentRevision,
    ComplianceReview,
    StrategyPlanning,
    ExecutiveApproval,
    Other,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CreativeDraft => "creative_draft",
            TaskType::ContentRevision => "content_revision",
            TaskType::ComplianceReview => "compliance_review",
            TaskType::StrategyPlanning => "strategy_planning",
            TaskType::ExecutiveApproval => "executive_approval",
            TaskType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextType {
    Product,
    BrandVoice,
    Audience,
    Compliance,
    Competitors,
    Summary,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Product => "product",
            ContextType::BrandVoice => "brand_voice",
            ContextType::Audience => "audience",
            ContextType::Compliance => "compliance",
            ContextType::Competitors => "competitors",
            ContextType::Summary => "summary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "product" => Some(ContextType::Product),
            "brand_voice" => Some(ContextType::BrandVoice),
            "audience" => Some(ContextType::Audience),
            "compliance" => Some(ContextType::Compliance),
            "competitors" => Some(ContextType::Competitors),
            "summary" => Some(ContextType::Summary),
            _ => None,
        }
    }
}

fn contains_any(task: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| task.contains(kw))
}

/// Keyword classification. Revision outranks creative so "rewrite the draft"
/// routes as a revision, not a fresh draft.
pub fn classify_task_type(task: &str) -> TaskType {
    let task = task.to_lowercase();
    if contains_any(
        &task,
        &["revise", "revision", "edit", "rewrite", "improve", "fix", "update"],
    ) {
        TaskType::ContentRevision
    } else if contains_any(&task, &["compliance", "legal", "risk", "policy"]) {
        TaskType::ComplianceReview
    } else if contains_any(
        &task,
        &["strategy", "positioning", "market", "competitor", "audience", "plan"],
    ) {
        TaskType::StrategyPlanning
    } else if contains_any(&task, &["approve", "executive", "sign-off", "sign off"]) {
        TaskType::ExecutiveApproval
    } else if contains_any(&task, &["draft", "write", "create", "generate", "compose"]) {
        TaskType::CreativeDraft
    } else {
        TaskType::Other
    }
}

fn allowed_context_types(task_type: TaskType) -> &'static [ContextType] {
    match task_type {
        TaskType::CreativeDraft => &[],
        TaskType::ContentRevision => &[ContextType::BrandVoice, ContextType::Product],
        TaskType::ComplianceReview => &[ContextType::Compliance],
        TaskType::StrategyPlanning => &[ContextType::Competitors, ContextType::Audience],
        TaskType::ExecutiveApproval => &[ContextType::Summary],
        TaskType::Other => &[],
    }
}

/// Intersects a caller's requested context types with the task type's
/// allow-list. `Other` tasks pass requested types through unchecked.
pub fn resolve_context_types(task_type: TaskType, requested: &[ContextType]) -> Vec<ContextType> {
    if task_type == TaskType::Other {
        return requested.to_vec();
    }
    let allowed = allowed_context_types(task_type);
    if requested.is_empty() {
        return allowed.to_vec();
    }
    requested
        .iter()
        .copied()
        .filter(|t| allowed.contains(t))
        .collect()
}

pub fn normalize_top_k(requested: Option<u64>) -> u64 {
    requested.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K)
}

#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub task_type: TaskType,
    pub context_types: Vec<ContextType>,
    /// Present only when the summary context was resolved; built from the
    /// knowledge snapshot, never from vectors.
    pub summary: Option<Value>,
    pub vectors: Vec<VectorMatch>,
}

impl ContextBundle {
    /// Flattened text form handed to agents as retrieval context.
    pub fn as_context_block(&self) -> String {
        let mut parts = Vec::new();
        if let Some(summary) = &self.summary {
            parts.push(format!("Project summary:\n{summary}"));
        }
        for m in &self.vectors {
            if let Some(content) = m.payload.get("content").and_then(Value::as_str) {
                parts.push(content.to_string());
            }
        }
        parts.join("\n\n")
    }
}

pub struct ContextRouter {
    embedding_client: Arc<dyn EmbeddingClient>,
    vector_store: Arc<dyn VectorStore>,
    knowledge_store: Arc<dyn KnowledgeStore>,
    usage_store: Arc<dyn UsageStore>,
    config: Arc<Config>,
}

impl ContextRouter {
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

    /// Routes a task to its relevant project context.
    #[instrument(skip(self, task, requested), fields(project_id))]
    pub async fn route(
        &self,
        project_id: &str,
        task: &str,
        requested: &[ContextType],
        top_k: Option<u64>,
    ) -> Result<ContextBundle, AppError> {
        let task_type = classify_task_type(task);
        let context_types = resolve_context_types(task_type, requested);
        let top_k = normalize_top_k(top_k);
        debug!(
            task_type = task_type.as_str(),
            types = ?context_types.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            top_k,
            "Routed task to context types"
        );

        let mut summary = None;
        if context_types.contains(&ContextType::Summary) {
            if let Some(record) = self.knowledge_store.get(project_id).await? {
                summary = Some(build_knowledge_summary(&record.knowledge));
            }
        }

        let vector_types: Vec<ContextType> = context_types
            .iter()
            .copied()
            .filter(|t| *t != ContextType::Summary)
            .collect();

        let mut vectors = Vec::new();
        if !vector_types.is_empty() {
            let embedding = self
                .embedding_client
                .embed_content(task, "RETRIEVAL_QUERY")
                .await?;
            let input_tokens = usage::estimate_tokens(task);
            usage::log_usage_event(
                &self.usage_store,
                UsageEvent {
                    model: self.config.embedding_model.clone(),
                    operation: UsageOperation::Embed.as_str(),
                    input_tokens,
                    output_tokens: 0,
                    total_tokens: input_tokens,
                    source: Some("context_router".to_string()),
                    project_id: Some(project_id.to_string()),
                    run_id: None,
                    metadata: Some(json!({ "task_type": task_type.as_str() })),
                },
            )
            .await;

            for context_type in &vector_types {
                let matches = self
                    .query_with_fallback(&embedding, project_id, *context_type, top_k)
                    .await?;
                for m in matches {
                    if !vectors.iter().any(|v: &VectorMatch| v.id == m.id) {
                        vectors.push(m);
                    }
                }
            }
            vectors.sort_by(|a, b| b.score.total_cmp(&a.score));
        }

        Ok(ContextBundle {
            task_type,
            context_types,
            summary,
            vectors,
        })
    }

    /// Strict filter first, then progressively relaxed. Relaxation happens
    /// only when a filtered query fails with a query-shape or auth error;
    /// other errors propagate. Every result set is re-checked client-side
    /// against both the project and the category, and if every attempt
    /// fails the category degrades to an empty result set.
    async fn query_with_fallback(
        &self,
        embedding: &[f32],
        project_id: &str,
        context_type: ContextType,
        top_k: u64,
    ) -> Result<Vec<VectorMatch>, AppError> {
        let strict = VectorFilter {
            project_id: Some(project_id.to_string()),
            doc_type: Some(context_type.as_str().to_string()),
        };
        let by_project = VectorFilter {
            project_id: Some(project_id.to_string()),
            doc_type: None,
        };
        let fallback_top_k = (top_k * 5).min(MAX_FALLBACK_TOP_K);
        let attempts: [(Option<&VectorFilter>, u64); 3] = [
            (Some(&strict), top_k),
            (Some(&by_project), top_k),
            (None, fallback_top_k),
        ];

        for (filter, k) in attempts {
            match self.vector_store.query(embedding, filter, k).await {
                Ok(mut matches) => {
                    matches.retain(|m| {
                        m.payload.get("project_id").and_then(Value::as_str) == Some(project_id)
                            && m.payload.get("type").and_then(Value::as_str)
                                == Some(context_type.as_str())
                    });
                    matches.truncate(top_k as usize);
                    return Ok(matches);
                }
                Err(e) if is_relaxable_query_error(&e) => {
                    warn!(
                        project_id,
                        context_type = context_type.as_str(),
                        error = %e,
                        "Vector query failed; relaxing the filter"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Vec::new())
    }
}

/// Query-shape and auth failures are worth retrying with a looser filter;
/// anything else is a real backend problem.
fn is_relaxable_query_error(error: &AppError) -> bool {
    match error {
        AppError::VectorDbError(msg) => {
            msg.contains("400")
                || msg.contains("Bad Request")
                || msg.contains("Invalid")
                || msg.contains("Authentication")
                || msg.contains("Unauthorized")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{InMemoryKnowledgeStore, InMemoryUsageStore, InMemoryVectorStore};
    use crate::storage::KnowledgeRecord;
    use crate::vector_db::VectorPoint;
    use async_trait::async_trait;

    struct FixedEmbeddingClient;

    #[async_trait]
    impl EmbeddingClient for FixedEmbeddingClient {
        async fn embed_content(&self, _text: &str, _task_type: &str) -> Result<Vec<f32>, AppError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    fn router(vectors: Arc<dyn VectorStore>, knowledge: Arc<InMemoryKnowledgeStore>) -> ContextRouter {
        ContextRouter::new(
            Arc::new(FixedEmbeddingClient),
            vectors,
            knowledge,
            Arc::new(InMemoryUsageStore::default()),
            Arc::new(Config::default()),
        )
    }

    #[test]
    fn revision_keywords_outrank_creative() {
        assert_eq!(classify_task_type("Rewrite the draft posts"), TaskType::ContentRevision);
        assert_eq!(classify_task_type("Write 3 posts about honey"), TaskType::CreativeDraft);
        assert_eq!(classify_task_type("Check compliance on claims"), TaskType::ComplianceReview);
        assert_eq!(classify_task_type("Plan our market positioning"), TaskType::StrategyPlanning);
        assert_eq!(classify_task_type("Executive sign-off needed"), TaskType::ExecutiveApproval);
        assert_eq!(classify_task_type("hello there"), TaskType::Other);
    }

    #[test]
    fn requested_types_are_intersected_with_allow_list() {
        let resolved = resolve_context_types(
            TaskType::ComplianceReview,
            &[ContextType::Product, ContextType::Compliance],
        );
        assert_eq!(resolved, vec![ContextType::Compliance]);

        // Empty request falls back to the full allow-list.
        let resolved = resolve_context_types(TaskType::StrategyPlanning, &[]);
        assert_eq!(resolved, vec![ContextType::Competitors, ContextType::Audience]);

        // Other passes requested through.
        let resolved = resolve_context_types(TaskType::Other, &[ContextType::Product]);
        assert_eq!(resolved, vec![ContextType::Product]);
    }

    #[test]
    fn top_k_is_clamped() {
        assert_eq!(normalize_top_k(None), 5);
        assert_eq!(normalize_top_k(Some(0)), 1);
        assert_eq!(normalize_top_k(Some(500)), 50);
    }

    #[tokio::test]
    async fn executive_approval_bypasses_vectors() {
        let vectors = Arc::new(InMemoryVectorStore::default());
        let knowledge = Arc::new(InMemoryKnowledgeStore::default());
        knowledge
            .put(KnowledgeRecord {
                project_id: "7".into(),
                knowledge: Default::default(),
                version: 1,
                last_indexed_at: None,
                updated_at: 0,
            })
            .await
            .unwrap();

        let router = router(vectors.clone(), knowledge);
        let bundle = router
            .route("7", "Executive sign-off on the campaign", &[], None)
            .await
            .unwrap();
        assert_eq!(bundle.task_type, TaskType::ExecutiveApproval);
        assert!(bundle.summary.is_some());
        assert!(bundle.vectors.is_empty());
    }

    /// Rejects any query whose filter constrains the document type, the way
    /// a backend that cannot index that metadata field would.
    struct TypedFilterFailsStore {
        inner: InMemoryVectorStore,
    }

    #[async_trait]
    impl VectorStore for TypedFilterFailsStore {
        async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), AppError> {
            self.inner.upsert(points).await
        }

        async fn query(
            &self,
            embedding: &[f32],
            filter: Option<&VectorFilter>,
            top_k: u64,
        ) -> Result<Vec<VectorMatch>, AppError> {
            if filter.is_some_and(|f| f.doc_type.is_some()) {
                return Err(AppError::VectorDbError(
                    "400 Bad Request: cannot filter on field 'type'".into(),
                ));
            }
            self.inner.query(embedding, filter, top_k).await
        }

        async fn delete_by_filter(&self, filter: &VectorFilter) -> Result<(), AppError> {
            self.inner.delete_by_filter(filter).await
        }

        async fn delete_by_ids(&self, ids: &[String]) -> Result<(), AppError> {
            self.inner.delete_by_ids(ids).await
        }
    }

    struct AlwaysDownStore;

    #[async_trait]
    impl VectorStore for AlwaysDownStore {
        async fn upsert(&self, _points: Vec<VectorPoint>) -> Result<(), AppError> {
            Err(AppError::VectorDbError("connection refused".into()))
        }

        async fn query(
            &self,
            _embedding: &[f32],
            _filter: Option<&VectorFilter>,
            _top_k: u64,
        ) -> Result<Vec<VectorMatch>, AppError> {
            Err(AppError::VectorDbError("connection refused".into()))
        }

        async fn delete_by_filter(&self, _filter: &VectorFilter) -> Result<(), AppError> {
            Err(AppError::VectorDbError("connection refused".into()))
        }

        async fn delete_by_ids(&self, _ids: &[String]) -> Result<(), AppError> {
            Err(AppError::VectorDbError("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn query_shape_errors_relax_the_filter_and_post_filter_results() {
        let store = TypedFilterFailsStore {
            inner: InMemoryVectorStore::default(),
        };
        // Only "a" matches both the project and the category; "b" is another
        // project's document and "c" another category, and neither may leak
        // through the relaxed query.
        store
            .upsert(vec![
                VectorPoint {
                    id: "a".into(),
                    vector: vec![1.0, 0.0, 0.0],
                    payload: json!({ "project_id": "7", "type": "compliance", "content": "no medical claims" }),
                },
                VectorPoint {
                    id: "b".into(),
                    vector: vec![1.0, 0.0, 0.0],
                    payload: json!({ "project_id": "8", "type": "compliance", "content": "other project" }),
                },
                VectorPoint {
                    id: "c".into(),
                    vector: vec![1.0, 0.0, 0.0],
                    payload: json!({ "project_id": "7", "type": "brand_voice", "content": "warm tone" }),
                },
            ])
            .await
            .unwrap();

        let router = router(Arc::new(store), Arc::new(InMemoryKnowledgeStore::default()));
        let bundle = router
            .route("7", "compliance review of the claims", &[], Some(3))
            .await
            .unwrap();
        assert_eq!(bundle.vectors.len(), 1);
        assert_eq!(bundle.vectors[0].id, "a");
    }

    #[tokio::test]
    async fn backend_outages_are_not_relaxed_away() {
        let router = router(
            Arc::new(AlwaysDownStore),
            Arc::new(InMemoryKnowledgeStore::default()),
        );
        let result = router
            .route("7", "compliance review of the claims", &[], Some(3))
            .await;
        assert!(matches!(result, Err(AppError::VectorDbError(_))));
    }
}
