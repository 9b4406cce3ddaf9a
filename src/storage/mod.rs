// src/storage/mod.rs
//
// Persistence seams for the orchestration engine. The engine only depends on
// these traits; `memory` provides in-process implementations used by tests
// and local development.

use async_trait::async_trait;
use serde_json::Value;

use crate::campaign::state::{CampaignState, CampaignStatus, PostStatus};
use crate::errors::AppError;
use crate::services::knowledge::{KnowledgeDocument, ProjectKnowledge};
use crate::workflow::event_scout::DiscoveredEvent;

pub mod memory;

#[derive(Debug, Clone)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub website_url: Option<String>,
    /// Raw intake form data, when one has been submitted.
    pub intake: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub project_id: String,
    pub timestamp: i64,
    pub action: String,
    pub entity_type: String,
    pub actor: String,
}

/// A post row as projected into the relational store at internal approval.
#[derive(Debug, Clone)]
pub struct StoredPost {
    pub campaign_id: String,
    pub status: PostStatus,
    pub content: String,
    pub content_hash: String,
    pub platform: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub instruction: String,
    pub status: RunStatus,
    pub project_id: Option<String>,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub result: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct RunStepRecord {
    pub run_id: String,
    pub agent_role: String,
    pub step_name: String,
    pub input: Value,
    pub output: Value,
    pub completed_at: i64,
}

#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub model: String,
    pub operation: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub source: Option<String>,
    pub project_id: Option<String>,
    pub run_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct KnowledgeRecord {
    pub project_id: String,
    pub knowledge: ProjectKnowledge,
    pub version: u32,
    pub last_indexed_at: Option<i64>,
    pub updated_at: i64,
}

/// Tracks which vector ids belong to a project's current index, so a reindex
/// can delete stale vectors even when filtered deletion is unavailable.
#[derive(Debug, Clone)]
pub struct VectorManifest {
    pub project_id: String,
    pub version: u32,
    pub vector_ids: Vec<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct EventScanRecord {
    pub id: String,
    pub project_id: String,
    pub status: EventScanStatus,
    pub iteration_count: u32,
    pub total_events_found: u32,
    pub error_message: Option<String>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Durable key-value home of per-campaign state. Saved after every mutation.
#[async_trait]
pub trait CampaignStateStore: Send + Sync {
    async fn save(&self, state: &CampaignState) -> Result<(), AppError>;
    async fn load(&self, campaign_id: &str) -> Result<Option<CampaignState>, AppError>;
}

/// Relational-side collaborator: projects, campaign status projection,
/// approved posts, audit log.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>, AppError>;
    async fn project_for_campaign(&self, campaign_id: &str) -> Result<Option<String>, AppError>;
    async fn update_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<(), AppError>;
    async fn insert_posts(&self, posts: Vec<StoredPost>) -> Result<(), AppError>;
    async fn posts_for_campaign(&self, campaign_id: &str) -> Result<Vec<StoredPost>, AppError>;
    async fn update_post_statuses(
        &self,
        campaign_id: &str,
        status: PostStatus,
    ) -> Result<(), AppError>;
    async fn append_audit(&self, entry: AuditEntry) -> Result<(), AppError>;
}

/// Append-only run/step audit trail. `step_output` is also the durable step
/// journal: a recorded step is replayed from here instead of re-executed.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: RunRecord) -> Result<(), AppError>;
    async fn complete_run(
        &self,
        run_id: &str,
        status: RunStatus,
        result: Option<Value>,
    ) -> Result<(), AppError>;
    async fn record_step(&self, step: RunStepRecord) -> Result<(), AppError>;
    async fn step_output(&self, run_id: &str, step_name: &str)
        -> Result<Option<Value>, AppError>;
    /// Completed step outputs for a run, in completion order.
    async fn step_history(&self, run_id: &str) -> Result<Vec<RunStepRecord>, AppError>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn record(&self, event: UsageRecord) -> Result<(), AppError>;
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn get(&self, project_id: &str) -> Result<Option<KnowledgeRecord>, AppError>;
    async fn put(&self, record: KnowledgeRecord) -> Result<(), AppError>;
    async fn set_last_indexed(&self, project_id: &str, timestamp: i64) -> Result<(), AppError>;
    async fn put_documents(
        &self,
        project_id: &str,
        docs: Vec<KnowledgeDocument>,
    ) -> Result<(), AppError>;
    async fn get_documents(&self, project_id: &str) -> Result<Vec<KnowledgeDocument>, AppError>;
    async fn put_manifest(&self, manifest: VectorManifest) -> Result<(), AppError>;
    async fn get_manifest(&self, project_id: &str) -> Result<Option<VectorManifest>, AppError>;
}

#[async_trait]
pub trait EventScanStore: Send + Sync {
    async fn create_scan(&self, scan: EventScanRecord) -> Result<(), AppError>;
    async fn mark_running(&self, scan_id: &str, started_at: i64) -> Result<(), AppError>;
    async fn set_iteration(&self, scan_id: &str, iteration: u32) -> Result<(), AppError>;
    async fn record_events(
        &self,
        scan_id: &str,
        project_id: &str,
        events: &[DiscoveredEvent],
    ) -> Result<(), AppError>;
    async fn mark_completed(&self, scan_id: &str, total_events: u32) -> Result<(), AppError>;
    async fn mark_failed(&self, scan_id: &str, error_message: &str) -> Result<(), AppError>;
    async fn get_scan(&self, scan_id: &str) -> Result<Option<EventScanRecord>, AppError>;
}
