// src/storage/memory.rs
//
// In-process implementations of the persistence traits. Used by tests and
// local development; the engine never assumes anything beyond the trait
// contracts.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::campaign::state::{CampaignState, CampaignStatus, PostStatus};
use crate::errors::AppError;
use crate::services::knowledge::KnowledgeDocument;
use crate::storage::{
    AuditEntry, CampaignStateStore, EventScanRecord, EventScanStatus, EventScanStore,
    KnowledgeRecord, KnowledgeStore, ProjectRecord, ProjectStore, RunRecord, RunStatus,
    RunStepRecord, RunStore, StoredPost, UsageRecord, UsageStore, VectorManifest,
};
use crate::vector_db::{VectorFilter, VectorMatch, VectorPoint, VectorStore};
use crate::workflow::event_scout::DiscoveredEvent;

#[derive(Default)]
pub struct InMemoryCampaignStateStore {
    states: Mutex<HashMap<String, CampaignState>>,
}

#[async_trait]
impl CampaignStateStore for InMemoryCampaignStateStore {
    async fn save(&self, state: &CampaignState) -> Result<(), AppError> {
        self.states
            .lock()
            .await
            .insert(state.campaign_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, campaign_id: &str) -> Result<Option<CampaignState>, AppError> {
        Ok(self.states.lock().await.get(campaign_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryProjectStore {
    pub projects: Mutex<HashMap<String, ProjectRecord>>,
    pub campaign_projects: Mutex<HashMap<String, String>>,
    pub campaign_statuses: Mutex<HashMap<String, CampaignStatus>>,
    pub posts: Mutex<Vec<StoredPost>>,
    pub audit_log: Mutex<Vec<AuditEntry>>,
}

impl InMemoryProjectStore {
    pub async fn add_project(&self, record: ProjectRecord) {
        self.projects
            .lock()
            .await
            .insert(record.id.clone(), record);
    }

    pub async fn link_campaign(&self, campaign_id: &str, project_id: &str) {
        self.campaign_projects
            .lock()
            .await
            .insert(campaign_id.to_string(), project_id.to_string());
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>, AppError> {
        Ok(self.projects.lock().await.get(project_id).cloned())
    }

    async fn project_for_campaign(&self, campaign_id: &str) -> Result<Option<String>, AppError> {
        Ok(self.campaign_projects.lock().await.get(campaign_id).cloned())
    }

    async fn update_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<(), AppError> {
        self.campaign_statuses
            .lock()
            .await
            .insert(campaign_id.to_string(), status);
        Ok(())
    }

    async fn insert_posts(&self, posts: Vec<StoredPost>) -> Result<(), AppError> {
        self.posts.lock().await.extend(posts);
        Ok(())
    }

    async fn posts_for_campaign(&self, campaign_id: &str) -> Result<Vec<StoredPost>, AppError> {
        Ok(self
            .posts
            .lock()
            .await
            .iter()
            .filter(|p| p.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn update_post_statuses(
        &self,
        campaign_id: &str,
        status: PostStatus,
    ) -> Result<(), AppError> {
        for post in self
            .posts
            .lock()
            .await
            .iter_mut()
            .filter(|p| p.campaign_id == campaign_id)
        {
            post.status = status;
        }
        Ok(())
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), AppError> {
        self.audit_log.lock().await.push(entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRunStore {
    pub runs: Mutex<HashMap<String, RunRecord>>,
    pub steps: Mutex<Vec<RunStepRecord>>,
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, run: RunRecord) -> Result<(), AppError> {
        self.runs.lock().await.insert(run.id.clone(), run);
        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: &str,
        status: RunStatus,
        result: Option<Value>,
    ) -> Result<(), AppError> {
        let mut runs = self.runs.lock().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| AppError::NotFound(format!("run {run_id}")))?;
        run.status = status;
        run.end_time = Some(Utc::now().timestamp_millis());
        run.result = result;
        Ok(())
    }

    async fn record_step(&self, step: RunStepRecord) -> Result<(), AppError> {
        self.steps.lock().await.push(step);
        Ok(())
    }

    async fn step_output(
        &self,
        run_id: &str,
        step_name: &str,
    ) -> Result<Option<Value>, AppError> {
        Ok(self
            .steps
            .lock()
            .await
            .iter()
            .find(|s| s.run_id == run_id && s.step_name == step_name)
            .map(|s| s.output.clone()))
    }

    async fn step_history(&self, run_id: &str) -> Result<Vec<RunStepRecord>, AppError> {
        Ok(self
            .steps
            .lock()
            .await
            .iter()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryUsageStore {
    pub events: Mutex<Vec<UsageRecord>>,
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn record(&self, event: UsageRecord) -> Result<(), AppError> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    pub records: Mutex<HashMap<String, KnowledgeRecord>>,
    pub documents: Mutex<HashMap<String, Vec<KnowledgeDocument>>>,
    pub manifests: Mutex<HashMap<String, VectorManifest>>,
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn get(&self, project_id: &str) -> Result<Option<KnowledgeRecord>, AppError> {
        Ok(self.records.lock().await.get(project_id).cloned())
    }

    async fn put(&self, record: KnowledgeRecord) -> Result<(), AppError> {
        self.records
            .lock()
            .await
            .insert(record.project_id.clone(), record);
        Ok(())
    }

    async fn set_last_indexed(&self, project_id: &str, timestamp: i64) -> Result<(), AppError> {
        if let Some(record) = self.records.lock().await.get_mut(project_id) {
            record.last_indexed_at = Some(timestamp);
        }
        Ok(())
    }

    async fn put_documents(
        &self,
        project_id: &str,
        docs: Vec<KnowledgeDocument>,
    ) -> Result<(), AppError> {
        self.documents
            .lock()
            .await
            .insert(project_id.to_string(), docs);
        Ok(())
    }

    async fn get_documents(&self, project_id: &str) -> Result<Vec<KnowledgeDocument>, AppError> {
        Ok(self
            .documents
            .lock()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_manifest(&self, manifest: VectorManifest) -> Result<(), AppError> {
        self.manifests
            .lock()
            .await
            .insert(manifest.project_id.clone(), manifest);
        Ok(())
    }

    async fn get_manifest(&self, project_id: &str) -> Result<Option<VectorManifest>, AppError> {
        Ok(self.manifests.lock().await.get(project_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryEventScanStore {
    pub scans: Mutex<HashMap<String, EventScanRecord>>,
    pub events: Mutex<Vec<(String, DiscoveredEvent)>>,
}

#[async_trait]
impl EventScanStore for InMemoryEventScanStore {
    async fn create_scan(&self, scan: EventScanRecord) -> Result<(), AppError> {
        self.scans.lock().await.insert(scan.id.clone(), scan);
        Ok(())
    }

    async fn mark_running(&self, scan_id: &str, started_at: i64) -> Result<(), AppError> {
        let mut scans = self.scans.lock().await;
        let scan = scans
            .get_mut(scan_id)
            .ok_or_else(|| AppError::NotFound(format!("scan {scan_id}")))?;
        scan.status = EventScanStatus::Running;
        scan.started_at = Some(started_at);
        Ok(())
    }

    async fn set_iteration(&self, scan_id: &str, iteration: u32) -> Result<(), AppError> {
        let mut scans = self.scans.lock().await;
        let scan = scans
            .get_mut(scan_id)
            .ok_or_else(|| AppError::NotFound(format!("scan {scan_id}")))?;
        scan.iteration_count = iteration;
        Ok(())
    }

    async fn record_events(
        &self,
        scan_id: &str,
        _project_id: &str,
        events: &[DiscoveredEvent],
    ) -> Result<(), AppError> {
        let mut stored = self.events.lock().await;
        for event in events {
            stored.push((scan_id.to_string(), event.clone()));
        }
        Ok(())
    }

    async fn mark_completed(&self, scan_id: &str, total_events: u32) -> Result<(), AppError> {
        let mut scans = self.scans.lock().await;
        let scan = scans
            .get_mut(scan_id)
            .ok_or_else(|| AppError::NotFound(format!("scan {scan_id}")))?;
        scan.status = EventScanStatus::Completed;
        scan.total_events_found = total_events;
        scan.completed_at = Some(Utc::now().timestamp_millis());
        Ok(())
    }

    async fn mark_failed(&self, scan_id: &str, error_message: &str) -> Result<(), AppError> {
        let mut scans = self.scans.lock().await;
        let scan = scans
            .get_mut(scan_id)
            .ok_or_else(|| AppError::NotFound(format!("scan {scan_id}")))?;
        scan.status = EventScanStatus::Failed;
        scan.error_message = Some(error_message.to_string());
        scan.completed_at = Some(Utc::now().timestamp_millis());
        Ok(())
    }

    async fn get_scan(&self, scan_id: &str) -> Result<Option<EventScanRecord>, AppError> {
        Ok(self.scans.lock().await.get(scan_id).cloned())
    }
}

/// Brute-force cosine-similarity vector store for tests and local runs.
#[derive(Default)]
pub struct InMemoryVectorStore {
    pub points: Mutex<Vec<VectorPoint>>,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn matches_filter(payload: &Value, filter: &VectorFilter) -> bool {
    if let Some(project_id) = &filter.project_id {
        if payload.get("project_id").and_then(Value::as_str) != Some(project_id.as_str()) {
            return false;
        }
    }
    if let Some(doc_type) = &filter.doc_type {
        if payload.get("type").and_then(Value::as_str) != Some(doc_type.as_str()) {
            return false;
        }
    }
    true
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, new_points: Vec<VectorPoint>) -> Result<(), AppError> {
        let mut points = self.points.lock().await;
        for point in new_points {
            points.retain(|p| p.id != point.id);
            points.push(point);
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        filter: Option<&VectorFilter>,
        top_k: u64,
    ) -> Result<Vec<VectorMatch>, AppError> {
        let points = self.points.lock().await;
        let mut matches: Vec<VectorMatch> = points
            .iter()
            .filter(|p| filter.map_or(true, |f| matches_filter(&p.payload, f)))
            .map(|p| VectorMatch {
                id: p.id.clone(),
                score: cosine_similarity(embedding, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k as usize);
        Ok(matches)
    }

    async fn delete_by_filter(&self, filter: &VectorFilter) -> Result<(), AppError> {
        self.points
            .lock()
            .await
            .retain(|p| !matches_filter(&p.payload, filter));
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), AppError> {
        self.points
            .lock()
            .await
            .retain(|p| !ids.contains(&p.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn campaign_state_round_trips() {
        let store = InMemoryCampaignStateStore::default();
        let state = CampaignState::new("c1", 5);
        store.save(&state).await.unwrap();
        let loaded = store.load("c1").await.unwrap().unwrap();
        assert_eq!(loaded.campaign_id, "c1");
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn step_output_is_replayable_by_name() {
        let store = InMemoryRunStore::default();
        store
            .create_run(RunRecord {
                id: "r1".into(),
                instruction: "test".into(),
                status: RunStatus::Running,
                project_id: None,
                start_time: 0,
                end_time: None,
                result: None,
            })
            .await
            .unwrap();
        store
            .record_step(RunStepRecord {
                run_id: "r1".into(),
                agent_role: "content_writer".into(),
                step_name: "exec_content_writer_1".into(),
                input: json!({}),
                output: json!({ "posts": [] }),
                completed_at: 1,
            })
            .await
            .unwrap();

        let replayed = store
            .step_output("r1", "exec_content_writer_1")
            .await
            .unwrap();
        assert_eq!(replayed, Some(json!({ "posts": [] })));
        assert!(store.step_output("r1", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn vector_store_filters_and_ranks() {
        let store = InMemoryVectorStore::default();
        store
            .upsert(vec![
                VectorPoint {
                    id: "a".into(),
                    vector: vec![1.0, 0.0],
                    payload: json!({ "project_id": "7", "type": "product" }),
                },
                VectorPoint {
                    id: "b".into(),
                    vector: vec![0.0, 1.0],
                    payload: json!({ "project_id": "7", "type": "compliance" }),
                },
            ])
            .await
            .unwrap();

        let filter = VectorFilter {
            project_id: Some("7".into()),
            doc_type: Some("product".into()),
        };
        let matches = store.query(&[1.0, 0.0], Some(&filter), 5).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "a");

        store.delete_by_filter(&filter).await.unwrap();
        let remaining = store.query(&[1.0, 0.0], None, 5).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b");
    }
}
