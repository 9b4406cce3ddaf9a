// src/services/run_log.rs
//
// Run/step audit trail around the RunStore. Creating the run and recording
// steps also forms the durable step journal the workflow runner replays
// from, so those writes are not swallowed; completion bookkeeping is
// best-effort.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, instrument};

use crate::errors::AppError;
use crate::storage::{RunRecord, RunStatus, RunStepRecord, RunStore};

#[derive(Clone)]
pub struct RunLog {
    store: Arc<dyn RunStore>,
}

impl RunLog {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Creates the run record before any step executes.
    #[instrument(skip(self), fields(run_id))]
    pub async fn start_run(
        &self,
        run_id: &str,
        instruction: &str,
        project_id: Option<&str>,
    ) -> Result<(), AppError> {
        self.store
            .create_run(RunRecord {
                id: run_id.to_string(),
                instruction: instruction.to_string(),
                status: RunStatus::Running,
                project_id: project_id.map(str::to_string),
                start_time: Utc::now().timestamp_millis(),
                end_time: None,
                result: None,
            })
            .await
    }

    /// Recorded output of a previously completed step, if any. Used for
    /// idempotent replay: a step with a journal entry is never re-executed.
    pub async fn step_output(
        &self,
        run_id: &str,
        step_name: &str,
    ) -> Result<Option<Value>, AppError> {
        self.store.step_output(run_id, step_name).await
    }

    pub async fn record_step(
        &self,
        run_id: &str,
        agent_role: &str,
        step_name: &str,
        input: Value,
        output: Value,
    ) -> Result<(), AppError> {
        self.store
            .record_step(RunStepRecord {
                run_id: run_id.to_string(),
                agent_role: agent_role.to_string(),
                step_name: step_name.to_string(),
                input,
                output,
                completed_at: Utc::now().timestamp_millis(),
            })
            .await
    }

    pub async fn step_history(&self, run_id: &str) -> Result<Vec<RunStepRecord>, AppError> {
        self.store.step_history(run_id).await
    }

    /// Marks the run terminal. Best-effort: a failed status write must not
    /// mask the pipeline outcome it is recording.
    pub async fn complete_run(&self, run_id: &str, status: RunStatus, result: Option<Value>) {
        if let Err(e) = self.store.complete_run(run_id, status, result).await {
            error!(run_id, error = %e, "Failed to update run status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryRunStore;
    use serde_json::json;

    #[tokio::test]
    async fn run_lifecycle_is_recorded_once() {
        let store = Arc::new(InMemoryRunStore::default());
        let log = RunLog::new(store.clone());

        log.start_run("run-1", "write a post", Some("7")).await.unwrap();
        log.record_step("run-1", "content_writer", "exec_content_writer_1", json!({}), json!({"posts": []}))
            .await
            .unwrap();
        log.complete_run("run-1", RunStatus::Completed, Some(json!({"posts": []})))
            .await;

        let runs = store.runs.lock().await;
        let run = runs.get("run-1").unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.end_time.is_some());
    }

    #[tokio::test]
    async fn completing_a_missing_run_does_not_panic() {
        let store = Arc::new(InMemoryRunStore::default());
        let log = RunLog::new(store);
        // Swallowed with an error log.
        log.complete_run("ghost", RunStatus::Failed, None).await;
    }
}
