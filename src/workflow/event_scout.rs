// src/workflow/event_scout.rs
//
// Iterative event discovery. The scout agent is asked repeatedly, each pass
// seeded with what was already found and the angles already tried, until it
// stops asking to continue or the iteration cap is reached. Every iteration
// persists its finds before the next one starts, so a mid-scan failure keeps
// the events discovered so far.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::agents::{AgentInvoker, AgentRole, InvocationContext};
use crate::config::Config;
use crate::errors::AppError;
use crate::services::knowledge::build_knowledge_summary;
use crate::storage::{EventScanStore, KnowledgeStore, ProjectStore};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiscoveredEvent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub relevance: String,
    #[serde(default)]
    pub source_url: String,
}

impl DiscoveredEvent {
    /// Dedup key across iterations. Case-insensitive on both components so
    /// the scout cannot re-report an event by restyling its name.
    pub fn dedup_key(&self) -> String {
        format!("{}|{}", self.name.to_lowercase(), self.source_url.to_lowercase())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ScoutIterationPayload {
    #[serde(default)]
    events: Vec<DiscoveredEvent>,
    #[serde(default)]
    iteration_summary: Option<String>,
    #[serde(default)]
    next_search_ideas: Vec<String>,
    #[serde(default)]
    continue_research: bool,
}

pub struct EventScoutWorkflow {
    invoker: Arc<AgentInvoker>,
    scan_store: Arc<dyn EventScanStore>,
    project_store: Arc<dyn ProjectStore>,
    knowledge_store: Arc<dyn KnowledgeStore>,
    config: Arc<Config>,
}

impl EventScoutWorkflow {
    pub fn new(
        invoker: Arc<AgentInvoker>,
        scan_store: Arc<dyn EventScanStore>,
        project_store: Arc<dyn ProjectStore>,
        knowledge_store: Arc<dyn KnowledgeStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            invoker,
            scan_store,
            project_store,
            knowledge_store,
            config,
        }
    }

    /// One-paragraph description of the business the scout searches on
    /// behalf of, assembled from the project record and its knowledge
    /// snapshot when one exists.
    async fn build_business_summary(&self, project_id: &str) -> Result<String, AppError> {
        let mut parts = Vec::new();
        if let Some(project) = self.project_store.get_project(project_id).await? {
            parts.push(format!("Business: {}", project.name));
            if let Some(description) = project.description.filter(|d| !d.is_empty()) {
                parts.push(format!("Description: {description}"));
            }
            if let Some(industry) = project.industry.filter(|i| !i.is_empty()) {
                parts.push(format!("Industry: {industry}"));
            }
            if let Some(url) = project.website_url.filter(|u| !u.is_empty()) {
                parts.push(format!("Website: {url}"));
            }
        }
        if let Some(record) = self.knowledge_store.get(project_id).await? {
            parts.push(format!(
                "Knowledge snapshot: {}",
                build_knowledge_summary(&record.knowledge)
            ));
        }
        if parts.is_empty() {
            parts.push(format!("Business: project {project_id}"));
        }
        Ok(parts.join("\n"))
    }

    fn iteration_task(
        business_summary: &str,
        iteration: u32,
        max_iterations: u32,
        found_names: &[String],
        previous_searches: &[String],
    ) -> String {
        let mut task = format!(
            "Find upcoming events this business could create content around.\n\n{business_summary}\n\nThis is research pass {iteration} of at most {max_iterations}."
        );
        if found_names.is_empty() {
            task.push_str("\nNo events have been found yet; start broad.");
        } else {
            task.push_str(&format!(
                "\nAlready found (do NOT repeat these): {}.\nTake a different angle this pass.",
                found_names.join(", ")
            ));
        }
        if !previous_searches.is_empty() {
            task.push_str(&format!(
                "\nSearch angles already covered:\n- {}",
                previous_searches.join("\n- ")
            ));
        }
        task
    }

    /// Runs the scan to a terminal state. The scan record always ends
    /// COMPLETED or FAILED, even when an iteration errors.
    #[instrument(skip(self), fields(scan_id, project_id))]
    pub async fn run(&self, scan_id: &str, project_id: &str) -> Result<u32, AppError> {
        self.scan_store
            .mark_running(scan_id, chrono::Utc::now().timestamp_millis())
            .await?;

        match self.run_iterations(scan_id, project_id).await {
            Ok(total) => {
                self.scan_store.mark_completed(scan_id, total).await?;
                info!(scan_id, total, "Event scan completed");
                Ok(total)
            }
            Err(e) => {
                if let Err(mark_err) = self.scan_store.mark_failed(scan_id, &e.to_string()).await {
                    warn!(scan_id, error = %mark_err, "Failed to mark scan as failed");
                }
                Err(e)
            }
        }
    }

    async fn run_iterations(&self, scan_id: &str, project_id: &str) -> Result<u32, AppError> {
        let business_summary = self.build_business_summary(project_id).await?;
        let max_iterations = self.config.max_scout_iterations.max(1);

        let mut seen: HashSet<String> = HashSet::new();
        let mut found_names: Vec<String> = Vec::new();
        let mut previous_searches: Vec<String> = Vec::new();
        let mut total: u32 = 0;

        for iteration in 1..=max_iterations {
            let task = Self::iteration_task(
                &business_summary,
                iteration,
                max_iterations,
                &found_names,
                &previous_searches,
            );
            let response = self
                .invoker
                .invoke(
                    AgentRole::EventScout,
                    &InvocationContext {
                        task,
                        project_id: Some(project_id.to_string()),
                        ..Default::default()
                    },
                )
                .await?;

            let payload: ScoutIterationPayload =
                serde_json::from_value(response.payload.clone()).unwrap_or_default();

            let new_events: Vec<DiscoveredEvent> = payload
                .events
                .into_iter()
                .filter(|e| !e.name.is_empty() && seen.insert(e.dedup_key()))
                .collect();

            if !new_events.is_empty() {
                self.scan_store
                    .record_events(scan_id, project_id, &new_events)
                    .await?;
                total += new_events.len() as u32;
                found_names.extend(new_events.iter().map(|e| e.name.clone()));
            }
            self.scan_store.set_iteration(scan_id, iteration).await?;

            if let Some(summary) = payload.iteration_summary.filter(|s| !s.is_empty()) {
                previous_searches.push(summary);
            }
            previous_searches.extend(payload.next_search_ideas.into_iter().filter(|s| !s.is_empty()));

            info!(
                scan_id,
                iteration,
                new_events = new_events.len(),
                continue_research = payload.continue_research,
                "Event scan iteration finished"
            );

            // An empty pass is not terminal; only the scout's own verdict
            // (or the cap) ends the scan.
            if !payload.continue_research {
                break;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AiClient, ChatStream};
    use crate::storage::memory::{
        InMemoryEventScanStore, InMemoryKnowledgeStore, InMemoryProjectStore, InMemoryUsageStore,
    };
    use crate::storage::{EventScanRecord, EventScanStatus};
    use async_trait::async_trait;
    use genai::adapter::AdapterKind;
    use genai::chat::{ChatOptions, ChatRequest, ChatResponse, MessageContent, MetaUsage};
    use genai::ModelIden;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    /// Pops one scripted payload per call and records each request so tests
    /// can assert what the scout was told.
    struct ScriptedScout {
        responses: Mutex<std::collections::VecDeque<String>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedScout {
        fn new(responses: &[Value]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(Value::to_string).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AiClient for ScriptedScout {
        async fn exec_chat(
            &self,
            _model_name: &str,
            request: ChatRequest,
            _options: Option<ChatOptions>,
        ) -> Result<ChatResponse, AppError> {
            self.requests.lock().await.push(format!("{request:?}"));
            let raw = self
                .responses
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| AppError::InternalError("no scripted response left".into()))?;
            Ok(ChatResponse {
                content: Some(MessageContent::Text(raw)),
                reasoning_content: None,
                model_iden: ModelIden::new(AdapterKind::Gemini, "test"),
                usage: MetaUsage::default(),
            })
        }

        async fn stream_chat(
            &self,
            _model_name: &str,
            _request: ChatRequest,
            _options: Option<ChatOptions>,
        ) -> Result<ChatStream, AppError> {
            Err(AppError::InternalError("not streamed in tests".into()))
        }
    }

    async fn scout_over(
        client: Arc<ScriptedScout>,
    ) -> (EventScoutWorkflow, Arc<InMemoryEventScanStore>) {
        let scans = Arc::new(InMemoryEventScanStore::default());
        scans
            .create_scan(EventScanRecord {
                id: "scan-1".into(),
                project_id: "proj-1".into(),
                status: EventScanStatus::Pending,
                iteration_count: 0,
                total_events_found: 0,
                error_message: None,
                started_at: None,
                completed_at: None,
            })
            .await
            .unwrap();
        let config = Arc::new(Config::default());
        let invoker = Arc::new(AgentInvoker::new(
            client,
            Arc::new(InMemoryUsageStore::default()),
            Arc::clone(&config),
        ));
        let workflow = EventScoutWorkflow::new(
            invoker,
            scans.clone(),
            Arc::new(InMemoryProjectStore::default()),
            Arc::new(InMemoryKnowledgeStore::default()),
            config,
        );
        (workflow, scans)
    }

    fn event(name: &str, url: &str) -> Value {
        json!({ "name": name, "source_url": url })
    }

    #[test]
    fn dedup_key_is_case_insensitive() {
        let a = DiscoveredEvent {
            name: "World Honey Day".into(),
            source_url: "https://example.com/honey".into(),
            ..Default::default()
        };
        let b = DiscoveredEvent {
            name: "WORLD HONEY DAY".into(),
            source_url: "HTTPS://EXAMPLE.COM/honey".into(),
            ..Default::default()
        };
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn iteration_task_carries_prior_finds_and_searches() {
        let task = EventScoutWorkflow::iteration_task(
            "Business: Acme",
            2,
            5,
            &["World Honey Day".to_string()],
            &["checked national food observances".to_string()],
        );
        assert!(task.contains("pass 2 of at most 5"));
        assert!(task.contains("World Honey Day"));
        assert!(task.contains("checked national food observances"));

        let first = EventScoutWorkflow::iteration_task("Business: Acme", 1, 5, &[], &[]);
        assert!(first.contains("start broad"));
        assert!(!first.contains("Search angles already covered"));
    }

    #[tokio::test]
    async fn empty_passes_continue_while_the_scout_asks_to() {
        let client = Arc::new(ScriptedScout::new(&[
            json!({
                "events": [event("World Honey Day", "https://example.com/honey")],
                "iteration_summary": "checked food observances",
                "next_search_ideas": ["local farmers market calendars"],
                "continue_research": true
            }),
            // A dry pass must not end the scan while continue_research holds.
            json!({
                "events": [],
                "iteration_summary": "trade shows turned up nothing",
                "continue_research": true
            }),
            json!({
                "events": [event("Beekeeping Expo", "https://example.com/expo")],
                "continue_research": false
            }),
        ]));
        let (workflow, scans) = scout_over(client.clone()).await;

        let total = workflow.run("scan-1", "proj-1").await.unwrap();
        assert_eq!(total, 2);

        let scan = scans.get_scan("scan-1").await.unwrap().unwrap();
        assert_eq!(scan.status, EventScanStatus::Completed);
        assert_eq!(scan.iteration_count, 3);

        // Later passes are seeded with the summaries and ideas of earlier ones.
        let requests = client.requests.lock().await;
        assert!(requests[2].contains("checked food observances"));
        assert!(requests[2].contains("local farmers market calendars"));
        assert!(requests[2].contains("trade shows turned up nothing"));
    }

    #[tokio::test]
    async fn scan_stops_when_the_scout_is_done() {
        let client = Arc::new(ScriptedScout::new(&[json!({
            "events": [event("World Honey Day", "https://example.com/honey")],
            "continue_research": false
        })]));
        let (workflow, scans) = scout_over(client).await;

        let total = workflow.run("scan-1", "proj-1").await.unwrap();
        assert_eq!(total, 1);
        let scan = scans.get_scan("scan-1").await.unwrap().unwrap();
        assert_eq!(scan.iteration_count, 1);
    }
}
