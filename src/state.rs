// src/state.rs
//
// Process-wide wiring: one AppState owns the shared collaborators and is
// cloned into every task that needs them. The workflow callback channel is
// drained by a dispatcher task that routes terminal workflow notifications
// back to their campaigns.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agents::AgentInvoker;
use crate::campaign::{
    CampaignAction, CampaignDeps, CampaignRegistry, ChatOutcome, RegexTopicChangeDetector,
};
use crate::config::Config;
use crate::errors::AppError;
use crate::llm::{AiClient, EmbeddingClient};
use crate::services::context_router::ContextRouter;
use crate::services::knowledge_indexer::KnowledgeIndexer;
use crate::services::run_log::RunLog;
use crate::storage::{
    CampaignStateStore, EventScanRecord, EventScanStatus, EventScanStore, KnowledgeStore,
    ProjectStore, RunStore, UsageStore,
};
use crate::vector_db::VectorStore;
use crate::workflow::event_scout::EventScoutWorkflow;
use crate::workflow::{TaskRunner, WorkflowCallback};

const WORKFLOW_CALLBACK_CAPACITY: usize = 32;

/// The persistence seams AppState is built over.
#[derive(Clone)]
pub struct AppStores {
    pub campaign_states: Arc<dyn CampaignStateStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub runs: Arc<dyn RunStore>,
    pub usage: Arc<dyn UsageStore>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub event_scans: Arc<dyn EventScanStore>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: AppStores,
    pub invoker: Arc<AgentInvoker>,
    pub router: Arc<ContextRouter>,
    pub indexer: Arc<KnowledgeIndexer>,
    pub registry: Arc<CampaignRegistry>,
    pub task_runner: Arc<TaskRunner>,
    pub event_scout: Arc<EventScoutWorkflow>,
}

impl AppState {
    /// Wires the full engine and starts the workflow callback dispatcher.
    pub fn new(
        config: Arc<Config>,
        ai_client: Arc<dyn AiClient>,
        embedding_client: Arc<dyn EmbeddingClient>,
        vector_store: Arc<dyn VectorStore>,
        stores: AppStores,
    ) -> Self {
        let invoker = Arc::new(AgentInvoker::new(
            Arc::clone(&ai_client),
            Arc::clone(&stores.usage),
            Arc::clone(&config),
        ));
        let router = Arc::new(ContextRouter::new(
            Arc::clone(&embedding_client),
            Arc::clone(&vector_store),
            Arc::clone(&stores.knowledge),
            Arc::clone(&stores.usage),
            Arc::clone(&config),
        ));
        let indexer = Arc::new(KnowledgeIndexer::new(
            embedding_client,
            vector_store,
            Arc::clone(&stores.knowledge),
            Arc::clone(&stores.usage),
            Arc::clone(&config),
        ));
        let run_log = RunLog::new(Arc::clone(&stores.runs));

        let registry = Arc::new(CampaignRegistry::new(Arc::new(CampaignDeps {
            invoker: Arc::clone(&invoker),
            router: Arc::clone(&router),
            state_store: Arc::clone(&stores.campaign_states),
            project_store: Arc::clone(&stores.projects),
            run_log: run_log.clone(),
            config: Arc::clone(&config),
            topic_detector: Arc::new(RegexTopicChangeDetector),
        })));

        let (callback_tx, callback_rx) =
            mpsc::channel::<WorkflowCallback>(WORKFLOW_CALLBACK_CAPACITY);
        let task_runner = Arc::new(TaskRunner::new(
            Arc::clone(&invoker),
            run_log,
            Arc::clone(&config),
            callback_tx,
        ));
        Self::spawn_callback_dispatcher(Arc::clone(&registry), callback_rx);

        let event_scout = Arc::new(EventScoutWorkflow::new(
            Arc::clone(&invoker),
            Arc::clone(&stores.event_scans),
            Arc::clone(&stores.projects),
            Arc::clone(&stores.knowledge),
            Arc::clone(&config),
        ));

        Self {
            config,
            stores,
            invoker,
            router,
            indexer,
            registry,
            task_runner,
            event_scout,
        }
    }

    fn spawn_callback_dispatcher(
        registry: Arc<CampaignRegistry>,
        mut callback_rx: mpsc::Receiver<WorkflowCallback>,
    ) {
        tokio::spawn(async move {
            while let Some(callback) = callback_rx.recv().await {
                if let Err(e) = registry.deliver_callback(callback).await {
                    error!(error = %e, "Failed to deliver workflow callback");
                }
            }
            info!("Workflow callback dispatcher stopped");
        });
    }

    /// Chat with a campaign. Content pipelines are spawned by the campaign
    /// handle; planned workflows are launched here on the shared runner.
    pub async fn chat(&self, campaign_id: &str, message: &str) -> Result<String, AppError> {
        let handle = self.registry.get_or_create(campaign_id).await?;
        match handle.chat(message).await? {
            ChatOutcome::Reply(reply) | ChatOutcome::PipelineStarted { reply, .. } => Ok(reply),
            ChatOutcome::WorkflowPlanned { reply, params } => {
                let runner = Arc::clone(&self.task_runner);
                tokio::spawn(async move {
                    if let Err(e) = runner.run(params).await {
                        error!(error = %e, "Spawned workflow failed");
                    }
                });
                Ok(reply)
            }
        }
    }

    /// Runs the scheduled daily strategy pipeline for a campaign.
    pub async fn run_daily_strategy(
        &self,
        campaign_id: &str,
        instruction: &str,
    ) -> Result<String, AppError> {
        let handle = self.registry.get_or_create(campaign_id).await?;
        match handle.daily_strategy(instruction).await? {
            ChatOutcome::Reply(reply)
            | ChatOutcome::PipelineStarted { reply, .. }
            | ChatOutcome::WorkflowPlanned { reply, .. } => Ok(reply),
        }
    }

    pub async fn campaign_action(
        &self,
        campaign_id: &str,
        action: CampaignAction,
    ) -> Result<String, AppError> {
        let handle = self.registry.get_or_create(campaign_id).await?;
        match handle.action(action).await? {
            ChatOutcome::Reply(reply) | ChatOutcome::PipelineStarted { reply, .. } => Ok(reply),
            ChatOutcome::WorkflowPlanned { reply, .. } => Ok(reply),
        }
    }

    /// Normalizes a project's intake into knowledge and (re)indexes it.
    /// Returns whether indexing succeeded; knowledge persistence failures
    /// are errors, indexing failures are not.
    pub async fn sync_project_knowledge(&self, project_id: &str) -> Result<bool, AppError> {
        let project = self
            .stores
            .projects
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {project_id} not found")))?;
        let intake = project
            .intake
            .ok_or_else(|| AppError::BadRequest("Project has no intake data".to_string()))?;
        let (_, indexed) = self
            .indexer
            .sync_from_intake(project_id, &intake, None, true)
            .await?;
        Ok(indexed)
    }

    pub async fn reindex_project(&self, project_id: &str) -> Result<(), AppError> {
        self.indexer.reindex_project(project_id).await
    }

    /// Starts a background event scan and returns its id immediately.
    pub async fn start_event_scan(&self, project_id: &str) -> Result<String, AppError> {
        let scan_id = Uuid::new_v4().to_string();
        self.stores
            .event_scans
            .create_scan(EventScanRecord {
                id: scan_id.clone(),
                project_id: project_id.to_string(),
                status: EventScanStatus::Pending,
                iteration_count: 0,
                total_events_found: 0,
                error_message: None,
                started_at: None,
                completed_at: None,
            })
            .await?;

        let scout = Arc::clone(&self.event_scout);
        let spawn_scan_id = scan_id.clone();
        let spawn_project_id = project_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = scout.run(&spawn_scan_id, &spawn_project_id).await {
                warn!(scan_id = %spawn_scan_id, error = %e, "Event scan failed");
            }
        });
        Ok(scan_id)
    }
}
