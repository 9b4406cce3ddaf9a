// src/campaign/registry.rs
//
// One orchestrator per campaign id, behind a mutex that serializes every
// touch of that campaign. Handles are created on demand and rehydrated from
// the durable state store, so a process restart resumes campaigns where
// they left off.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::campaign::orchestrator::{
    CampaignAction, CampaignDeps, CampaignOrchestrator, ChatOutcome, PipelinePlan,
};
use crate::campaign::state::CampaignState;
use crate::errors::AppError;
use crate::workflow::WorkflowCallback;

#[derive(Clone)]
pub struct CampaignHandle {
    inner: Arc<Mutex<CampaignOrchestrator>>,
}

impl CampaignHandle {
    /// Handles a chat turn. When the turn starts a pipeline, the run is
    /// spawned onto the runtime and the reply returns immediately; the
    /// spawned task holds the campaign mutex for the whole run.
    pub async fn chat(&self, message: &str) -> Result<ChatOutcome, AppError> {
        let outcome = {
            let mut orchestrator = self.inner.lock().await;
            orchestrator.handle_chat(message).await?
        };
        if let ChatOutcome::PipelineStarted { plan, .. } = &outcome {
            self.spawn_pipeline(plan.clone());
        }
        Ok(outcome)
    }

    pub async fn action(&self, action: CampaignAction) -> Result<ChatOutcome, AppError> {
        let outcome = {
            let mut orchestrator = self.inner.lock().await;
            orchestrator.handle_action(action).await?
        };
        if let ChatOutcome::PipelineStarted { plan, .. } = &outcome {
            self.spawn_pipeline(plan.clone());
        }
        Ok(outcome)
    }

    /// Kicks off the scheduled daily strategy pipeline for this campaign.
    pub async fn daily_strategy(&self, instruction: &str) -> Result<ChatOutcome, AppError> {
        let outcome = {
            let mut orchestrator = self.inner.lock().await;
            orchestrator.start_daily_strategy(instruction).await?
        };
        if let ChatOutcome::PipelineStarted { plan, .. } = &outcome {
            self.spawn_pipeline(plan.clone());
        }
        Ok(outcome)
    }

    pub async fn workflow_callback(&self, callback: WorkflowCallback) -> Result<(), AppError> {
        let mut orchestrator = self.inner.lock().await;
        orchestrator.on_workflow_callback(callback).await
    }

    pub async fn with_state<R>(&self, f: impl FnOnce(&CampaignState) -> R) -> R {
        let orchestrator = self.inner.lock().await;
        f(orchestrator.state())
    }

    fn spawn_pipeline(&self, plan: PipelinePlan) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut orchestrator = inner.lock().await;
            if let Err(e) = orchestrator.run_content_pipeline(plan).await {
                error!(error = %e, "Spawned content pipeline failed");
            }
        });
    }
}

pub struct CampaignRegistry {
    deps: Arc<CampaignDeps>,
    handles: Mutex<HashMap<String, CampaignHandle>>,
}

impl CampaignRegistry {
    pub fn new(deps: Arc<CampaignDeps>) -> Self {
        Self {
            deps,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// The handle for a campaign, rehydrating durable state or creating a
    /// fresh campaign on first contact.
    pub async fn get_or_create(&self, campaign_id: &str) -> Result<CampaignHandle, AppError> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(campaign_id) {
            return Ok(handle.clone());
        }

        let mut state = match self.deps.state_store.load(campaign_id).await? {
            Some(state) => {
                info!(campaign_id, "Rehydrated campaign state");
                state
            }
            None => CampaignState::new(campaign_id, self.deps.config.max_revisions),
        };
        if state.project_id.is_none() {
            state.project_id = self
                .deps
                .project_store
                .project_for_campaign(campaign_id)
                .await?;
        }

        let handle = CampaignHandle {
            inner: Arc::new(Mutex::new(CampaignOrchestrator::new(
                state,
                Arc::clone(&self.deps),
            ))),
        };
        handles.insert(campaign_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Routes a workflow callback to its campaign, if it named one.
    pub async fn deliver_callback(&self, callback: WorkflowCallback) -> Result<(), AppError> {
        let campaign_id = match &callback {
            WorkflowCallback::WorkComplete { campaign_id, .. }
            | WorkflowCallback::ExecReviewComplete { campaign_id, .. } => campaign_id.clone(),
        };
        let Some(campaign_id) = campaign_id else {
            return Ok(());
        };
        let handle = self.get_or_create(&campaign_id).await?;
        handle.workflow_callback(callback).await
    }
}
