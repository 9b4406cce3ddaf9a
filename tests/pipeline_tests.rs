// End-to-end campaign flows over in-memory stores and a scripted model.
// Responses are keyed off the system prompt, so each agent role can be
// scripted independently and repeated calls pop successive responses.

use async_trait::async_trait;
use campaignops_backend::campaign::CampaignAction;
use campaignops_backend::campaign::state::{CampaignPhase, CampaignStatus, HistoryRole, PostStatus};
use campaignops_backend::config::Config;
use campaignops_backend::errors::AppError;
use campaignops_backend::llm::{AiClient, ChatStream, EmbeddingClient};
use campaignops_backend::state::{AppState, AppStores};
use campaignops_backend::storage::memory::{
    InMemoryCampaignStateStore, InMemoryEventScanStore, InMemoryKnowledgeStore,
    InMemoryProjectStore, InMemoryRunStore, InMemoryUsageStore, InMemoryVectorStore,
};
use campaignops_backend::storage::ProjectRecord;
use genai::adapter::AdapterKind;
use genai::chat::{ChatOptions, ChatRequest, ChatResponse, MessageContent, MetaUsage};
use genai::ModelIden;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct ScriptedClient {
    scripts: Mutex<HashMap<&'static str, VecDeque<String>>>,
    call_counts: Mutex<HashMap<&'static str, u32>>,
}

// Distinctive phrases from each role's system prompt.
const ROLE_KEYS: &[&str] = &[
    "Elena",
    "research specialist",
    "audience analyst",
    "copywriter",
    "the content manager",
    "lead content strategist",
    "integration manager",
    "campaign manager",
    "growth manager",
    "SEO strategist",
    "social distribution manager",
    "performance analyst",
    "Chief Strategy Officer",
    "Chief Marketing Officer",
    "Chief Risk & Compliance Officer",
    "event scout",
];

impl ScriptedClient {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            call_counts: Mutex::new(HashMap::new()),
        }
    }

    async fn script(&self, role_key: &'static str, response: serde_json::Value) {
        self.scripts
            .lock()
            .await
            .entry(role_key)
            .or_default()
            .push_back(response.to_string());
    }

    async fn calls(&self, role_key: &str) -> u32 {
        self.call_counts
            .lock()
            .await
            .get(role_key)
            .copied()
            .unwrap_or(0)
    }

    fn role_key(system: &str) -> &'static str {
        ROLE_KEYS
            .iter()
            .find(|key| system.contains(**key))
            .copied()
            .unwrap_or("unknown")
    }
}

#[async_trait]
impl AiClient for ScriptedClient {
    async fn exec_chat(
        &self,
        _model_name: &str,
        request: ChatRequest,
        _options: Option<ChatOptions>,
    ) -> Result<ChatResponse, AppError> {
        let system = request.system.clone().unwrap_or_default();
        let key = Self::role_key(&system);
        *self.call_counts.lock().await.entry(key).or_insert(0) += 1;

        let mut scripts = self.scripts.lock().await;
        let queue = scripts
            .get_mut(key)
            .ok_or_else(|| AppError::InternalError(format!("No script for role key {key}")))?;
        // The last scripted response repeats so loops can re-invoke a role.
        let raw = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| AppError::InternalError(format!("Empty script for {key}")))?
        };

        Ok(ChatResponse {
            content: Some(MessageContent::Text(raw)),
            reasoning_content: None,
            model_iden: ModelIden::new(AdapterKind::Gemini, "scripted"),
            usage: MetaUsage {
                prompt_tokens: Some(10),
                completion_tokens: Some(20),
                total_tokens: Some(30),
                ..Default::default()
            },
        })
    }

    async fn stream_chat(
        &self,
        _model_name: &str,
        _request: ChatRequest,
        _options: Option<ChatOptions>,
    ) -> Result<ChatStream, AppError> {
        Err(AppError::InternalError("streaming not scripted".into()))
    }
}

struct ZeroEmbeddingClient;

#[async_trait]
impl EmbeddingClient for ZeroEmbeddingClient {
    async fn embed_content(&self, _text: &str, _task_type: &str) -> Result<Vec<f32>, AppError> {
        Ok(vec![0.1, 0.2, 0.3])
    }
}

struct Harness {
    state: AppState,
    client: Arc<ScriptedClient>,
    projects: Arc<InMemoryProjectStore>,
    runs: Arc<InMemoryRunStore>,
}

async fn harness() -> Harness {
    let client = Arc::new(ScriptedClient::new());
    let projects = Arc::new(InMemoryProjectStore::default());
    let runs = Arc::new(InMemoryRunStore::default());

    projects
        .add_project(ProjectRecord {
            id: "proj-1".into(),
            name: "Acme Honey".into(),
            description: Some("Small-batch honey".into()),
            industry: Some("food".into()),
            website_url: Some("https://acme.example".into()),
            intake: None,
        })
        .await;
    projects.link_campaign("camp-1", "proj-1").await;

    let stores = AppStores {
        campaign_states: Arc::new(InMemoryCampaignStateStore::default()),
        projects: projects.clone(),
        runs: runs.clone(),
        usage: Arc::new(InMemoryUsageStore::default()),
        knowledge: Arc::new(InMemoryKnowledgeStore::default()),
        event_scans: Arc::new(InMemoryEventScanStore::default()),
    };

    let state = AppState::new(
        Arc::new(Config::default()),
        client.clone(),
        Arc::new(ZeroEmbeddingClient),
        Arc::new(InMemoryVectorStore::default()),
        stores,
    );
    Harness {
        state,
        client,
        projects,
        runs,
    }
}

async fn wait_for_phase(state: &AppState, campaign_id: &str, phase: CampaignPhase) {
    let handle = state.registry.get_or_create(campaign_id).await.unwrap();
    for _ in 0..500 {
        if handle.with_state(|s| s.phase).await == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let actual = handle.with_state(|s| s.phase).await;
    panic!("campaign never reached {phase:?}, stuck at {actual:?}");
}

async fn script_happy_production(client: &ScriptedClient) {
    client
        .script(
            "research specialist",
            json!({ "summary": "Honey is trending", "findings": ["local sourcing wins"], "keywords": ["raw honey"] }),
        )
        .await;
    client
        .script(
            "audience analyst",
            json!({ "audience_summary": "Home cooks", "pain_points": ["bland supermarket honey"], "tone_recommendations": ["warm"] }),
        )
        .await;
    client
        .script(
            "lead content strategist",
            json!({ "strategy_brief": "Lead with provenance", "content_pillars": ["origin"] }),
        )
        .await;
    client
        .script(
            "the content manager",
            json!({ "approved": true, "ready_for_exec_review": true, "feedback": "ship it" }),
        )
        .await;
}

#[tokio::test]
async fn single_post_campaign_runs_to_client_approval() {
    let h = harness().await;
    h.client
        .script(
            "Elena",
            json!({ "intent": "new_mission", "topic": "raw honey", "quantity": 1, "platform": "x", "reply": "On it!" }),
        )
        .await;
    script_happy_production(&h.client).await;
    h.client
        .script(
            "copywriter",
            json!({ "posts": [{ "content": "Straight from the hive: [Website URL]", "notes": "provenance angle" }] }),
        )
        .await;
    for exec in ["Chief Strategy Officer", "Chief Marketing Officer", "Chief Risk & Compliance Officer"] {
        h.client
            .script(exec, json!({ "approved": true, "feedback": "approved" }))
            .await;
    }

    let reply = h.state.chat("camp-1", "Write 1 post about raw honey.").await.unwrap();
    assert_eq!(reply, "On it!");
    wait_for_phase(&h.state, "camp-1", CampaignPhase::AwaitingUserFeedback).await;

    // Ad hoc missions skip the strategy-brief stage; it belongs to the
    // scheduled daily run.
    assert_eq!(h.client.calls("lead content strategist").await, 0);

    let handle = h.state.registry.get_or_create("camp-1").await.unwrap();
    let posts = handle.with_state(|s| s.artifacts.posts.clone()).await;
    assert_eq!(posts.len(), 1);
    assert!(posts[0].content.chars().count() <= 280);
    // Placeholder replaced with the project URL.
    assert!(posts[0].content.contains("https://acme.example"));
    assert!(!posts[0].content.contains("[Website URL]"));

    // Posts were projected for approval with their hashes.
    {
        let stored = h.projects.posts.lock().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, PostStatus::InternalApproved);
        assert_eq!(stored[0].content_hash.len(), 64);
        let statuses = h.projects.campaign_statuses.lock().await;
        assert_eq!(statuses.get("camp-1"), Some(&CampaignStatus::ReadyForApproval));
    }

    let reply = h
        .state
        .campaign_action("camp-1", CampaignAction::Approve)
        .await
        .unwrap();
    assert!(reply.contains("Approved"));
    assert_eq!(handle.with_state(|s| s.phase).await, CampaignPhase::Approved);
    {
        let statuses = h.projects.campaign_statuses.lock().await;
        assert_eq!(statuses.get("camp-1"), Some(&CampaignStatus::ClientApproved));
        let stored = h.projects.posts.lock().await;
        assert_eq!(stored[0].status, PostStatus::ClientApproved);
    }

    h.state
        .campaign_action("camp-1", CampaignAction::Publish)
        .await
        .unwrap();
    let statuses = h.projects.campaign_statuses.lock().await;
    assert_eq!(statuses.get("camp-1"), Some(&CampaignStatus::Completed));
    let stored = h.projects.posts.lock().await;
    assert_eq!(stored[0].status, PostStatus::Published);
}

#[tokio::test]
async fn exec_exhaustion_surfaces_feedback_to_the_client() {
    let h = harness().await;
    h.client
        .script(
            "Elena",
            json!({ "intent": "new_mission", "topic": "honey", "quantity": 2, "platform": "x", "reply": "Working on it." }),
        )
        .await;
    script_happy_production(&h.client).await;
    h.client
        .script(
            "copywriter",
            json!({ "posts": [
                { "content": "Post one about honey", "notes": "" },
                { "content": "Post two about honey", "notes": "" },
            ]}),
        )
        .await;
    h.client
        .script("Chief Strategy Officer", json!({ "approved": true, "feedback": "fine" }))
        .await;
    h.client
        .script("Chief Marketing Officer", json!({ "approved": true, "feedback": "fine" }))
        .await;
    h.client
        .script(
            "Chief Risk & Compliance Officer",
            json!({ "approved": false, "feedback": "unverifiable health claim" }),
        )
        .await;

    h.state.chat("camp-1", "Write 2 posts about honey.").await.unwrap();
    wait_for_phase(&h.state, "camp-1", CampaignPhase::AwaitingUserFeedback).await;

    // Five full executive passes, none unanimous.
    assert_eq!(h.client.calls("Chief Risk & Compliance Officer").await, 5);
    // Each rejection except the last triggered another draft: 1 + 4.
    assert_eq!(h.client.calls("copywriter").await, 5);

    let handle = h.state.registry.get_or_create("camp-1").await.unwrap();
    let last_assistant = handle
        .with_state(|s| {
            s.history
                .iter()
                .rev()
                .find(|e| e.role == HistoryRole::Assistant)
                .map(|e| e.content.clone())
        })
        .await
        .unwrap();
    assert!(last_assistant.contains("CRCO: unverifiable health claim"));

    // The last draft is still projected, so the client can approve it
    // despite the executives' reservations.
    {
        let posts = h.projects.posts.lock().await;
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|p| p.status == PostStatus::InternalApproved));
    }
    assert_eq!(
        h.projects.campaign_statuses.lock().await.get("camp-1"),
        Some(&CampaignStatus::ReadyForApproval)
    );
}

#[tokio::test]
async fn revision_feedback_skips_research() {
    let h = harness().await;
    h.client
        .script(
            "Elena",
            json!({ "intent": "new_mission", "topic": "honey", "quantity": 1, "platform": "x", "reply": "On it." }),
        )
        .await;
    script_happy_production(&h.client).await;
    h.client
        .script("copywriter", json!({ "posts": [{ "content": "Honey v1", "notes": "" }] }))
        .await;
    for exec in ["Chief Strategy Officer", "Chief Marketing Officer", "Chief Risk & Compliance Officer"] {
        h.client.script(exec, json!({ "approved": true, "feedback": "ok" })).await;
    }

    h.state.chat("camp-1", "Write 1 post about honey.").await.unwrap();
    wait_for_phase(&h.state, "camp-1", CampaignPhase::AwaitingUserFeedback).await;
    assert_eq!(h.client.calls("research specialist").await, 1);

    // Plain feedback, same topic: a revision pass with no new research.
    h.state
        .chat("camp-1", "Punchier please, still about honey.")
        .await
        .unwrap();
    wait_for_phase(&h.state, "camp-1", CampaignPhase::AwaitingUserFeedback).await;

    assert_eq!(h.client.calls("research specialist").await, 1);
    assert!(h.client.calls("copywriter").await >= 2);
}

#[tokio::test]
async fn daily_strategy_run_skips_triage_and_produces_a_brief() {
    let h = harness().await;
    script_happy_production(&h.client).await;
    h.client
        .script(
            "copywriter",
            json!({ "posts": [
                { "content": "Morning honey rituals", "notes": "" },
                { "content": "Why provenance matters", "notes": "" },
                { "content": "Meet our beekeepers", "notes": "" },
            ]}),
        )
        .await;
    for exec in ["Chief Strategy Officer", "Chief Marketing Officer", "Chief Risk & Compliance Officer"] {
        h.client.script(exec, json!({ "approved": true, "feedback": "ok" })).await;
    }

    let reply = h
        .state
        .run_daily_strategy("camp-1", "Daily strategy generation")
        .await
        .unwrap();
    assert!(reply.contains("daily strategy"));
    wait_for_phase(&h.state, "camp-1", CampaignPhase::AwaitingUserFeedback).await;

    // No planner triage, one research pass, a persisted strategy brief.
    assert_eq!(h.client.calls("Elena").await, 0);
    assert_eq!(h.client.calls("research specialist").await, 1);
    assert_eq!(h.client.calls("lead content strategist").await, 1);

    let handle = h.state.registry.get_or_create("camp-1").await.unwrap();
    let (brief, posts) = handle
        .with_state(|s| (s.artifacts.strategy_brief.clone(), s.artifacts.posts.len()))
        .await;
    assert!(brief.is_some());
    assert_eq!(posts, 3);
}

#[tokio::test]
async fn general_requests_run_a_planned_workflow() {
    let h = harness().await;
    h.client
        .script(
            "Elena",
            json!({ "intent": "other", "topic": "", "quantity": 3, "platform": "x", "reply": "Let me pull the team in." }),
        )
        .await;
    h.client
        .script(
            "integration manager",
            json!({ "steps": [
                { "agent": "seo_strategist", "task": "keyword review" },
                { "agent": "performance_analyst", "tasks": ["forecast reach", "pick metrics"] },
            ]}),
        )
        .await;
    h.client
        .script(
            "integration manager",
            json!({ "summary": "SEO and measurement plan ready.", "recommendations": ["ship it"] }),
        )
        .await;
    h.client
        .script("SEO strategist", json!({ "keywords": ["honey"], "suggestions": [] }))
        .await;
    h.client
        .script(
            "performance analyst",
            json!({ "expected_performance": "solid", "metrics_to_track": ["ctr"] }),
        )
        .await;

    let reply = h
        .state
        .chat("camp-1", "Can you audit our content setup?")
        .await
        .unwrap();
    assert_eq!(reply, "Let me pull the team in.");
    wait_for_phase(&h.state, "camp-1", CampaignPhase::AwaitingUserFeedback).await;

    // One SEO job, two fanned-out analyst jobs, one synthesis step.
    let steps = h.runs.steps.lock().await;
    let names: Vec<&str> = steps.iter().map(|s| s.step_name.as_str()).collect();
    assert!(names.contains(&"exec_seo_strategist_1"));
    assert!(names.contains(&"exec_performance_analyst_2"));
    assert!(names.contains(&"exec_performance_analyst_3"));
    assert!(names.contains(&"integration_manager_final"));

    let handle = h.state.registry.get_or_create("camp-1").await.unwrap();
    let last_assistant = handle
        .with_state(|s| {
            s.history
                .iter()
                .rev()
                .find(|e| e.role == HistoryRole::Assistant)
                .map(|e| e.content.clone())
        })
        .await
        .unwrap();
    assert_eq!(last_assistant, "SEO and measurement plan ready.");
}
