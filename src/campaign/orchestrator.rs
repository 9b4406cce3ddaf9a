// src/campaign/orchestrator.rs
//
// The single-writer campaign engine. One orchestrator instance owns one
// campaign's state; all mutation goes through its methods while the caller
// holds the campaign's mutex. State is saved before any externally
// observable reply, so an evicted instance rehydrates mid-campaign without
// losing progress.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::agents::{AgentInvoker, AgentRole, InvocationContext};
use crate::campaign::state::{
    content_hash, CampaignPhase, CampaignState, CampaignStatus, HistoryRole, ParsedRequest, Post,
    PostStatus,
};
use crate::config::Config;
use crate::errors::AppError;
use crate::services::context_router::{ContextBundle, ContextRouter, ContextType};
use crate::services::run_log::RunLog;
use crate::storage::{AuditEntry, CampaignStateStore, ProjectStore, RunStatus, StoredPost};
use crate::workflow::{WorkflowCallback, WorkflowKind, WorkflowParams};

const CONTEXT_ROUTE_ATTEMPTS: u32 = 3;
const CONTEXT_ROUTE_DELAY_MS: u64 = 250;
const POST_CHAR_LIMIT: usize = 280;

/// Detects when revision feedback is really a request for content about
/// something else, which forces a fresh research pass instead of a rewrite.
pub trait TopicChangeDetector: Send + Sync {
    fn detect(&self, feedback: &str, current_topic: &str) -> Option<String>;
}

/// Default detector: "... about <topic>." phrasing, compared
/// case-insensitively against the current topic.
pub struct RegexTopicChangeDetector;

impl TopicChangeDetector for RegexTopicChangeDetector {
    fn detect(&self, feedback: &str, current_topic: &str) -> Option<String> {
        let candidate = extract_topic(feedback)?;
        if candidate.to_lowercase() == current_topic.to_lowercase() {
            return None;
        }
        Some(candidate)
    }
}

/// Pulls "about <topic>" out of an instruction or feedback message.
pub fn extract_topic(text: &str) -> Option<String> {
    static TOPIC: OnceLock<Regex> = OnceLock::new();
    let re = TOPIC.get_or_init(|| Regex::new(r"(?i)about\s+(.+?)(\.|$)").unwrap());
    let topic = re.captures(text)?.get(1)?.as_str().trim().to_string();
    (!topic.is_empty()).then_some(topic)
}

/// Explicit post counts in the instruction. "a couple" and "a few" count as
/// phrasing, not omission.
pub fn parse_quantity(text: &str) -> Option<u32> {
    static QUANTITY: OnceLock<Regex> = OnceLock::new();
    let re = QUANTITY
        .get_or_init(|| Regex::new(r"(?i)(\d+)\s*(?:posts?|tweets?|pieces?)").unwrap());
    if let Some(captures) = re.captures(text) {
        if let Ok(n) = captures[1].parse::<u32>() {
            return Some(n);
        }
    }
    let lower = text.to_lowercase();
    if lower.contains("a couple") {
        return Some(2);
    }
    if lower.contains("a few") {
        return Some(3);
    }
    None
}

fn replace_url_placeholders(content: &str, website_url: Option<&str>) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER
        .get_or_init(|| Regex::new(r"(?i)\[(website url|website|url|link)\]").unwrap());
    match website_url {
        Some(url) => re.replace_all(content, url).into_owned(),
        None => re.replace_all(content, "").trim().to_string(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Deterministic post-generation enforcement. The writer is asked for the
/// right shape, but count, length, and link presence are guaranteed here,
/// not trusted to the model.
pub fn enforce_posts(
    payload: &Value,
    request: &ParsedRequest,
    website_url: Option<&str>,
) -> Vec<Post> {
    let raw_posts = payload
        .get("posts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let quantity = request.quantity.max(1) as usize;
    let mut posts = Vec::new();
    for (i, raw) in raw_posts.iter().take(quantity).enumerate() {
        let content = raw
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let notes = raw
            .get("notes")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut content = replace_url_placeholders(content, website_url);

        if quantity == 1 {
            let has_link = content.contains("http://") || content.contains("https://");
            if let Some(url) = website_url.filter(|_| !has_link) {
                let appended = format!("{content} {url}");
                if appended.chars().count() <= POST_CHAR_LIMIT {
                    content = appended;
                } else {
                    let url_suffix = format!(" {url}");
                    let budget = POST_CHAR_LIMIT
                        .saturating_sub(url_suffix.chars().count())
                        .saturating_sub(3);
                    content = format!("{}...{url_suffix}", truncate_chars(&content, budget));
                }
            }
            if content.chars().count() > POST_CHAR_LIMIT {
                content = format!("{}...", truncate_chars(&content, POST_CHAR_LIMIT - 3));
            }
        }

        posts.push(Post {
            day: 1,
            sequence: (i + 1) as u32,
            content,
            notes,
        });
    }
    posts
}

/// What a chat turn resolved to. Pipelines and workflows run outside the
/// chat call so the reply returns immediately.
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    Reply(String),
    PipelineStarted {
        reply: String,
        plan: PipelinePlan,
    },
    WorkflowPlanned {
        reply: String,
        params: WorkflowParams,
    },
}

#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub include_research: bool,
    /// Strategy-brief synthesis, run only by the scheduled daily pipeline.
    pub include_strategy: bool,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CampaignAction {
    Approve,
    Reject { feedback: String },
    Publish,
}

/// Shared collaborators, one set per process.
pub struct CampaignDeps {
    pub invoker: Arc<AgentInvoker>,
    pub router: Arc<ContextRouter>,
    pub state_store: Arc<dyn CampaignStateStore>,
    pub project_store: Arc<dyn ProjectStore>,
    pub run_log: RunLog,
    pub config: Arc<Config>,
    pub topic_detector: Arc<dyn TopicChangeDetector>,
}

pub struct CampaignOrchestrator {
    state: CampaignState,
    deps: Arc<CampaignDeps>,
    steps_this_run: u32,
}

impl CampaignOrchestrator {
    pub fn new(state: CampaignState, deps: Arc<CampaignDeps>) -> Self {
        Self {
            state,
            deps,
            steps_this_run: 0,
        }
    }

    pub fn state(&self) -> &CampaignState {
        &self.state
    }

    async fn save(&mut self) -> Result<(), AppError> {
        self.state.last_updated = chrono::Utc::now().timestamp_millis();
        self.deps.state_store.save(&self.state).await
    }

    fn is_pipeline_busy(&self) -> bool {
        matches!(
            self.state.phase,
            CampaignPhase::Planning
                | CampaignPhase::Researching
                | CampaignPhase::Writing
                | CampaignPhase::InternalReview
                | CampaignPhase::ExecReview
                | CampaignPhase::Revising
        )
    }

    async fn set_phase(&mut self, phase: CampaignPhase) -> Result<(), AppError> {
        info!(
            campaign_id = %self.state.campaign_id,
            from = ?self.state.phase,
            to = ?phase,
            "Campaign phase transition"
        );
        self.state.phase = phase;
        self.save().await
    }

    async fn audit(&self, action: &str, entity_type: &str) {
        let Some(project_id) = &self.state.project_id else {
            return;
        };
        let entry = AuditEntry {
            project_id: project_id.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            actor: "campaign_engine".to_string(),
        };
        if let Err(e) = self.deps.project_store.append_audit(entry).await {
            warn!(campaign_id = %self.state.campaign_id, error = %e, "Audit write failed");
        }
    }

    /// Records one agent step everywhere it is observable: trace history,
    /// audit log, and the run journal.
    async fn log_step(&mut self, agent: AgentRole, input: Value, output: &Value) {
        self.steps_this_run += 1;
        self.state.push_history(
            HistoryRole::Trace,
            json!({ "agent": agent.slug(), "output": output }).to_string(),
        );
        self.audit(&format!("{}_step", agent.slug()), "campaign").await;
        if let Some(run_id) = self.state.current_run_id.clone() {
            let step_name = format!("{}_step_{}", agent.slug(), self.steps_this_run);
            if let Err(e) = self
                .deps
                .run_log
                .record_step(&run_id, agent.slug(), &step_name, input, output.clone())
                .await
            {
                warn!(run_id, error = %e, "Failed to journal pipeline step");
            }
        }
    }

    /// Context routing with a short linear retry. Retrieval is an enrichment
    /// step; after the retries it degrades to no context rather than failing
    /// the pipeline.
    async fn route_context_with_retry(
        &self,
        task: &str,
        requested: &[ContextType],
    ) -> Option<ContextBundle> {
        let project_id = self.state.project_id.as_deref()?;
        for attempt in 1..=CONTEXT_ROUTE_ATTEMPTS {
            match self.deps.router.route(project_id, task, requested, None).await {
                Ok(bundle) => return Some(bundle),
                Err(e) => {
                    warn!(
                        campaign_id = %self.state.campaign_id,
                        attempt,
                        error = %e,
                        "Context routing failed"
                    );
                    if attempt < CONTEXT_ROUTE_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(
                            CONTEXT_ROUTE_DELAY_MS * attempt as u64,
                        ))
                        .await;
                    }
                }
            }
        }
        None
    }

    async fn invoke_with_context(
        &mut self,
        agent: AgentRole,
        task: String,
        requested: &[ContextType],
    ) -> Result<Value, AppError> {
        let bundle = self.route_context_with_retry(&task, requested).await;
        let context = bundle.as_ref().map(ContextBundle::as_context_block);
        let response = self
            .deps
            .invoker
            .invoke(
                agent,
                &InvocationContext {
                    task: task.clone(),
                    context: context.filter(|c| !c.is_empty()),
                    original_instruction: Some(self.state.instruction.clone()),
                    project_id: self.state.project_id.clone(),
                    run_id: self.state.current_run_id.clone(),
                    ..Default::default()
                },
            )
            .await?;
        self.log_step(agent, json!({ "task": task }), &response.payload)
            .await;
        Ok(response.payload)
    }

    /// Entry point for a user chat message.
    #[instrument(skip(self, message), fields(campaign_id = %self.state.campaign_id))]
    pub async fn handle_chat(&mut self, message: &str) -> Result<ChatOutcome, AppError> {
        self.state.push_history(HistoryRole::User, message);

        if self.is_pipeline_busy() {
            let reply =
                "The team is still working on your campaign. I'll share the drafts as soon as they're ready.".to_string();
            self.state.push_history(HistoryRole::Assistant, reply.clone());
            self.save().await?;
            return Ok(ChatOutcome::Reply(reply));
        }

        if self.state.phase == CampaignPhase::AwaitingUserFeedback {
            return self.handle_feedback(message).await;
        }

        self.handle_new_instruction(message).await
    }

    /// Entry point for the scheduled daily strategy run. Skips planner
    /// triage and drives the full research/strategy/writing/review pipeline.
    #[instrument(skip(self, instruction), fields(campaign_id = %self.state.campaign_id))]
    pub async fn start_daily_strategy(&mut self, instruction: &str) -> Result<ChatOutcome, AppError> {
        self.state.push_history(HistoryRole::User, instruction);

        if self.is_pipeline_busy() {
            let reply =
                "A pipeline is already running for this campaign; skipping the scheduled strategy run."
                    .to_string();
            self.state.push_history(HistoryRole::Assistant, reply.clone());
            self.save().await?;
            return Ok(ChatOutcome::Reply(reply));
        }

        self.state.instruction = instruction.to_string();
        if let Some(topic) = extract_topic(instruction) {
            self.state.parsed_request.topic = topic;
        } else if self.state.parsed_request.topic.is_empty() {
            self.state.parsed_request.topic = instruction.trim().to_string();
        }
        if let Some(quantity) = parse_quantity(instruction) {
            self.state.parsed_request.quantity = quantity.max(1);
        }
        self.state.revision_count = 0;

        let reply =
            "I'm starting the daily strategy process. Phase 1: developing the strategy plan."
                .to_string();
        self.state.push_history(HistoryRole::Assistant, reply.clone());
        self.set_phase(CampaignPhase::Planning).await?;
        Ok(ChatOutcome::PipelineStarted {
            reply,
            plan: PipelinePlan {
                include_research: true,
                include_strategy: true,
                feedback: None,
            },
        })
    }

    async fn handle_new_instruction(&mut self, message: &str) -> Result<ChatOutcome, AppError> {
        let parsed = self
            .deps
            .invoker
            .invoke(
                AgentRole::ProjectManager,
                &InvocationContext {
                    task: message.to_string(),
                    project_id: self.state.project_id.clone(),
                    ..Default::default()
                },
            )
            .await?
            .payload;
        self.log_step(AgentRole::ProjectManager, json!({ "task": message }), &parsed)
            .await;

        let intent = parsed
            .get("intent")
            .and_then(Value::as_str)
            .unwrap_or("other");
        let reply = parsed
            .get("reply")
            .and_then(Value::as_str)
            .unwrap_or("On it.")
            .to_string();

        match intent {
            "chat" => {
                self.state.push_history(HistoryRole::Assistant, reply.clone());
                self.save().await?;
                Ok(ChatOutcome::Reply(reply))
            }
            "new_mission" | "follow_up" => {
                self.state.instruction = message.to_string();
                self.state.parsed_request = ParsedRequest {
                    topic: parsed
                        .get("topic")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .filter(|t| !t.is_empty())
                        .or_else(|| extract_topic(message))
                        .unwrap_or_else(|| self.state.parsed_request.topic.clone()),
                    quantity: parse_quantity(message)
                        .or_else(|| parsed.get("quantity").and_then(Value::as_u64).map(|q| q as u32))
                        .filter(|q| *q > 0)
                        .unwrap_or(3),
                    platform: parsed
                        .get("platform")
                        .and_then(Value::as_str)
                        .filter(|p| !p.is_empty())
                        .unwrap_or("x")
                        .to_string(),
                };
                self.state.revision_count = 0;
                self.state.push_history(HistoryRole::Assistant, reply.clone());
                self.set_phase(CampaignPhase::Planning).await?;
                Ok(ChatOutcome::PipelineStarted {
                    reply,
                    plan: PipelinePlan {
                        include_research: true,
                        include_strategy: false,
                        feedback: None,
                    },
                })
            }
            _ => {
                // General work request: plan a multi-agent workflow instead
                // of the content pipeline.
                self.state.instruction = message.to_string();
                let params = self.plan_workflow(message).await?;
                self.state.push_history(HistoryRole::Assistant, reply.clone());
                self.save().await?;
                Ok(ChatOutcome::WorkflowPlanned { reply, params })
            }
        }
    }

    async fn handle_feedback(&mut self, message: &str) -> Result<ChatOutcome, AppError> {
        let current_topic = self.state.parsed_request.topic.clone();
        if let Some(new_topic) = self.deps.topic_detector.detect(message, &current_topic) {
            info!(
                campaign_id = %self.state.campaign_id,
                new_topic,
                "Feedback changes the topic; restarting with fresh research"
            );
            self.state.parsed_request.topic = new_topic;
            self.state.instruction = message.to_string();
            self.state.revision_count = 0;
            let reply = format!(
                "Got it, switching the campaign to \"{}\". The team is starting over with fresh research.",
                self.state.parsed_request.topic
            );
            self.state.push_history(HistoryRole::Assistant, reply.clone());
            self.set_phase(CampaignPhase::Planning).await?;
            return Ok(ChatOutcome::PipelineStarted {
                reply,
                plan: PipelinePlan {
                    include_research: true,
                    include_strategy: false,
                    feedback: None,
                },
            });
        }

        if let Some(quantity) = parse_quantity(message) {
            self.state.parsed_request.quantity = quantity.max(1);
        }
        self.state.instruction =
            format!("{}\n\nClient feedback: {message}", self.state.instruction);
        let reply = "Thanks, sending your notes back to the team for a revision.".to_string();
        self.state.push_history(HistoryRole::Assistant, reply.clone());
        self.set_phase(CampaignPhase::Revising).await?;
        Ok(ChatOutcome::PipelineStarted {
            reply,
            plan: PipelinePlan {
                include_research: false,
                include_strategy: false,
                feedback: Some(message.to_string()),
            },
        })
    }

    /// Asks the integration manager for a step plan and packages it for the
    /// workflow runner.
    async fn plan_workflow(&mut self, instruction: &str) -> Result<WorkflowParams, AppError> {
        let run_id = Uuid::new_v4().to_string();
        let plan = self
            .invoke_with_context(
                AgentRole::IntegrationManager,
                format!("PLAN the agent steps needed for this request:\n{instruction}"),
                &[],
            )
            .await?;
        self.deps
            .run_log
            .start_run(&run_id, instruction, self.state.project_id.as_deref())
            .await?;
        self.state.current_run_id = Some(run_id.clone());
        Ok(WorkflowParams {
            run_id,
            campaign_id: Some(self.state.campaign_id.clone()),
            project_id: self.state.project_id.clone(),
            instruction: instruction.to_string(),
            plan,
            kind: WorkflowKind::General,
        })
    }

    /// Full content production run: research, strategy, drafting, internal
    /// review, executive review. Called with the campaign mutex held for the
    /// whole run.
    #[instrument(skip(self, plan), fields(campaign_id = %self.state.campaign_id))]
    pub async fn run_content_pipeline(&mut self, plan: PipelinePlan) -> Result<(), AppError> {
        let run_id = Uuid::new_v4().to_string();
        self.deps
            .run_log
            .start_run(&run_id, &self.state.instruction, self.state.project_id.as_deref())
            .await?;
        self.state.current_run_id = Some(run_id.clone());
        self.steps_this_run = 0;

        let result = self.pipeline_inner(&plan).await;
        match &result {
            Ok(()) => {
                self.deps
                    .run_log
                    .complete_run(
                        &run_id,
                        RunStatus::Completed,
                        Some(json!({ "posts": self.state.artifacts.posts.len() })),
                    )
                    .await;
            }
            Err(e) => {
                error!(campaign_id = %self.state.campaign_id, error = %e, "Content pipeline failed");
                self.deps
                    .run_log
                    .complete_run(&run_id, RunStatus::Failed, Some(json!({ "error": e.to_string() })))
                    .await;
                self.state
                    .push_history(HistoryRole::System, format!("Pipeline failed: {e}"));
                self.state.push_history(
                    HistoryRole::Assistant,
                    "Something went wrong while producing your content. Please try again.",
                );
                self.set_phase(CampaignPhase::Idle).await?;
            }
        }
        result
    }

    async fn pipeline_inner(&mut self, plan: &PipelinePlan) -> Result<(), AppError> {
        let topic = self.state.parsed_request.topic.clone();

        if plan.include_research {
            self.set_phase(CampaignPhase::Researching).await?;
            let research = self
                .invoke_with_context(
                    AgentRole::ResearchAgent,
                    format!("Research the topic \"{topic}\" for a social media campaign."),
                    &[ContextType::Product, ContextType::Competitors],
                )
                .await?;
            self.state.working_data.research = Some(research);

            let audience = self
                .invoke_with_context(
                    AgentRole::AudienceAnalyst,
                    format!(
                        "Analyze the audience for content about \"{topic}\".\nResearch findings:\n{}",
                        self.state.working_data.research.clone().unwrap_or_default()
                    ),
                    &[ContextType::Audience],
                )
                .await?;
            self.state.working_data.audience = Some(audience);
            self.save().await?;
        }

        // Strategy synthesis belongs to the scheduled daily pipeline only;
        // ad hoc missions go straight from research to writing.
        if plan.include_strategy {
            self.set_phase(CampaignPhase::Planning).await?;
            let strategy = self
                .invoke_with_context(
                    AgentRole::LeadStrategist,
                    format!(
                        "Develop the strategy for content about \"{topic}\".\nResearch:\n{}\nAudience:\n{}",
                        self.state.working_data.research.clone().unwrap_or_default(),
                        self.state.working_data.audience.clone().unwrap_or_default()
                    ),
                    &[],
                )
                .await?;
            self.state.artifacts.strategy_brief = strategy
                .get("strategy_brief")
                .and_then(Value::as_str)
                .map(str::to_string);
            self.save().await?;
        }

        self.set_phase(CampaignPhase::Writing).await?;
        self.generate_draft(plan.feedback.as_deref()).await?;

        self.set_phase(CampaignPhase::InternalReview).await?;
        self.run_internal_review_loop().await?;

        self.set_phase(CampaignPhase::ExecReview).await?;
        self.run_exec_review_loop().await
    }

    fn writer_task(&self, feedback: Option<&str>) -> String {
        let request = &self.state.parsed_request;
        let mut task = format!(
            "Write {} post(s) for platform \"{}\" about \"{}\".",
            request.quantity, request.platform, request.topic
        );
        if let Some(brief) = &self.state.artifacts.strategy_brief {
            task.push_str(&format!("\n\nStrategy brief:\n{brief}"));
        }
        if let Some(research) = &self.state.working_data.research {
            task.push_str(&format!("\n\nResearch:\n{research}"));
        }
        if let Some(audience) = &self.state.working_data.audience {
            task.push_str(&format!("\n\nAudience guidance:\n{audience}"));
        }
        if let Some(feedback) = feedback {
            task.push_str(&format!(
                "\n\nRevise to address ALL of this feedback:\n{feedback}"
            ));
        }
        task
    }

    async fn website_url(&self) -> Option<String> {
        let project_id = self.state.project_id.as_deref()?;
        match self.deps.project_store.get_project(project_id).await {
            Ok(project) => project.and_then(|p| p.website_url),
            Err(e) => {
                warn!(project_id, error = %e, "Failed to load project for URL enforcement");
                None
            }
        }
    }

    /// One drafting pass: writer invocation plus deterministic enforcement
    /// of count, length, and link placement.
    async fn generate_draft(&mut self, feedback: Option<&str>) -> Result<(), AppError> {
        let task = self.writer_task(feedback);
        let draft = self
            .invoke_with_context(AgentRole::ContentWriter, task, &[])
            .await?;

        let website_url = self.website_url().await;
        let posts = enforce_posts(&draft, &self.state.parsed_request, website_url.as_deref());
        if posts.is_empty() {
            return Err(AppError::InternalError(
                "Writer returned no usable posts".to_string(),
            ));
        }
        self.state.working_data.draft = Some(draft);
        self.state.artifacts.posts = posts;
        self.save().await
    }

    fn posts_as_text(&self) -> String {
        self.state
            .artifacts
            .posts
            .iter()
            .map(|p| format!("Post {}: {}", p.sequence, p.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Content-manager gate. Revisions are capped; when the cap is hit the
    /// last draft proceeds to the executives anyway.
    async fn run_internal_review_loop(&mut self) -> Result<(), AppError> {
        let max_revisions = self.deps.config.max_revisions;
        loop {
            let review = self
                .invoke_with_context(
                    AgentRole::ContentManager,
                    format!(
                        "Review these {} draft post(s) for the request \"{}\":\n\n{}",
                        self.state.artifacts.posts.len(),
                        self.state.instruction,
                        self.posts_as_text()
                    ),
                    &[ContextType::BrandVoice],
                )
                .await?;

            let approved = review.get("approved").and_then(Value::as_bool).unwrap_or(false)
                || review
                    .get("ready_for_exec_review")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
            self.state.working_data.internal_review = Some(review.clone());

            if approved {
                return self.save().await;
            }
            if self.state.revision_count >= max_revisions {
                warn!(
                    campaign_id = %self.state.campaign_id,
                    revisions = self.state.revision_count,
                    "Internal revision cap reached; proceeding with the last draft"
                );
                return self.save().await;
            }

            self.state.revision_count += 1;
            self.set_phase(CampaignPhase::Revising).await?;
            let feedback = review
                .get("feedback")
                .and_then(Value::as_str)
                .unwrap_or("Improve clarity and brand fit.")
                .to_string();
            self.generate_draft(Some(&feedback)).await?;
            self.set_phase(CampaignPhase::InternalReview).await?;
        }
    }

    /// One full pass of the three executives, in order.
    async fn run_exec_review(&mut self) -> Result<(bool, String), AppError> {
        let package = format!(
            "Campaign request: \"{}\"\nTopic: \"{}\"\n\nFinal content package:\n{}",
            self.state.instruction, self.state.parsed_request.topic, self.posts_as_text()
        );

        let mut verdicts: Vec<(AgentRole, bool, String)> = Vec::new();
        for exec in AgentRole::EXECUTIVES {
            let context_types: &[ContextType] = match exec {
                AgentRole::Crco => &[ContextType::Compliance],
                _ => &[ContextType::Summary],
            };
            let review = self
                .invoke_with_context(
                    exec,
                    format!("Review for executive sign-off.\n\n{package}"),
                    context_types,
                )
                .await?;
            let approved = review.get("approved").and_then(Value::as_bool).unwrap_or(false);
            let feedback = review
                .get("feedback")
                .and_then(Value::as_str)
                .unwrap_or("No feedback provided")
                .to_string();
            self.state.artifacts.exec_reviews.push(review);
            verdicts.push((exec, approved, feedback));
        }

        let approved = verdicts.iter().all(|(_, ok, _)| *ok);
        let dissent = verdicts
            .iter()
            .filter(|(_, ok, _)| !ok)
            .map(|(exec, _, feedback)| format!("{}: {feedback}", exec.slug().to_uppercase()))
            .collect::<Vec<_>>()
            .join("; ");
        Ok((approved, dissent))
    }

    /// Executive gate: unanimous approval or another revision, up to the
    /// attempt cap. Exhaustion hands the last draft and the executives'
    /// feedback to the client instead of looping forever.
    async fn run_exec_review_loop(&mut self) -> Result<(), AppError> {
        let max_attempts = self.deps.config.max_exec_attempts.max(1);
        let mut last_feedback = String::new();
        for attempt in 1..=max_attempts {
            let (approved, dissent) = self.run_exec_review().await?;
            if approved {
                return self.finalize_approved_content().await;
            }
            last_feedback = dissent;
            info!(
                campaign_id = %self.state.campaign_id,
                attempt,
                "Executive review rejected the package"
            );
            if attempt < max_attempts {
                self.set_phase(CampaignPhase::Revising).await?;
                self.generate_draft(Some(&last_feedback)).await?;
                self.set_phase(CampaignPhase::ExecReview).await?;
            }
        }

        // The last draft is still projected so the client can approve it
        // despite the executives' reservations.
        self.sync_to_approvals().await?;
        let reply = format!(
            "The executive team couldn't fully sign off after {max_attempts} attempts. Here is the latest draft with their outstanding concerns:\n\n{}\n\nOutstanding feedback: {last_feedback}",
            self.posts_as_text()
        );
        self.state.push_history(HistoryRole::Assistant, reply);
        self.set_phase(CampaignPhase::AwaitingUserFeedback).await
    }

    /// Executive-approved content becomes client-visible: post rows are
    /// projected with their content hashes and the campaign is marked ready
    /// for client approval.
    async fn finalize_approved_content(&mut self) -> Result<(), AppError> {
        self.sync_to_approvals().await?;
        let reply = format!(
            "The team signed off. Here {} for your approval:\n\n{}",
            if self.state.artifacts.posts.len() == 1 {
                "is 1 post".to_string()
            } else {
                format!("are {} posts", self.state.artifacts.posts.len())
            },
            self.posts_as_text()
        );
        self.state.push_history(HistoryRole::Assistant, reply);
        self.set_phase(CampaignPhase::AwaitingUserFeedback).await
    }

    async fn sync_to_approvals(&mut self) -> Result<(), AppError> {
        let platform = self.state.parsed_request.platform.clone();
        let rows: Vec<StoredPost> = self
            .state
            .artifacts
            .posts
            .iter()
            .map(|post| StoredPost {
                campaign_id: self.state.campaign_id.clone(),
                status: PostStatus::InternalApproved,
                content: post.content.clone(),
                content_hash: content_hash(&post.content),
                platform: platform.clone(),
            })
            .collect();
        self.deps.project_store.insert_posts(rows).await?;
        self.deps
            .project_store
            .update_campaign_status(&self.state.campaign_id, CampaignStatus::ReadyForApproval)
            .await?;
        self.audit("ready_for_approval", "campaign").await;
        Ok(())
    }

    /// Client-side approval actions.
    #[instrument(skip(self), fields(campaign_id = %self.state.campaign_id))]
    pub async fn handle_action(&mut self, action: CampaignAction) -> Result<ChatOutcome, AppError> {
        match action {
            CampaignAction::Approve => {
                if self.state.phase != CampaignPhase::AwaitingUserFeedback
                    || self.state.artifacts.posts.is_empty()
                {
                    return Err(AppError::BadRequest(
                        "No content is awaiting approval".to_string(),
                    ));
                }
                // Integrity gate: the content being approved must hash to
                // what was projected at internal approval.
                let stored = self
                    .deps
                    .project_store
                    .posts_for_campaign(&self.state.campaign_id)
                    .await?;
                for post in &self.state.artifacts.posts {
                    let hash = content_hash(&post.content);
                    let matched = stored.iter().any(|row| {
                        row.content_hash == hash && row.status == PostStatus::InternalApproved
                    });
                    if !matched {
                        return Err(AppError::InternalError(format!(
                            "Content integrity check failed for post {}: stored content does not match the approved draft",
                            post.sequence
                        )));
                    }
                }
                self.deps
                    .project_store
                    .update_post_statuses(&self.state.campaign_id, PostStatus::ClientApproved)
                    .await?;
                self.deps
                    .project_store
                    .update_campaign_status(&self.state.campaign_id, CampaignStatus::ClientApproved)
                    .await?;
                self.audit("client_approved", "campaign").await;
                let reply = "Approved. The content is cleared for publishing.".to_string();
                self.state.push_history(HistoryRole::Assistant, reply.clone());
                self.set_phase(CampaignPhase::Approved).await?;
                Ok(ChatOutcome::Reply(reply))
            }
            CampaignAction::Reject { feedback } => {
                self.state.push_history(HistoryRole::User, feedback.clone());
                self.deps
                    .project_store
                    .update_post_statuses(
                        &self.state.campaign_id,
                        PostStatus::ClientChangesRequested,
                    )
                    .await?;
                self.audit("client_rejected", "campaign").await;
                // A rejection is revision feedback with a fresh revision
                // allowance; a topic change inside it restarts research.
                self.state.revision_count = 0;
                self.state.phase = CampaignPhase::AwaitingUserFeedback;
                self.handle_feedback(&feedback).await
            }
            CampaignAction::Publish => {
                if self.state.phase != CampaignPhase::Approved {
                    return Err(AppError::BadRequest(
                        "Only an approved campaign can be published".to_string(),
                    ));
                }
                self.deps
                    .project_store
                    .update_post_statuses(&self.state.campaign_id, PostStatus::Published)
                    .await?;
                self.deps
                    .project_store
                    .update_campaign_status(&self.state.campaign_id, CampaignStatus::Completed)
                    .await?;
                self.audit("published", "campaign").await;
                let reply = "Published. The campaign is complete.".to_string();
                self.state.push_history(HistoryRole::Assistant, reply.clone());
                self.save().await?;
                Ok(ChatOutcome::Reply(reply))
            }
        }
    }

    /// Terminal notification from a background workflow for this campaign.
    #[instrument(skip(self, callback), fields(campaign_id = %self.state.campaign_id))]
    pub async fn on_workflow_callback(
        &mut self,
        callback: WorkflowCallback,
    ) -> Result<(), AppError> {
        match callback {
            WorkflowCallback::WorkComplete { summary, .. } => {
                let reply = summary
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| summary.to_string());
                self.state.push_history(HistoryRole::Assistant, reply);
                self.state.current_run_id = None;
                self.set_phase(CampaignPhase::AwaitingUserFeedback).await
            }
            WorkflowCallback::ExecReviewComplete {
                approved, feedback, ..
            } => {
                self.state.current_run_id = None;
                if approved {
                    self.finalize_approved_content().await
                } else {
                    let reply = format!(
                        "The executive review came back with concerns: {feedback}"
                    );
                    self.state.push_history(HistoryRole::Assistant, reply);
                    self.set_phase(CampaignPhase::AwaitingUserFeedback).await
                }
            }
        }
    }
}
