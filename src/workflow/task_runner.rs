// src/workflow/task_runner.rs
//
// Sequential multi-agent workflow execution over a durable step journal.
// A plan (usually produced by the integration manager) is normalized into a
// FIFO job queue; each job runs once, its output journaled, so a re-run of
// the same run id replays recorded steps instead of re-invoking agents.

use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::agents::{AgentInvoker, AgentRole, InvocationContext};
use crate::config::Config;
use crate::errors::AppError;
use crate::services::run_log::RunLog;
use crate::storage::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    /// Plan-driven work: executes the queue, then a synthesis step.
    General,
    /// Executive review: executes the queue, then aggregates verdicts.
    ExecReview,
}

#[derive(Debug, Clone)]
pub struct WorkflowParams {
    pub run_id: String,
    pub campaign_id: Option<String>,
    pub project_id: Option<String>,
    pub instruction: String,
    /// Either `{"steps": [...]}` or a bare step array. Each step names an
    /// agent slug plus a `task` string, or a `tasks` array that fans out
    /// into one job per entry.
    pub plan: Value,
    pub kind: WorkflowKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub agent: AgentRole,
    pub task: String,
}

#[derive(Debug, Clone)]
pub struct ExecReviewVerdict {
    pub agent: String,
    pub approved: bool,
    pub feedback: String,
}

/// Terminal notification of a workflow, delivered exactly once.
#[derive(Debug, Clone)]
pub enum WorkflowCallback {
    ExecReviewComplete {
        run_id: String,
        campaign_id: Option<String>,
        approved: bool,
        feedback: String,
        verdicts: Vec<ExecReviewVerdict>,
    },
    WorkComplete {
        run_id: String,
        campaign_id: Option<String>,
        summary: Value,
    },
}

fn step_task(step: &Value) -> Option<String> {
    step.get("task")
        .or_else(|| step.get("instruction"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Flattens a plan into the job queue. Steps naming unknown agents are
/// dropped with a warning rather than failing the run.
pub fn normalize_plan(plan: &Value) -> Vec<Job> {
    let steps = plan
        .get("steps")
        .and_then(Value::as_array)
        .or_else(|| plan.as_array());
    let Some(steps) = steps else {
        return Vec::new();
    };

    let mut jobs = Vec::new();
    for step in steps {
        let Some(slug) = step.get("agent").and_then(Value::as_str) else {
            warn!("Workflow step without an agent field, skipping");
            continue;
        };
        let Some(agent) = AgentRole::from_slug(slug) else {
            warn!(agent = slug, "Workflow step names an unknown agent, skipping");
            continue;
        };

        if let Some(tasks) = step.get("tasks").and_then(Value::as_array) {
            for task in tasks.iter().filter_map(Value::as_str) {
                jobs.push(Job {
                    agent,
                    task: task.to_string(),
                });
            }
        } else if let Some(task) = step_task(step) {
            jobs.push(Job { agent, task });
        } else {
            warn!(agent = slug, "Workflow step without a task, skipping");
        }
    }
    jobs
}

/// Sub-tasks spawned by a completed step's output, validated the same way
/// as plan steps. Agents fan out by returning a `tasks` array of
/// `{agent, task|instruction}` entries.
pub fn subtask_jobs(output: &Value) -> Vec<Job> {
    match output.get("tasks") {
        Some(tasks) if tasks.is_array() => normalize_plan(&json!({ "steps": tasks })),
        _ => Vec::new(),
    }
}

/// Formats dissenting verdicts as "AGENT: feedback; AGENT: feedback".
pub fn dissent_feedback(verdicts: &[ExecReviewVerdict]) -> String {
    verdicts
        .iter()
        .filter(|v| !v.approved)
        .map(|v| format!("{}: {}", v.agent.to_uppercase(), v.feedback))
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct TaskRunner {
    invoker: Arc<AgentInvoker>,
    run_log: RunLog,
    config: Arc<Config>,
    callback_tx: mpsc::Sender<WorkflowCallback>,
}

impl TaskRunner {
    pub fn new(
        invoker: Arc<AgentInvoker>,
        run_log: RunLog,
        config: Arc<Config>,
        callback_tx: mpsc::Sender<WorkflowCallback>,
    ) -> Self {
        Self {
            invoker,
            run_log,
            config,
            callback_tx,
        }
    }

    /// Executes one job, replaying its journaled output when present.
    async fn execute_step(
        &self,
        params: &WorkflowParams,
        job: &Job,
        step_name: &str,
        context: &str,
    ) -> Result<Value, AppError> {
        if let Some(output) = self.run_log.step_output(&params.run_id, step_name).await? {
            info!(run_id = %params.run_id, step = step_name, "Replaying journaled step");
            return Ok(output);
        }

        let response = self
            .invoker
            .invoke(
                job.agent,
                &InvocationContext {
                    task: job.task.clone(),
                    context: (!context.is_empty()).then(|| context.to_string()),
                    original_instruction: Some(params.instruction.clone()),
                    project_id: params.project_id.clone(),
                    run_id: Some(params.run_id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        self.run_log
            .record_step(
                &params.run_id,
                job.agent.slug(),
                step_name,
                json!({ "task": job.task }),
                response.payload.clone(),
            )
            .await?;
        Ok(response.payload)
    }

    /// Runs the workflow to completion and delivers its callback. The run
    /// record ends Completed or Failed either way.
    #[instrument(skip(self, params), fields(run_id = %params.run_id))]
    pub async fn run(&self, params: WorkflowParams) -> Result<(), AppError> {
        match self.run_inner(&params).await {
            Ok(callback) => {
                if self.callback_tx.send(callback).await.is_err() {
                    warn!(run_id = %params.run_id, "Workflow callback receiver dropped");
                }
                Ok(())
            }
            Err(e) => {
                self.run_log
                    .complete_run(
                        &params.run_id,
                        RunStatus::Failed,
                        Some(json!({ "error": e.to_string() })),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn run_inner(&self, params: &WorkflowParams) -> Result<WorkflowCallback, AppError> {
        let mut queue: VecDeque<Job> = normalize_plan(&params.plan).into();
        let cap = self.config.max_workflow_steps;

        let mut completed: Vec<(AgentRole, Value)> = Vec::new();
        let mut step_index = 0usize;
        while let Some(job) = queue.pop_front() {
            if step_index >= cap {
                // Cap-and-abandon: the rest of the queue is dropped, not
                // drained, to stop runaway sub-task generation.
                warn!(
                    run_id = %params.run_id,
                    cap,
                    abandoned = queue.len() + 1,
                    "Workflow step cap reached; abandoning the remaining queue"
                );
                break;
            }
            step_index += 1;

            let step_name = format!("exec_{}_{}", job.agent.slug(), step_index);
            let context = completed
                .iter()
                .map(|(agent, output)| format!("{} output:\n{output}", agent.display_name()))
                .collect::<Vec<_>>()
                .join("\n\n");
            let output = self.execute_step(params, &job, &step_name, &context).await?;

            // A completed job may fan out further work onto the queue tail.
            let spawned = subtask_jobs(&output);
            if !spawned.is_empty() {
                info!(
                    run_id = %params.run_id,
                    step = %step_name,
                    spawned = spawned.len(),
                    "Step spawned sub-tasks"
                );
                queue.extend(spawned);
            }
            completed.push((job.agent, output));
        }

        let callback = match params.kind {
            WorkflowKind::ExecReview => {
                let verdicts: Vec<ExecReviewVerdict> = completed
                    .iter()
                    .map(|(agent, output)| ExecReviewVerdict {
                        agent: agent.slug().to_string(),
                        approved: output.get("approved").and_then(Value::as_bool).unwrap_or(false),
                        feedback: output
                            .get("feedback")
                            .and_then(Value::as_str)
                            .unwrap_or("No feedback provided")
                            .to_string(),
                    })
                    .collect();
                let approved = !verdicts.is_empty() && verdicts.iter().all(|v| v.approved);
                let feedback = dissent_feedback(&verdicts);

                self.run_log
                    .complete_run(
                        &params.run_id,
                        RunStatus::Completed,
                        Some(json!({ "approved": approved, "feedback": feedback })),
                    )
                    .await;

                WorkflowCallback::ExecReviewComplete {
                    run_id: params.run_id.clone(),
                    campaign_id: params.campaign_id.clone(),
                    approved,
                    feedback,
                    verdicts,
                }
            }
            WorkflowKind::General => {
                let summary = self.synthesize(params, &completed).await?;
                self.run_log
                    .complete_run(
                        &params.run_id,
                        RunStatus::Completed,
                        Some(summary.clone()),
                    )
                    .await;

                WorkflowCallback::WorkComplete {
                    run_id: params.run_id.clone(),
                    campaign_id: params.campaign_id.clone(),
                    summary,
                }
            }
        };
        Ok(callback)
    }

    /// Final integration step of a general workflow, itself journaled under
    /// a fixed step name.
    async fn synthesize(
        &self,
        params: &WorkflowParams,
        completed: &[(AgentRole, Value)],
    ) -> Result<Value, AppError> {
        let step_name = "integration_manager_final";
        if let Some(output) = self.run_log.step_output(&params.run_id, step_name).await? {
            return Ok(output);
        }

        let outputs = completed
            .iter()
            .map(|(agent, output)| format!("{}:\n{output}", agent.display_name()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let response = self
            .invoker
            .invoke(
                AgentRole::IntegrationManager,
                &InvocationContext {
                    task: format!(
                        "SYNTHESIZE the completed step outputs below into a final result for the client.\n\n{outputs}"
                    ),
                    original_instruction: Some(params.instruction.clone()),
                    project_id: params.project_id.clone(),
                    run_id: Some(params.run_id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        self.run_log
            .record_step(
                &params.run_id,
                AgentRole::IntegrationManager.slug(),
                step_name,
                json!({ "steps": completed.len() }),
                response.payload.clone(),
            )
            .await?;
        Ok(response.payload)
    }
}
