// src/agents/invoker.rs
//
// Single entry point for agent LLM calls: prompt assembly, rate-limit retry
// with server-provided delay hints, JSON payload extraction, and usage
// telemetry.

use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ChatRole, ChatStreamEvent, MessageContent};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::{prompts, AgentRole};
use crate::config::Config;
use crate::errors::AppError;
use crate::llm::AiClient;
use crate::services::usage::{self, UsageEvent, UsageOperation};
use crate::storage::UsageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub role: TurnRole,
    pub content: String,
}

/// Everything an agent call carries besides the role itself.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub task: String,
    /// Retrieved project context, already flattened to text.
    pub context: Option<String>,
    pub history: Vec<HistoryTurn>,
    pub original_instruction: Option<String>,
    pub project_id: Option<String>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// Parsed JSON payload; a degraded `{"text": ..., "error": ...}` object
    /// when the model did not return valid JSON.
    pub payload: Value,
    pub raw: String,
}

impl AgentResponse {
    pub fn is_degraded(&self) -> bool {
        self.payload.get("error").and_then(Value::as_str) == Some("Failed to parse JSON")
    }
}

/// Strips Markdown code fences and parses the remainder as JSON. A model
/// that answers in prose degrades to a `text` payload instead of failing
/// the pipeline.
pub fn extract_json_payload(raw: &str) -> Value {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(_) => json!({ "text": raw, "error": "Failed to parse JSON" }),
    }
}

/// Pulls a retry delay out of an upstream error message: either the
/// structured RetryInfo `"retryDelay": "32s"` or prose like "retry in 2.5s".
pub fn parse_retry_hint(message: &str) -> Option<Duration> {
    static RETRY_DELAY: OnceLock<Regex> = OnceLock::new();
    static RETRY_PROSE: OnceLock<Regex> = OnceLock::new();
    let delay_re = RETRY_DELAY
        .get_or_init(|| Regex::new(r#""retryDelay"\s*:\s*"(\d+(?:\.\d+)?)s""#).unwrap());
    let prose_re =
        RETRY_PROSE.get_or_init(|| Regex::new(r"(?i)retry in (\d+(?:\.\d+)?)s").unwrap());

    let captures = delay_re
        .captures(message)
        .or_else(|| prose_re.captures(message))?;
    let seconds: f64 = captures.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_secs_f64(seconds))
}

pub struct AgentInvoker {
    ai_client: Arc<dyn AiClient>,
    usage_store: Arc<dyn UsageStore>,
    config: Arc<Config>,
}

impl AgentInvoker {
    pub fn new(
        ai_client: Arc<dyn AiClient>,
        usage_store: Arc<dyn UsageStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            ai_client,
            usage_store,
            config,
        }
    }

    fn build_request(&self, role: AgentRole, ctx: &InvocationContext) -> ChatRequest {
        let mut messages = Vec::with_capacity(ctx.history.len() + 1);
        for turn in &ctx.history {
            messages.push(ChatMessage {
                role: match turn.role {
                    TurnRole::User => ChatRole::User,
                    TurnRole::Assistant => ChatRole::Assistant,
                },
                content: MessageContent::Text(turn.content.clone()),
            });
        }

        let mut user_content = String::new();
        if let Some(instruction) = &ctx.original_instruction {
            user_content.push_str(&format!("Original client instruction:\n{instruction}\n\n"));
        }
        if let Some(context) = ctx.context.as_deref().filter(|c| !c.is_empty()) {
            user_content.push_str(&format!("Project context:\n{context}\n\n"));
        }
        user_content.push_str(&format!("Task:\n{}", ctx.task));

        messages.push(ChatMessage {
            role: ChatRole::User,
            content: MessageContent::Text(user_content),
        });

        ChatRequest::new(messages).with_system(prompts::system_prompt(role))
    }

    fn chat_options(&self) -> ChatOptions {
        ChatOptions::default().with_temperature(0.7).with_max_tokens(8192)
    }

    async fn log_usage(
        &self,
        role: AgentRole,
        ctx: &InvocationContext,
        operation: UsageOperation,
        prompt_tokens: Option<i32>,
        completion_tokens: Option<i32>,
        prompt_text: &str,
        output_text: &str,
        attempts: u32,
    ) {
        let input_tokens = prompt_tokens
            .filter(|t| *t >= 0)
            .map(|t| t as u64)
            .unwrap_or_else(|| usage::estimate_tokens(prompt_text));
        let output_tokens = completion_tokens
            .filter(|t| *t >= 0)
            .map(|t| t as u64)
            .unwrap_or_else(|| usage::estimate_tokens(output_text));

        usage::log_usage_event(
            &self.usage_store,
            UsageEvent {
                model: self.config.agent_model.clone(),
                operation: operation.as_str(),
                input_tokens,
                output_tokens,
                total_tokens: input_tokens + output_tokens,
                source: Some(role.slug().to_string()),
                project_id: ctx.project_id.clone(),
                run_id: ctx.run_id.clone(),
                metadata: Some(json!({ "attempts": attempts })),
            },
        )
        .await;
    }

    /// Invokes an agent and returns its parsed payload. Rate-limit and
    /// overload errors are retried with exponential backoff; a server hint
    /// in the error overrides the computed delay (plus a one second buffer)
    /// without advancing the backoff schedule.
    #[instrument(skip(self, ctx), fields(agent = role.slug()))]
    pub async fn invoke(
        &self,
        role: AgentRole,
        ctx: &InvocationContext,
    ) -> Result<AgentResponse, AppError> {
        let request = self.build_request(role, ctx);
        let prompt_text = format!("{}\n{}", prompts::system_prompt(role), ctx.task);

        let max_retries = self.config.llm_max_retries.max(1);
        let mut backoff = Duration::from_millis(self.config.llm_base_delay_ms);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .ai_client
                .exec_chat(&self.config.agent_model, request.clone(), Some(self.chat_options()))
                .await
            {
                Ok(response) => {
                    let raw = response
                        .content_text_as_str()
                        .unwrap_or_default()
                        .to_string();
                    let payload = extract_json_payload(&raw);
                    if payload.get("error").is_some() && payload.get("text").is_some() {
                        warn!(agent = role.slug(), "Agent response was not valid JSON");
                    }
                    self.log_usage(
                        role,
                        ctx,
                        UsageOperation::Generate,
                        response.usage.prompt_tokens,
                        response.usage.completion_tokens,
                        &prompt_text,
                        &raw,
                        attempt,
                    )
                    .await;
                    return Ok(AgentResponse { payload, raw });
                }
                Err(e) => {
                    if !e.is_retryable_llm_error() || attempt >= max_retries {
                        return Err(e);
                    }
                    let delay = match parse_retry_hint(&e.to_string()) {
                        Some(hint) => hint + Duration::from_secs(1),
                        None => {
                            let d = backoff;
                            backoff *= 2;
                            d
                        }
                    };
                    debug!(
                        agent = role.slug(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying rate-limited agent call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Streaming variant: text chunks are forwarded over `chunk_tx` as they
    /// arrive, and the accumulated response is parsed exactly like `invoke`.
    #[instrument(skip(self, ctx, chunk_tx), fields(agent = role.slug()))]
    pub async fn invoke_stream(
        &self,
        role: AgentRole,
        ctx: &InvocationContext,
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<AgentResponse, AppError> {
        let request = self.build_request(role, ctx);
        let prompt_text = format!("{}\n{}", prompts::system_prompt(role), ctx.task);

        let mut stream = self
            .ai_client
            .stream_chat(&self.config.agent_model, request, Some(self.chat_options()))
            .await?;

        use futures::StreamExt;
        let mut raw = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ChatStreamEvent::Chunk(chunk) => {
                    raw.push_str(&chunk.content);
                    // A closed receiver just means nobody is watching live.
                    let _ = chunk_tx.send(chunk.content).await;
                }
                ChatStreamEvent::End(_) => break,
                _ => {}
            }
        }

        let payload = extract_json_payload(&raw);
        self.log_usage(
            role,
            ctx,
            UsageOperation::Stream,
            None,
            None,
            &prompt_text,
            &raw,
            1,
        )
        .await;
        Ok(AgentResponse { payload, raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryUsageStore;
    use async_trait::async_trait;
    use genai::chat::ChatResponse;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn json_extraction_strips_fences() {
        let fenced = "```json\n{\"posts\": []}\n```";
        assert_eq!(extract_json_payload(fenced), json!({"posts": []}));

        let bare_fence = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_payload(bare_fence), json!({"a": 1}));

        let plain = "{\"approved\": true}";
        assert_eq!(extract_json_payload(plain), json!({"approved": true}));
    }

    #[test]
    fn invalid_json_degrades_to_text_payload() {
        let payload = extract_json_payload("Sure! Here are your posts.");
        assert_eq!(payload["error"], "Failed to parse JSON");
        assert_eq!(payload["text"], "Sure! Here are your posts.");
    }

    #[test]
    fn retry_hints_are_parsed_from_both_shapes() {
        let structured = r#"429 {"error": {"details": [{"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "32s"}]}}"#;
        assert_eq!(parse_retry_hint(structured), Some(Duration::from_secs(32)));

        assert_eq!(
            parse_retry_hint("Resource exhausted. Please retry in 2.5s."),
            Some(Duration::from_secs_f64(2.5))
        );
        assert_eq!(parse_retry_hint("400 invalid argument"), None);
    }

    struct FlakyClient {
        failures: AtomicU32,
    }

    #[async_trait]
    impl AiClient for FlakyClient {
        async fn exec_chat(
            &self,
            _model_name: &str,
            _request: ChatRequest,
            _options: Option<ChatOptions>,
        ) -> Result<ChatResponse, AppError> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(AppError::LlmClientError("429 RESOURCE_EXHAUSTED".into()));
            }
            Err(AppError::LlmClientError("400 should not be reached".into()))
        }

        async fn stream_chat(
            &self,
            _model_name: &str,
            _request: ChatRequest,
            _options: Option<ChatOptions>,
        ) -> Result<crate::llm::ChatStream, AppError> {
            Err(AppError::InternalError("not used".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_the_configured_cap() {
        let invoker = AgentInvoker::new(
            Arc::new(FlakyClient {
                failures: AtomicU32::new(100),
            }),
            Arc::new(InMemoryUsageStore::default()),
            Arc::new(Config::default()),
        );
        let err = invoker
            .invoke(AgentRole::ContentWriter, &InvocationContext {
                task: "write".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable_llm_error());
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        struct HardFailClient;

        #[async_trait]
        impl AiClient for HardFailClient {
            async fn exec_chat(
                &self,
                _model_name: &str,
                _request: ChatRequest,
                _options: Option<ChatOptions>,
            ) -> Result<ChatResponse, AppError> {
                Err(AppError::LlmClientError("400 invalid argument".into()))
            }

            async fn stream_chat(
                &self,
                _model_name: &str,
                _request: ChatRequest,
                _options: Option<ChatOptions>,
            ) -> Result<crate::llm::ChatStream, AppError> {
                Err(AppError::InternalError("not used".into()))
            }
        }

        let invoker = AgentInvoker::new(
            Arc::new(HardFailClient),
            Arc::new(InMemoryUsageStore::default()),
            Arc::new(Config::default()),
        );
        let err = invoker
            .invoke(AgentRole::Cso, &InvocationContext {
                task: "approve".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(!err.is_retryable_llm_error());
    }
}
