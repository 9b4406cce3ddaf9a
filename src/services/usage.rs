// src/services/usage.rs
//
// Usage/cost telemetry. Logging is a best-effort side channel: a failed
// write is logged and swallowed, never surfaced to the operation that
// produced the event.

use serde_json::Value;
use std::sync::Arc;
use tracing::error;

use crate::storage::{UsageRecord, UsageStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageOperation {
    Generate,
    Stream,
    Embed,
}

impl UsageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageOperation::Generate => "generate",
            UsageOperation::Stream => "stream",
            UsageOperation::Embed => "embed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub label: &'static str,
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

const DEFAULT_PRICING: Pricing = Pricing {
    label: "Unpriced Model",
    input_per_1m: 0.0,
    output_per_1m: 0.0,
};

// USD per 1M tokens. Update to negotiated rates.
const MODEL_PRICING: &[(&str, Pricing)] = &[
    (
        "gemini-flash-latest",
        Pricing {
            label: "Gemini Flash",
            input_per_1m: 0.3,
            output_per_1m: 2.5,
        },
    ),
    (
        "gemini-flash-lite-latest",
        Pricing {
            label: "Gemini Flash Lite",
            input_per_1m: 0.1,
            output_per_1m: 0.4,
        },
    ),
    (
        "gemini-3-flash-preview",
        Pricing {
            label: "Gemini 3 Flash Preview",
            input_per_1m: 0.5,
            output_per_1m: 3.0,
        },
    ),
    (
        "models/text-embedding-004",
        Pricing {
            label: "Text Embedding 004",
            input_per_1m: 0.1,
            output_per_1m: 0.0,
        },
    ),
];

pub fn model_pricing(model: &str) -> Pricing {
    MODEL_PRICING
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, pricing)| *pricing)
        .unwrap_or(DEFAULT_PRICING)
}

fn round_currency(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

pub fn calculate_cost_usd(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let pricing = model_pricing(model);
    let input_cost = (input_tokens as f64 / 1_000_000.0) * pricing.input_per_1m;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * pricing.output_per_1m;
    round_currency(input_cost + output_cost)
}

/// Rough token estimate used when the upstream API reports no usage
/// metadata. Four characters per token is close enough for cost tracking.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[derive(Debug, Clone, Default)]
pub struct UsageEvent {
    pub model: String,
    pub operation: &'static str,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub source: Option<String>,
    pub project_id: Option<String>,
    pub run_id: Option<String>,
    pub metadata: Option<Value>,
}

/// Records a usage event. Never fails the caller.
pub async fn log_usage_event(store: &Arc<dyn UsageStore>, event: UsageEvent) {
    let total_tokens = if event.total_tokens > 0 {
        event.total_tokens
    } else {
        event.input_tokens + event.output_tokens
    };
    let cost_usd = calculate_cost_usd(&event.model, event.input_tokens, event.output_tokens);

    let record = UsageRecord {
        model: event.model,
        operation: event.operation.to_string(),
        input_tokens: event.input_tokens,
        output_tokens: event.output_tokens,
        total_tokens,
        cost_usd,
        source: event.source,
        project_id: event.project_id,
        run_id: event.run_id,
        metadata: event.metadata,
    };

    if let Err(e) = store.record(record).await {
        error!(error = %e, "Failed to log usage event");
    }
}
