// src/campaign/state.rs

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Stage of the campaign state machine. Transitions happen only inside the
/// orchestrator's own methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignPhase {
    Idle,
    Planning,
    Researching,
    Writing,
    InternalReview,
    ExecReview,
    Revising,
    AwaitingUserFeedback,
    Approved,
}

/// Projection status written to the relational campaign record. The durable
/// campaign state itself is never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    ReadyForApproval,
    ClientApproved,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
    System,
    /// Raw per-agent output kept for diagnostics. Never shown in user-facing
    /// transcripts.
    Trace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedRequest {
    pub topic: String,
    pub quantity: u32,
    pub platform: String,
}

impl Default for ParsedRequest {
    fn default() -> Self {
        Self {
            topic: String::new(),
            quantity: 3,
            platform: "x".to_string(),
        }
    }
}

/// Scratch space overwritten on each pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingData {
    pub research: Option<Value>,
    pub audience: Option<Value>,
    pub draft: Option<Value>,
    pub internal_review: Option<Value>,
    pub exec_review: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub day: u32,
    pub sequence: u32,
    pub content: String,
    pub notes: String,
}

/// Lifecycle of a post row in the relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostStatus {
    InternalApproved,
    ClientApproved,
    ClientChangesRequested,
    Published,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artifacts {
    pub posts: Vec<Post>,
    pub strategy_brief: Option<String>,
    pub exec_reviews: Vec<Value>,
}

/// Durable per-campaign state. One logical writer per campaign; persisted
/// after every mutation so an evicted instance can be rehydrated mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignState {
    pub campaign_id: String,
    pub phase: CampaignPhase,
    pub instruction: String,
    pub parsed_request: ParsedRequest,
    pub project_id: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub working_data: WorkingData,
    pub artifacts: Artifacts,
    pub revision_count: u32,
    pub max_revisions: u32,
    pub last_updated: i64,
    pub current_run_id: Option<String>,
}

impl CampaignState {
    pub fn new(campaign_id: impl Into<String>, max_revisions: u32) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            phase: CampaignPhase::Idle,
            instruction: String::new(),
            parsed_request: ParsedRequest::default(),
            project_id: None,
            history: Vec::new(),
            working_data: WorkingData::default(),
            artifacts: Artifacts::default(),
            revision_count: 0,
            max_revisions,
            last_updated: Utc::now().timestamp_millis(),
            current_run_id: None,
        }
    }

    pub fn push_history(&mut self, role: HistoryRole, content: impl Into<String>) {
        self.history.push(HistoryEntry {
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
        });
        self.last_updated = Utc::now().timestamp_millis();
    }
}

/// Version identity for a post's content, used for client-approval integrity
/// checks. A mismatch between the approval-time hash and the stored content's
/// hash is a detectable integrity error.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_defaults() {
        let state = CampaignState::new("c1", 5);
        assert_eq!(state.phase, CampaignPhase::Idle);
        assert_eq!(state.parsed_request.quantity, 3);
        assert_eq!(state.parsed_request.platform, "x");
        assert_eq!(state.revision_count, 0);
        assert!(state.artifacts.posts.is_empty());
    }

    #[test]
    fn phase_serializes_screaming_snake() {
        let json = serde_json::to_string(&CampaignPhase::AwaitingUserFeedback).unwrap();
        assert_eq!(json, "\"AWAITING_USER_FEEDBACK\"");
        let json = serde_json::to_string(&CampaignPhase::InternalReview).unwrap();
        assert_eq!(json, "\"INTERNAL_REVIEW\"");
    }

    #[test]
    fn content_hash_is_stable_and_content_sensitive() {
        let a = content_hash("Launch day! https://example.com");
        let b = content_hash("Launch day! https://example.com");
        let c = content_hash("Launch day! https://example.org");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn trace_entries_round_trip_with_lowercase_role() {
        let entry = HistoryEntry {
            role: HistoryRole::Trace,
            content: "{}".into(),
            timestamp: 0,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"trace\""));
        let back: HistoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, HistoryRole::Trace);
    }
}
