// src/campaign/mod.rs

pub mod orchestrator;
pub mod registry;
pub mod state;

pub use orchestrator::{
    CampaignAction, CampaignDeps, CampaignOrchestrator, ChatOutcome, PipelinePlan,
    RegexTopicChangeDetector, TopicChangeDetector,
};
pub use registry::{CampaignHandle, CampaignRegistry};
