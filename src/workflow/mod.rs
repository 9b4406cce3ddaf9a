// src/workflow/mod.rs

pub mod event_scout;
pub mod task_runner;

pub use task_runner::{
    ExecReviewVerdict, Job, TaskRunner, WorkflowCallback, WorkflowKind, WorkflowParams,
};
