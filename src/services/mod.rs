// src/services/mod.rs

pub mod context_router;
pub mod knowledge;
pub mod knowledge_indexer;
pub mod run_log;
pub mod usage;
