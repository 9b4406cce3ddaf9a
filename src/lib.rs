pub mod agents;
pub mod campaign;
pub mod config;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod services;
pub mod state;
pub mod storage;
pub mod text_processing;
pub mod vector_db;
pub mod workflow;

// Re-export AppState for convenience
pub use state::AppState;
