// src/config.rs

use serde::Deserialize;

#[derive(Deserialize, Clone)]
pub struct Config {
    // API keys
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_gemini_api_base_url")]
    pub gemini_api_base_url: String,

    // Qdrant config
    pub qdrant_url: Option<String>,
    #[serde(default = "default_qdrant_collection_name")]
    pub qdrant_collection_name: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: u64,

    // Model configuration
    #[serde(default = "default_agent_model")]
    pub agent_model: String, // Model for all agent completions
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String, // Model for vector embeddings

    // Chunking config
    #[serde(default = "default_chunking_max_size")]
    pub chunking_max_size: usize,
    #[serde(default = "default_chunking_overlap")]
    pub chunking_overlap: usize,

    // Retry config for the agent invoker
    #[serde(default = "default_llm_max_retries")]
    pub llm_max_retries: u32,
    #[serde(default = "default_llm_base_delay_ms")]
    pub llm_base_delay_ms: u64,

    // Review loop caps
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,
    #[serde(default = "default_max_exec_attempts")]
    pub max_exec_attempts: u32,

    // Dynamic workflow cap
    #[serde(default = "default_max_workflow_steps")]
    pub max_workflow_steps: usize,

    // Event discovery cap
    #[serde(default = "default_max_scout_iterations")]
    pub max_scout_iterations: u32,
}

fn default_gemini_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_qdrant_collection_name() -> String {
    "project_knowledge".to_string()
}

fn default_embedding_dimension() -> u64 {
    768 // text-embedding-004
}

fn default_agent_model() -> String {
    "gemini-flash-lite-latest".to_string()
}

fn default_embedding_model() -> String {
    "models/text-embedding-004".to_string()
}

fn default_chunking_max_size() -> usize {
    1200
}

fn default_chunking_overlap() -> usize {
    120
}

fn default_llm_max_retries() -> u32 {
    5
}

fn default_llm_base_delay_ms() -> u64 {
    2000
}

fn default_max_revisions() -> u32 {
    5
}

fn default_max_exec_attempts() -> u32 {
    5
}

fn default_max_workflow_steps() -> usize {
    20
}

fn default_max_scout_iterations() -> u32 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_api_base_url: default_gemini_api_base_url(),
            qdrant_url: None,
            qdrant_collection_name: default_qdrant_collection_name(),
            embedding_dimension: default_embedding_dimension(),
            agent_model: default_agent_model(),
            embedding_model: default_embedding_model(),
            chunking_max_size: default_chunking_max_size(),
            chunking_overlap: default_chunking_overlap(),
            llm_max_retries: default_llm_max_retries(),
            llm_base_delay_ms: default_llm_base_delay_ms(),
            max_revisions: default_max_revisions(),
            max_exec_attempts: default_max_exec_attempts(),
            max_workflow_steps: default_max_workflow_steps(),
            max_scout_iterations: default_max_scout_iterations(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment. Missing variables
    /// fall back to the serde defaults above.
    pub fn load_from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.gemini_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("QDRANT_URL") {
            config.qdrant_url = Some(url);
        }
        if let Ok(name) = std::env::var("QDRANT_COLLECTION_NAME") {
            config.qdrant_collection_name = name;
        }
        if let Ok(model) = std::env::var("AGENT_MODEL") {
            config.agent_model = model;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_caps() {
        let config = Config::default();
        assert_eq!(config.max_revisions, 5);
        assert_eq!(config.max_exec_attempts, 5);
        assert_eq!(config.max_workflow_steps, 20);
        assert_eq!(config.max_scout_iterations, 5);
        assert_eq!(config.chunking_max_size, 1200);
        assert_eq!(config.chunking_overlap, 120);
    }
}
