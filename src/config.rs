//! Agent configuration
//!
//! Row caps and model settings vary by deployment; everything tunable lives
//! here with defaults instead of constants scattered through the pipeline.

use std::time::Duration;

/// Process-wide configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier for the inference capability
    pub model: String,

    /// Base URL of the OpenAI-compatible chat completions API
    pub base_url: String,

    /// API key (empty means unauthenticated, e.g. a local server)
    pub api_key: String,

    /// Sampling temperature; query generation needs determinism
    pub temperature: f32,

    /// Hard timeout for a single inference call
    pub request_timeout: Duration,

    /// Result rows retained by the executor before truncation kicks in
    pub max_result_rows: usize,

    /// Advisory sample rows included per table in the schema description
    pub sample_rows_per_table: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            temperature: 0.0,
            request_timeout: Duration::from_secs(30),
            max_result_rows: 10,
            sample_rows_per_table: 3,
        }
    }
}

impl AgentConfig {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut config = Self::default();
        if let Ok(model) = std::env::var("ASKDB_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            config.api_key = api_key;
        }
        if let Some(secs) = env_parse("ASKDB_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(rows) = env_parse("ASKDB_MAX_RESULT_ROWS") {
            config.max_result_rows = rows;
        }
        if let Some(rows) = env_parse("ASKDB_SAMPLE_ROWS") {
            config.sample_rows_per_table = rows;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
