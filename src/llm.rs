//! Inference capability
//!
//! `Inference` is the seam the pipeline talks through; `LlmClient` is the
//! production implementation speaking the OpenAI-compatible chat completions
//! protocol. Tests substitute stubs.

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;

/// External natural-language inference capability.
#[async_trait]
pub trait Inference: Send + Sync {
    /// One prompt, one response. Retries (if any) belong to the
    /// implementation, never to the pipeline components.
    async fn infer(&self, system: &str, user: &str) -> Result<String>;
}

pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl LlmClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::Inference(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Inference for LlmClient {
    async fn infer(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": self.temperature,
            "max_tokens": 1000
        });

        // A timeout surfaces as a plain reqwest error and therefore takes
        // the same failure path as any other inference error.
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Inference(format!("LLM API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Inference(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AgentError::Inference("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

/// Extract a JSON object or array from an LLM response, tolerating markdown
/// code fences and surrounding prose.
pub fn extract_json(response: &str) -> String {
    let json_start = response.find('[').or_else(|| response.find('{'));
    let json_end = response.rfind(']').or_else(|| response.rfind('}'));

    if let (Some(start), Some(end)) = (json_start, json_end) {
        if start <= end {
            return response[start..=end].to_string();
        }
    }

    if let Some(start) = response.find("```json") {
        let after_start = &response[start + 7..];
        if let Some(end) = after_start.find("```") {
            return after_start[..end].trim().to_string();
        }
    }
    if let Some(start) = response.find("```") {
        let after_start = &response[start + 3..];
        if let Some(end) = after_start.find("```") {
            return after_start[..end].trim().to_string();
        }
    }
    response.to_string()
}

/// Strip markdown code fences from a free-text response.
pub fn strip_fences(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```sql")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
