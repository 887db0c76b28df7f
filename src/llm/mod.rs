//! LLM transport (spec §6 "External LLM contract").
//!
//! A thin `reqwest`-based client for an Ollama-style `/api/generate` /
//! `/api/tags` endpoint, shaped like the teacher's `fleet::client::FleetClient`:
//! one client built once with a fixed timeout, a `thiserror` error enum, and
//! one async method per remote operation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::IntentKind;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    ServerError(reqwest::StatusCode),
    #[error("malformed response body: {0}")]
    Malformed(String),
    #[error("request timed out")]
    Timeout,
}

/// The decoded inner JSON payload the model is asked to produce (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedIntent {
    pub intent: String,
    pub confidence: f64,
    pub message: String,
    #[serde(default)]
    pub reasoning: String,
}

impl ParsedIntent {
    pub fn normalized_kind(&self) -> IntentKind {
        IntentKind::normalize(&self.intent)
    }
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Ollama-style HTTP transport. Cheap to clone (wraps an `Arc`-backed
/// `reqwest::Client`).
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Ask the model to classify the current context and propose an intent.
    /// Temperature is fixed at 0.7 per the external contract (spec §6).
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
    ) -> Result<ParsedIntent, LlmError> {
        let body = GenerateRequest {
            model,
            prompt,
            system,
            stream: false,
            format: "json",
            options: GenerateOptions { temperature: 0.7 },
        };

        let resp = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Http(e)
                }
            })?;

        if !resp.status().is_success() {
            return Err(LlmError::ServerError(resp.status()));
        }

        let wrapper: GenerateResponse = resp.json().await?;
        serde_json::from_str(&wrapper.response)
            .map_err(|e| LlmError::Malformed(e.to_string()))
    }

    /// List model names known to the endpoint, used by the autodetection
    /// fallback chain (spec §6).
    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let resp = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(LlmError::ServerError(resp.status()));
        }

        let tags: TagsResponse = resp.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// A quick reachability probe. Any successful `/api/tags` round trip
    /// counts as healthy; no model list is needed for this check.
    pub async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }
}

/// Resolve which model to actually request, per the fallback chain in
/// spec §6: the configured model, then `llama3.1:8b`, then `gemma3:4b`,
/// then whatever the endpoint listed first. Returns `None` if nothing
/// matches and the endpoint reported no models at all.
pub fn resolve_model(configured: &str, available: &[String]) -> Option<String> {
    const FALLBACKS: [&str; 2] = ["llama3.1:8b", "gemma3:4b"];

    if available.iter().any(|m| m == configured) {
        return Some(configured.to_string());
    }
    for candidate in FALLBACKS {
        if available.iter().any(|m| m == candidate) {
            return Some(candidate.to_string());
        }
    }
    available.first().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_model_prefers_configured() {
        let available = vec!["llama3.1:8b".to_string(), "gemma3:4b".to_string()];
        assert_eq!(
            resolve_model("gemma3:4b", &available),
            Some("gemma3:4b".to_string())
        );
    }

    #[test]
    fn resolve_model_falls_back_in_order() {
        let available = vec!["mistral:7b".to_string(), "gemma3:4b".to_string()];
        assert_eq!(
            resolve_model("missing:1b", &available),
            Some("gemma3:4b".to_string())
        );
    }

    #[test]
    fn resolve_model_uses_first_listed_as_last_resort() {
        let available = vec!["mistral:7b".to_string()];
        assert_eq!(
            resolve_model("missing:1b", &available),
            Some("mistral:7b".to_string())
        );
    }

    #[test]
    fn resolve_model_none_when_endpoint_empty() {
        let available: Vec<String> = vec![];
        assert_eq!(resolve_model("missing:1b", &available), None);
    }

    #[test]
    fn parsed_intent_normalizes_kind() {
        let parsed = ParsedIntent {
            intent: "suggest_help".to_string(),
            confidence: 0.8,
            message: "hi".to_string(),
            reasoning: "because".to_string(),
        };
        assert_eq!(parsed.normalized_kind(), IntentKind::SuggestHelp);
    }
}
