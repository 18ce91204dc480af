//! Single chat-completion call against the upstream provider.
//!
//! Every outcome, including transport failures, is folded into a
//! [`ModelResult`]; nothing here returns an error to the caller.

use std::time::Duration;

use chorus_core::{Error, Result, UpstreamConfig};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{ChatMessage, ModelResult};

/// Content reported when a successful response carries no message text.
pub const NO_CONTENT_PLACEHOLDER: &str = "No response content";

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage; 1],
    max_tokens: u32,
    temperature: f64,
}

/// HTTP client bound to one upstream endpoint.
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Send `prompt` to `upstream_model` and describe the outcome as the
    /// result for `model_id`.
    pub async fn complete(
        &self,
        api_key: &str,
        model_id: &str,
        upstream_model: &str,
        prompt: &str,
    ) -> ModelResult {
        let body = CompletionRequest {
            model: upstream_model,
            messages: [ChatMessage::user(prompt)],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        debug!("Calling {} for {} ({})", self.config.api_url, model_id, upstream_model);

        let response = match self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Upstream request for {} failed: {}", model_id, e);
                return ModelResult::failure(model_id, format!("Request failed: {}", e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = upstream_error_message(status, &text);
            warn!("Upstream rejected {} with {}: {}", model_id, status, message);
            return ModelResult::failure(model_id, format!("API Error: {}", message));
        }

        match response.json::<Value>().await {
            Ok(data) => parse_completion(model_id, &data),
            Err(e) => {
                warn!("Undecodable upstream response for {}: {}", model_id, e);
                ModelResult::failure(model_id, format!("Request failed: {}", e))
            }
        }
    }
}

/// Extract the first choice's text and the usage object from a completion
/// envelope. Missing pieces degrade to the placeholder / no usage.
pub fn parse_completion(model_id: &str, data: &Value) -> ModelResult {
    let content = data["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or(NO_CONTENT_PLACEHOLDER);
    let usage = data.get("usage").filter(|u| !u.is_null()).cloned();
    ModelResult::success(model_id, content, usage)
}

/// Best-effort message from an upstream error body: `error.message` when the
/// body is JSON and carries one, else the HTTP status text.
pub fn upstream_error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.as_str().to_string())
        })
}
