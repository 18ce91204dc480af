//! Chat types matching the browser UI's API surface.

use serde::{Deserialize, Serialize};

use crate::models::ModelEntry;

/// Single message in an upstream conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Incoming `/api/chat` request.
///
/// Both fields are optional at the wire level so that a missing field is
/// reported as an invalid request rather than a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub models: Option<Vec<String>>,
    /// Conversation to record the exchange under.
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Outcome of one upstream call. Exactly one of `content` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    #[serde(rename = "modelId")]
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Provider token accounting, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
}

impl ModelResult {
    pub fn success(
        model_id: impl Into<String>,
        content: impl Into<String>,
        usage: Option<serde_json::Value>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            content: Some(content.into()),
            error: None,
            usage,
        }
    }

    pub fn failure(model_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            content: None,
            error: Some(error.into()),
            usage: None,
        }
    }

    pub fn unsupported(model_id: &str) -> Self {
        Self::failure(model_id, format!("Model {} not supported", model_id))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Results for one prompt, positionally aligned with the requested models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResponse {
    #[serde(rename = "responses")]
    pub results: Vec<ModelResult>,
}

impl AggregateResponse {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}

/// Public view of a catalog entry; the upstream id stays server-side.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub description: String,
}

impl From<&ModelEntry> for ModelInfo {
    fn from(entry: &ModelEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            provider: entry.provider.clone(),
            description: entry.description.clone(),
        }
    }
}

/// Chat status response.
#[derive(Debug, Clone, Serialize)]
pub struct ChatStatus {
    #[serde(rename = "upstreamConfigured")]
    pub upstream_configured: bool,
    pub models: Vec<String>,
    #[serde(rename = "maxTokens")]
    pub max_tokens: u32,
    pub temperature: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_omits_absent_fields() {
        let ok = ModelResult::success("gpt-5", "TCP is...", Some(json!({"total_tokens": 8})));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["modelId"], "gpt-5");
        assert_eq!(value["content"], "TCP is...");
        assert_eq!(value["usage"]["total_tokens"], 8);
        assert!(value.get("error").is_none());

        let failed = ModelResult::unsupported("bogus-model");
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["error"], "Model bogus-model not supported");
        assert!(value.get("content").is_none());
        assert!(value.get("usage").is_none());
    }

    #[test]
    fn test_empty_content_is_success() {
        let result = ModelResult::success("deepseek", "", None);
        assert!(result.is_success());
        assert_eq!(serde_json::to_value(&result).unwrap()["content"], "");
    }

    #[test]
    fn test_request_tolerates_missing_fields() {
        let req: ChatRequest = serde_json::from_value(json!({})).unwrap();
        assert!(req.message.is_none());
        assert!(req.models.is_none());

        let req: ChatRequest = serde_json::from_value(json!({
            "message": "hi",
            "models": ["gpt-5", "gpt-5"],
            "sessionId": "abc",
        }))
        .unwrap();
        assert_eq!(req.models.unwrap(), vec!["gpt-5", "gpt-5"]);
        assert_eq!(req.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_request_rejects_non_string_models() {
        let parsed = serde_json::from_value::<ChatRequest>(json!({
            "message": "hi",
            "models": "gpt-5",
        }));
        assert!(parsed.is_err());

        let parsed = serde_json::from_value::<ChatRequest>(json!({
            "message": "hi",
            "models": [1, 2],
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_aggregate_wire_name() {
        let response = AggregateResponse {
            results: vec![ModelResult::unsupported("x")],
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value["responses"].is_array());
        assert_eq!(response.success_count(), 0);
    }
}
