//! Fan-out / join of one prompt across several models.

use std::sync::Arc;

use chorus_core::{Error, Result, UpstreamConfig};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::models::ModelCatalog;
use crate::types::{AggregateResponse, ModelResult};
use crate::upstream::UpstreamClient;

/// Stateless fan-out aggregator. Cheap to share behind an `Arc`.
pub struct Aggregator {
    upstream: Arc<UpstreamClient>,
    catalog: Arc<ModelCatalog>,
}

impl Aggregator {
    pub fn new(config: UpstreamConfig, catalog: Arc<ModelCatalog>) -> Result<Self> {
        Ok(Self {
            upstream: Arc::new(UpstreamClient::new(config)?),
            catalog,
        })
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &UpstreamConfig {
        self.upstream.config()
    }

    /// Send `prompt` to every model in `model_ids` concurrently and return
    /// one result per requested id, in request order.
    ///
    /// Fails only on an empty prompt or model list, a missing credential
    /// (both before any upstream call), or a task that panicked.
    pub async fn aggregate(&self, prompt: &str, model_ids: &[String]) -> Result<AggregateResponse> {
        if prompt.is_empty() {
            return Err(Error::InvalidRequest("message is required".into()));
        }
        if model_ids.is_empty() {
            return Err(Error::InvalidRequest("at least one model is required".into()));
        }

        let api_key: Arc<str> = match self.upstream.config().credential() {
            Some(key) => Arc::from(key),
            None => return Err(Error::Config("OpenRouter API key not configured".into())),
        };

        let prompt: Arc<str> = Arc::from(prompt);
        let permits = self
            .upstream
            .config()
            .max_concurrency
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n.min(Semaphore::MAX_PERMITS))));

        let mut slots: Vec<Option<ModelResult>> = Vec::with_capacity(model_ids.len());
        let mut pending: Vec<(usize, JoinHandle<ModelResult>)> = Vec::new();

        for (index, model_id) in model_ids.iter().enumerate() {
            let Some(upstream_model) = self.catalog.resolve(model_id) else {
                warn!("Model {} not supported", model_id);
                slots.push(Some(ModelResult::unsupported(model_id)));
                continue;
            };

            slots.push(None);
            let upstream = Arc::clone(&self.upstream);
            let api_key = Arc::clone(&api_key);
            let prompt = Arc::clone(&prompt);
            let permits = permits.clone();
            let model_id = model_id.clone();
            let upstream_model = upstream_model.to_string();

            let handle = tokio::spawn(async move {
                let _permit = match permits {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                upstream
                    .complete(&api_key, &model_id, &upstream_model, &prompt)
                    .await
            });
            pending.push((index, handle));
        }

        let (indices, handles): (Vec<usize>, Vec<_>) = pending.into_iter().unzip();
        let settled = join_all(handles).await;

        for (index, outcome) in indices.into_iter().zip(settled) {
            match outcome {
                Ok(result) => slots[index] = Some(result),
                Err(e) => {
                    error!("Upstream task for {} did not complete: {}", model_ids[index], e);
                    return Err(Error::Internal(format!("upstream task failed: {}", e)));
                }
            }
        }

        let results = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Internal("unfilled result slot".into()))?;

        let response = AggregateResponse { results };
        info!(
            "Aggregated {} models: {} ok, {} failed",
            response.results.len(),
            response.success_count(),
            response.results.len() - response.success_count()
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use crate::models::ModelEntry;
    use crate::upstream::NO_CONTENT_PLACEHOLDER;

    #[derive(Default)]
    struct StubState {
        hits: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        bodies: Mutex<Vec<Value>>,
        auth: Mutex<Vec<String>>,
    }

    async fn stub_completion(
        State(stub): State<Arc<StubState>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        stub.hits.fetch_add(1, Ordering::SeqCst);
        let now = stub.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stub.max_in_flight.fetch_max(now, Ordering::SeqCst);
        stub.bodies.lock().unwrap().push(body.clone());
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            stub.auth.lock().unwrap().push(auth.to_string());
        }

        let model = body["model"].as_str().unwrap_or_default().to_string();
        if model.starts_with("stub/slow") {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        if model == "stub/hang" {
            tokio::time::sleep(Duration::from_secs(3)).await;
        }

        let response = match model.as_str() {
            "stub/fail" => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": {"message": "upstream exploded"}})),
            )
                .into_response(),
            "stub/unavailable" => (StatusCode::SERVICE_UNAVAILABLE, "down for maintenance").into_response(),
            "stub/no-choices" => Json(json!({"id": "gen-1"})).into_response(),
            "stub/empty" => Json(json!({"choices": [{"message": {"content": ""}}]})).into_response(),
            "stub/garbage" => (StatusCode::OK, "this is not json").into_response(),
            _ => Json(json!({
                "choices": [{"message": {"role": "assistant", "content": format!("{} says hi", model)}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8},
            }))
            .into_response(),
        };

        stub.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }

    async fn spawn_stub() -> (String, Arc<StubState>) {
        let stub = Arc::new(StubState::default());
        let app = Router::new()
            .route("/api/v1/chat/completions", post(stub_completion))
            .with_state(stub.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/api/v1/chat/completions", addr), stub)
    }

    fn test_catalog() -> Arc<ModelCatalog> {
        Arc::new(ModelCatalog::from_entries(vec![
            ModelEntry::new("gpt-5", "openai/gpt-5"),
            ModelEntry::new("known-a", "stub/a"),
            ModelEntry::new("known-b", "stub/fail"),
            ModelEntry::new("down", "stub/unavailable"),
            ModelEntry::new("no-choices", "stub/no-choices"),
            ModelEntry::new("empty", "stub/empty"),
            ModelEntry::new("garbage", "stub/garbage"),
            ModelEntry::new("slow-1", "stub/slow-1"),
            ModelEntry::new("slow-2", "stub/slow-2"),
            ModelEntry::new("slow-3", "stub/slow-3"),
            ModelEntry::new("hang", "stub/hang"),
        ]))
    }

    fn test_config(url: &str) -> UpstreamConfig {
        UpstreamConfig {
            api_url: url.to_string(),
            api_key: Some("sk-test".into()),
            max_tokens: 600,
            timeout_secs: 10,
            ..Default::default()
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_known_and_unknown_models() {
        let (url, stub) = spawn_stub().await;
        let aggregator = Aggregator::new(test_config(&url), test_catalog()).unwrap();

        let response = aggregator
            .aggregate("Explain TCP", &ids(&["gpt-5", "bogus-model"]))
            .await
            .unwrap();

        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].model_id, "gpt-5");
        assert_eq!(response.results[0].content.as_deref(), Some("openai/gpt-5 says hi"));
        assert_eq!(response.results[0].usage.as_ref().unwrap()["total_tokens"], 8);
        assert_eq!(
            response.results[1],
            ModelResult::failure("bogus-model", "Model bogus-model not supported")
        );
        assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_payload() {
        let (url, stub) = spawn_stub().await;
        let aggregator = Aggregator::new(test_config(&url), test_catalog()).unwrap();

        aggregator.aggregate("Explain TCP", &ids(&["known-a"])).await.unwrap();

        let body = stub.bodies.lock().unwrap()[0].clone();
        assert_eq!(body["model"], "stub/a");
        assert_eq!(body["messages"], json!([{"role": "user", "content": "Explain TCP"}]));
        assert_eq!(body["max_tokens"], 600);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(stub.auth.lock().unwrap()[0], "Bearer sk-test");
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let (url, _stub) = spawn_stub().await;
        let aggregator = Aggregator::new(test_config(&url), test_catalog()).unwrap();

        let response = aggregator
            .aggregate("hello", &ids(&["known-a", "unknown-x", "known-b"]))
            .await
            .unwrap();

        let results = &response.results;
        assert_eq!(results[0].content.as_deref(), Some("stub/a says hi"));
        assert_eq!(results[1].error.as_deref(), Some("Model unknown-x not supported"));
        assert_eq!(results[2].error.as_deref(), Some("API Error: upstream exploded"));
        assert!(results[2].content.is_none());
    }

    #[tokio::test]
    async fn test_degraded_upstream_shapes() {
        let (url, _stub) = spawn_stub().await;
        let aggregator = Aggregator::new(test_config(&url), test_catalog()).unwrap();

        let response = aggregator
            .aggregate("hello", &ids(&["down", "no-choices", "empty", "garbage"]))
            .await
            .unwrap();

        let results = &response.results;
        assert_eq!(results[0].error.as_deref(), Some("API Error: Service Unavailable"));
        assert_eq!(results[1].content.as_deref(), Some(NO_CONTENT_PLACEHOLDER));
        assert!(results[1].usage.is_none());
        assert_eq!(results[2].content.as_deref(), Some(""));
        assert!(results[3].error.as_deref().unwrap().starts_with("Request failed: "));
    }

    #[tokio::test]
    async fn test_transport_failure() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("http://{}/api/v1/chat/completions", addr);
        let aggregator = Aggregator::new(test_config(&url), test_catalog()).unwrap();

        let response = aggregator
            .aggregate("hello", &ids(&["known-a", "bogus"]))
            .await
            .unwrap();
        assert!(response.results[0].error.as_deref().unwrap().starts_with("Request failed: "));
        assert_eq!(response.results[1].error.as_deref(), Some("Model bogus not supported"));
    }

    #[tokio::test]
    async fn test_order_follows_request_not_completion() {
        let (url, _stub) = spawn_stub().await;
        let aggregator = Aggregator::new(test_config(&url), test_catalog()).unwrap();

        let response = aggregator
            .aggregate("hello", &ids(&["slow-1", "known-a", "slow-1", "gpt-5"]))
            .await
            .unwrap();

        let order: Vec<&str> = response.results.iter().map(|r| r.model_id.as_str()).collect();
        assert_eq!(order, vec!["slow-1", "known-a", "slow-1", "gpt-5"]);
        assert_eq!(response.results[0].content.as_deref(), Some("stub/slow-1 says hi"));
        assert_eq!(response.results[2].content.as_deref(), Some("stub/slow-1 says hi"));
    }

    #[tokio::test]
    async fn test_calls_run_concurrently() {
        let (url, stub) = spawn_stub().await;
        let aggregator = Aggregator::new(test_config(&url), test_catalog()).unwrap();

        aggregator
            .aggregate("hello", &ids(&["slow-1", "slow-2", "slow-3"]))
            .await
            .unwrap();
        assert_eq!(stub.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let (url, stub) = spawn_stub().await;
        let config = UpstreamConfig {
            max_concurrency: Some(1),
            ..test_config(&url)
        };
        let aggregator = Aggregator::new(config, test_catalog()).unwrap();

        let response = aggregator
            .aggregate("hello", &ids(&["slow-1", "slow-2", "slow-3"]))
            .await
            .unwrap();
        assert_eq!(response.success_count(), 3);
        assert_eq!(stub.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_makes_no_calls() {
        let (url, stub) = spawn_stub().await;
        let aggregator = Aggregator::new(test_config(&url), test_catalog()).unwrap();

        let err = aggregator.aggregate("", &ids(&["known-a"])).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let err = aggregator.aggregate("hello", &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        assert_eq!(stub.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_credential_makes_no_calls() {
        let (url, stub) = spawn_stub().await;
        let config = UpstreamConfig {
            api_key: None,
            ..test_config(&url)
        };
        let aggregator = Aggregator::new(config, test_catalog()).unwrap();

        let err = aggregator
            .aggregate("hello", &ids(&["known-a", "bogus"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(stub.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repeated_aggregate_is_stable() {
        let (url, _stub) = spawn_stub().await;
        let aggregator = Aggregator::new(test_config(&url), test_catalog()).unwrap();
        let models = ids(&["known-a", "unknown-x", "known-b", "known-a"]);

        let first = aggregator.aggregate("hello", &models).await.unwrap();
        let second = aggregator.aggregate("hello", &models).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.results.len(), 4);
    }

    #[tokio::test]
    async fn test_oversized_concurrency_cap_is_clamped() {
        let (url, stub) = spawn_stub().await;
        let config = UpstreamConfig {
            max_concurrency: Some(usize::MAX),
            ..test_config(&url)
        };
        let aggregator = Aggregator::new(config, test_catalog()).unwrap();

        let response = aggregator
            .aggregate("hello", &ids(&["known-a", "slow-1"]))
            .await
            .unwrap();
        assert_eq!(response.success_count(), 2);
        assert_eq!(stub.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_fails_only_that_entry() {
        let (url, _stub) = spawn_stub().await;
        let config = UpstreamConfig {
            timeout_secs: 1,
            ..test_config(&url)
        };
        let aggregator = Aggregator::new(config, test_catalog()).unwrap();

        let response = aggregator
            .aggregate("hello", &ids(&["hang", "known-a"]))
            .await
            .unwrap();
        let results = &response.results;
        assert_eq!(results[0].model_id, "hang");
        assert!(results[0].error.as_deref().unwrap().starts_with("Request failed: "));
        assert!(results[0].content.is_none());
        assert_eq!(results[1].content.as_deref(), Some("stub/a says hi"));
    }
}
