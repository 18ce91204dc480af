//! Chat routes: fan one prompt out to several models.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chorus_chat::{AggregateResponse, ChatRequest, ChatStatus, ModelResult};
use chorus_core::Error;
use chorus_store::Role;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{user_id, ApiError};
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/status", get(get_status))
}

/// `/api/chat` success body.
#[derive(Debug, Serialize)]
struct ChatResponse {
    responses: Vec<ModelResult>,
    /// Id of the stored prompt, when the exchange was recorded.
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
}

async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return Err(Error::InvalidRequest(rejection.body_text()).into());
        }
    };

    let message = req.message.unwrap_or_default();
    let models = req.models.unwrap_or_default();
    info!("Chat request for {} models", models.len());

    let response = state.aggregator.aggregate(&message, &models).await?;

    let message_id = match (req.session_id.as_deref(), user_id(&headers)) {
        (Some(session_id), Some(user)) => record_exchange(&state, &user, session_id, &message, &response),
        _ => None,
    };

    Ok(Json(ChatResponse {
        responses: response.results,
        message_id,
    }))
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<ChatStatus> {
    let upstream = &state.config.upstream;
    Json(ChatStatus {
        upstream_configured: upstream.credential().is_some(),
        models: state.aggregator.catalog().ids(),
        max_tokens: upstream.max_tokens,
        temperature: upstream.temperature,
    })
}

/// Store the prompt and every successful model answer. Storage problems are
/// logged and never change the chat outcome.
fn record_exchange(
    state: &AppState,
    user_id: &str,
    session_id: &str,
    prompt: &str,
    response: &AggregateResponse,
) -> Option<String> {
    let message = match state
        .store
        .add_message(user_id, session_id, Role::User, prompt, None)
    {
        Ok(m) => m,
        Err(e) => {
            warn!("Not recording chat in session {}: {}", session_id, e);
            return None;
        }
    };

    let answers: Vec<(String, String)> = response
        .results
        .iter()
        .filter_map(|r| r.content.as_ref().map(|c| (r.model_id.clone(), c.clone())))
        .collect();

    if let Err(e) = state.store.add_model_responses(&message.id, &answers) {
        warn!("Failed to store responses for message {}: {}", message.id, e);
    } else {
        debug!("Recorded {} responses for message {}", answers.len(), message.id);
    }

    Some(message.id)
}
