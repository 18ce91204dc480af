//! Conversation history routes: sessions, messages, best-response marking.
//!
//! All routes require the `x-user-id` header and only ever see that user's
//! data.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chorus_core::Error;
use chorus_store::{ChatSession, MessageWithResponses, SessionSummary};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{require_user_id, ApiError};
use crate::state::AppState;

// ---------------------------------------------------------------
// Route builder
// ---------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route(
            "/sessions/{id}",
            get(get_session).patch(rename_session).delete(delete_session),
        )
        .route("/messages/{id}/best", post(mark_best))
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenameSessionRequest {
    title: String,
}

#[derive(Debug, Deserialize)]
struct MarkBestRequest {
    #[serde(rename = "modelId")]
    model_id: String,
}

#[derive(Debug, Serialize)]
struct SessionDetail {
    session: ChatSession,
    messages: Vec<MessageWithResponses>,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(req)| req)
        .map_err(|rejection| Error::InvalidRequest(rejection.body_text()).into())
}

// ---------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let user = require_user_id(&headers)?;
    Ok(Json(state.store.list_sessions(&user)?))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ChatSession>), ApiError> {
    let user = require_user_id(&headers)?;
    // The body is optional: no body creates an untitled session.
    let req: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| Error::InvalidRequest(e.to_string()))?
    };
    let session = state
        .store
        .create_session(&user, req.title.as_deref().unwrap_or_default())?;
    info!("Session {} created", session.id);
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let user = require_user_id(&headers)?;
    let session = state
        .store
        .get_session(&user, &id)?
        .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
    let messages = state.store.list_messages(&user, &id)?;
    Ok(Json(SessionDetail { session, messages }))
}

async fn rename_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<RenameSessionRequest>, JsonRejection>,
) -> Result<Json<ChatSession>, ApiError> {
    let user = require_user_id(&headers)?;
    let req = json_body(body)?;
    if !state.store.rename_session(&user, &id, &req.title)? {
        return Err(Error::NotFound(format!("session {}", id)).into());
    }
    let session = state
        .store
        .get_session(&user, &id)?
        .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
    Ok(Json(session))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = require_user_id(&headers)?;
    if state.store.delete_session(&user, &id)? {
        Ok(Json(serde_json::json!({ "success": true })))
    } else {
        Err(Error::NotFound(format!("session {}", id)).into())
    }
}

async fn mark_best(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<MarkBestRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = require_user_id(&headers)?;
    let req = json_body(body)?;
    if state.store.mark_best(&user, &id, &req.model_id)? {
        Ok(Json(serde_json::json!({ "success": true })))
    } else {
        Err(Error::NotFound(format!("response {} for message {}", req.model_id, id)).into())
    }
}
