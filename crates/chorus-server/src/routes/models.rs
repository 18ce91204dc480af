//! Model catalog listing.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chorus_chat::ModelInfo;

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/models", get(list_models))
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<ModelInfo>> {
    Json(
        state
            .aggregator
            .catalog()
            .entries()
            .iter()
            .map(ModelInfo::from)
            .collect(),
    )
}
