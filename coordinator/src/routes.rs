//! HTTP surface of the coordinator

use crate::state::{AppState, PeerEntry, PeerRegistration};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/kv/:key", put(put_key).get(get_key))
        .route("/peers", post(register_peer))
        .route("/peers/:service", get(list_peers))
        .route("/health", get(health))
        .with_state(state)
}

async fn put_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    value: String,
) -> StatusCode {
    tracing::debug!(key = %key, "kv put");
    state.put(key, value);
    StatusCode::NO_CONTENT
}

async fn get_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<String, StatusCode> {
    state.get(&key).ok_or(StatusCode::NOT_FOUND)
}

async fn register_peer(
    State(state): State<Arc<AppState>>,
    Json(registration): Json<PeerRegistration>,
) -> StatusCode {
    tracing::debug!(
        service = %registration.service,
        peer_id = %registration.peer_id,
        address = %registration.address,
        "peer registration"
    );
    state.register(registration);
    StatusCode::NO_CONTENT
}

async fn list_peers(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Json<Vec<PeerEntry>> {
    Json(state.list(&service))
}

async fn health() -> &'static str {
    "ok"
}
