use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::broadcaster::{PeerState, PeerStatus};
use crate::server::state::AppState;

/// Broadcaster status report
#[derive(Debug, Serialize)]
pub struct BroadcasterStatus {
    pub cluster_id: String,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub active_peers: usize,
    pub peers: Vec<PeerStatus>,
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Status of every peer
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let peers = state.board.peers();
    let active_peers = peers
        .iter()
        .filter(|p| !matches!(p.state, PeerState::Terminated | PeerState::Stopped))
        .count();

    Json(BroadcasterStatus {
        cluster_id: state.cluster_id.clone(),
        hostname: state.hostname.clone(),
        started_at: state.started_at,
        active_peers,
        peers,
    })
}

/// Status of one peer
pub async fn peer_status(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
) -> Result<Json<PeerStatus>, StatusCode> {
    state.board.get(&peer_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/status/{peer_id}", get(peer_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
