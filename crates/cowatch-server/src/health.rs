use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::state::AppState;
use crate::store::ACTIVE_ROOMS_KEY;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: ConnectionInfo,
    pub rooms: RoomInfo,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub websocket: usize,
    pub lobby: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    /// `None` when the store could not be read.
    pub active: Option<usize>,
    pub voice_active: usize,
}

/// Process-local connection counts plus the shared room registry size.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let websocket = state.ws_connection_count.load(Ordering::Relaxed);
    let lobby = state.gateway.lobby_count().await;
    let active = match state.store.smembers(ACTIVE_ROOMS_KEY).await {
        Ok(codes) => Some(codes.len()),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read room registry");
            None
        },
    };
    let status = if active.is_some() { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        connections: ConnectionInfo { websocket, lobby },
        rooms: RoomInfo {
            active,
            voice_active: state.voice.active_rooms().await,
        },
    })
}

/// Readiness check: the store must answer.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "not ready: store unavailable")
        },
    }
}
