pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod lobby;
pub mod room_locks;
pub mod session;
pub mod state;
pub mod store;
pub mod sync;
pub mod voice;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use config::ServerConfig;
use state::AppState;
use store::{MemoryStore, SharedRepository};

/// Build the Axum router and application state on an in-process store.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    build_app_with_store(config, Arc::new(MemoryStore::new()))
}

/// Build the Axum router and application state on the given store.
pub fn build_app_with_store(
    config: ServerConfig,
    store: SharedRepository,
) -> (Router<()>, AppState) {
    let state = AppState::new(config, store);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    let api_routes = Router::new()
        .route("/rooms", get(api::list_rooms))
        .route("/rooms/check", get(api::check_room))
        .route("/rooms/code", post(api::new_room_code))
        .fallback(api::not_found);

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .nest("/api", api_routes)
        .layer(cors)
        .with_state(state.clone());

    (app, state)
}

/// Background task that rebuilds the lobby listing on request and on a
/// fixed interval.
pub fn spawn_lobby_refresher(state: &AppState) -> tokio::task::JoinHandle<()> {
    Arc::clone(&state.lobby).spawn()
}
