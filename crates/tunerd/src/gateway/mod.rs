//! オーケストレーターの上の HTTP + WebSocket 層

mod error;
mod live;
mod rest;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tunerd_core::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(rest::health))
        .route("/api/tasks", post(rest::launch).get(rest::list))
        .route("/api/tasks/counts", get(rest::counts))
        .route("/api/tasks/:id", get(rest::status))
        .route("/api/tasks/:id/logs", get(rest::logs))
        .route("/ws", get(live::upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
