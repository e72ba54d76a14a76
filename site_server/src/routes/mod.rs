//! HTTP routes: worker callback and health.

pub mod tasks;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;

use statichost_builds::BuildService;

use crate::services::signature::CallbackAuth;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: BuildService,
    pub callback_auth: CallbackAuth,
}

/// Build the server's Axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks/run-build", post(run_build_handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn run_build_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<tasks::RunBuildResponse>, StatusCode> {
    tasks::handle_run_build(&state, &headers, body).await
}
