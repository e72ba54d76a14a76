//! Worker callback. The push queue delivers a [`BuildTask`] and the build
//! runs within the request.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::Serialize;

use statichost_builds::model::{Build, BuildStatus};
use statichost_builds::queue::BuildTask;
use statichost_builds::Error;

use super::AppState;
use crate::services::signature::SIGNATURE_HEADER;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunBuildResponse {
    pub build_id: i64,
    pub status: BuildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl From<Build> for RunBuildResponse {
    fn from(build: Build) -> Self {
        Self {
            build_id: build.id,
            status: build.status,
            failure_message: build.failure_message,
        }
    }
}

/// Handle one delivered task.
///
/// Answers 409 when the site already has a running build so the push queue
/// retries later; a task for a build that already ran is acknowledged with
/// the build's current state.
pub async fn handle_run_build(
    state: &AppState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Json<RunBuildResponse>, StatusCode> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !state.callback_auth.verify(&body, signature) {
        tracing::warn!("Task signature validation failed");
        crate::metrics::task_received("unauthorized");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let task: BuildTask = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!("Malformed build task: {e}");
        crate::metrics::task_received("malformed");
        StatusCode::BAD_REQUEST
    })?;

    match state.service.run_build(task.build_id).await {
        Ok(build) => {
            crate::metrics::task_received("finished");
            Ok(Json(build.into()))
        }
        Err(e) if e.is_concurrent_build() => {
            crate::metrics::task_received("rejected");
            Err(StatusCode::CONFLICT)
        }
        Err(Error::BuildNotFound { build_id }) => {
            tracing::warn!(build_id, "Task for unknown build");
            crate::metrics::task_received("unknown");
            Err(StatusCode::NOT_FOUND)
        }
        Err(Error::InvalidStatusTransition { from, .. }) => {
            tracing::info!(
                build_id = task.build_id,
                status = %from,
                "Task redelivered for a build that already ran"
            );
            crate::metrics::task_received("duplicate");
            state
                .service
                .get_build(task.build_id)
                .await
                .map(|build| Json(build.into()))
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            tracing::error!(build_id = task.build_id, "Run build error: {e}");
            crate::metrics::task_received("error");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
