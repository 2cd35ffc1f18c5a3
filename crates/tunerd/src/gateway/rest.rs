use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;
use tunerd_core::app::{LaunchReceipt, TaskStatusView};
use tunerd_core::domain::{LaunchRequest, StreamKind, TaskCounts, TaskId, TaskRecord};

use super::AppState;
use super::error::ApiError;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn launch(
    State(state): State<AppState>,
    Json(request): Json<LaunchRequest>,
) -> Result<(StatusCode, Json<LaunchReceipt>), ApiError> {
    let receipt = state.orchestrator.lifecycle.launch(request).await?;
    info!(task_id = %receipt.task_id, "launched via api");
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<TaskRecord>>, ApiError> {
    Ok(Json(state.orchestrator.lifecycle.list().await?))
}

pub async fn counts(State(state): State<AppState>) -> Result<Json<TaskCounts>, ApiError> {
    Ok(Json(state.orchestrator.lifecycle.counts().await?))
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusView>, ApiError> {
    let task_id = TaskId::parse(&id)?;
    Ok(Json(state.orchestrator.lifecycle.status(&task_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    stream: Option<StreamKind>,
    #[serde(default)]
    tail: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogTail {
    task_id: TaskId,
    stream: StreamKind,
    lines: Vec<String>,
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogTail>, ApiError> {
    let task_id = TaskId::parse(&id)?;
    let stream = query.stream.unwrap_or(StreamKind::Stdout);
    let lines = state
        .orchestrator
        .lifecycle
        .read_log(&task_id, stream, query.tail)
        .await?;
    Ok(Json(LogTail {
        task_id,
        stream,
        lines,
    }))
}
