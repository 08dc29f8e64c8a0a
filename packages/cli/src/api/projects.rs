use super::AppState;
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;
use codebox_sandbox::{ProjectId, RestoreStatus};
use serde_json::{json, Value};
use tracing::info;

pub async fn create_project(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let sandbox = state
        .provisioner
        .create_sandbox()
        .await
        .map_err(AppError::sandbox("create new project"))?;

    Ok(Json(json!({
        "message": "Project created successfully",
        "projectId": sandbox.project_id,
        "containerId": sandbox.container_id,
    })))
}

/// Ensure the project's sandbox is running, recreating the container on its
/// existing volume when needed
pub async fn restore_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let project_id: ProjectId = project_id.parse()?;

    let outcome = state
        .provisioner
        .restore_sandbox(&project_id)
        .await
        .map_err(AppError::sandbox("restore project"))?;

    let body = match outcome.status {
        RestoreStatus::Active => json!({ "message": "Container is already running" }),
        RestoreStatus::Restarted => {
            info!("Restored sandbox for {}", outcome.project_id);
            json!({
                "message": "Container restarted successfully",
                "projectId": outcome.project_id,
                "containerId": outcome.container_id,
            })
        }
    };
    Ok(Json(body))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let project_id: ProjectId = project_id.parse()?;

    state
        .provisioner
        .delete_sandbox(&project_id)
        .await
        .map_err(AppError::sandbox("delete project"))?;

    Ok(Json(json!({ "message": "Project deleted successfully" })))
}

pub async fn preview_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let project_id: ProjectId = project_id.parse()?;

    let url = state
        .provisioner
        .preview_address(&project_id)
        .await
        .map_err(AppError::sandbox("resolve preview address"))?;

    Ok(Json(json!({ "projectId": project_id, "url": url })))
}
