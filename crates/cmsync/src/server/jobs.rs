//! Saved flexible-sync jobs: CRUD plus run-now.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

use cmsync_core::{CoreError, JobDraft, SavedJob, SyncState};

use super::AppState;
use super::error::AppResult;

/// Unparseable ids are reported the same as unknown ones.
fn job_id(raw: &str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(raw).map_err(|_| CoreError::JobNotFound {
        job_id: raw.to_owned(),
    })
}

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "jobs": state.service.jobs().list().await }))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<SavedJob>> {
    let job = state.service.jobs().get(job_id(&id)?).await?;
    Ok(Json(job))
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<JobDraft>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(draft) = payload?;
    let job = state.service.jobs().create(draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "job": job })),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<JobDraft>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(draft) = payload?;
    let job = state.service.jobs().update(job_id(&id)?, draft).await?;
    Ok(Json(json!({ "success": true, "job": job })))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    state.service.jobs().delete(job_id(&id)?).await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/jobs/{id}/run -- runs through the sync gate; 409 when busy.
pub async fn run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let result = state.service.run_saved_job(job_id(&id)?).await?;
    Ok(Json(json!({
        "success": result.status == SyncState::Success,
        "result": result,
    })))
}
