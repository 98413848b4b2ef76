//! Health, status, history, models, connectivity and sync triggers.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use cmsync_core::store::HISTORY_CAP;
use cmsync_core::{
    ConnectionReport, FlexSyncRequest, SyncJob, SyncOptions, SyncResult, SyncState, SyncStatus,
};

use super::AppState;
use super::error::AppResult;

const DEFAULT_HISTORY_LIMIT: usize = 20;

// ── Health ───────────────────────────────────────────────────────────

/// GET /health -- liveness plus whether a sync is running. No auth.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "is_syncing": state.service.is_syncing(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// ── Read side ────────────────────────────────────────────────────────

pub async fn status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.service.status().await)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /api/history?limit= -- newest first, at most 100.
pub async fn history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> AppResult<Json<Vec<SyncResult>>> {
    let Query(query) = query?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(HISTORY_CAP);
    Ok(Json(state.service.history(limit).await))
}

/// GET /api/models -- configured models keyed by id.
pub async fn models(State(state): State<AppState>) -> Json<IndexMap<String, Value>> {
    let models = state
        .service
        .config()
        .models
        .iter()
        .map(|(id, model)| {
            (
                id.clone(),
                json!({
                    "cms_model_id": model.cms_model_id,
                    "ckan_dataset": {
                        "name": model.dataset.name,
                        "title": model.dataset.title,
                    },
                    "geometry_field": model.geometry_field(),
                }),
            )
        })
        .collect();
    Json(models)
}

pub async fn test_connections(State(state): State<AppState>) -> Json<ConnectionReport> {
    Json(state.service.test_connections().await)
}

// ── Catalog browsing ─────────────────────────────────────────────────

/// GET /api/catalog/datasets -- datasets of the configured organization.
pub async fn catalog_datasets(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let datasets: Vec<Value> = state
        .service
        .engine()
        .catalog_datasets()
        .await?
        .into_iter()
        .map(|d| {
            json!({
                "id": d.id,
                "name": d.name,
                "title": d.title,
                "num_resources": d.num_resources,
            })
        })
        .collect();
    Ok(Json(json!({ "datasets": datasets })))
}

/// GET /api/catalog/datasets/{dataset_id}/resources
pub async fn catalog_resources(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> AppResult<Json<Value>> {
    let resources: Vec<Value> = state
        .service
        .engine()
        .catalog_resources(&dataset_id)
        .await?
        .into_iter()
        .map(|r| {
            json!({
                "id": r.id,
                "name": r.name,
                "format": r.format,
                "size": r.extra.get("size"),
                "created": r.extra.get("created"),
            })
        })
        .collect();
    Ok(Json(json!({ "resources": resources })))
}

// ── Sync triggers ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Create,
    Update,
}

/// Body of `POST /api/sync`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncRequest {
    #[serde(default)]
    pub models: Option<Vec<String>>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// Used when `sync_mode` is `update`.
    #[serde(default)]
    pub resource_id: Option<String>,
}

impl SyncRequest {
    fn job(self) -> SyncJob {
        let update_resource_id = match self.sync_mode {
            SyncMode::Update => self.resource_id.filter(|id| !id.trim().is_empty()),
            SyncMode::Create => None,
        };
        let options = SyncOptions {
            dry_run: self.dry_run,
            force: self.force,
            update_resource_id,
        };
        SyncJob::select(self.models, options, true)
    }
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<SyncResult>,
}

impl SyncResponse {
    fn new(results: Vec<SyncResult>, mode: SyncMode, dry_run: bool) -> Self {
        let total = results.len();
        let failed = results.iter().filter(|r| r.is_failed()).count();
        let message = if dry_run {
            format!("Dry run completed: {total} models processed")
        } else {
            let verb = match mode {
                SyncMode::Create => "Sync",
                SyncMode::Update => "Update",
            };
            format!("{verb} completed: {}/{total} successful", total - failed)
        };
        Self {
            success: results.iter().all(|r| r.status == SyncState::Success),
            message,
            results,
        }
    }
}

/// POST /api/sync -- runs the sync and answers with its results; 409
/// while another sync holds the slot.
pub async fn sync(
    State(state): State<AppState>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> AppResult<Json<SyncResponse>> {
    let Json(request) = payload?;
    let (mode, dry_run) = (request.sync_mode, request.dry_run);
    info!(
        models = ?request.models,
        dry_run,
        force = request.force,
        mode = ?mode,
        "sync requested over HTTP"
    );

    let results = state.service.run(request.job()).await?;
    Ok(Json(SyncResponse::new(results, mode, dry_run)))
}

/// POST /api/sync/flexible -- ad-hoc sync; invalid requests are refused
/// before anything is fetched.
pub async fn sync_flexible(
    State(state): State<AppState>,
    payload: Result<Json<FlexSyncRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(request) = payload?;
    request.validate()?;
    info!(
        model = %request.cms_model_id,
        target_mode = %request.target_mode,
        "flexible sync requested over HTTP"
    );

    let result = state.service.run_flexible(request).await?;
    let success = result.status == SyncState::Success;
    Ok(Json(json!({
        "success": success,
        "message": if success { "Sync completed" } else { "Sync failed" },
        "result": result,
    })))
}
