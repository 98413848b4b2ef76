// ── Core error types ──
//
// Errors surfaced by the sync service to its callers (CLI, HTTP API,
// webhook, scheduler). Failures *inside* a model sync never use this
// type: they are recorded on the `SyncResult` instead.

use thiserror::Error;

use cmsync_api::{CatalogError, SourceError};

use crate::transform::TransformError;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Gate ─────────────────────────────────────────────────────────
    /// Another sync holds the single execution slot.
    #[error("A sync is already in progress")]
    Busy { current: Option<String> },

    #[error("Sync worker is not running")]
    WorkerStopped,

    // ── Lookups ──────────────────────────────────────────────────────
    #[error("Model not found in configuration: {model_id}")]
    ModelNotFound { model_id: String },

    #[error("Saved job not found: {job_id}")]
    JobNotFound { job_id: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Upstream ─────────────────────────────────────────────────────
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    // ── Persistence ──────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModelNotFound { .. } | Self::JobNotFound { .. })
    }
}
