// cmsync-core: sync orchestration between cmsync-api and the trigger surfaces (CLI, HTTP, cron).

pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod schedule;
pub mod service;
pub mod store;
pub mod transform;
pub mod webhook;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{CatalogDatasetConfig, CatalogSettings, ModelConfig, SourceSettings, SyncConfig};
pub use error::CoreError;
pub use orchestrator::SyncEngine;
pub use schedule::{DailySchedule, run_daily};
pub use service::{SyncJob, SyncService, WorkerState};
pub use store::{HistoryStore, JobStore};

pub use model::{
    ConnectionReport, FieldMapping, FlexSyncRequest, JobDraft, ModelSyncStatus, ResourceMode,
    SavedJob, SyncOptions, SyncResult, SyncState, SyncStatus, TargetMode,
};
