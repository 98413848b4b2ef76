// ── Sync result domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle of one model sync attempt.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncState {
    #[default]
    Pending,
    InProgress,
    Success,
    Partial,
    Failed,
}

impl SyncState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Partial | Self::Failed)
    }
}

/// One sync attempt for one model. Mutated only while in progress,
/// then appended to history and never touched again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub model_id: String,
    pub status: SyncState,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub records_fetched: usize,
    #[serde(default)]
    pub records_transformed: usize,
    #[serde(default)]
    pub resources_uploaded: usize,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub dataset_url: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl SyncResult {
    /// Open a new in-progress result stamped with the current time.
    pub fn start(model_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            model_id: model_id.into(),
            status: SyncState::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            records_fetched: 0,
            records_transformed: 0,
            resources_uploaded: 0,
            dataset_id: None,
            dataset_url: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            dry_run,
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.status = SyncState::Failed;
    }

    /// Freeze the result. A run still marked in progress becomes a success.
    pub fn finish(&mut self) {
        if !self.status.is_terminal() {
            self.status = SyncState::Success;
        }
        self.completed_at = Some(Utc::now());
    }

    pub fn is_failed(&self) -> bool {
        self.status == SyncState::Failed
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Per-run switches for the canonical sync path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub update_resource_id: Option<String>,
}

impl SyncOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

// ── Derived snapshots ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ModelSyncStatus {
    pub model_id: String,
    pub cms_model_id: String,
    pub dataset_name: String,
    pub last_sync: Option<SyncResult>,
    pub is_syncing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub is_running: bool,
    pub current_model: Option<String>,
    pub models: Vec<ModelSyncStatus>,
    pub last_run: Option<DateTime<Utc>>,
    pub total_syncs: usize,
    pub successful_syncs: usize,
    pub failed_syncs: usize,
}

/// Reachability of both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub source: bool,
    pub catalog: bool,
}

impl ConnectionReport {
    pub fn all_ok(self) -> bool {
        self.source && self.catalog
    }
}
