use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::flexible::FlexSyncRequest;

/// A named, reusable flexible-sync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedJob {
    pub job_id: Uuid,
    pub name: String,
    pub config: FlexSyncRequest,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

/// Caller-supplied part of a saved job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDraft {
    pub name: String,
    pub config: FlexSyncRequest,
}
