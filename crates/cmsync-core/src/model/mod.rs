// ── Domain model ──

pub mod flexible;
pub mod job;
pub mod sync;

pub use flexible::{FieldMapping, FlexSyncRequest, ResourceMode, TargetMode};
pub use job::{JobDraft, SavedJob};
pub use sync::{
    ConnectionReport, ModelSyncStatus, SyncOptions, SyncResult, SyncState, SyncStatus,
};
