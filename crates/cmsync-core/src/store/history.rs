use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{debug, error};

use super::{load_array, persist};
use crate::model::{SyncResult, SyncState};

/// Maximum number of entries kept on disk.
pub const HISTORY_CAP: usize = 100;

/// Append-only, capped journal of sync results.
///
/// Readers see only completed entries; results are appended after a
/// run finishes.
pub struct HistoryStore {
    path: PathBuf,
    entries: RwLock<Vec<SyncResult>>,
}

impl HistoryStore {
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entries: Vec<SyncResult> = load_array(&path).await;
        trim(&mut entries);
        debug!(path = %path.display(), entries = entries.len(), "history loaded");
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    /// Append a finished result and persist. A write failure is logged;
    /// the in-memory journal still keeps the entry.
    pub async fn append(&self, result: SyncResult) {
        let mut entries = self.entries.write().await;
        entries.push(result);
        trim(&mut entries);
        if let Err(e) = persist(&self.path, &entries).await {
            error!(path = %self.path.display(), error = %e, "failed to persist sync history");
        }
    }

    /// Newest first.
    pub async fn recent(&self, limit: usize) -> Vec<SyncResult> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn latest_for(&self, model_id: &str) -> Option<SyncResult> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.model_id == model_id)
            .cloned()
    }

    /// Oldest first.
    pub async fn all(&self) -> Vec<SyncResult> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn count_with(&self, state: SyncState) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|r| r.status == state)
            .count()
    }
}

fn trim(entries: &mut Vec<SyncResult>) {
    if entries.len() > HISTORY_CAP {
        let excess = entries.len() - HISTORY_CAP;
        entries.drain(..excess);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn finished(model_id: &str) -> SyncResult {
        let mut result = SyncResult::start(model_id, false);
        result.finish();
        result
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("sync_history.json")).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn append_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/sync_history.json");

        let store = HistoryStore::open(&path).await;
        store.append(finished("a")).await;
        store.append(finished("b")).await;

        let reopened = HistoryStore::open(&path).await;
        let recent = reopened.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].model_id, "b");
        assert_eq!(reopened.latest_for("a").await.unwrap().model_id, "a");
    }

    #[tokio::test]
    async fn journal_is_capped_keeping_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("h.json")).await;
        for i in 0..(HISTORY_CAP + 5) {
            store.append(finished(&format!("m{i}"))).await;
        }
        assert_eq!(store.len().await, HISTORY_CAP);
        let all = store.all().await;
        assert_eq!(all[0].model_id, "m5");
        assert_eq!(all[HISTORY_CAP - 1].model_id, format!("m{}", HISTORY_CAP + 4));
    }

    #[tokio::test]
    async fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = HistoryStore::open(&path).await;
        assert!(store.is_empty().await);
        store.append(finished("a")).await;
        assert_eq!(store.count_with(SyncState::Success).await, 1);
    }
}
