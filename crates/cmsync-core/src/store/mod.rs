// ── On-disk JSON stores ──
//
// Both stores keep their full contents in memory behind a tokio RwLock
// and rewrite the file on every mutation (write to a sibling temp file,
// then rename).

mod history;
mod jobs;

pub use history::{HISTORY_CAP, HistoryStore};
pub use jobs::JobStore;

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::CoreError;

/// Load a JSON array, treating a missing file as empty. A corrupt file
/// is logged and ignored so a bad write never wedges the service.
async fn load_array<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read store file");
            return Vec::new();
        }
    };

    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "store file is not a valid JSON array, starting empty");
        Vec::new()
    })
}

async fn persist<T: Serialize>(path: &Path, items: &[T]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
