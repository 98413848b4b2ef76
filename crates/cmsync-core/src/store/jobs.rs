use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::{load_array, persist};
use crate::error::CoreError;
use crate::model::{JobDraft, SavedJob};

/// Named flexible-sync configurations persisted as a JSON array.
pub struct JobStore {
    path: PathBuf,
    jobs: RwLock<Vec<SavedJob>>,
}

impl JobStore {
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let jobs = load_array(&path).await;
        Self {
            path,
            jobs: RwLock::new(jobs),
        }
    }

    pub async fn list(&self) -> Vec<SavedJob> {
        self.jobs.read().await.clone()
    }

    pub async fn get(&self, job_id: Uuid) -> Result<SavedJob, CoreError> {
        self.jobs
            .read()
            .await
            .iter()
            .find(|j| j.job_id == job_id)
            .cloned()
            .ok_or_else(|| not_found(job_id))
    }

    pub async fn create(&self, draft: JobDraft) -> Result<SavedJob, CoreError> {
        draft.config.validate()?;
        let job = SavedJob {
            job_id: Uuid::new_v4(),
            name: draft.name,
            config: draft.config,
            created_at: Utc::now(),
            last_run: None,
        };

        let mut jobs = self.jobs.write().await;
        jobs.push(job.clone());
        persist(&self.path, &jobs).await?;
        info!(job_id = %job.job_id, name = %job.name, "saved job created");
        Ok(job)
    }

    pub async fn update(&self, job_id: Uuid, draft: JobDraft) -> Result<SavedJob, CoreError> {
        draft.config.validate()?;
        self.modify(job_id, |job| {
            job.name = draft.name;
            job.config = draft.config;
        })
        .await
    }

    pub async fn delete(&self, job_id: Uuid) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|j| j.job_id != job_id);
        if jobs.len() == before {
            return Err(not_found(job_id));
        }
        persist(&self.path, &jobs).await?;
        info!(%job_id, "saved job deleted");
        Ok(())
    }

    /// Stamp `last_run` and return the updated job.
    pub async fn mark_run(&self, job_id: Uuid) -> Result<SavedJob, CoreError> {
        self.modify(job_id, |job| job.last_run = Some(Utc::now()))
            .await
    }

    async fn modify(
        &self,
        job_id: Uuid,
        apply: impl FnOnce(&mut SavedJob),
    ) -> Result<SavedJob, CoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.job_id == job_id)
            .ok_or_else(|| not_found(job_id))?;
        apply(job);
        let updated = job.clone();
        persist(&self.path, &jobs).await?;
        Ok(updated)
    }
}

fn not_found(job_id: Uuid) -> CoreError {
    CoreError::JobNotFound {
        job_id: job_id.to_string(),
    }
}
