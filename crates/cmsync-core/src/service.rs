// ── Sync service (job gate) ──
//
// Single-slot execution: one worker task owns every sync run, and a
// one-permit semaphore decides admission. A request arriving while the
// slot is held is refused with `CoreError::Busy` instead of queuing.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::model::{ConnectionReport, FlexSyncRequest, SyncOptions, SyncResult, SyncStatus};
use crate::orchestrator::SyncEngine;
use crate::store::JobStore;

const JOB_CHANNEL_SIZE: usize = 4;

/// A unit of work for the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncJob {
    /// Canonical path for the given models (all when `None`).
    Models {
        model_ids: Option<Vec<String>>,
        options: SyncOptions,
    },
    /// Reconcile-then-sync for the given models (all when `None`).
    Smart { model_ids: Option<Vec<String>> },
    Flexible(Box<FlexSyncRequest>),
}

impl SyncJob {
    /// Smart reconciliation unless the options ask for a dry run, a
    /// forced rebuild, or a specific resource.
    pub fn select(model_ids: Option<Vec<String>>, options: SyncOptions, smart: bool) -> Self {
        let plain = options.dry_run || options.force || options.update_resource_id.is_some();
        if smart && !plain {
            Self::Smart { model_ids }
        } else {
            Self::Models { model_ids, options }
        }
    }

    pub fn label(&self) -> String {
        let ids = |ids: &Option<Vec<String>>| {
            ids.as_ref()
                .map_or_else(|| "all".to_owned(), |ids| ids.join(","))
        };
        match self {
            Self::Models { model_ids, .. } => format!("sync:{}", ids(model_ids)),
            Self::Smart { model_ids } => format!("smart:{}", ids(model_ids)),
            Self::Flexible(request) => format!("flexible:{}", request.cms_model_id),
        }
    }
}

/// What the worker is doing, published on a `watch` channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerState {
    pub running: bool,
    pub job: Option<String>,
}

struct JobEnvelope {
    job: SyncJob,
    permit: OwnedSemaphorePermit,
    response_tx: Option<oneshot::Sender<Vec<SyncResult>>>,
}

// ── Service ──────────────────────────────────────────────────────────

/// Cheaply cloneable handle shared by every trigger surface.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    engine: Arc<SyncEngine>,
    jobs: Arc<JobStore>,
    slot: Arc<Semaphore>,
    job_tx: mpsc::Sender<JobEnvelope>,
    state: watch::Sender<WorkerState>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    /// Spawn the worker task. Must be called inside a tokio runtime.
    pub fn start(engine: SyncEngine, jobs: JobStore) -> Self {
        let (job_tx, job_rx) = mpsc::channel(JOB_CHANNEL_SIZE);
        let (state, _) = watch::channel(WorkerState::default());

        let service = Self {
            inner: Arc::new(ServiceInner {
                engine: Arc::new(engine),
                jobs: Arc::new(jobs),
                slot: Arc::new(Semaphore::new(1)),
                job_tx,
                state,
                cancel: CancellationToken::new(),
                worker: Mutex::new(None),
            }),
        };

        let handle = tokio::spawn(worker_task(service.clone(), job_rx));
        if let Ok(mut worker) = service.inner.worker.lock() {
            *worker = Some(handle);
        }
        service
    }

    pub fn config(&self) -> &SyncConfig {
        self.inner.engine.config()
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.inner.engine
    }

    pub fn jobs(&self) -> &JobStore {
        &self.inner.jobs
    }

    // ── Admission ────────────────────────────────────────────────────

    pub fn is_syncing(&self) -> bool {
        self.inner.slot.available_permits() == 0
    }

    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.inner.state.subscribe()
    }

    fn claim(&self) -> Result<OwnedSemaphorePermit, CoreError> {
        Arc::clone(&self.inner.slot)
            .try_acquire_owned()
            .map_err(|_| {
                let current = self
                    .inner
                    .engine
                    .current_model()
                    .or_else(|| self.inner.state.borrow().job.clone());
                debug!(?current, "sync refused, slot busy");
                CoreError::Busy { current }
            })
    }

    fn dispatch(
        &self,
        permit: OwnedSemaphorePermit,
        job: SyncJob,
        response_tx: Option<oneshot::Sender<Vec<SyncResult>>>,
    ) -> Result<(), CoreError> {
        self.inner.state.send_replace(WorkerState {
            running: true,
            job: Some(job.label()),
        });

        let envelope = JobEnvelope {
            job,
            permit,
            response_tx,
        };
        self.inner.job_tx.try_send(envelope).map_err(|_| {
            self.inner.state.send_replace(WorkerState::default());
            CoreError::WorkerStopped
        })
    }

    /// Run a job and wait for its results.
    pub async fn run(&self, job: SyncJob) -> Result<Vec<SyncResult>, CoreError> {
        let permit = self.claim()?;
        let (tx, rx) = oneshot::channel();
        self.dispatch(permit, job, Some(tx))?;
        rx.await.map_err(|_| CoreError::WorkerStopped)
    }

    /// Hand a job to the worker and return once it is accepted.
    pub fn trigger(&self, job: SyncJob) -> Result<(), CoreError> {
        let permit = self.claim()?;
        self.dispatch(permit, job, None)
    }

    pub async fn run_flexible(&self, request: FlexSyncRequest) -> Result<SyncResult, CoreError> {
        request.validate()?;
        let results = self.run(SyncJob::Flexible(Box::new(request))).await?;
        results.into_iter().next().ok_or(CoreError::WorkerStopped)
    }

    /// Stamp a saved job's `last_run`, then run its configuration.
    /// Nothing is stamped when the slot is busy.
    pub async fn run_saved_job(&self, job_id: Uuid) -> Result<SyncResult, CoreError> {
        let permit = self.claim()?;
        let job = self.inner.jobs.mark_run(job_id).await?;
        info!(%job_id, name = %job.name, "running saved job");

        let (tx, rx) = oneshot::channel();
        self.dispatch(permit, SyncJob::Flexible(Box::new(job.config)), Some(tx))?;
        let results = rx.await.map_err(|_| CoreError::WorkerStopped)?;
        results.into_iter().next().ok_or(CoreError::WorkerStopped)
    }

    // ── Read side ────────────────────────────────────────────────────

    pub async fn status(&self) -> SyncStatus {
        self.inner.engine.status(self.is_syncing()).await
    }

    pub async fn history(&self, limit: usize) -> Vec<SyncResult> {
        self.inner.engine.history().recent(limit).await
    }

    pub async fn test_connections(&self) -> ConnectionReport {
        self.inner.engine.test_connections().await
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Wait until no job holds the slot.
    pub async fn wait_idle(&self) {
        if let Ok(permit) = self.inner.slot.acquire().await {
            drop(permit);
        }
    }

    /// Stop accepting work. A job already running finishes first.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = self.inner.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "sync worker ended abnormally");
            }
        }
        debug!("sync service stopped");
    }
}

// ── Worker ───────────────────────────────────────────────────────────

async fn worker_task(service: SyncService, mut rx: mpsc::Receiver<JobEnvelope>) {
    let cancel = service.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(JobEnvelope { job, permit, response_tx }) = envelope else { break };
                let label = job.label();
                info!(job = %label, "sync job started");

                let results = run_job(&service.inner.engine, job).await;
                let failed = results.iter().filter(|r| r.is_failed()).count();
                info!(job = %label, results = results.len(), failed, "sync job finished");

                service.inner.state.send_replace(WorkerState::default());
                drop(permit);
                if let Some(tx) = response_tx {
                    let _ = tx.send(results);
                }
            }
        }
    }
}

async fn run_job(engine: &SyncEngine, job: SyncJob) -> Vec<SyncResult> {
    match job {
        SyncJob::Models { model_ids, options } => {
            engine.sync_all(model_ids.as_deref(), &options).await
        }
        SyncJob::Smart { model_ids } => engine.sync_all_smart(model_ids.as_deref()).await,
        SyncJob::Flexible(request) => vec![engine.sync_flexible(&request).await],
    }
}
