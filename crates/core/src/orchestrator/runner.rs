//! Download orchestrator implementation.
//!
//! Owns the job lifecycle: admits pending jobs FIFO under a bounded
//! concurrency semaphore, dispatches each to a fetch backend, feeds parsed
//! progress into the registry, applies the retry policy on transient
//! failures, and drives cooperative cancellation. Every transition is
//! persisted and published.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::fetcher::{
    FetchBackend, FetchError, FetchOutcome, FetchRequest, HttpStreamFetcher, SubprocessFetcher,
};
use crate::job::{CreateJobRequest, DownloadJob, JobFilter, JobRegistry, JobStatus};
use crate::notifier::{EventKind, Notifier};
use crate::progress::{ProgressParser, SpeedTracker};

use super::config::DownloadsConfig;
use super::types::{ActiveTransfer, OrchestratorError, OrchestratorStatus};

/// The download orchestrator - drives jobs through the lifecycle state machine.
pub struct DownloadOrchestrator {
    config: DownloadsConfig,
    registry: Arc<JobRegistry>,
    notifier: Notifier,
    http_backend: Arc<dyn FetchBackend>,
    subprocess_backend: Arc<dyn FetchBackend>,
    semaphore: Arc<Semaphore>,

    // Runtime state
    running: Arc<AtomicBool>,
    active: Arc<RwLock<HashMap<String, ActiveTransfer>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl DownloadOrchestrator {
    /// Create a new orchestrator with explicit backends (tests inject mocks).
    pub fn new(
        config: DownloadsConfig,
        registry: Arc<JobRegistry>,
        notifier: Notifier,
        http_backend: Arc<dyn FetchBackend>,
        subprocess_backend: Arc<dyn FetchBackend>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let slots = config.max_concurrent.max(1);

        Self {
            registry,
            notifier,
            http_backend,
            subprocess_backend,
            semaphore: Arc::new(Semaphore::new(slots)),
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
            config,
        }
    }

    /// Create an orchestrator with the real HTTP and subprocess backends.
    pub fn with_default_backends(
        config: DownloadsConfig,
        registry: Arc<JobRegistry>,
        notifier: Notifier,
    ) -> Result<Self, FetchError> {
        let http = Arc::new(HttpStreamFetcher::new(config.http.clone())?);
        let subprocess = Arc::new(SubprocessFetcher::new(config.subprocess.clone()));
        Ok(Self::new(config, registry, notifier, http, subprocess))
    }

    /// Start the orchestrator: recover persisted jobs, then spawn the
    /// scheduler loop.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!("Starting download orchestrator");
        self.recover().await;
        self.spawn_scheduler_loop();
        info!("Download orchestrator started");
    }

    /// Stop the orchestrator gracefully.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping download orchestrator");
        let _ = self.shutdown_tx.send(());

        // Give the scheduler a moment to notice
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("Download orchestrator stopped");
    }

    /// Create a new pending job. The scheduler admits it when a slot frees.
    pub async fn submit(&self, request: CreateJobRequest) -> DownloadJob {
        let job = self.registry.insert(DownloadJob::new(request)).await;
        info!(
            "Submitted download job {} ({} -> {})",
            job.id,
            job.source_ref,
            job.destination_path.display()
        );
        self.notifier.publish(EventKind::Progress, job.clone());
        job
    }

    /// Request cancellation of a job.
    ///
    /// Pending jobs are cancelled on the spot. For a downloading job this
    /// only signals the backend and returns: the acknowledgment means the
    /// cancellation was *requested*; the terminal event confirms it later.
    pub async fn cancel(&self, job_id: &str) -> Result<(), OrchestratorError> {
        let job = self
            .registry
            .get(job_id)
            .await
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

        match job.status {
            JobStatus::Pending => {
                let cancelled = self
                    .registry
                    .update_status(job_id, JobStatus::Cancelled, None)
                    .await?;
                info!("Cancelled pending job {}", job_id);
                self.notifier.publish(EventKind::Cancelled, cancelled);
                Ok(())
            }
            JobStatus::Downloading => {
                let active = self.active.read().await;
                if let Some(transfer) = active.get(job_id) {
                    debug!(
                        "Requesting cancellation of job {} (transferring since {})",
                        job_id, transfer.started_at
                    );
                    transfer.cancelled.store(true, Ordering::SeqCst);
                    let _ = transfer.cancel_tx.send(());
                }
                Ok(())
            }
            status => Err(OrchestratorError::InvalidState {
                job_id: job_id.to_string(),
                status,
                operation: "cancel".to_string(),
            }),
        }
    }

    /// Create a fresh job from a terminal one. The old job stays immutable.
    pub async fn resubmit(&self, job_id: &str) -> Result<DownloadJob, OrchestratorError> {
        let job = self
            .registry
            .get(job_id)
            .await
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

        if !job.status.is_terminal() {
            return Err(OrchestratorError::InvalidState {
                job_id: job_id.to_string(),
                status: job.status,
                operation: "resubmit".to_string(),
            });
        }

        info!("Resubmitting job {} as a fresh job", job_id);
        Ok(self
            .submit(CreateJobRequest {
                source_kind: job.source_kind,
                source_ref: job.source_ref,
                destination_path: job.destination_path,
            })
            .await)
    }

    /// Remove a terminal job from the registry and delete its snapshot.
    pub async fn prune(&self, job_id: &str) -> Result<DownloadJob, OrchestratorError> {
        let job = self
            .registry
            .get(job_id)
            .await
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

        if !job.status.is_terminal() {
            return Err(OrchestratorError::InvalidState {
                job_id: job_id.to_string(),
                status: job.status,
                operation: "prune".to_string(),
            });
        }

        Ok(self.registry.remove(job_id).await?)
    }

    /// Latest known state of a job.
    pub async fn get_status(&self, job_id: &str) -> Result<DownloadJob, OrchestratorError> {
        self.registry
            .get(job_id)
            .await
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// List jobs matching the filter, oldest first.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Vec<DownloadJob> {
        self.registry.list(filter).await
    }

    /// Get current orchestrator status.
    pub async fn status(&self) -> OrchestratorStatus {
        let count = |status| {
            let registry = Arc::clone(&self.registry);
            async move {
                registry
                    .count(&JobFilter::new().with_status(status))
                    .await
            }
        };

        OrchestratorStatus {
            running: self.running.load(Ordering::Relaxed),
            active_transfers: self.active.read().await.len(),
            pending_count: count(JobStatus::Pending).await,
            downloading_count: count(JobStatus::Downloading).await,
            completed_count: count(JobStatus::Completed).await,
            failed_count: count(JobStatus::Failed).await,
            cancelled_count: count(JobStatus::Cancelled).await,
        }
    }

    /// Load persisted jobs. In-flight transfer state cannot survive a
    /// restart, so jobs found downloading are failed (not resumed) and stay
    /// eligible for resubmission.
    async fn recover(&self) {
        let jobs = match self.registry.load_from_store().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to load persisted jobs: {}", e);
                return;
            }
        };

        let mut interrupted = 0;
        for job in &jobs {
            if job.status == JobStatus::Downloading {
                match self
                    .registry
                    .update_status(
                        &job.id,
                        JobStatus::Failed,
                        Some("interrupted by restart".to_string()),
                    )
                    .await
                {
                    Ok(failed) => {
                        interrupted += 1;
                        self.notifier.publish(EventKind::Failed, failed);
                    }
                    Err(e) => warn!("Failed to mark job {} interrupted: {}", job.id, e),
                }
            }
        }

        if !jobs.is_empty() {
            info!(
                "Recovered {} persisted jobs ({} interrupted by restart)",
                jobs.len(),
                interrupted
            );
        }
    }

    /// Spawn the scheduler loop task.
    fn spawn_scheduler_loop(&self) {
        let running = Arc::clone(&self.running);
        let registry = Arc::clone(&self.registry);
        let notifier = self.notifier.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let active = Arc::clone(&self.active);
        let http = Arc::clone(&self.http_backend);
        let subprocess = Arc::clone(&self.subprocess_backend);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Scheduler loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        Self::admit_pending(
                            &config,
                            &registry,
                            &notifier,
                            &semaphore,
                            &active,
                            &http,
                            &subprocess,
                        ).await;
                    }
                }
            }
            info!("Scheduler loop stopped");
        });
    }

    /// Admit pending jobs, oldest first, while concurrency slots are free.
    async fn admit_pending(
        config: &DownloadsConfig,
        registry: &Arc<JobRegistry>,
        notifier: &Notifier,
        semaphore: &Arc<Semaphore>,
        active: &Arc<RwLock<HashMap<String, ActiveTransfer>>>,
        http: &Arc<dyn FetchBackend>,
        subprocess: &Arc<dyn FetchBackend>,
    ) {
        loop {
            let pending = registry
                .list(&JobFilter::new().with_status(JobStatus::Pending).with_limit(1))
                .await;
            let Some(job) = pending.into_iter().next() else {
                break;
            };

            let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() else {
                debug!("All concurrency slots busy");
                break;
            };

            // Register the transfer before the status flips so a cancel
            // arriving right after the transition finds the cancel channel.
            let (cancel_tx, _) = broadcast::channel(1);
            let cancelled = Arc::new(AtomicBool::new(false));
            active.write().await.insert(
                job.id.clone(),
                ActiveTransfer {
                    cancel_tx: cancel_tx.clone(),
                    cancelled: Arc::clone(&cancelled),
                    started_at: Utc::now(),
                },
            );

            // The job may have been cancelled since we listed it.
            let job = match registry
                .update_status(&job.id, JobStatus::Downloading, None)
                .await
            {
                Ok(job) => job,
                Err(e) => {
                    debug!("Skipping job {}: {}", job.id, e);
                    active.write().await.remove(&job.id);
                    continue;
                }
            };
            notifier.publish(EventKind::Progress, job.clone());

            let backend = if job.source_ref.starts_with("http://")
                || job.source_ref.starts_with("https://")
            {
                Arc::clone(http)
            } else {
                Arc::clone(subprocess)
            };
            info!(
                "Dispatching job {} to {} backend",
                job.id,
                backend.kind().as_str()
            );

            tokio::spawn(Self::run_transfer(
                config.clone(),
                Arc::clone(registry),
                notifier.clone(),
                backend,
                Arc::clone(active),
                job,
                cancel_tx,
                cancelled,
                permit,
            ));
        }
    }

    /// Drive one job through its attempts until a terminal outcome.
    #[allow(clippy::too_many_arguments)]
    async fn run_transfer(
        config: DownloadsConfig,
        registry: Arc<JobRegistry>,
        notifier: Notifier,
        backend: Arc<dyn FetchBackend>,
        active: Arc<RwLock<HashMap<String, ActiveTransfer>>>,
        job: DownloadJob,
        cancel_tx: broadcast::Sender<()>,
        cancelled: Arc<AtomicBool>,
        permit: OwnedSemaphorePermit,
    ) {
        let job_id = job.id.clone();
        let max_attempts = 1 + config.max_retries;
        let parser = ProgressParser::new();
        let mut final_result: Result<FetchOutcome, FetchError> = Err(FetchError::Cancelled);
        let mut persist_abort = false;

        'attempts: for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = backoff_delay(config.retry_backoff_base_ms, attempt);
                info!(
                    "Retrying job {} in {:?} (attempt {} of {})",
                    job_id, delay, attempt, max_attempts
                );
                let mut cancel_rx = cancel_tx.subscribe();
                if cancelled.load(Ordering::SeqCst) {
                    final_result = Err(FetchError::Cancelled);
                    break 'attempts;
                }
                tokio::select! {
                    _ = cancel_rx.recv() => {
                        final_result = Err(FetchError::Cancelled);
                        break 'attempts;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            // Fresh attempt: progress starts over.
            match registry.begin_attempt(&job_id).await {
                Ok(job) => notifier.publish(EventKind::Progress, job),
                Err(e) => {
                    warn!("Job {} vanished before attempt {}: {}", job_id, attempt, e);
                    break 'attempts;
                }
            }

            let (event_tx, mut event_rx) = mpsc::channel(32);
            let request = FetchRequest {
                job_id: job_id.clone(),
                source_ref: job.source_ref.clone(),
                destination_path: job.destination_path.clone(),
            };
            let cancel_rx = cancel_tx.subscribe();
            let fetch_backend = Arc::clone(&backend);
            let fetch_handle =
                tokio::spawn(async move { fetch_backend.fetch(request, event_tx, cancel_rx).await });

            // A cancel that raced the subscription above had no receiver to
            // land on; the flag tells us to repeat it now that one exists.
            if cancelled.load(Ordering::SeqCst) {
                let _ = cancel_tx.send(());
            }

            let kind = backend.kind();
            let mut speed = SpeedTracker::new(Duration::from_secs(10));

            // Events drain in backend order until the sender drops.
            while let Some(raw) = event_rx.recv().await {
                let Some(mut update) = parser.parse(kind, &raw) else {
                    continue;
                };

                if update.speed_bps.is_none() {
                    if let Some(bytes) = update.bytes_downloaded {
                        update.speed_bps = speed.record(bytes);
                        if update.eta_secs.is_none() {
                            update.eta_secs =
                                update.bytes_total.and_then(|total| speed.eta_secs(bytes, total));
                        }
                    }
                }

                match registry.update_progress(&job_id, &update).await {
                    Ok(job) => notifier.publish(EventKind::Progress, job),
                    Err(e) => warn!("Failed to record progress for job {}: {}", job_id, e),
                }

                if !persist_abort
                    && registry.persist_failures(&job_id).await >= config.persist_failure_threshold
                {
                    error!(
                        "Persistence unavailable for job {} after {} consecutive write failures, aborting transfer",
                        job_id, config.persist_failure_threshold
                    );
                    persist_abort = true;
                    let _ = cancel_tx.send(());
                }
            }

            let result = match fetch_handle.await {
                Ok(result) => result,
                Err(e) => Err(FetchError::ReadFailed(format!("fetch task aborted: {}", e))),
            };

            match result {
                Ok(outcome) => {
                    final_result = Ok(outcome);
                    break 'attempts;
                }
                Err(FetchError::Cancelled) => {
                    final_result = Err(FetchError::Cancelled);
                    break 'attempts;
                }
                Err(e) if e.is_transient() && attempt < max_attempts && !persist_abort => {
                    warn!(
                        "Job {} attempt {} failed with transient error: {}",
                        job_id, attempt, e
                    );
                    final_result = Err(e);
                }
                Err(e) => {
                    final_result = Err(e);
                    break 'attempts;
                }
            }
        }

        // Release the slot before any finalization or cleanup work.
        active.write().await.remove(&job_id);
        drop(permit);

        Self::finalize(&config, &registry, &notifier, &job_id, final_result, persist_abort).await;
    }

    /// Apply the terminal outcome of a transfer.
    async fn finalize(
        config: &DownloadsConfig,
        registry: &Arc<JobRegistry>,
        notifier: &Notifier,
        job_id: &str,
        result: Result<FetchOutcome, FetchError>,
        persist_abort: bool,
    ) {
        match result {
            Ok(outcome) => {
                if let Some(digest) = outcome.checksum_sha256 {
                    if let Err(e) = registry.set_checksum(job_id, digest).await {
                        warn!("Failed to record checksum for job {}: {}", job_id, e);
                    }
                }
                match registry
                    .update_status(job_id, JobStatus::Completed, None)
                    .await
                {
                    Ok(job) => {
                        info!("Download completed for job {}", job_id);
                        notifier.publish(EventKind::Completed, job);
                    }
                    Err(e) => warn!("Failed to complete job {}: {}", job_id, e),
                }
            }
            Err(FetchError::Cancelled) if !persist_abort => {
                match registry
                    .update_status(job_id, JobStatus::Cancelled, None)
                    .await
                {
                    Ok(job) => {
                        info!("Job {} cancelled", job_id);
                        notifier.publish(EventKind::Cancelled, job.clone());

                        if config.remove_partial_on_cancel {
                            // Best-effort cleanup, off the critical path.
                            let dest = job.destination_path.clone();
                            let id = job.id.clone();
                            tokio::spawn(async move {
                                if let Err(e) = tokio::fs::remove_dir_all(&dest).await {
                                    warn!(
                                        "Failed to remove partial output for job {} at {}: {}",
                                        id,
                                        dest.display(),
                                        e
                                    );
                                }
                            });
                        }
                    }
                    Err(e) => warn!("Failed to mark job {} cancelled: {}", job_id, e),
                }
            }
            Err(e) => {
                let message = if persist_abort {
                    "persistence unavailable, failing job to avoid losing accountability"
                        .to_string()
                } else {
                    e.to_string()
                };
                match registry
                    .update_status(job_id, JobStatus::Failed, Some(message))
                    .await
                {
                    Ok(job) => {
                        warn!("Job {} failed: {}", job_id, e);
                        notifier.publish(EventKind::Failed, job);
                    }
                    Err(err) => warn!("Failed to mark job {} failed: {}", job_id, err),
                }
            }
        }
    }
}

/// Exponential backoff: attempt 2 waits the base, each further attempt
/// doubles it.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(2).min(16);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}
