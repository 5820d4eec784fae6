//! The authoritative in-memory job table.
//!
//! All mutations go through one instance (injected into the orchestrator,
//! never a global), take the write lock, and persist the updated job before
//! returning. Readers clone consistent snapshots out of the read lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::progress::ProgressUpdate;

use super::{DownloadJob, JobError, JobFilter, JobStatus, SnapshotStore};

struct JobEntry {
    job: DownloadJob,
    /// Consecutive snapshot write failures. Reset on the first success;
    /// the orchestrator fails the job past its configured threshold.
    persist_failures: u32,
}

/// In-memory job registry with write-through snapshot persistence.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobEntry>>,
    store: Arc<dyn SnapshotStore>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Insert a new job and persist its first snapshot.
    pub async fn insert(&self, job: DownloadJob) -> DownloadJob {
        let mut jobs = self.jobs.write().await;
        let mut entry = JobEntry {
            job: job.clone(),
            persist_failures: 0,
        };
        self.persist(&mut entry);
        jobs.insert(job.id.clone(), entry);
        job
    }

    /// Populate the table from recovered snapshots without writing them back.
    pub async fn load(&self, recovered: Vec<DownloadJob>) {
        let mut jobs = self.jobs.write().await;
        for job in recovered {
            jobs.entry(job.id.clone()).or_insert(JobEntry {
                job,
                persist_failures: 0,
            });
        }
    }

    /// Read every persisted snapshot into the table and return what was found.
    pub async fn load_from_store(&self) -> Result<Vec<DownloadJob>, JobError> {
        let recovered = self
            .store
            .read_all()
            .map_err(|e| JobError::Persistence(e.to_string()))?;
        self.load(recovered.clone()).await;
        Ok(recovered)
    }

    pub async fn get(&self, id: &str) -> Option<DownloadJob> {
        self.jobs.read().await.get(id).map(|e| e.job.clone())
    }

    /// List jobs matching the filter, oldest first (FIFO order).
    pub async fn list(&self, filter: &JobFilter) -> Vec<DownloadJob> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<DownloadJob> = jobs
            .values()
            .filter(|e| filter.matches(&e.job))
            .map(|e| e.job.clone())
            .collect();

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let matching = matching.into_iter().skip(filter.offset);
        if filter.limit > 0 {
            matching.take(filter.limit).collect()
        } else {
            matching.collect()
        }
    }

    pub async fn count(&self, filter: &JobFilter) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|e| filter.matches(&e.job))
            .count()
    }

    /// Move a job along one edge of the lifecycle state machine.
    ///
    /// Rejects edges not allowed by [`JobStatus::can_transition_to`] and
    /// maintains the timestamp/error fields that go with each transition.
    pub async fn update_status(
        &self,
        id: &str,
        new_status: JobStatus,
        error: Option<String>,
    ) -> Result<DownloadJob, JobError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        let from = entry.job.status;
        if !from.can_transition_to(new_status) {
            return Err(JobError::InvalidTransition {
                job_id: id.to_string(),
                from,
                to: new_status,
            });
        }

        let now = Utc::now();
        entry.job.status = new_status;
        match new_status {
            JobStatus::Downloading => {
                entry.job.started_at.get_or_insert(now);
            }
            JobStatus::Completed => {
                entry.job.progress_percent = 100.0;
                entry.job.speed_bps = None;
                entry.job.eta_secs = None;
                entry.job.completed_at = Some(now);
            }
            JobStatus::Failed => {
                entry.job.error_message = error.clone();
                entry.job.speed_bps = None;
                entry.job.eta_secs = None;
                entry.job.completed_at = Some(now);
            }
            JobStatus::Cancelled => {
                entry.job.speed_bps = None;
                entry.job.eta_secs = None;
                entry.job.completed_at = Some(now);
            }
            JobStatus::Pending => {}
        }

        self.persist(entry);
        Ok(entry.job.clone())
    }

    /// Start a fresh transfer attempt: bump the attempt counter and reset
    /// the progress figures. The only path that moves progress backwards.
    pub async fn begin_attempt(&self, id: &str) -> Result<DownloadJob, JobError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        entry.job.attempt += 1;
        entry.job.progress_percent = 0.0;
        entry.job.bytes_downloaded = 0;
        entry.job.bytes_total = None;
        entry.job.speed_bps = None;
        entry.job.eta_secs = None;
        entry.job.current_artifact = None;

        self.persist(entry);
        Ok(entry.job.clone())
    }

    /// Merge a normalized progress update into the job record.
    ///
    /// Byte and percent figures are monotone within an attempt: a smaller
    /// value than the current one is clamped, not an error. Updates for jobs
    /// no longer downloading are ignored (a backend may race a cancellation).
    pub async fn update_progress(
        &self,
        id: &str,
        update: &ProgressUpdate,
    ) -> Result<DownloadJob, JobError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if entry.job.status != JobStatus::Downloading {
            return Ok(entry.job.clone());
        }

        if let Some(percent) = update.percent {
            let percent = percent.clamp(0.0, 100.0);
            if percent > entry.job.progress_percent {
                entry.job.progress_percent = percent;
            }
        }
        if let Some(bytes) = update.bytes_downloaded {
            if bytes > entry.job.bytes_downloaded {
                entry.job.bytes_downloaded = bytes;
            }
        }
        if update.bytes_total.is_some() {
            entry.job.bytes_total = update.bytes_total;
        }
        if update.speed_bps.is_some() {
            entry.job.speed_bps = update.speed_bps;
        }
        if update.eta_secs.is_some() {
            entry.job.eta_secs = update.eta_secs;
        }
        if update.artifact.is_some() {
            entry.job.current_artifact = update.artifact.clone();
        }

        self.persist(entry);
        Ok(entry.job.clone())
    }

    /// Record the checksum reported by a backend's success outcome.
    pub async fn set_checksum(&self, id: &str, digest: String) -> Result<DownloadJob, JobError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        entry.job.checksum_sha256 = Some(digest);
        self.persist(entry);
        Ok(entry.job.clone())
    }

    /// Remove a job from the table and delete its snapshot.
    pub async fn remove(&self, id: &str) -> Result<DownloadJob, JobError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .remove(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if let Err(e) = self.store.remove(id) {
            warn!("Failed to delete snapshot for job {}: {}", id, e);
        }
        Ok(entry.job)
    }

    /// Consecutive snapshot write failures for a job.
    pub async fn persist_failures(&self, id: &str) -> u32 {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|e| e.persist_failures)
            .unwrap_or(0)
    }

    /// Write-through persistence. A failure is logged and counted, never
    /// propagated: the next mutation writes the full record again anyway.
    fn persist(&self, entry: &mut JobEntry) {
        match self.store.write(&entry.job) {
            Ok(()) => entry.persist_failures = 0,
            Err(e) => {
                entry.persist_failures += 1;
                warn!(
                    "Failed to persist snapshot for job {} ({} consecutive): {}",
                    entry.job.id, entry.persist_failures, e
                );
            }
        }
    }
}
