//! In-memory snapshot store for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::job::{DownloadJob, SnapshotError, SnapshotStore};

/// Snapshot store backed by a plain map, with on-demand write failures.
#[derive(Default)]
pub struct MemorySnapshotStore {
    jobs: Mutex<HashMap<String, DownloadJob>>,
    failing: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (simulates persistence outage).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of snapshots held.
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn write(&self, job: &DownloadJob) -> Result<(), SnapshotError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SnapshotError::Database("write failure injected".to_string()));
        }
        self.jobs
            .lock()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<DownloadJob>, SnapshotError> {
        let mut jobs: Vec<DownloadJob> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    fn remove(&self, id: &str) -> Result<(), SnapshotError> {
        self.jobs.lock().unwrap().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::job::{CreateJobRequest, SourceKind};

    fn job() -> DownloadJob {
        DownloadJob::new(CreateJobRequest {
            source_kind: SourceKind::Model,
            source_ref: "org/model".to_string(),
            destination_path: PathBuf::from("/tmp/m"),
        })
    }

    #[test]
    fn test_write_read_remove() {
        let store = MemorySnapshotStore::new();
        let job = job();

        store.write(&job).unwrap();
        assert_eq!(store.read_all().unwrap().len(), 1);

        store.remove(&job.id).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_injected_failure() {
        let store = MemorySnapshotStore::new();
        store.set_failing(true);
        assert!(store.write(&job()).is_err());

        store.set_failing(false);
        assert!(store.write(&job()).is_ok());
    }
}
