//! Durable per-job snapshot storage.
//!
//! Every registry mutation writes the full job record, so a crash after a
//! successful update never loses more than the in-flight update itself.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use thiserror::Error;

use super::DownloadJob;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Trait for job snapshot storage backends.
pub trait SnapshotStore: Send + Sync {
    /// Write (insert or overwrite) the snapshot for a job.
    fn write(&self, job: &DownloadJob) -> Result<(), SnapshotError>;

    /// Read every persisted job snapshot, oldest first.
    fn read_all(&self) -> Result<Vec<DownloadJob>, SnapshotError>;

    /// Delete the snapshot for a job. Deleting a missing snapshot is not an error.
    fn remove(&self, id: &str) -> Result<(), SnapshotError>;
}

/// SQLite-backed snapshot store.
///
/// One row per job; the full record is stored as a JSON column so the
/// snapshot schema matches the API serialization exactly.
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
    /// Open (or create) the snapshot database at the given path.
    pub fn new(path: &Path) -> Result<Self, SnapshotError> {
        let conn = Connection::open(path).map_err(|e| SnapshotError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory snapshot store (useful for testing).
    pub fn in_memory() -> Result<Self, SnapshotError> {
        let conn =
            Connection::open_in_memory().map_err(|e| SnapshotError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), SnapshotError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS download_jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                snapshot TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_download_jobs_status ON download_jobs(status);
            CREATE INDEX IF NOT EXISTS idx_download_jobs_created_at ON download_jobs(created_at);
            "#,
        )
        .map_err(|e| SnapshotError::Database(e.to_string()))?;

        Ok(())
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn write(&self, job: &DownloadJob) -> Result<(), SnapshotError> {
        let snapshot = serde_json::to_string(job)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO download_jobs (id, status, created_at, snapshot) VALUES (?, ?, ?, ?)",
            params![
                job.id,
                job.status.as_str(),
                job.created_at.to_rfc3339(),
                snapshot,
            ],
        )
        .map_err(|e| SnapshotError::Database(e.to_string()))?;

        Ok(())
    }

    fn read_all(&self) -> Result<Vec<DownloadJob>, SnapshotError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT id, snapshot FROM download_jobs ORDER BY created_at ASC")
            .map_err(|e| SnapshotError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let snapshot: String = row.get(1)?;
                Ok((id, snapshot))
            })
            .map_err(|e| SnapshotError::Database(e.to_string()))?;

        let mut jobs = Vec::new();
        for row in rows {
            let (id, snapshot) = row.map_err(|e| SnapshotError::Database(e.to_string()))?;
            match serde_json::from_str::<DownloadJob>(&snapshot) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    // A corrupt row loses one job, not the whole recovery.
                    tracing::warn!("Skipping unreadable job snapshot {}: {}", id, e);
                }
            }
        }

        Ok(jobs)
    }

    fn remove(&self, id: &str) -> Result<(), SnapshotError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM download_jobs WHERE id = ?", params![id])
            .map_err(|e| SnapshotError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::job::{CreateJobRequest, JobStatus, SourceKind};

    fn sample_job() -> DownloadJob {
        DownloadJob::new(CreateJobRequest {
            source_kind: SourceKind::Dataset,
            source_ref: "https://example.com/corpus.tar.gz".to_string(),
            destination_path: PathBuf::from("/data/datasets/corpus"),
        })
    }

    #[test]
    fn test_write_and_read_all() {
        let store = SqliteSnapshotStore::in_memory().unwrap();
        let job = sample_job();

        store.write(&job).unwrap();

        let jobs = store.read_all().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job.id);
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert_eq!(jobs[0].source_ref, job.source_ref);
    }

    #[test]
    fn test_write_overwrites() {
        let store = SqliteSnapshotStore::in_memory().unwrap();
        let mut job = sample_job();

        store.write(&job).unwrap();

        job.status = JobStatus::Downloading;
        job.progress_percent = 42.0;
        store.write(&job).unwrap();

        let jobs = store.read_all().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Downloading);
        assert_eq!(jobs[0].progress_percent, 42.0);
    }

    #[test]
    fn test_read_all_ordered_by_creation() {
        let store = SqliteSnapshotStore::in_memory().unwrap();

        let mut first = sample_job();
        first.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        let second = sample_job();

        // Insert out of order.
        store.write(&second).unwrap();
        store.write(&first).unwrap();

        let jobs = store.read_all().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, first.id);
        assert_eq!(jobs[1].id, second.id);
    }

    #[test]
    fn test_remove() {
        let store = SqliteSnapshotStore::in_memory().unwrap();
        let job = sample_job();

        store.write(&job).unwrap();
        store.remove(&job.id).unwrap();

        assert!(store.read_all().unwrap().is_empty());

        // Removing again is a no-op.
        store.remove(&job.id).unwrap();
    }

    #[test]
    fn test_persists_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("jobs.db");
        let job = sample_job();

        {
            let store = SqliteSnapshotStore::new(&db_path).unwrap();
            store.write(&job).unwrap();
        }

        let reopened = SqliteSnapshotStore::new(&db_path).unwrap();
        let jobs = reopened.read_all().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job.id);
    }
}
