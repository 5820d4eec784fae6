//! Download job model, registry and snapshot persistence.

mod registry;
mod snapshot;
mod types;

pub use registry::JobRegistry;
pub use snapshot::{SnapshotError, SnapshotStore, SqliteSnapshotStore};
pub use types::{CreateJobRequest, DownloadJob, JobError, JobFilter, JobStatus, SourceKind};
