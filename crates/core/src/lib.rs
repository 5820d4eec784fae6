pub mod config;
pub mod fetcher;
pub mod job;
pub mod notifier;
pub mod orchestrator;
pub mod progress;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, NotifierConfig,
    PersistenceConfig, ServerConfig,
};
pub use fetcher::{
    BackendKind, FetchBackend, FetchError, FetchOutcome, FetchRequest, HttpFetcherConfig,
    HttpStreamFetcher, RawFetchEvent, SubprocessFetcher, SubprocessFetcherConfig,
};
pub use job::{
    CreateJobRequest, DownloadJob, JobError, JobFilter, JobRegistry, JobStatus, SnapshotError,
    SnapshotStore, SourceKind, SqliteSnapshotStore,
};
pub use notifier::{EventKind, JobEvent, Notifier, Subscription, Topic};
pub use orchestrator::{
    DownloadOrchestrator, DownloadsConfig, OrchestratorError, OrchestratorStatus,
};
pub use progress::{ProgressParser, ProgressUpdate, SpeedTracker};
