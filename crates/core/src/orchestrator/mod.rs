//! Download orchestration: lifecycle state machine, concurrency limiting,
//! retry policy and cancellation.

mod config;
mod runner;
mod types;

pub use config::DownloadsConfig;
pub use runner::DownloadOrchestrator;
pub use types::{OrchestratorError, OrchestratorStatus};
