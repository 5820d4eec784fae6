//! Types shared by fetch backend implementations.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Which backend produced a raw event. Keys the progress parser table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Streaming HTTP GET consumed chunk by chunk.
    HttpStream,
    /// External fetch tool, stdout/stderr read as a line stream.
    Subprocess,
}

impl BackendKind {
    /// Returns the string representation for logging and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::HttpStream => "http_stream",
            BackendKind::Subprocess => "subprocess",
        }
    }
}

/// Raw progress emitted by a backend, before normalization.
///
/// Backends report what they have; the progress parser turns this into a
/// [`ProgressUpdate`](crate::progress::ProgressUpdate).
#[derive(Debug, Clone)]
pub enum RawFetchEvent {
    /// Byte counters from a backend that tracks them itself.
    Bytes {
        downloaded: u64,
        total: Option<u64>,
        /// File currently transferring, when known.
        artifact: Option<String>,
    },
    /// One complete output line from a fetch tool. Never a partial line.
    Line(String),
}

/// Terminal result of a successful fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// SHA-256 hex digest of the transferred bytes, when the backend computed one.
    pub checksum_sha256: Option<String>,
}

/// Errors that can occur during a fetch attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid source reference: {0}")]
    InvalidSource(String),

    #[error("destination not writable: {0}")]
    DestinationNotWritable(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("artifact too large: {size} bytes exceeds limit {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("fetch tool not found: {0}")]
    ToolNotFound(String),

    #[error("fetch tool exited with code {code}")]
    ToolExited { code: i32, retryable: bool },

    #[error("no output for {idle_secs}s, transfer presumed stalled")]
    IdleTimeout { idle_secs: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether the retry policy may reattempt after this error.
    ///
    /// Network-level failures and stalls are worth retrying; a bad source
    /// ref, an unwritable destination or a missing tool will not get better.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::ConnectionFailed(_)
            | FetchError::ReadFailed(_)
            | FetchError::IdleTimeout { .. }
            | FetchError::Io(_) => true,
            // 5xx is the server's problem, 4xx is ours.
            FetchError::HttpStatus { status } => *status >= 500,
            FetchError::ToolExited { retryable, .. } => *retryable,
            FetchError::InvalidSource(_)
            | FetchError::DestinationNotWritable(_)
            | FetchError::TooLarge { .. }
            | FetchError::ToolNotFound(_)
            | FetchError::Cancelled => false,
        }
    }
}

/// Everything a backend needs to perform one transfer attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Job the attempt belongs to (for logging).
    pub job_id: String,
    /// URL or repository identifier of the remote artifact.
    pub source_ref: String,
    /// Where the bytes must land. Created if absent.
    pub destination_path: PathBuf,
}

/// Trait for fetch backends.
///
/// A backend performs one transfer attempt: it streams raw progress events
/// through `events` and resolves with a terminal outcome. Implementations
/// must stop promptly when the `cancel` channel fires and must never send a
/// line split across two chunks.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    /// Which parser table this backend's raw events are keyed to.
    fn kind(&self) -> BackendKind;

    /// Run one transfer attempt to completion, cancellation or error.
    async fn fetch(
        &self,
        request: FetchRequest,
        events: mpsc::Sender<RawFetchEvent>,
        cancel: broadcast::Receiver<()>,
    ) -> Result<FetchOutcome, FetchError>;
}
