//! Subprocess fetch backend.
//!
//! Spawns an external fetch tool and reads its combined stdout and stderr as
//! a line stream. Tools routinely draw progress bars on stderr with carriage
//! returns, so both `\n` and `\r` terminate a line, and partial lines at a
//! read boundary are buffered until the terminator arrives: the parser
//! never sees a line split across two chunks.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::{BackendKind, FetchBackend, FetchError, FetchOutcome, FetchRequest, RawFetchEvent};

/// Placeholder in the argument template replaced with the job's source ref.
const SOURCE_PLACEHOLDER: &str = "{source}";
/// Placeholder in the argument template replaced with the destination path.
const DEST_PLACEHOLDER: &str = "{dest}";

/// Configuration for the subprocess backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubprocessFetcherConfig {
    /// The fetch tool binary.
    #[serde(default = "default_command")]
    pub command: String,

    /// Argument template; `{source}` and `{dest}` are substituted per job.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Kill the tool after this many seconds without any output.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Exit codes worth retrying (transient tool-side failures).
    #[serde(default)]
    pub retryable_exit_codes: Vec<i32>,
}

fn default_command() -> String {
    "hf".to_string()
}

fn default_args() -> Vec<String> {
    vec![
        "download".to_string(),
        SOURCE_PLACEHOLDER.to_string(),
        "--local-dir".to_string(),
        DEST_PLACEHOLDER.to_string(),
    ]
}

fn default_idle_timeout() -> u64 {
    30
}

impl Default for SubprocessFetcherConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            idle_timeout_secs: default_idle_timeout(),
            retryable_exit_codes: Vec::new(),
        }
    }
}

/// Reassembles complete lines out of arbitrary byte chunks.
///
/// Both `\n` and bare `\r` (progress bar repaints) terminate a line.
#[derive(Debug, Default)]
struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    /// Feed a chunk; returns every line completed by it.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            match byte {
                b'\n' | b'\r' => {
                    if !self.buffer.is_empty() {
                        lines.push(String::from_utf8_lossy(&self.buffer).into_owned());
                        self.buffer.clear();
                    }
                }
                _ => self.buffer.push(byte),
            }
        }
        lines
    }

    /// Flush whatever is left at end of stream.
    fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(line)
    }
}

/// Fetch backend that delegates the transfer to an external CLI tool.
pub struct SubprocessFetcher {
    config: SubprocessFetcherConfig,
}

impl SubprocessFetcher {
    pub fn new(config: SubprocessFetcherConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, request: &FetchRequest) -> Vec<String> {
        let dest = request.destination_path.display().to_string();
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace(SOURCE_PLACEHOLDER, &request.source_ref)
                    .replace(DEST_PLACEHOLDER, &dest)
            })
            .collect()
    }
}

/// Read one pipe to EOF, forwarding each completed line.
async fn pump_lines<R>(mut reader: R, tx: mpsc::Sender<String>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut assembler = LineAssembler::default();
    let mut chunk = [0u8; 4096];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in assembler.push(&chunk[..n]) {
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Error reading fetch tool output: {}", e);
                break;
            }
        }
    }

    if let Some(line) = assembler.finish() {
        let _ = tx.send(line).await;
    }
}

#[async_trait]
impl FetchBackend for SubprocessFetcher {
    fn kind(&self) -> BackendKind {
        BackendKind::Subprocess
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        events: mpsc::Sender<RawFetchEvent>,
        mut cancel: broadcast::Receiver<()>,
    ) -> Result<FetchOutcome, FetchError> {
        tokio::fs::create_dir_all(&request.destination_path)
            .await
            .map_err(|e| {
                FetchError::DestinationNotWritable(format!(
                    "{}: {}",
                    request.destination_path.display(),
                    e
                ))
            })?;

        let args = self.build_args(&request);
        debug!(
            "Spawning fetch tool for job {}: {} {}",
            request.job_id,
            self.config.command,
            args.join(" ")
        );

        let mut child = Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    FetchError::ToolNotFound(self.config.command.clone())
                } else {
                    FetchError::Io(e)
                }
            })?;

        let stdout = child.stdout.take().expect("stdout should be captured");
        let stderr = child.stderr.take().expect("stderr should be captured");

        // Merge both pipes into one ordered line stream.
        let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
        let stderr_tx = line_tx.clone();
        tokio::spawn(pump_lines(stdout, line_tx));
        tokio::spawn(pump_lines(stderr, stderr_tx));

        let idle_window = Duration::from_secs(self.config.idle_timeout_secs);

        loop {
            tokio::select! {
                _ = cancel.recv() => {
                    let _ = child.kill().await;
                    return Err(FetchError::Cancelled);
                }
                line = tokio::time::timeout(idle_window, line_rx.recv()) => {
                    match line {
                        Err(_) => {
                            let _ = child.kill().await;
                            return Err(FetchError::IdleTimeout {
                                idle_secs: self.config.idle_timeout_secs,
                            });
                        }
                        Ok(Some(line)) => {
                            if events.send(RawFetchEvent::Line(line)).await.is_err() {
                                // The orchestrator stopped listening.
                                let _ = child.kill().await;
                                return Err(FetchError::Cancelled);
                            }
                        }
                        Ok(None) => break, // both pipes closed
                    }
                }
            }
        }

        let status = child.wait().await?;
        match status.code() {
            Some(0) => Ok(FetchOutcome::default()),
            Some(code) => Err(FetchError::ToolExited {
                code,
                retryable: self.config.retryable_exit_codes.contains(&code),
            }),
            // Killed by signal.
            None => Err(FetchError::ToolExited {
                code: -1,
                retryable: true,
            }),
        }
    }
}
