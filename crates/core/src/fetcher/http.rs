//! Streaming HTTP fetch backend.
//!
//! Issues a GET and consumes the response body chunk by chunk, writing to the
//! destination as bytes arrive. Progress is reported as byte counters,
//! debounced so a fast transfer does not flood the orchestrator. The body is
//! digested with SHA-256 on the fly and the hex digest is reported in the
//! success outcome.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::{BackendKind, FetchBackend, FetchError, FetchOutcome, FetchRequest, RawFetchEvent};

/// Configuration for the streaming HTTP backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpFetcherConfig {
    /// Minimum interval between progress events (milliseconds).
    #[serde(default = "default_debounce_ms")]
    pub progress_debounce_ms: u64,

    /// Request timeout for establishing the connection (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Reject transfers whose reported content length exceeds this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_artifact_bytes: Option<u64>,
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            progress_debounce_ms: default_debounce_ms(),
            connect_timeout_secs: default_connect_timeout(),
            max_artifact_bytes: None,
        }
    }
}

/// Fetch backend for plain HTTP(S) sources.
pub struct HttpStreamFetcher {
    client: reqwest::Client,
    config: HttpFetcherConfig,
}

impl HttpStreamFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| FetchError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Last path segment of the URL, used as the artifact filename.
    fn filename_from_url(url: &reqwest::Url) -> String {
        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .unwrap_or("download")
            .to_string()
    }
}

#[async_trait]
impl FetchBackend for HttpStreamFetcher {
    fn kind(&self) -> BackendKind {
        BackendKind::HttpStream
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        events: mpsc::Sender<RawFetchEvent>,
        mut cancel: broadcast::Receiver<()>,
    ) -> Result<FetchOutcome, FetchError> {
        let url = reqwest::Url::parse(&request.source_ref)
            .map_err(|e| FetchError::InvalidSource(format!("{}: {}", request.source_ref, e)))?;
        let filename = Self::filename_from_url(&url);

        tokio::fs::create_dir_all(&request.destination_path)
            .await
            .map_err(|e| {
                FetchError::DestinationNotWritable(format!(
                    "{}: {}",
                    request.destination_path.display(),
                    e
                ))
            })?;
        let file_path = request.destination_path.join(&filename);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        if let (Some(size), Some(limit)) = (total, self.config.max_artifact_bytes) {
            if size > limit {
                return Err(FetchError::TooLarge { size, limit });
            }
        }

        let mut file = tokio::fs::File::create(&file_path).await.map_err(|e| {
            FetchError::DestinationNotWritable(format!("{}: {}", file_path.display(), e))
        })?;

        debug!(
            "Streaming {} -> {} ({:?} bytes)",
            request.source_ref,
            file_path.display(),
            total
        );

        let debounce = Duration::from_millis(self.config.progress_debounce_ms);
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut last_emit: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.recv() => {
                    return Err(FetchError::Cancelled);
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else {
                        break;
                    };
                    let chunk = chunk.map_err(|e| FetchError::ReadFailed(e.to_string()))?;

                    file.write_all(&chunk).await?;
                    hasher.update(&chunk);
                    downloaded += chunk.len() as u64;

                    let due = last_emit
                        .map(|t| t.elapsed() >= debounce)
                        .unwrap_or(true);
                    if due {
                        let event = RawFetchEvent::Bytes {
                            downloaded,
                            total,
                            artifact: Some(filename.clone()),
                        };
                        if events.send(event).await.is_err() {
                            // The orchestrator stopped listening.
                            return Err(FetchError::Cancelled);
                        }
                        last_emit = Some(Instant::now());
                    }
                }
            }
        }

        file.flush().await?;

        // The final counter always goes out, debounced or not.
        let _ = events
            .send(RawFetchEvent::Bytes {
                downloaded,
                total: total.or(Some(downloaded)),
                artifact: Some(filename),
            })
            .await;

        let digest = hasher.finalize();
        let checksum = digest.iter().map(|b| format!("{:02x}", b)).collect();

        Ok(FetchOutcome {
            checksum_sha256: Some(checksum),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        let url = reqwest::Url::parse("https://example.com/models/llama/weights.bin").unwrap();
        assert_eq!(HttpStreamFetcher::filename_from_url(&url), "weights.bin");

        let bare = reqwest::Url::parse("https://example.com/").unwrap();
        assert_eq!(HttpStreamFetcher::filename_from_url(&bare), "download");
    }

    #[test]
    fn test_config_defaults() {
        let config = HttpFetcherConfig::default();
        assert_eq!(config.progress_debounce_ms, 300);
        assert_eq!(config.connect_timeout_secs, 30);
        assert!(config.max_artifact_bytes.is_none());
    }

    #[tokio::test]
    async fn test_invalid_source_is_fatal() {
        let fetcher = HttpStreamFetcher::new(HttpFetcherConfig::default()).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);

        let err = fetcher
            .fetch(
                FetchRequest {
                    job_id: "j-1".to_string(),
                    source_ref: "not a url at all".to_string(),
                    destination_path: std::env::temp_dir(),
                },
                tx,
                cancel_rx,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::InvalidSource(_)));
        assert!(!err.is_transient());
    }
}
