//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

use crate::fetcher::{HttpFetcherConfig, SubprocessFetcherConfig};

/// Configuration for the download orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadsConfig {
    /// Maximum jobs transferring at once. Pending jobs wait for a slot.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Additional attempts after a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry (milliseconds); doubles per attempt.
    #[serde(default = "default_backoff_base")]
    pub retry_backoff_base_ms: u64,

    /// How often the scheduler looks for admittable pending jobs (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Delete partial output when a job is cancelled. Default keeps it.
    #[serde(default)]
    pub remove_partial_on_cancel: bool,

    /// Consecutive snapshot write failures before a job is failed for
    /// accountability.
    #[serde(default = "default_persist_failure_threshold")]
    pub persist_failure_threshold: u32,

    /// Streaming HTTP backend settings.
    #[serde(default)]
    pub http: HttpFetcherConfig,

    /// Subprocess backend settings.
    #[serde(default)]
    pub subprocess: SubprocessFetcherConfig,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    500
}

fn default_persist_failure_threshold() -> u32 {
    20
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_backoff_base_ms: default_backoff_base(),
            poll_interval_ms: default_poll_interval(),
            remove_partial_on_cancel: false,
            persist_failure_threshold: default_persist_failure_threshold(),
            http: HttpFetcherConfig::default(),
            subprocess: SubprocessFetcherConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DownloadsConfig::default();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_backoff_base_ms, 1000);
        assert!(!config.remove_partial_on_cancel);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            max_concurrent = 5
        "#;
        let config: DownloadsConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.http.progress_debounce_ms, 300);
        assert_eq!(config.subprocess.idle_timeout_secs, 30);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            max_concurrent = 1
            max_retries = 0
            retry_backoff_base_ms = 250
            remove_partial_on_cancel = true

            [http]
            progress_debounce_ms = 100

            [subprocess]
            command = "git"
            args = ["clone", "--progress", "{source}", "{dest}"]
            idle_timeout_secs = 120
            retryable_exit_codes = [128]
        "#;
        let config: DownloadsConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.max_retries, 0);
        assert!(config.remove_partial_on_cancel);
        assert_eq!(config.subprocess.command, "git");
        assert_eq!(config.subprocess.retryable_exit_codes, vec![128]);
    }
}
