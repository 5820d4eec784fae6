//! Mock fetch backend for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::fetcher::{
    BackendKind, FetchBackend, FetchError, FetchOutcome, FetchRequest, RawFetchEvent,
};

/// How one scripted fetch attempt ends.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Resolve successfully.
    Success { checksum: Option<String> },
    /// Fail with a transient (retryable) error.
    TransientError(String),
    /// Fail with a fatal (non-retryable) error.
    FatalError(String),
    /// Block until cancelled, simulating a transfer in flight.
    Hang,
}

/// One scripted fetch attempt: events to emit, then an outcome.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub events: Vec<RawFetchEvent>,
    /// Pause before each event (simulates transfer time).
    pub event_delay: Duration,
    pub outcome: ScriptedOutcome,
}

impl ScriptedRun {
    /// Succeed immediately without emitting anything.
    pub fn success() -> Self {
        Self {
            events: Vec::new(),
            event_delay: Duration::ZERO,
            outcome: ScriptedOutcome::Success { checksum: None },
        }
    }

    /// Emit the given events, then succeed.
    pub fn success_with_events(events: Vec<RawFetchEvent>) -> Self {
        Self {
            events,
            event_delay: Duration::ZERO,
            outcome: ScriptedOutcome::Success { checksum: None },
        }
    }

    /// Fail with a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            events: Vec::new(),
            event_delay: Duration::ZERO,
            outcome: ScriptedOutcome::TransientError(message.into()),
        }
    }

    /// Fail with a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            events: Vec::new(),
            event_delay: Duration::ZERO,
            outcome: ScriptedOutcome::FatalError(message.into()),
        }
    }

    /// Block until cancelled.
    pub fn hang() -> Self {
        Self {
            events: Vec::new(),
            event_delay: Duration::ZERO,
            outcome: ScriptedOutcome::Hang,
        }
    }

    /// Set the pause before each event.
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = delay;
        self
    }

    /// Report a checksum in the success outcome.
    pub fn with_checksum(mut self, digest: impl Into<String>) -> Self {
        if let ScriptedOutcome::Success { checksum } = &mut self.outcome {
            *checksum = Some(digest.into());
        }
        self
    }
}

/// Mock implementation of the FetchBackend trait.
///
/// Each `fetch` call pops the next scripted run (or succeeds immediately when
/// the script is empty), records the request for assertions, and tracks how
/// many fetches ran concurrently.
///
/// # Example
///
/// ```rust,ignore
/// let backend = MockFetchBackend::new(BackendKind::Subprocess);
/// backend.queue_run(ScriptedRun::transient("connection reset"));
/// backend.queue_run(ScriptedRun::success());
/// // First attempt fails and is retried, second completes.
/// ```
pub struct MockFetchBackend {
    kind: BackendKind,
    runs: Mutex<VecDeque<ScriptedRun>>,
    requests: Mutex<Vec<FetchRequest>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockFetchBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            runs: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Queue the script for the next fetch call.
    pub fn queue_run(&self, run: ScriptedRun) {
        self.runs.lock().unwrap().push_back(run);
    }

    /// Queue scripts for several fetch calls.
    pub fn queue_runs(&self, runs: impl IntoIterator<Item = ScriptedRun>) {
        self.runs.lock().unwrap().extend(runs);
    }

    /// All recorded fetch requests, in call order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of fetch calls made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Highest number of fetches observed in flight at once.
    pub fn max_concurrent_observed(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn run(
        &self,
        run: ScriptedRun,
        events: mpsc::Sender<RawFetchEvent>,
        mut cancel: broadcast::Receiver<()>,
    ) -> Result<FetchOutcome, FetchError> {
        for event in run.events {
            if !run.event_delay.is_zero() {
                tokio::select! {
                    _ = cancel.recv() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(run.event_delay) => {}
                }
            }
            if events.send(event).await.is_err() {
                return Err(FetchError::Cancelled);
            }
        }

        match run.outcome {
            ScriptedOutcome::Success { checksum } => Ok(FetchOutcome {
                checksum_sha256: checksum,
            }),
            ScriptedOutcome::TransientError(message) => {
                Err(FetchError::ConnectionFailed(message))
            }
            ScriptedOutcome::FatalError(message) => Err(FetchError::InvalidSource(message)),
            ScriptedOutcome::Hang => {
                let _ = cancel.recv().await;
                Err(FetchError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl FetchBackend for MockFetchBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        events: mpsc::Sender<RawFetchEvent>,
        cancel: broadcast::Receiver<()>,
    ) -> Result<FetchOutcome, FetchError> {
        self.requests.lock().unwrap().push(request);

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let run = self
            .runs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ScriptedRun::success);

        let result = self.run(run, events, cancel).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn request() -> FetchRequest {
        FetchRequest {
            job_id: "j-1".to_string(),
            source_ref: "org/model".to_string(),
            destination_path: PathBuf::from("/tmp/out"),
        }
    }

    #[tokio::test]
    async fn test_default_run_succeeds() {
        let backend = MockFetchBackend::new(BackendKind::Subprocess);
        let (tx, _rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);

        let outcome = backend.fetch(request(), tx, cancel_rx).await.unwrap();
        assert!(outcome.checksum_sha256.is_none());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_events_are_emitted() {
        let backend = MockFetchBackend::new(BackendKind::Subprocess);
        backend.queue_run(ScriptedRun::success_with_events(vec![
            RawFetchEvent::Line("Fetching 2 files: 1/2".to_string()),
            RawFetchEvent::Line("Fetching 2 files: 2/2".to_string()),
        ]));

        let (tx, mut rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);
        backend.fetch(request(), tx, cancel_rx).await.unwrap();

        let mut lines = 0;
        while rx.try_recv().is_ok() {
            lines += 1;
        }
        assert_eq!(lines, 2);
    }

    #[tokio::test]
    async fn test_scripted_errors() {
        let backend = MockFetchBackend::new(BackendKind::HttpStream);
        backend.queue_run(ScriptedRun::transient("reset"));
        backend.queue_run(ScriptedRun::fatal("bad ref"));

        let (tx, _rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);
        let err = backend
            .fetch(request(), tx, cancel_rx)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let (tx, _rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);
        let err = backend
            .fetch(request(), tx, cancel_rx)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_hang_until_cancelled() {
        let backend = std::sync::Arc::new(MockFetchBackend::new(BackendKind::Subprocess));
        backend.queue_run(ScriptedRun::hang());

        let (tx, _rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = broadcast::channel(1);

        let fetcher = std::sync::Arc::clone(&backend);
        let handle =
            tokio::spawn(async move { fetcher.fetch(request(), tx, cancel_rx).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        cancel_tx.send(()).unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }
}
