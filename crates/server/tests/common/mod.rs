//! Common test utilities for API testing with mocks.
//!
//! Builds an in-process router with mock fetch backends injected, so the
//! whole HTTP surface can be exercised without touching the network or
//! spawning real fetch tools.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use artifetch_core::{
    testing::{MemorySnapshotStore, MockFetchBackend},
    BackendKind, Config, DownloadOrchestrator, DownloadsConfig, JobRegistry, Notifier,
    SnapshotStore,
};
use artifetch_server::api::create_router;
use artifetch_server::state::AppState;

/// Test fixture wiring the router to mock fetch backends.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock HTTP backend - script transfer outcomes
    pub http_backend: Arc<MockFetchBackend>,
    /// Mock subprocess backend - script transfer outcomes
    pub subprocess_backend: Arc<MockFetchBackend>,
    /// The orchestrator behind the router
    pub orchestrator: Arc<DownloadOrchestrator>,
}

/// Response captured from the in-process router.
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub async fn new() -> Self {
        let store = Arc::new(MemorySnapshotStore::new());
        let registry = Arc::new(JobRegistry::new(store as Arc<dyn SnapshotStore>));
        let notifier = Notifier::new(64);

        let http_backend = Arc::new(MockFetchBackend::new(BackendKind::HttpStream));
        let subprocess_backend = Arc::new(MockFetchBackend::new(BackendKind::Subprocess));

        let downloads = DownloadsConfig {
            poll_interval_ms: 20,
            retry_backoff_base_ms: 10,
            ..Default::default()
        };

        let orchestrator = Arc::new(DownloadOrchestrator::new(
            downloads.clone(),
            registry,
            notifier.clone(),
            Arc::clone(&http_backend) as Arc<dyn artifetch_core::FetchBackend>,
            Arc::clone(&subprocess_backend) as Arc<dyn artifetch_core::FetchBackend>,
        ));
        orchestrator.start().await;

        let config = Config {
            downloads,
            ..Default::default()
        };
        let state = Arc::new(AppState::new(config, Arc::clone(&orchestrator), notifier));
        let router = create_router(state);

        Self {
            router,
            http_backend,
            subprocess_backend,
            orchestrator,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(Request::get(path).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.send(
            Request::post(path)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.send(Request::delete(path).body(Body::empty()).unwrap())
            .await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request should not fail at the transport level");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should be readable")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };

        TestResponse { status, body }
    }

    /// Poll the API until the job reaches the expected status.
    pub async fn wait_for_job_status(&self, id: &str, expected: &str) -> bool {
        for _ in 0..200 {
            let response = self.get(&format!("/api/v1/downloads/{}", id)).await;
            if response.status == StatusCode::OK && response.body["status"] == expected {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }
}
