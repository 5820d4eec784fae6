//! API integration tests for the download endpoints.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use artifetch_core::testing::ScriptedRun;
use common::TestFixture;

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_submit_and_complete_job() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/downloads",
            json!({
                "sourceKind": "model",
                "sourceRef": "org/tiny-model",
                "destinationPath": "/tmp/artifetch-tests/tiny-model"
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["status"], "pending");
    let id = response.body["id"].as_str().unwrap().to_string();

    assert!(
        fixture.wait_for_job_status(&id, "completed").await,
        "job should complete against the mock backend"
    );

    let job = fixture.get(&format!("/api/v1/downloads/{}", id)).await;
    assert_eq!(job.body["progressPercent"], 100.0);
    assert_eq!(fixture.subprocess_backend.call_count(), 1);
}

#[tokio::test]
async fn test_get_unknown_job_is_404() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/downloads/nope").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("not found"));
}

#[tokio::test]
async fn test_list_with_status_filter() {
    let fixture = TestFixture::new().await;

    for i in 0..3 {
        let response = fixture
            .post(
                "/api/v1/downloads",
                json!({
                    "sourceKind": "dataset",
                    "sourceRef": format!("org/corpus-{}", i),
                    "destinationPath": "/tmp/artifetch-tests/corpus"
                }),
            )
            .await;
        let id = response.body["id"].as_str().unwrap().to_string();
        assert!(fixture.wait_for_job_status(&id, "completed").await);
    }

    let all = fixture.get("/api/v1/downloads").await;
    assert_eq!(all.body["count"], 3);

    let completed = fixture.get("/api/v1/downloads?status=completed").await;
    assert_eq!(completed.body["count"], 3);

    let pending = fixture.get("/api/v1/downloads?status=pending").await;
    assert_eq!(pending.body["count"], 0);
}

#[tokio::test]
async fn test_cancel_downloading_then_conflict() {
    let fixture = TestFixture::new().await;
    fixture.subprocess_backend.queue_run(ScriptedRun::hang());

    let response = fixture
        .post(
            "/api/v1/downloads",
            json!({
                "sourceKind": "voice_pack",
                "sourceRef": "org/fa-voice",
                "destinationPath": "/tmp/artifetch-tests/fa-voice"
            }),
        )
        .await;
    let id = response.body["id"].as_str().unwrap().to_string();

    assert!(fixture.wait_for_job_status(&id, "downloading").await);

    let cancel = fixture
        .post(&format!("/api/v1/downloads/{}/cancel", id), json!({}))
        .await;
    assert_eq!(cancel.status, StatusCode::OK);

    assert!(fixture.wait_for_job_status(&id, "cancelled").await);

    // A second cancel hits a terminal job.
    let again = fixture
        .post(&format!("/api/v1/downloads/{}/cancel", id), json!({}))
        .await;
    assert_eq!(again.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_resubmit_failed_job() {
    let fixture = TestFixture::new().await;
    fixture
        .subprocess_backend
        .queue_run(ScriptedRun::fatal("bad source"));

    let response = fixture
        .post(
            "/api/v1/downloads",
            json!({
                "sourceKind": "model",
                "sourceRef": "org/broken",
                "destinationPath": "/tmp/artifetch-tests/broken"
            }),
        )
        .await;
    let id = response.body["id"].as_str().unwrap().to_string();
    assert!(fixture.wait_for_job_status(&id, "failed").await);

    let resubmit = fixture
        .post(&format!("/api/v1/downloads/{}/resubmit", id), json!({}))
        .await;
    assert_eq!(resubmit.status, StatusCode::CREATED);
    let fresh_id = resubmit.body["id"].as_str().unwrap().to_string();
    assert_ne!(fresh_id, id);
    assert_eq!(resubmit.body["sourceRef"], "org/broken");

    assert!(fixture.wait_for_job_status(&fresh_id, "completed").await);
}

#[tokio::test]
async fn test_prune_terminal_job() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/downloads",
            json!({
                "sourceKind": "model",
                "sourceRef": "org/prune-me",
                "destinationPath": "/tmp/artifetch-tests/prune"
            }),
        )
        .await;
    let id = response.body["id"].as_str().unwrap().to_string();
    assert!(fixture.wait_for_job_status(&id, "completed").await);

    let pruned = fixture.delete(&format!("/api/v1/downloads/{}", id)).await;
    assert_eq!(pruned.status, StatusCode::OK);

    let gone = fixture.get(&format!("/api/v1/downloads/{}", id)).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_orchestrator_status_endpoint() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/downloads/status").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["running"], true);
    assert_eq!(response.body["pending_count"], 0);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    let text = response.body.as_str().unwrap_or_default();
    assert!(text.contains("artifetch_downloads_submitted_total"));
}

#[tokio::test]
async fn test_config_endpoint() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/config").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["max_concurrent"], 3);
    assert_eq!(response.body["max_retries"], 2);
}
