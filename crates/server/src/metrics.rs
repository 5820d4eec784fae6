//! Prometheus metrics for observability.
//!
//! Counters for job outcomes are driven off the notifier's global topic so
//! they stay correct no matter which code path produced the transition.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Download jobs submitted.
pub static DOWNLOADS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "artifetch_downloads_submitted_total",
        "Total download jobs submitted",
    )
    .unwrap()
});

/// Terminal job outcomes by kind.
pub static DOWNLOADS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "artifetch_downloads_finished_total",
            "Download jobs reaching a terminal state",
        ),
        &["outcome"],
    )
    .unwrap()
});

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "artifetch_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections accepted.
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "artifetch_ws_connections_total",
        "Total WebSocket connections accepted",
    )
    .unwrap()
});

/// WebSocket messages sent, by event type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "artifetch_ws_messages_sent_total",
            "WebSocket messages sent to clients",
        ),
        &["type"],
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(DOWNLOADS_SUBMITTED.clone()))
        .unwrap();
    registry
        .register(Box::new(DOWNLOADS_FINISHED.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
}

/// Render the registry in Prometheus text format.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Count terminal outcomes from the notifier's global topic.
///
/// Spawn once at startup; runs until the process exits.
pub fn spawn_outcome_counter(notifier: artifetch_core::Notifier) {
    use artifetch_core::{EventKind, Topic};

    let subscription = notifier.subscribe(Topic::All);
    tokio::spawn(async move {
        loop {
            let event = subscription.recv().await;
            match event.kind {
                EventKind::Completed => DOWNLOADS_FINISHED.with_label_values(&["completed"]).inc(),
                EventKind::Failed => DOWNLOADS_FINISHED.with_label_values(&["failed"]).inc(),
                EventKind::Cancelled => DOWNLOADS_FINISHED.with_label_values(&["cancelled"]).inc(),
                EventKind::Progress => {}
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metrics() {
        DOWNLOADS_SUBMITTED.inc();
        let output = render();
        assert!(output.contains("artifetch_downloads_submitted_total"));
    }
}
