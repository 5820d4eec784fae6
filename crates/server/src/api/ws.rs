//! WebSocket support for real-time job updates.
//!
//! Each client subscribes to the notifier (the global topic, or one job's
//! topic via `?job_id=`) and receives every event as JSON. The notifier's
//! bounded per-subscriber queue means a slow client drops old progress
//! events instead of slowing anyone else down.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use artifetch_core::{EventKind, Topic};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_MESSAGES_SENT};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Subscribe to a single job instead of all jobs.
    #[serde(default)]
    pub job_id: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.job_id))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, job_id: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let topic = match job_id {
        Some(id) => Topic::job(id),
        None => Topic::All,
    };
    let subscription = state.notifier().subscribe(topic.clone());

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();
    info!("WebSocket client connected on {}", topic.name());

    // Forward notifier events to this client.
    let send_task = tokio::spawn(async move {
        loop {
            let event = subscription.recv().await;

            let event_type = match event.kind {
                EventKind::Progress => "progress",
                EventKind::Completed => "completed",
                EventKind::Failed => "failed",
                EventKind::Cancelled => "cancelled",
            };
            WS_MESSAGES_SENT.with_label_values(&[event_type]).inc();

            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to serialize job event: {}", e);
                }
            }
        }
    });

    // Handle incoming messages from client (ping/pong, close).
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Ping(data)) => {
                // Pong is handled automatically by axum
                debug!("Received ping: {:?}", data);
            }
            Ok(Message::Text(text)) => {
                // No client messages expected, but log them
                debug!("Received text message: {}", text);
            }
            Ok(_) => {
                // Ignore other message types
            }
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}
