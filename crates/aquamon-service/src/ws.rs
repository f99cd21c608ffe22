//! WebSocket stream of accepted readings.
//!
//! On connect the client receives the most recent readings already stored,
//! then every reading accepted afterwards, one JSON [`ReadingEvent`] per
//! text frame.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use aquamon_types::SavedReading;

use crate::api::RECEIVED_READINGS;
use crate::state::{AppState, ReadingEvent};

/// Number of stored readings replayed to a new client.
pub const SNAPSHOT_SIZE: usize = 20;

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The last `SNAPSHOT_SIZE` stored readings, oldest first.
async fn snapshot(state: &AppState) -> Vec<ReadingEvent> {
    let stored: Vec<SavedReading> = match state.store.lock().await.load_or_default(RECEIVED_READINGS) {
        Ok(stored) => stored,
        Err(e) => {
            warn!("Failed to load readings for snapshot: {}", e);
            return Vec::new();
        }
    };
    let skip = stored.len().saturating_sub(SNAPSHOT_SIZE);
    let now = OffsetDateTime::now_utc();
    stored
        .into_iter()
        .skip(skip)
        .map(|reading| ReadingEvent {
            reading,
            received_at: now,
        })
        .collect()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing accepted meanwhile is lost
    let mut rx = state.readings_tx.subscribe();

    info!("WebSocket client connected");

    for event in snapshot(&state).await {
        let Ok(json) = serde_json::to_string(&event) else {
            continue;
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            info!("WebSocket client disconnected during initial snapshot");
            return;
        }
    }

    debug!("Sent initial snapshot to WebSocket client");

    let mut send_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Pongs are answered by axum; only watch for close and errors
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    info!("WebSocket client disconnected");
}
