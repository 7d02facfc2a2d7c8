use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::state::AppState;

/// Push channel for location deltas: dashboards subscribe here instead
/// of polling `/locations` for the common case.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let mut deltas = state.location_events_tx.subscribe();

    info!("location subscriber connected");

    loop {
        tokio::select! {
            delta = deltas.recv() => {
                let delta = match delta {
                    Ok(delta) => delta,
                    Err(RecvError::Lagged(skipped)) => {
                        // Slow consumer; it catches up from the next
                        // delta, each one being a full position.
                        warn!(skipped, "subscriber lagged behind location stream");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let payload = match serde_json::to_string(&delta) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize location delta");
                        continue;
                    }
                };

                if sink.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Pings are answered by the protocol layer; clients
                    // have nothing else to say on this channel.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!("location subscriber disconnected");
}
