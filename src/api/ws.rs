//! Live event socket.
//!
//! Sends one snapshot frame with every known job, then each published event
//! as a JSON text frame. The server pings every `server.ws_heartbeat_secs`
//! and drops clients that miss a pong. The same interval bounds every send,
//! so a client that stops reading is dropped along with its subscription.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use super::{models::SnapshotFrame, state::AppState};

pub async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

fn text_frame<T: Serialize>(value: &T) -> Option<Message> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!(error = %e, "Failed to encode socket frame");
            None
        }
    }
}

/// Send one frame, giving up after `deadline`. `false` means the client is gone
/// or not reading.
async fn send_within<S>(sender: &mut S, frame: Message, deadline: Duration) -> bool
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match tokio::time::timeout(deadline, sender.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "Socket send failed");
            false
        }
        Err(_) => {
            debug!(deadline_secs = deadline.as_secs(), "Client stopped reading, closing");
            false
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let interval = state.config.server.ws_heartbeat();
    let (mut sender, mut receiver) = socket.split();
    let (jobs, mut events) = state.orchestrator.subscribe_with_snapshot();

    if let Some(frame) = text_frame(&SnapshotFrame::new(jobs)) {
        if !send_within(&mut sender, frame, interval).await {
            debug!("Client left before the snapshot was sent");
            return;
        }
    }

    let mut heartbeat = tokio::time::interval(interval);
    heartbeat.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(data))) => {
                    if !send_within(&mut sender, Message::Pong(data), interval).await {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                Some(Err(e)) => {
                    debug!(error = %e, "Socket error");
                    break;
                }
                // Client frames carry no commands
                Some(Ok(_)) => {}
            },

            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some(frame) = text_frame(&event) {
                    if !send_within(&mut sender, frame, interval).await {
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_pong {
                    debug!("Client missed a heartbeat, closing");
                    break;
                }
                if !send_within(&mut sender, Message::Ping(Bytes::new()), interval).await {
                    break;
                }
                awaiting_pong = true;
            }
        }
    }

    debug!("Event socket closed");
}
