use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::api::middleware::session::AppState;
use crate::services::live::{LiveEvent, LiveFeed};

/// Maps a receive result to the event to forward. `None` ends the stream.
fn next_frame(received: Result<LiveEvent, RecvError>) -> Option<LiveEvent> {
    match received {
        Ok(event) => Some(event),
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Dashboard client lagged, asking it to resync");
            Some(LiveEvent::Resync)
        }
        Err(RecvError::Closed) => None,
    }
}

async fn dashboard(ws: WebSocketUpgrade, State(feed): State<LiveFeed>) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, feed.subscribe()))
}

async fn stream_events(mut socket: WebSocket, mut events: broadcast::Receiver<LiveEvent>) {
    tracing::debug!("Dashboard client connected");

    loop {
        tokio::select! {
            received = events.recv() => {
                let Some(event) = next_frame(received) else {
                    break;
                };

                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode live event");
                        continue;
                    }
                };

                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                // Dashboards only listen; anything but a close is ignored
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    tracing::debug!("Dashboard client disconnected");
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/dashboard", get(dashboard))
}
