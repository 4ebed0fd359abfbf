//! WebSocket endpoint — one JSON message per frame.
//!
//! Flow:
//! 1. Client connects to `/ws`.
//! 2. Manager opens a session and emits `server_hello`.
//! 3. Outbound pump: bus subscription → socket. Inbound loop: frame →
//!    `ClientMessage` → manager routing. Undecodable frames are logged
//!    and dropped (protocol errors need no client response).
//! 4. Disconnect disposes the session.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tower_http::trace::TraceLayer;

use cw_domain::wire::ClientMessage;

use crate::manager::SessionManager;

pub fn router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(manager): State<Arc<SessionManager>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, manager))
}

async fn handle_socket(socket: WebSocket, manager: Arc<SessionManager>) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (session, mut subscription) = manager.open_session().await;
    let session_id = session.id.clone();

    // Outbound pump: serialize every bus frame onto the socket.
    let pump = tokio::spawn(async move {
        while let Some(frame) = subscription.rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize server frame");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Inbound loop.
    while let Some(frame) = ws_stream.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "socket read failed");
                break;
            }
        };
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => manager.handle_message(&session, message).await,
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "dropping undecodable client frame"
                    );
                }
            },
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            Message::Binary(_) => {
                tracing::warn!(session_id = %session_id, "dropping binary frame");
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    manager.close_session(&session_id).await;
    pump.abort();
    tracing::info!(session_id = %session_id, "client disconnected");
}
