// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! Router and WebSocket connection handling.
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use crewchat_common::ServerMessage;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::metrics::{ActiveConnection, WS_CONNECTION};
use crate::storage::Storage;
use crate::websocket::WebSocketHandler;
use crate::AppState;

/// Create the application router
pub fn create_router<S: Storage + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::<S>))
        .route("/health", get(health_handler))
        .merge(handlers::api_routes::<S>())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Handler for WebSocket connections
pub async fn ws_handler<S: Storage + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    counter!(WS_CONNECTION).increment(1);
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection<S: Storage + 'static>(socket: WebSocket, state: Arc<AppState<S>>) {
    let _active = ActiveConnection::open();
    let (mut sink, mut stream) = socket.split();

    // Replies and room broadcasts share one bounded queue
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.settings.chat.connection_buffer);

    // Dropping the handler removes the connection from every room,
    // including when this task is cancelled.
    let handler = WebSocketHandler::new(state, tx.clone());
    let connection_id = handler.connection_id();
    tracing::debug!(%connection_id, "websocket connected");

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(%connection_id, "failed to serialize server message: {e}");
                    continue;
                },
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(%connection_id, "websocket error: {e}");
                break;
            },
        };

        match message {
            Message::Text(text) => {
                let reply = handler.handle_text(text.as_str()).await;
                if tx.send(reply).await.is_err() {
                    break;
                }
            },
            Message::Close(_) => break,
            // Ping/pong is answered by axum; binary frames are not part of the protocol
            _ => {},
        }
    }

    drop(handler);
    send_task.abort();
    tracing::debug!(%connection_id, "websocket disconnected");
}
