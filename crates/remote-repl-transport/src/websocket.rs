//! WebSocket transport for remote REPL clients.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use remote_repl_core::{Connection, InterpreterFactory, Outgoing};
use remote_repl_session::{Flow, SessionManager};

/// WebSocket handler state.
pub struct WsState<F>
where
    F: InterpreterFactory,
{
    /// Protocol engine shared by all connections.
    pub manager: Arc<SessionManager<F>>,
}

impl<F> WsState<F>
where
    F: InterpreterFactory,
{
    /// Create new WebSocket state.
    #[must_use]
    pub const fn new(manager: Arc<SessionManager<F>>) -> Self {
        Self { manager }
    }
}

impl<F> Clone for WsState<F>
where
    F: InterpreterFactory,
{
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler<F>(
    ws: WebSocketUpgrade,
    State(state): State<WsState<F>>,
) -> impl IntoResponse
where
    F: InterpreterFactory + 'static,
{
    ws.on_upgrade(move |socket| handle_socket(socket, state.manager))
}

/// Health probe reporting the number of live sessions.
pub async fn health_handler<F>(State(state): State<WsState<F>>) -> impl IntoResponse
where
    F: InterpreterFactory + 'static,
{
    let sessions = state.manager.session_count().await;
    Json(serde_json::json!({ "status": "ok", "sessions": sessions }))
}

/// Run one client connection to completion.
///
/// Frames are handled strictly in arrival order. The session is torn down
/// when the client closes, the socket errors, or the client logs out.
pub async fn handle_socket<F>(socket: WebSocket, manager: Arc<SessionManager<F>>)
where
    F: InterpreterFactory,
{
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut rx) = Connection::channel();
    let id = connection.id();

    // Forward queued frames to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let (message, closing) = match frame {
                Outgoing::Message(msg) => match msg.to_json() {
                    Ok(json) => (Message::Text(json.into()), false),
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {e}");
                        continue;
                    }
                },
                Outgoing::Close(code) => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: Utf8Bytes::from_static(""),
                    })),
                    true,
                ),
            };
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    if manager.open(connection).await.is_err() {
        let _ = send_task.await;
        return;
    }

    while let Some(msg) = receiver.next().await {
        let flow = match msg {
            Ok(Message::Text(text)) => manager.handle_text(id, text.as_str()).await,
            Ok(Message::Binary(data)) => manager.handle_binary(id, &data).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(connection = %id, "WebSocket error: {e}");
                break;
            }
        };

        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => break,
            Err(e) => {
                tracing::error!(connection = %id, "Failed to handle message: {e}");
                break;
            }
        }
    }

    manager.close(id).await;
    // The session held the last senders; the writer drains and stops.
    let _ = send_task.await;
}

/// Create the WebSocket router.
///
/// Serves the REPL endpoint at `path` and a JSON health probe at `/health`.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(manager, "/ws"));
/// ```
#[must_use]
pub fn create_ws_router<F>(manager: Arc<SessionManager<F>>, path: &str) -> Router
where
    F: InterpreterFactory + 'static,
{
    Router::new()
        .route(path, get(ws_handler::<F>))
        .route("/health", get(health_handler::<F>))
        .with_state(WsState::new(manager))
}
