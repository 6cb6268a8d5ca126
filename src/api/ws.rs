//! WebSocket transport: one task per client connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::error::ApiError;
use super::AppState;
use crate::protocol::ServerEvent;
use crate::session::{validate_session_id, CloseError, CloseHandle, SessionId};

/// Close handle for one WebSocket connection.
///
/// `force_close` cancels the connection's token; the connection task then
/// sends a close frame and exits. Calling it on a connection whose task has
/// already finished, or twice, reports [`CloseError::AlreadyClosed`].
pub struct WsCloseHandle {
    cancel: CancellationToken,
    finished: AtomicBool,
}

impl WsCloseHandle {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            finished: AtomicBool::new(false),
        }
    }

    /// Token the connection task watches for a server-side close.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Record that the connection task has exited.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

impl Default for WsCloseHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseHandle for WsCloseHandle {
    fn force_close(&self) -> Result<(), CloseError> {
        if self.finished.load(Ordering::Acquire) || self.cancel.is_cancelled() {
            return Err(CloseError::AlreadyClosed);
        }
        self.cancel.cancel();
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct WsParams {
    /// Stable client id for reconnects. A fresh id is generated if absent.
    id: Option<String>,
}

/// `GET /ws`. Refuses the upgrade with 503 once draining has begun, before
/// looking at the upgrade headers.
pub(super) async fn ws(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    if !state.shutdown.is_accepting() {
        return Err(ApiError::ShuttingDown);
    }
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let id = match params.id {
        Some(id) => {
            validate_session_id(&id).map_err(ApiError::InvalidRequest)?;
            SessionId::from(id)
        }
        None => SessionId::random(),
    };

    Ok(ws
        .on_upgrade(move |socket| handle_ws(socket, state, id))
        .into_response())
}

async fn handle_ws(socket: WebSocket, state: AppState, id: SessionId) {
    let handle = Arc::new(WsCloseHandle::new());
    let cancel = handle.token();
    let guard = state.hooks.on_connect(id, handle.clone());
    let id = guard.id();

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Draining may have started between the upgrade check and registration.
    // Such a connection is refused rather than added to the drain target.
    if !state.shutdown.is_accepting() {
        let _ = ws_tx.send(close_message()).await;
        let _ = ws_tx.flush().await;
        drop(guard);
        handle.mark_finished();
        return;
    }

    // Subscribe before the welcome so nothing published after it is lost.
    let mut events = state.broker.subscribe();

    if ws_tx
        .send(Message::Text(ServerEvent::welcome(id).to_json().into()))
        .await
        .is_err()
    {
        drop(guard);
        handle.mark_finished();
        return;
    }

    loop {
        tokio::select! {
            // Server-side force-close
            _ = cancel.cancelled() => {
                tracing::debug!(session = %id, "force-closing WebSocket");
                let _ = ws_tx.send(close_message()).await;
                let _ = ws_tx.flush().await;
                break;
            }

            // Broadcasts -> client
            result = events.recv() => {
                match result {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(session = %id, skipped, "client lagging, dropped broadcasts");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            // Client -> everyone
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(session = %id, "message from client");
                        state.broker.publish(&ServerEvent::relay(id, text.as_str()));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ping/Pong handled automatically
                    Some(Err(e)) => {
                        tracing::debug!(session = %id, error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
        }
    }

    drop(guard);
    handle.mark_finished();
}

fn close_message() -> Message {
    Message::Close(Some(CloseFrame {
        code: axum::extract::ws::close_code::AWAY,
        reason: "server shutting down".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_close_cancels_token_once() {
        let handle = WsCloseHandle::new();
        let token = handle.token();
        assert!(handle.force_close().is_ok());
        assert!(token.is_cancelled());
        assert!(matches!(handle.force_close(), Err(CloseError::AlreadyClosed)));
    }

    #[test]
    fn force_close_after_finish_reports_already_closed() {
        let handle = WsCloseHandle::new();
        handle.mark_finished();
        assert!(matches!(handle.force_close(), Err(CloseError::AlreadyClosed)));
        assert!(!handle.token().is_cancelled());
    }
}
