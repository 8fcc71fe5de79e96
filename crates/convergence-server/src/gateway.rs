//! Minimal Axum surface: a health check and one WebSocket route that
//! drives a single model's coordinator end-to-end. This exists only to
//! prove the core runs behind a real async boundary — it is not a wire
//! protocol specification (that framing is explicitly out of scope).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use convergence_core::coordinator::{OpenResult, OutboundMessage};
use convergence_core::op::Operation;

use crate::registry::ModelRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws/{collection_id}/{model_id}/{session_id}", get(ws_upgrade))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "open_models": state.registry.list_open(),
    }))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path((collection_id, model_id, session_id)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, collection_id, model_id, session_id))
}

/// Inbound wire messages accepted over the demonstration socket. A real
/// deployment would frame this per its own client protocol; this crate's
/// wire framing is intentionally minimal.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientMessage {
    Submit {
        submitted_seq: u32,
        context_version: u64,
        op: Operation,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ServerMessage {
    Opened {
        version: u64,
        participants: Vec<String>,
    },
    OpenFailed {
        reason: String,
    },
    Outbound(OutboundMessage),
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    collection_id: String,
    model_id: String,
    session_id: String,
) {
    let handle = state.registry.handle_for(&model_id, &collection_id);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

    let open = match handle.open(session_id.clone(), outbound_tx).await {
        Ok(open) => open,
        Err(_) => {
            // The coordinator task already exited (e.g. its linger timer
            // fired between `handle_for` and `open`); drop the stale
            // registry entry so the next connection spawns a fresh one
            // instead of hitting the same dead handle forever.
            state.registry.forget(&model_id);
            let _ = send_json(&mut socket, &ServerMessage::OpenFailed {
                reason: "coordinator is no longer running".into(),
            })
            .await;
            return;
        }
    };

    match open {
        OpenResult::Failure(reason) => {
            let _ = send_json(&mut socket, &ServerMessage::OpenFailed { reason }).await;
            return;
        }
        OpenResult::Success { version, participants, .. } => {
            info!(model_id, session_id, version, "session opened");
            if send_json(&mut socket, &ServerMessage::Opened { version, participants }).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if send_json(&mut socket, &ServerMessage::Outbound(msg)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Submit { submitted_seq, context_version, op }) => {
                                if handle.submit(session_id.clone(), submitted_seq, context_version, op).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(session_id, error = %e, "ignoring malformed client message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id, error = %e, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    let _ = handle.close(session_id).await;
}

async fn send_json(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text.into())).await
}
