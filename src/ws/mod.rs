pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::CommandError;
use crate::identity::CallerIdentity;
use crate::protocol::{CommandAck, CommandFrame, ServerMessage};
use crate::state::AppState;
use handlers::{Dispatch, Session};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Numeric member key of the caller, resolved upstream
    pub sapin: Option<u32>,
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!(sapin = ?params.sapin, "WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Handle one WebSocket connection for its lifetime
async fn handle_socket(socket: WebSocket, params: WsQuery, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(sapin) = params.sapin else {
        let err = CommandError::Validation("missing sapin".into());
        if let Ok(json) = serde_json::to_string(&CommandAck::error(None, &err)) {
            let _ = sender.send(Message::Text(json.into())).await;
        }
        return;
    };
    let caller = CallerIdentity {
        sapin,
        name: params.name.unwrap_or_else(|| format!("SAPIN {sapin}")),
    };
    tracing::info!(sapin, "WebSocket connected");

    let mut session = Session::new(caller);
    // Room subscriptions; populated on group:join, dropped on leave
    let mut room_rx: Option<tokio::sync::broadcast::Receiver<ServerMessage>> = None;
    let mut admin_rx: Option<tokio::sync::broadcast::Receiver<ServerMessage>> = None;

    loop {
        tokio::select! {
            // Group room broadcasts
            room_msg = async {
                match &mut room_rx {
                    Some(rx) => rx.recv().await.ok(),
                    // Not joined: wait forever
                    None => std::future::pending::<Option<ServerMessage>>().await,
                }
            } => {
                match room_msg {
                    Some(msg) => {
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    // Channel closed: the context is gone
                    None => room_rx = None,
                }
            }

            // Read-write+ broadcasts (voted summaries)
            admin_msg = async {
                match &mut admin_rx {
                    Some(rx) => rx.recv().await.ok(),
                    None => std::future::pending::<Option<ServerMessage>>().await,
                }
            } => {
                match admin_msg {
                    Some(msg) => {
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => admin_rx = None,
                }
            }

            // Client commands
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(sapin = session.caller.sapin, "received: {}", text);

                        let frame: CommandFrame = match serde_json::from_str(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                let err = CommandError::Validation(format!("invalid command: {e}"));
                                if let Ok(json) = serde_json::to_string(&CommandAck::error(None, &err)) {
                                    let _ = sender.send(Message::Text(json.into())).await;
                                }
                                continue;
                            }
                        };

                        let ack = match handlers::handle_command(frame.cmd, &mut session, &state).await {
                            Ok(Dispatch::Joined { data, room_rx: room, admin_rx: admin }) => {
                                room_rx = Some(room);
                                admin_rx = admin;
                                Some(CommandAck::ok_with(frame.seq, data))
                            }
                            Ok(Dispatch::Silent) => {
                                room_rx = None;
                                admin_rx = None;
                                None
                            }
                            Ok(Dispatch::Ack(data)) => Some(match data {
                                Some(data) => CommandAck::ok_with(frame.seq, data),
                                None => CommandAck::ok(frame.seq),
                            }),
                            Err(err) => {
                                tracing::debug!(sapin = session.caller.sapin, %err, "command failed");
                                Some(CommandAck::error(frame.seq, &err))
                            }
                        };

                        if let Some(ack) = ack {
                            if let Ok(json) = serde_json::to_string(&ack) {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(sapin = session.caller.sapin, "WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(sapin = session.caller.sapin, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Disconnect implies leave, even mid-command
    if let Some(group_id) = session.group_id.take() {
        state.leave_group(&group_id, session.caller.sapin).await;
    }
    tracing::info!(sapin = session.caller.sapin, "connection cleaned up");
}
