//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use community_common::id::{prefix, prefixed_ulid};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

use crate::auth::identity::bearer_token;
use crate::AppState;

use super::events::{
    raw_correlation_token, ClientEvent, ClientMessage, EventParseError, GatewayMessage,
    HeartbeatPayload, IdentifyPayload, ServerEvent, OP_DISPATCH, OP_HEARTBEAT, OP_IDENTIFY,
};
use super::fanout::OUTBOUND_QUEUE_CAPACITY;
use super::handler;
use super::lifecycle;
use super::registry::Outbound;
use super::session::GatewaySession;

/// Close codes (4000-range for application-level).
pub const CLOSE_UNKNOWN_ERROR: u16 = 4000;
pub const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
pub const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
pub const CLOSE_AUTH_FAILED: u16 = 4004;
pub const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Timeout for receiving IDENTIFY after connection (seconds).
const IDENTIFY_TIMEOUT_SECS: u64 = 10;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

#[derive(Debug, Default, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<GatewayQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_owned)
        .or(query.token.filter(|t| !t.is_empty()));
    ws.on_upgrade(move |socket| handle_connection(socket, state, credential))
}

async fn handle_connection(socket: WebSocket, state: AppState, credential: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: credential from the handshake, or an IDENTIFY frame.
    let credential = match credential {
        Some(credential) => credential,
        None => match await_identify(&mut ws_rx).await {
            Ok(token) => token,
            Err(Some((code, reason))) => {
                tracing::debug!(%reason, "gateway handshake failed");
                let _ = send_close(&mut ws_tx, code, reason).await;
                return;
            }
            Err(None) => return,
        },
    };

    // Step 2: resolve the credential. Nothing is registered on failure.
    let user = match state.identity.authenticate(&credential).await {
        Ok(user) => user,
        Err(err) => {
            tracing::debug!(?err, "gateway authentication failed");
            let _ = send_event(&mut ws_tx, &ServerEvent::error(err.client_message()), 1).await;
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, "Authentication failed").await;
            return;
        }
    };

    let session = Arc::new(GatewaySession::new(prefixed_ulid(prefix::CONNECTION), user));
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let ready = ServerEvent::Ready {
        connection_id: session.connection_id.clone(),
        user: session.user.clone(),
        heartbeat_interval: state.config.heartbeat_interval_ms,
    };
    let _ = tx.try_send(Outbound::Dispatch(Arc::new(ready)));
    let writer = tokio::spawn(write_loop(ws_tx, rx, session.clone()));

    // Step 3: register and join rooms.
    if let Err(err) = lifecycle::connect(&state, &session, tx.clone()).await {
        tracing::warn!(?err, user_id = %session.user.id, "failed to load memberships on connect");
        let _ = tx.try_send(Outbound::Dispatch(Arc::new(ServerEvent::error(
            err.client_message(),
        ))));
        let _ = tx.try_send(Outbound::Close {
            code: CLOSE_UNKNOWN_ERROR,
            reason: "Failed to load communities",
        });
        drop(tx);
        let _ = writer.await;
        return;
    }

    // Step 4: event loop, then cleanup exactly once.
    run_session(&state, &session, ws_rx, &tx, writer).await;
    lifecycle::disconnect(&state, &session.connection_id).await;

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user.id,
        "gateway session ended"
    );
}

/// Wait for an IDENTIFY frame. `Err(None)` means the client went away.
async fn await_identify(
    ws_rx: &mut WsStream,
) -> Result<String, Option<(u16, &'static str)>> {
    let identify = async {
        while let Some(msg) = ws_rx.next().await {
            let text = match msg {
                Ok(Message::Text(t)) => t,
                Ok(Message::Close(_)) => return Err(None),
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(?e, "ws read error during identify");
                    return Err(None);
                }
            };

            let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
                return Err(Some((CLOSE_UNKNOWN_ERROR, "Invalid JSON")));
            };
            if client_msg.op != OP_IDENTIFY {
                return Err(Some((CLOSE_NOT_AUTHENTICATED, "Expected IDENTIFY")));
            }
            let Ok(payload) = serde_json::from_value::<IdentifyPayload>(client_msg.d) else {
                return Err(Some((CLOSE_AUTH_FAILED, "Invalid IDENTIFY payload")));
            };
            return Ok(payload.token);
        }
        Err(None)
    };

    time::timeout(Duration::from_secs(IDENTIFY_TIMEOUT_SECS), identify)
        .await
        .unwrap_or(Err(Some((CLOSE_SESSION_TIMEOUT, "Identify timeout"))))
}

/// Read client frames, one event at a time, and enforce the heartbeat.
async fn run_session(
    state: &AppState,
    session: &GatewaySession,
    mut ws_rx: WsStream,
    tx: &mpsc::Sender<Outbound>,
    mut writer: JoinHandle<()>,
) {
    // Heartbeat deadline: client must heartbeat within 1.5× the interval.
    let heartbeat_deadline = Duration::from_millis((state.config.heartbeat_interval_ms * 3 / 2).max(1));
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                };

                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(_) => {
                        reply(tx, ServerEvent::error("Invalid JSON"));
                        continue;
                    }
                };

                match client_msg.op {
                    OP_HEARTBEAT => {
                        got_heartbeat = true;
                        let payload: HeartbeatPayload =
                            serde_json::from_value(client_msg.d).unwrap_or(HeartbeatPayload { seq: 0 });
                        let _ = tx.try_send(Outbound::HeartbeatAck(payload.seq));
                    }
                    OP_DISPATCH => handle_event(state, session, tx, client_msg).await,
                    OP_IDENTIFY => {
                        close(tx, CLOSE_UNKNOWN_ERROR, "Already identified");
                        break;
                    }
                    _ => {
                        close(tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode");
                        break;
                    }
                }
            }

            // The writer stopped: the socket is gone.
            _ = &mut writer => break,

            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        connection_id = %session.connection_id,
                        "heartbeat timeout, closing connection"
                    );
                    close(tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout");
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

async fn handle_event(
    state: &AppState,
    session: &GatewaySession,
    tx: &mpsc::Sender<Outbound>,
    client_msg: ClientMessage,
) {
    let name = client_msg.t.as_deref();
    let event = match ClientEvent::parse(name, client_msg.d.clone()) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(%err, connection_id = %session.connection_id, "rejected client event");
            let event = match err {
                EventParseError::InvalidPayload { ref event, .. } if event == "send_message" => {
                    ServerEvent::MessageError {
                        correlation_token: raw_correlation_token(&client_msg.d),
                        error: err.to_string(),
                    }
                }
                _ => ServerEvent::error(err.to_string()),
            };
            reply(tx, event);
            return;
        }
    };

    match handler::dispatch(state, session, event).await {
        Ok(Some(event)) => reply(tx, event),
        Ok(None) => {}
        Err(rejection) => reply(tx, rejection.into_event()),
    }
}

fn reply(tx: &mpsc::Sender<Outbound>, event: ServerEvent) {
    if tx.try_send(Outbound::Dispatch(Arc::new(event))).is_err() {
        tracing::warn!("outbound queue unavailable; dropping reply");
    }
}

fn close(tx: &mpsc::Sender<Outbound>, code: u16, reason: &'static str) {
    let _ = tx.try_send(Outbound::Close { code, reason });
}

/// Drain the outbound queue onto the socket, numbering dispatch frames.
async fn write_loop(
    mut ws_tx: WsSink,
    mut rx: mpsc::Receiver<Outbound>,
    session: Arc<GatewaySession>,
) {
    while let Some(outbound) = rx.recv().await {
        let sent = match outbound {
            Outbound::Dispatch(event) => send_event(&mut ws_tx, &event, session.next_seq()).await,
            Outbound::HeartbeatAck(seq) => send_frame(&mut ws_tx, &GatewayMessage::heartbeat_ack(seq)).await,
            Outbound::Close { code, reason } => {
                let _ = send_close(&mut ws_tx, code, reason).await;
                return;
            }
        };
        if sent.is_err() {
            tracing::debug!(connection_id = %session.connection_id, "ws write failed");
            return;
        }
    }
    let _ = ws_tx.close().await;
}

async fn send_event(ws_tx: &mut WsSink, event: &ServerEvent, seq: u64) -> Result<(), axum::Error> {
    match GatewayMessage::event(event, seq) {
        Ok(frame) => send_frame(ws_tx, &frame).await,
        Err(err) => {
            tracing::error!(?err, "failed to encode gateway event");
            Ok(())
        }
    }
}

async fn send_frame(ws_tx: &mut WsSink, frame: &GatewayMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(json) => ws_tx.send(Message::Text(json.into())).await,
        Err(err) => {
            tracing::error!(?err, "failed to encode gateway frame");
            Ok(())
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
