//! WebSocket upgrade handler and per-connection event loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time;

use crate::error::CommandError;
use crate::AppState;

use super::events::{ClientMessage, ServerMessage, OP_HEARTBEAT};
use super::handler::{handle_command, render_reply};
use super::session::{next_frame, Connection, Outbound};

/// Close code for a client that stopped sending heartbeats.
pub const CLOSE_SESSION_TIMEOUT: u16 = 4009;
/// Close code for a client whose outbound queue is too full to take a command reply.
pub const CLOSE_SLOW_CONSUMER: u16 = 4008;

pub fn router() -> Router<AppState> {
    Router::new().route("/socket", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_connection(socket, state, remote, origin))
}

async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    remote: SocketAddr,
    origin: Option<String>,
) {
    let (conn, outbound_rx) = Connection::new(Some(remote.ip()), origin);
    state.broker.register(conn.clone());
    tracing::info!(connection_id = %conn.id, %remote, "socket connected");

    let (ws_tx, ws_rx) = socket.split();
    let (close_tx, close_rx) = oneshot::channel();
    let hello = ServerMessage::hello(&conn.id, state.config.heartbeat_interval_ms).to_json();
    conn.send_frame(hello.into());

    let writer = tokio::spawn(write_loop(ws_tx, outbound_rx, close_rx));
    let close_code = read_loop(&state, &conn, ws_rx).await;

    // Rooms are released before the connection goes away.
    state.broker.disconnect(&conn);
    if let Some(code) = close_code {
        let _ = close_tx.send(code);
    } else {
        drop(close_tx);
    }
    let _ = writer.await;

    tracing::info!(connection_id = %conn.id, "socket disconnected");
}

/// Read client commands until the socket closes. Returns a close code if the server
/// decided to end the session.
async fn read_loop(
    state: &AppState,
    conn: &Arc<Connection>,
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
) -> Option<u16> {
    // A client that goes 1.5x the interval without a heartbeat is closed.
    let grace = heartbeat_grace(state.config.heartbeat_interval_ms);
    let heartbeat_deadline = time::sleep(grace);
    tokio::pin!(heartbeat_deadline);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %conn.id, "ws read error");
                        return None;
                    }
                    Some(Ok(_)) => continue,
                };

                // Commands run one at a time, so a socket's room changes apply in order.
                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(command) => {
                        if command.op == OP_HEARTBEAT {
                            heartbeat_deadline.as_mut().reset(time::Instant::now() + grace);
                        }
                        handle_command(state, conn, command).await
                    }
                    Err(e) => render_reply(None, Err(CommandError::Malformed(e.to_string()))),
                };
                if let Err(code) = queue_reply(conn, reply) {
                    return Some(code);
                }
            }

            () = &mut heartbeat_deadline => {
                tracing::debug!(connection_id = %conn.id, "heartbeat timeout, closing connection");
                return Some(CLOSE_SESSION_TIMEOUT);
            }
        }
    }
}

fn heartbeat_grace(interval_ms: u64) -> Duration {
    Duration::from_millis(interval_ms * 3 / 2)
}

/// Every command is acknowledged or the session ends: a reply that cannot be queued
/// closes the socket with [`CLOSE_SLOW_CONSUMER`].
fn queue_reply(conn: &Connection, reply: String) -> Result<(), u16> {
    if conn.send_frame(reply.into()) || conn.is_closed() {
        return Ok(());
    }
    tracing::warn!(connection_id = %conn.id, "reply could not be queued, closing connection");
    Err(CLOSE_SLOW_CONSUMER)
}

/// Drain the outbound queue in order until the reader ends the session.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    mut close_rx: oneshot::Receiver<u16>,
) {
    loop {
        tokio::select! {
            biased;

            close = &mut close_rx => {
                if let Ok(code) = close {
                    let _ = send_close(&mut ws_tx, code, close_reason(code)).await;
                }
                break;
            }

            next = next_frame(&mut outbound_rx) => match next {
                Some(Some(frame)) => {
                    if ws_tx.send(Message::Text(frame.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                // Filtered out for this connection.
                Some(None) => continue,
                None => break,
            },
        }
    }
}

fn close_reason(code: u16) -> &'static str {
    match code {
        CLOSE_SESSION_TIMEOUT => "Heartbeat timeout",
        CLOSE_SLOW_CONSUMER => "Outbound queue full",
        _ => "Closing",
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &'static str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }));
    ws_tx.send(close_msg).await
}
