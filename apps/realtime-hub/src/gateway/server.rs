//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time;

use crate::AppState;

use super::events::{ClientMessage, EventName, GatewayMessage, OutboundEvent};
use super::fanout::Hub;
use super::handler::{handle_client_event, Reply};
use super::registry::OutboundReceiver;

/// Close code sent when the client stops heartbeating.
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Upper bound on the silence deadline (one day), so timer arithmetic on
/// `Instant` cannot overflow.
const MAX_HEARTBEAT_DEADLINE_MS: u64 = 24 * 60 * 60 * 1000;

type WsSink = SplitSink<WebSocket, Message>;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Purges a connection from the hub when dropped, so cleanup runs on every
/// exit path of the socket task, including a panic.
struct DisconnectGuard {
    hub: Arc<Hub>,
    connection_id: String,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.hub.disconnect(&self.connection_id);
    }
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let hub = state.hub.clone();
    let (connection_id, outbound_rx) = hub.connect();
    let guard = DisconnectGuard {
        hub: hub.clone(),
        connection_id,
    };
    let (ws_tx, ws_rx) = socket.split();

    tracing::info!(connection_id = %guard.connection_id, "connection opened");

    let heartbeat_interval = state.config.heartbeat_interval_ms;
    run_connection(&hub, &guard.connection_id, heartbeat_interval, ws_tx, ws_rx, outbound_rx).await;
}

/// How long a connection may stay silent: 1.5x the advertised interval,
/// never zero.
fn heartbeat_deadline(heartbeat_interval_ms: u64) -> Duration {
    let deadline_ms = heartbeat_interval_ms.saturating_mul(3) / 2;
    Duration::from_millis(deadline_ms.clamp(1, MAX_HEARTBEAT_DEADLINE_MS))
}

/// Main connection loop: apply client events in receipt order, drain the
/// outbound queue, enforce the heartbeat deadline.
async fn run_connection(
    hub: &Arc<Hub>,
    connection_id: &str,
    heartbeat_interval_ms: u64,
    mut ws_tx: WsSink,
    mut ws_rx: SplitStream<WebSocket>,
    mut outbound_rx: OutboundReceiver,
) {
    let mut seq: u64 = 0;

    let hello = OutboundEvent::new(
        EventName::HELLO,
        serde_json::json!({
            "connectionId": connection_id,
            "heartbeatInterval": heartbeat_interval_ms,
        }),
    );
    if send_event(&mut ws_tx, &mut seq, &hello).await.is_err() {
        return;
    }

    // Any inbound frame counts as liveness; the client must send something
    // within 1.5x the advertised interval.
    let mut heartbeat_timer = time::interval(heartbeat_deadline(heartbeat_interval_ms));
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_activity = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        got_activity = true;
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                tracing::debug!(connection_id, "unparseable frame dropped");
                                continue;
                            }
                        };
                        if let Reply::Direct(event) = handle_client_event(hub, connection_id, client_msg) {
                            if send_event(&mut ws_tx, &mut seq, &event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        got_activity = true;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            event = outbound_rx.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut ws_tx, &mut seq, &event).await.is_err() {
                            break;
                        }
                    }
                    // The registry dropped our sender; nothing more will arrive.
                    None => break,
                }
            }

            _ = heartbeat_timer.tick() => {
                if !got_activity {
                    tracing::debug!(connection_id, "heartbeat timeout, closing connection");
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_activity = false;
            }
        }
    }
}

/// Serialize and send one event, stamping the next sequence number.
async fn send_event(ws_tx: &mut WsSink, seq: &mut u64, event: &OutboundEvent) -> Result<(), axum::Error> {
    *seq += 1;
    let json = match serde_json::to_string(&GatewayMessage::dispatch(event, *seq)) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(?e, event = %event.event_name, "failed to serialize outbound event");
            return Ok(());
        }
    };
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
