//! Gateway event names, wire-format messages, and inbound payload parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Hub → Client message
// ---------------------------------------------------------------------------

/// An event queued for delivery to one connection.
///
/// Fan-out shares one allocation across every recipient (`Arc<OutboundEvent>`);
/// the per-connection sequence number is stamped by the socket writer.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub event_name: String,
    pub data: Value,
}

impl OutboundEvent {
    pub fn new(event_name: impl Into<String>, data: Value) -> Self {
        Self {
            event_name: event_name.into(),
            data,
        }
    }
}

/// A message sent from the hub to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage<'a> {
    pub t: &'a str,
    pub s: u64,
    pub d: &'a Value,
}

impl<'a> GatewayMessage<'a> {
    pub fn dispatch(event: &'a OutboundEvent, seq: u64) -> Self {
        Self {
            t: &event.event_name,
            s: seq,
            d: &event.data,
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Hub message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub t: String,
    #[serde(default)]
    pub d: Value,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

/// `project:cursor:update` as sent by a client. Ratios are validated and
/// clamped by the relay.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPayload {
    #[serde(default)]
    pub project_id: Value,
    #[serde(default)]
    pub x_ratio: Value,
    #[serde(default)]
    pub y_ratio: Value,
}

/// `task:typing:start` / `task:typing:stop` as sent by a client.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default)]
    pub task_id: Value,
    #[serde(default)]
    pub user_id: Value,
    /// Decoration only: a non-string value is ignored, not an error.
    #[serde(default)]
    pub display_name: Value,
}

/// Normalize a room or user key from an inbound payload.
///
/// Accepts a bare string, a bare number, or an object carrying `field`.
/// Numbers become their decimal string; empty strings are rejected.
pub fn key_field(value: &Value, field: &str) -> Option<String> {
    match value {
        Value::Object(map) => map.get(field).and_then(scalar_key),
        other => scalar_key(other),
    }
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Event names the hub accepts from clients.
pub struct InboundEvent;

impl InboundEvent {
    pub const HEARTBEAT: &'static str = "heartbeat";
    pub const REGISTER_USER: &'static str = "registerUser";
    pub const JOIN_PROJECT: &'static str = "joinProject";
    pub const LEAVE_PROJECT: &'static str = "leaveProject";
    pub const PROJECT_CURSOR_UPDATE: &'static str = "project:cursor:update";
    pub const JOIN_TASK: &'static str = "joinTask";
    pub const LEAVE_TASK: &'static str = "leaveTask";
    pub const TASK_TYPING_START: &'static str = "task:typing:start";
    pub const TASK_TYPING_STOP: &'static str = "task:typing:stop";
    pub const NOTIFICATIONS_MARK_ALL_READ: &'static str = "notifications:markAllRead";
}

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const HELLO: &'static str = "hello";
    pub const HEARTBEAT_ACK: &'static str = "heartbeat:ack";
    pub const PROJECT_PRESENCE_UPDATE: &'static str = "project:presence:update";
    pub const PROJECT_CURSOR_UPDATE: &'static str = "project:cursor:update";
    pub const TASK_TYPING_START: &'static str = "task:typing:start";
    pub const TASK_TYPING_STOP: &'static str = "task:typing:stop";
    pub const UNREAD_COUNT_UPDATED: &'static str = "unreadNotificationCountUpdated";
    pub const NOTIFICATION_NEW: &'static str = "notification:new";
}
