//! Inbound event dispatch: maps a client frame onto a [`Hub`] operation.

use serde_json::Value;

use super::events::{
    key_field, ClientMessage, CursorPayload, EventName, HeartbeatPayload, InboundEvent,
    OutboundEvent, TypingPayload,
};
use super::fanout::Hub;

/// What the socket loop should do after an inbound frame was handled.
#[derive(Debug, PartialEq)]
pub enum Reply {
    None,
    /// Send this directly to the originating connection.
    Direct(OutboundEvent),
}

/// Apply one client event on behalf of `connection_id`.
///
/// Malformed payloads and unknown events are dropped with a debug log; they
/// are client bugs, not hub errors.
pub fn handle_client_event(hub: &Hub, connection_id: &str, msg: ClientMessage) -> Reply {
    let ClientMessage { t, d } = msg;

    match t.as_str() {
        InboundEvent::HEARTBEAT => {
            let payload: HeartbeatPayload =
                serde_json::from_value(d).unwrap_or(HeartbeatPayload { seq: 0 });
            return Reply::Direct(OutboundEvent::new(
                EventName::HEARTBEAT_ACK,
                serde_json::json!({ "ack": payload.seq }),
            ));
        }
        InboundEvent::REGISTER_USER => match key_field(&d, "userId") {
            Some(user_id) => hub.register_user(connection_id, &user_id),
            None => dropped(connection_id, &t),
        },
        InboundEvent::JOIN_PROJECT => match key_field(&d, "projectId") {
            Some(project_id) => hub.join_project(connection_id, &project_id),
            None => dropped(connection_id, &t),
        },
        InboundEvent::LEAVE_PROJECT => match key_field(&d, "projectId") {
            Some(project_id) => hub.leave_project(connection_id, &project_id),
            None => dropped(connection_id, &t),
        },
        InboundEvent::JOIN_TASK => match key_field(&d, "taskId") {
            Some(task_id) => hub.join_task(connection_id, &task_id),
            None => dropped(connection_id, &t),
        },
        InboundEvent::LEAVE_TASK => match key_field(&d, "taskId") {
            Some(task_id) => hub.leave_task(connection_id, &task_id),
            None => dropped(connection_id, &t),
        },
        InboundEvent::PROJECT_CURSOR_UPDATE => match serde_json::from_value::<CursorPayload>(d) {
            Ok(payload) => {
                hub.cursor_update(connection_id, &payload);
            }
            Err(_) => dropped(connection_id, &t),
        },
        InboundEvent::TASK_TYPING_START | InboundEvent::TASK_TYPING_STOP => {
            match serde_json::from_value::<TypingPayload>(d) {
                Ok(payload) => {
                    let started = t == InboundEvent::TASK_TYPING_START;
                    hub.typing(connection_id, started, payload);
                }
                Err(_) => dropped(connection_id, &t),
            }
        }
        InboundEvent::NOTIFICATIONS_MARK_ALL_READ => {
            match mark_read_target(hub, connection_id, &d) {
                Some(user_id) => {
                    hub.set_unread_count(&user_id, 0);
                }
                None => dropped(connection_id, &t),
            }
        }
        _ => {
            tracing::debug!(connection_id, event = %t, "unknown client event ignored");
        }
    }

    Reply::None
}

/// `notifications:markAllRead` names the user in its payload; a bare call
/// from a registered connection applies to that connection's user.
fn mark_read_target(hub: &Hub, connection_id: &str, d: &Value) -> Option<String> {
    key_field(d, "userId").or_else(|| hub.user_for(connection_id))
}

fn dropped(connection_id: &str, event: &str) {
    tracing::debug!(connection_id, event, "malformed client event dropped");
}
