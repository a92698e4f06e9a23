//! Ephemeral relay for cursor and typing events.
//!
//! Stateless: builds the outbound payload, then the hub fans it out to the
//! room minus the originating connection. Nothing is stored or replayed.

use serde::Serialize;
use serde_json::Value;

use super::events::{key_field, CursorPayload, TypingPayload};

/// Outbound `project:cursor:update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub project_id: String,
    pub user_id: String,
    pub x_ratio: f64,
    pub y_ratio: f64,
}

/// Outbound `task:typing:start` / `task:typing:stop`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub task_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Clamp a ratio to `[0, 1]`. Accepts JSON numbers and numeric strings;
/// anything else (including non-finite values) is rejected.
pub fn clamp_ratio(value: &Value) -> Option<f64> {
    let ratio = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    ratio.is_finite().then(|| ratio.clamp(0.0, 1.0))
}

/// Build a cursor update. `None` when the sender is unregistered or the
/// payload is malformed.
pub fn cursor_update(payload: &CursorPayload, sender_user_id: Option<&str>) -> Option<CursorUpdate> {
    let user_id = sender_user_id?;
    Some(CursorUpdate {
        project_id: key_field(&payload.project_id, "projectId")?,
        user_id: user_id.to_string(),
        x_ratio: clamp_ratio(&payload.x_ratio)?,
        y_ratio: clamp_ratio(&payload.y_ratio)?,
    })
}

/// Build a typing update. Both `taskId` and `userId` must be present; the
/// user comes from the payload, so registration is not required.
pub fn typing_update(payload: TypingPayload) -> Option<TypingUpdate> {
    Some(TypingUpdate {
        task_id: key_field(&payload.task_id, "taskId")?,
        user_id: key_field(&payload.user_id, "userId")?,
        display_name: match payload.display_name {
            Value::String(name) if !name.trim().is_empty() => Some(name),
            _ => None,
        },
    })
}
