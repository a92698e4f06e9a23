//! Internal push API used by the REST/notification layer after it commits a
//! write. Every endpoint is fire-and-forget: a recipient that is not
//! connected yields `delivered: 0`, never an error.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;
use crate::gateway::presence::PresenceSnapshot;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/{user_id}/events", post(send_to_user))
        .route("/users/{user_id}/notifications", post(notify_user))
        .route("/users/{user_id}/unread", put(set_unread))
        .route("/users/{user_id}/unread/increment", post(increment_unread))
        .route("/projects/{project_id}/events", post(broadcast_to_project))
        .route("/projects/{project_id}/presence", get(project_presence))
        .route("/tasks/{task_id}/events", post(broadcast_to_task))
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl EventRequest {
    fn event_name(&self) -> Result<&str, ApiError> {
        let name = self.event.trim();
        if name.is_empty() {
            return Err(ApiError::bad_request("event must not be empty"));
        }
        Ok(name)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveredResponse {
    pub delivered: usize,
}

#[derive(Debug, Deserialize)]
pub struct SetUnreadRequest {
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct IncrementUnreadRequest {
    #[serde(default = "default_delta")]
    pub delta: i64,
}

fn default_delta() -> i64 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

// ---------------------------------------------------------------------------
// POST /internal/users/:user_id/events
// ---------------------------------------------------------------------------

async fn send_to_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> Result<Json<DeliveredResponse>, ApiError> {
    let Json(req) = body?;
    let delivered = state
        .hub
        .send_to_user(&user_id, req.event_name()?, req.payload.clone());
    Ok(Json(DeliveredResponse { delivered }))
}

// ---------------------------------------------------------------------------
// POST /internal/users/:user_id/notifications
// ---------------------------------------------------------------------------

async fn notify_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<DeliveredResponse>, ApiError> {
    let Json(notification) = body?;
    if !notification.is_object() {
        return Err(ApiError::bad_request("notification must be a JSON object"));
    }
    let delivered = state.hub.notify(&user_id, notification);
    Ok(Json(DeliveredResponse { delivered }))
}

// ---------------------------------------------------------------------------
// PUT /internal/users/:user_id/unread
// ---------------------------------------------------------------------------

async fn set_unread(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Result<Json<SetUnreadRequest>, JsonRejection>,
) -> Result<Json<CountResponse>, ApiError> {
    let Json(req) = body?;
    let count = state.hub.set_unread_count(&user_id, req.count);
    Ok(Json(CountResponse { count }))
}

// ---------------------------------------------------------------------------
// POST /internal/users/:user_id/unread/increment
// ---------------------------------------------------------------------------

async fn increment_unread(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Result<Json<IncrementUnreadRequest>, JsonRejection>,
) -> Result<Json<CountResponse>, ApiError> {
    let Json(req) = body?;
    let count = state.hub.increment_unread_count(&user_id, req.delta);
    Ok(Json(CountResponse { count }))
}

// ---------------------------------------------------------------------------
// POST /internal/projects/:project_id/events
// ---------------------------------------------------------------------------

async fn broadcast_to_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> Result<Json<DeliveredResponse>, ApiError> {
    let Json(req) = body?;
    let delivered =
        state
            .hub
            .broadcast_to_project(&project_id, req.event_name()?, req.payload.clone());
    Ok(Json(DeliveredResponse { delivered }))
}

// ---------------------------------------------------------------------------
// GET /internal/projects/:project_id/presence
// ---------------------------------------------------------------------------

async fn project_presence(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Json<PresenceSnapshot> {
    Json(state.hub.presence(&project_id))
}

// ---------------------------------------------------------------------------
// POST /internal/tasks/:task_id/events
// ---------------------------------------------------------------------------

async fn broadcast_to_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> Result<Json<DeliveredResponse>, ApiError> {
    let Json(req) = body?;
    let delivered = state
        .hub
        .broadcast_to_task(&task_id, req.event_name()?, req.payload.clone());
    Ok(Json(DeliveredResponse { delivered }))
}
