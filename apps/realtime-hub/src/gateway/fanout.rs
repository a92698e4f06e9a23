//! The hub: the one surface the transport and the HTTP layer talk to.
//!
//! Inbound connection events (register, join, leave, cursor, typing,
//! disconnect) and server-initiated pushes (`send_to_user`,
//! `broadcast_to_project`, unread counts) all go through [`Hub`]. Delivery is
//! best-effort, at most once, to currently connected sockets only.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use super::events::{CursorPayload, EventName, OutboundEvent, TypingPayload};
use super::presence::{PresenceEngine, PresenceSnapshot};
use super::registry::{ConnectionRegistry, OutboundReceiver};
use super::relay;
use super::rooms::RoomIndex;
use super::unread::UnreadCounters;
use super::users::UserDirectory;

/// Counts reported by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub connections: usize,
    pub users: usize,
    pub project_rooms: usize,
    pub task_rooms: usize,
}

pub struct Hub {
    connections: ConnectionRegistry,
    users: Arc<UserDirectory>,
    projects: Arc<RoomIndex>,
    tasks: RoomIndex,
    presence: PresenceEngine,
    unread: UnreadCounters,
    /// Serializes every mutation that can move a presence set: register,
    /// project join/leave, and disconnect.
    transitions: Mutex<()>,
}

impl Hub {
    pub fn new() -> Self {
        let users = Arc::new(UserDirectory::new());
        let projects = Arc::new(RoomIndex::new("project"));
        Self {
            connections: ConnectionRegistry::new(),
            presence: PresenceEngine::new(projects.clone(), users.clone()),
            users,
            projects,
            tasks: RoomIndex::new("task"),
            unread: UnreadCounters::new(),
            transitions: Mutex::new(()),
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    pub fn connect(&self) -> (String, OutboundReceiver) {
        self.connections.connect()
    }

    /// Purge a connection from every index and emit the presence edges that
    /// causes. Calling it again for the same ID does nothing.
    pub fn disconnect(&self, connection_id: &str) {
        let _guard = self.transitions.lock();

        let user_id = self.users.unregister(connection_id);
        let affected = self.projects.detach(connection_id);
        let tasks_left = self.tasks.detach(connection_id).len();
        let was_connected = self.connections.remove(connection_id);

        for snapshot in self.presence.on_disconnect(user_id.as_deref(), &affected) {
            self.emit_presence(snapshot);
        }

        if was_connected {
            tracing::info!(
                connection_id,
                user_id = user_id.as_deref().unwrap_or("-"),
                projects = affected.len(),
                tasks = tasks_left,
                "connection closed"
            );
        }
    }

    pub fn register_user(&self, connection_id: &str, user_id: &str) {
        let _guard = self.transitions.lock();
        if !self.connections.contains(connection_id) {
            return;
        }
        for snapshot in self.presence.register(connection_id, user_id) {
            self.emit_presence(snapshot);
        }
        tracing::debug!(connection_id, user_id, "connection registered");
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    pub fn join_project(&self, connection_id: &str, project_id: &str) {
        let _guard = self.transitions.lock();
        if !self.connections.contains(connection_id) {
            return;
        }
        let user_id = self.users.user_for(connection_id);
        if let Some(snapshot) = self
            .presence
            .join(project_id, connection_id, user_id.as_deref())
        {
            self.emit_presence(snapshot);
        }
    }

    pub fn leave_project(&self, connection_id: &str, project_id: &str) {
        let _guard = self.transitions.lock();
        let user_id = self.users.user_for(connection_id);
        if let Some(snapshot) = self
            .presence
            .leave(project_id, connection_id, user_id.as_deref())
        {
            self.emit_presence(snapshot);
        }
    }

    pub fn join_task(&self, connection_id: &str, task_id: &str) {
        // Held so a join cannot slip in after a concurrent disconnect's detach.
        let _guard = self.transitions.lock();
        if self.connections.contains(connection_id) {
            self.tasks.join(task_id, connection_id);
        }
    }

    pub fn leave_task(&self, connection_id: &str, task_id: &str) {
        self.tasks.leave(task_id, connection_id);
    }

    /// Current derived presence for a project.
    pub fn presence(&self, project_id: &str) -> PresenceSnapshot {
        self.presence.snapshot(project_id)
    }

    // -----------------------------------------------------------------------
    // Ephemeral relay
    // -----------------------------------------------------------------------

    /// Relay a cursor position to the other members of the project room.
    /// Dropped when the sender is unregistered or the payload is malformed.
    pub fn cursor_update(&self, connection_id: &str, payload: &CursorPayload) -> usize {
        let user_id = self.users.user_for(connection_id);
        let Some(update) = relay::cursor_update(payload, user_id.as_deref()) else {
            tracing::debug!(connection_id, "cursor update dropped");
            return 0;
        };
        let members = self.projects.members_of(&update.project_id);
        self.connections.send_many(
            &members,
            Some(connection_id),
            OutboundEvent::new(EventName::PROJECT_CURSOR_UPDATE, to_value(&update)),
        )
    }

    /// Relay typing start/stop to the task room, excluding only the
    /// originating connection (the sender's other devices still receive it).
    pub fn typing(&self, connection_id: &str, started: bool, payload: TypingPayload) -> usize {
        let Some(update) = relay::typing_update(payload) else {
            tracing::debug!(connection_id, "typing event dropped");
            return 0;
        };
        let event_name = if started {
            EventName::TASK_TYPING_START
        } else {
            EventName::TASK_TYPING_STOP
        };
        let members = self.tasks.members_of(&update.task_id);
        self.connections.send_many(
            &members,
            Some(connection_id),
            OutboundEvent::new(event_name, to_value(&update)),
        )
    }

    // -----------------------------------------------------------------------
    // Server-initiated dispatch
    // -----------------------------------------------------------------------

    /// Push an event to every connection of a user. Returns how many
    /// connections it was queued for; zero is not an error.
    pub fn send_to_user(&self, user_id: &str, event_name: &str, payload: Value) -> usize {
        let sockets = self.users.sockets_for(user_id);
        let delivered =
            self.connections
                .send_many(&sockets, None, OutboundEvent::new(event_name, payload));
        if delivered == 0 {
            tracing::debug!(user_id, event_name, "user not connected, event not delivered");
        }
        delivered
    }

    /// Push a new notification to a user (`notification:new`).
    pub fn notify(&self, user_id: &str, notification: Value) -> usize {
        self.send_to_user(user_id, EventName::NOTIFICATION_NEW, notification)
    }

    /// Fan out to every member of a project room, registered or not.
    pub fn broadcast_to_project(&self, project_id: &str, event_name: &str, payload: Value) -> usize {
        let members = self.projects.members_of(project_id);
        self.connections
            .send_many(&members, None, OutboundEvent::new(event_name, payload))
    }

    /// Fan out to every member of a task room, registered or not.
    pub fn broadcast_to_task(&self, task_id: &str, event_name: &str, payload: Value) -> usize {
        let members = self.tasks.members_of(task_id);
        self.connections
            .send_many(&members, None, OutboundEvent::new(event_name, payload))
    }

    /// Store a user's unread count (clamped to zero) and push it to all of
    /// their connections. Returns the stored count.
    ///
    /// The push is queued while the user's counter is still locked, so
    /// concurrent writers deliver in the order they stored.
    pub fn set_unread_count(&self, user_id: &str, count: i64) -> u64 {
        self.unread.set(user_id, count, |count| self.push_unread(user_id, count))
    }

    /// Adjust a user's unread count by `delta` (clamped to zero) and push it.
    pub fn increment_unread_count(&self, user_id: &str, delta: i64) -> u64 {
        self.unread.increment(user_id, delta, |count| self.push_unread(user_id, count))
    }

    pub fn unread_count(&self, user_id: &str) -> u64 {
        self.unread.get(user_id)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn user_for(&self, connection_id: &str) -> Option<String> {
        self.users.user_for(connection_id)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            users: self.users.user_count(),
            project_rooms: self.projects.room_count(),
            task_rooms: self.tasks.room_count(),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Queue a presence update for everyone in the room. Called with the
    /// transition lock held so updates for one room leave in order.
    fn emit_presence(&self, snapshot: PresenceSnapshot) {
        let members = self.projects.members_of(&snapshot.project_id);
        tracing::debug!(
            project_id = %snapshot.project_id,
            count = snapshot.count,
            recipients = members.len(),
            "presence changed"
        );
        self.connections.send_many(
            &members,
            None,
            OutboundEvent::new(EventName::PROJECT_PRESENCE_UPDATE, to_value(&snapshot)),
        );
    }

    fn push_unread(&self, user_id: &str, count: u64) {
        self.send_to_user(
            user_id,
            EventName::UNREAD_COUNT_UPDATED,
            serde_json::json!({ "count": count }),
        );
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    // Plain structs of strings and numbers always serialize.
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Drain everything queued for a connection.
    fn drain(rx: &mut OutboundReceiver) -> Vec<Arc<OutboundEvent>> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn presence_updates(rx: &mut OutboundReceiver) -> Vec<Value> {
        drain(rx)
            .into_iter()
            .filter(|e| e.event_name == EventName::PROJECT_PRESENCE_UPDATE)
            .map(|e| e.data.clone())
            .collect()
    }

    fn cursor(project: Value, x: f64, y: f64) -> CursorPayload {
        serde_json::from_value(json!({ "projectId": project, "xRatio": x, "yRatio": y })).unwrap()
    }

    #[test]
    fn scenario_two_users_join_then_one_disconnects() {
        let hub = Hub::new();
        let (c1, mut rx1) = hub.connect();
        let (c2, mut rx2) = hub.connect();

        hub.register_user(&c1, "u1");
        hub.join_project(&c1, "42");
        assert_eq!(
            presence_updates(&mut rx1),
            vec![json!({ "projectId": "42", "users": ["u1"], "count": 1 })]
        );

        hub.register_user(&c2, "u2");
        hub.join_project(&c2, "42");
        let expected = json!({ "projectId": "42", "users": ["u1", "u2"], "count": 2 });
        assert_eq!(presence_updates(&mut rx1), vec![expected.clone()]);
        assert_eq!(presence_updates(&mut rx2), vec![expected]);

        hub.disconnect(&c1);
        assert_eq!(
            presence_updates(&mut rx2),
            vec![json!({ "projectId": "42", "users": ["u2"], "count": 1 })]
        );
    }

    #[test]
    fn same_user_two_devices_emits_once() {
        let hub = Hub::new();
        let (observer, mut rx_obs) = hub.connect();
        let (a, _rx_a) = hub.connect();
        let (b, _rx_b) = hub.connect();
        hub.join_project(&observer, "p");
        hub.register_user(&a, "u1");
        hub.register_user(&b, "u1");

        hub.join_project(&a, "p");
        hub.join_project(&b, "p");
        assert_eq!(presence_updates(&mut rx_obs).len(), 1);

        hub.leave_project(&a, "p");
        assert!(presence_updates(&mut rx_obs).is_empty());

        hub.leave_project(&b, "p");
        assert_eq!(
            presence_updates(&mut rx_obs),
            vec![json!({ "projectId": "p", "users": [], "count": 0 })]
        );
    }

    #[test]
    fn last_leave_empties_room_and_repeat_is_noop() {
        let hub = Hub::new();
        let (c1, _rx) = hub.connect();
        hub.join_project(&c1, "p");
        hub.leave_project(&c1, "p");
        assert_eq!(hub.stats().project_rooms, 0);
        hub.leave_project(&c1, "p");
        assert_eq!(hub.broadcast_to_project("p", "x", json!({})), 0);
    }

    #[test]
    fn disconnect_purges_every_index() {
        let hub = Hub::new();
        let (c1, _rx1) = hub.connect();
        hub.register_user(&c1, "u1");
        hub.join_project(&c1, "A");
        hub.join_project(&c1, "B");
        hub.join_task(&c1, "7");

        hub.disconnect(&c1);

        assert!(hub.user_for(&c1).is_none());
        assert_eq!(hub.broadcast_to_project("A", "x", json!({})), 0);
        assert_eq!(hub.broadcast_to_project("B", "x", json!({})), 0);
        assert_eq!(hub.broadcast_to_task("7", "x", json!({})), 0);
        assert_eq!(hub.send_to_user("u1", "x", json!({})), 0);
        assert_eq!(
            hub.stats(),
            HubStats { connections: 0, users: 0, project_rooms: 0, task_rooms: 0 }
        );

        // Second disconnect is a no-op.
        hub.disconnect(&c1);
    }

    #[test]
    fn join_after_disconnect_is_ignored() {
        let hub = Hub::new();
        let (c1, _rx) = hub.connect();
        hub.disconnect(&c1);
        hub.join_project(&c1, "A");
        hub.join_task(&c1, "7");
        hub.register_user(&c1, "u1");
        assert_eq!(hub.stats().project_rooms, 0);
        assert_eq!(hub.stats().task_rooms, 0);
        assert_eq!(hub.stats().users, 0);
    }

    #[test]
    fn unread_decrement_clamps_and_pushes_zero() {
        let hub = Hub::new();
        let (c1, mut rx) = hub.connect();
        hub.register_user(&c1, "u");

        hub.set_unread_count("u", 2);
        assert_eq!(hub.increment_unread_count("u", -5), 0);

        let pushes: Vec<Value> = drain(&mut rx).iter().map(|e| e.data.clone()).collect();
        assert_eq!(pushes, vec![json!({ "count": 2 }), json!({ "count": 0 })]);
        assert_eq!(hub.unread_count("u"), 0);
    }

    #[test]
    fn concurrent_unread_writers_push_the_stored_value_last() {
        let hub = Hub::new();
        let (c1, mut rx) = hub.connect();
        hub.register_user(&c1, "u");
        let barrier = std::sync::Barrier::new(2);

        for _ in 0..500 {
            std::thread::scope(|s| {
                for count in [5, 0] {
                    let (hub, barrier) = (&hub, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        hub.set_unread_count("u", count);
                    });
                }
            });

            let pushes = drain(&mut rx);
            assert_eq!(pushes.len(), 2);
            let last = pushes.last().unwrap().data.clone();
            assert_eq!(last, json!({ "count": hub.unread_count("u") }));
        }
    }

    #[test]
    fn unread_set_while_offline_is_not_replayed() {
        let hub = Hub::new();
        assert_eq!(hub.set_unread_count("u1", 5), 5);

        let (c1, mut rx) = hub.connect();
        hub.register_user(&c1, "u1");
        assert!(drain(&mut rx).is_empty());
        // The cached value is still the base for increments.
        assert_eq!(hub.increment_unread_count("u1", 1), 6);
    }

    #[test]
    fn cursor_is_clamped_and_skips_sender() {
        let hub = Hub::new();
        let (c1, mut rx1) = hub.connect();
        let (c2, mut rx2) = hub.connect();
        hub.register_user(&c1, "u1");
        hub.join_project(&c1, "42");
        hub.join_project(&c2, "42");
        drain(&mut rx1);
        drain(&mut rx2);

        assert_eq!(hub.cursor_update(&c1, &cursor(json!(42), 1.7, 0.3)), 1);
        assert!(drain(&mut rx1).is_empty());

        let got = drain(&mut rx2);
        assert_eq!(got[0].event_name, EventName::PROJECT_CURSOR_UPDATE);
        assert_eq!(
            got[0].data,
            json!({ "projectId": "42", "userId": "u1", "xRatio": 1.0, "yRatio": 0.3 })
        );
    }

    #[test]
    fn cursor_from_unregistered_sender_is_dropped() {
        let hub = Hub::new();
        let (c1, _rx1) = hub.connect();
        let (c2, mut rx2) = hub.connect();
        hub.join_project(&c1, "42");
        hub.join_project(&c2, "42");
        assert_eq!(hub.cursor_update(&c1, &cursor(json!("42"), 0.5, 0.5)), 0);
        assert!(drain(&mut rx2).is_empty());
    }

    #[test]
    fn typing_without_registration_relays() {
        let hub = Hub::new();
        let (ghost, mut rx_ghost) = hub.connect();
        let (other, mut rx_other) = hub.connect();
        hub.join_task(&ghost, "7");
        hub.join_task(&other, "7");

        let start: TypingPayload =
            serde_json::from_value(json!({ "taskId": "7", "userId": "ghost" })).unwrap();
        assert_eq!(hub.typing(&ghost, true, start), 1);
        assert!(drain(&mut rx_ghost).is_empty());

        let got = drain(&mut rx_other);
        assert_eq!(got[0].event_name, EventName::TASK_TYPING_START);
        assert_eq!(got[0].data, json!({ "taskId": "7", "userId": "ghost" }));

        let stop: TypingPayload =
            serde_json::from_value(json!({ "taskId": 7, "userId": "ghost" })).unwrap();
        assert_eq!(hub.typing(&ghost, false, stop), 1);
        assert_eq!(drain(&mut rx_other)[0].event_name, EventName::TASK_TYPING_STOP);
    }

    #[test]
    fn typing_reaches_senders_other_devices() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        hub.register_user(&a, "u1");
        hub.register_user(&b, "u1");
        hub.join_task(&a, "7");
        hub.join_task(&b, "7");

        let start: TypingPayload =
            serde_json::from_value(json!({ "taskId": "7", "userId": "u1" })).unwrap();
        assert_eq!(hub.typing(&a, true, start), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn send_to_user_reaches_every_device() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        hub.register_user(&a, "u1");
        hub.register_user(&b, "u1");

        assert_eq!(hub.notify("u1", json!({ "id": 9 })), 2);
        assert_eq!(drain(&mut rx_a)[0].event_name, EventName::NOTIFICATION_NEW);
        assert_eq!(drain(&mut rx_b)[0].data, json!({ "id": 9 }));
        assert_eq!(hub.send_to_user("nobody", "x", json!({})), 0);
    }

    #[test]
    fn broadcast_includes_anonymous_members() {
        let hub = Hub::new();
        let (anon, mut rx) = hub.connect();
        hub.join_project(&anon, "42");
        assert_eq!(hub.broadcast_to_project("42", "task:updated", json!({ "id": 1 })), 1);
        assert_eq!(drain(&mut rx)[0].event_name, "task:updated");
    }

    #[test]
    fn reregistration_moves_presence() {
        let hub = Hub::new();
        let (observer, mut rx_obs) = hub.connect();
        let (c1, _rx1) = hub.connect();
        hub.join_project(&observer, "42");
        hub.register_user(&c1, "u1");
        hub.join_project(&c1, "42");
        drain(&mut rx_obs);

        hub.register_user(&c1, "u2");
        assert_eq!(
            presence_updates(&mut rx_obs),
            vec![json!({ "projectId": "42", "users": ["u2"], "count": 1 })]
        );
        assert_eq!(hub.send_to_user("u1", "x", json!({})), 0);
    }

    #[test]
    fn concurrent_joins_and_disconnects_leave_no_residue() {
        let hub = Arc::new(Hub::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let (c, _rx) = hub.connect();
                        hub.register_user(&c, &format!("u{}", i % 3));
                        hub.join_project(&c, "shared");
                        hub.join_task(&c, "t");
                        hub.leave_project(&c, "shared");
                        hub.join_project(&c, "shared");
                        hub.disconnect(&c);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            hub.stats(),
            HubStats { connections: 0, users: 0, project_rooms: 0, task_rooms: 0 }
        );
        assert_eq!(hub.presence("shared").count, 0);
    }
}
