//! Per-project presence derived from project room membership.
//!
//! Presence is per-**user**, not per-connection: a user is present in a
//! project while at least one of their registered connections is a member of
//! that project's room. Nothing is stored here; every answer is computed from
//! the [`UserDirectory`] and the project [`RoomIndex`].
//!
//! The engine only reports *edges*. Callers must serialize the mutating
//! methods (the hub holds its presence transition lock around them) so the
//! before/after reads see no interleaved writer.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use super::rooms::{DetachedRoom, RoomIndex};
use super::users::UserDirectory;

/// Payload of `project:presence:update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub project_id: String,
    /// Distinct user IDs, sorted.
    pub users: Vec<String>,
    pub count: usize,
}

pub struct PresenceEngine {
    rooms: Arc<RoomIndex>,
    users: Arc<UserDirectory>,
}

impl PresenceEngine {
    pub fn new(rooms: Arc<RoomIndex>, users: Arc<UserDirectory>) -> Self {
        Self { rooms, users }
    }

    /// Whether any connection of `user_id` is currently in `project_id`.
    pub fn is_present(&self, project_id: &str, user_id: &str) -> bool {
        let sockets = self.users.sockets_for(user_id);
        !sockets.is_empty() && self.rooms.contains_any(project_id, &sockets)
    }

    /// Distinct registered users in a project. Anonymous members are skipped.
    pub fn snapshot(&self, project_id: &str) -> PresenceSnapshot {
        let users: BTreeSet<String> = self
            .rooms
            .members_of(project_id)
            .iter()
            .filter_map(|connection_id| self.users.user_for(connection_id))
            .collect();
        PresenceSnapshot {
            project_id: project_id.to_string(),
            count: users.len(),
            users: users.into_iter().collect(),
        }
    }

    /// Add a connection to a project room. Returns a snapshot when the user
    /// was not present before (a second device of a present user is silent).
    pub fn join(
        &self,
        project_id: &str,
        connection_id: &str,
        user_id: Option<&str>,
    ) -> Option<PresenceSnapshot> {
        let was_present = user_id.map(|u| self.is_present(project_id, u));
        self.rooms.join(project_id, connection_id);

        let user_id = user_id?;
        if was_present == Some(false) && self.is_present(project_id, user_id) {
            tracing::debug!(project_id, user_id, "user entered project");
            return Some(self.snapshot(project_id));
        }
        None
    }

    /// Remove a connection from a project room. Returns a snapshot when the
    /// user's last connection in the room just left.
    pub fn leave(
        &self,
        project_id: &str,
        connection_id: &str,
        user_id: Option<&str>,
    ) -> Option<PresenceSnapshot> {
        let was_present = user_id.map(|u| self.is_present(project_id, u));
        if !self.rooms.leave(project_id, connection_id) {
            return None;
        }

        let user_id = user_id?;
        if was_present == Some(true) && !self.is_present(project_id, user_id) {
            tracing::debug!(project_id, user_id, "user left project");
            return Some(self.snapshot(project_id));
        }
        None
    }

    /// Presence edges caused by a disconnect. Must be called after the
    /// connection was removed from the user directory and detached from its
    /// rooms, so every check sees the post-detachment state. At most one
    /// snapshot per affected room.
    pub fn on_disconnect(
        &self,
        user_id: Option<&str>,
        affected: &[DetachedRoom],
    ) -> Vec<PresenceSnapshot> {
        let Some(user_id) = user_id else {
            return Vec::new();
        };
        affected
            .iter()
            .filter(|detached| !self.is_present(&detached.room, user_id))
            .map(|detached| self.snapshot(&detached.room))
            .collect()
    }

    /// Bind a connection to a user, returning a snapshot for every project
    /// room the connection is in whose presence set changed as a result.
    pub fn register(&self, connection_id: &str, user_id: &str) -> Vec<PresenceSnapshot> {
        if self.users.user_for(connection_id).as_deref() == Some(user_id) {
            return Vec::new();
        }

        let before: Vec<PresenceSnapshot> = self
            .rooms
            .rooms_of(connection_id)
            .iter()
            .map(|room| self.snapshot(room))
            .collect();

        self.users.register(connection_id, user_id);

        before
            .into_iter()
            .filter_map(|old| {
                let new = self.snapshot(&old.project_id);
                (new.users != old.users).then_some(new)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (PresenceEngine, Arc<RoomIndex>, Arc<UserDirectory>) {
        let rooms = Arc::new(RoomIndex::new("project"));
        let users = Arc::new(UserDirectory::new());
        (PresenceEngine::new(rooms.clone(), users.clone()), rooms, users)
    }

    #[test]
    fn first_join_emits_second_device_does_not() {
        let (engine, _rooms, users) = engine();
        users.register("c1", "u1");
        users.register("c2", "u1");

        let first = engine.join("42", "c1", Some("u1")).unwrap();
        assert_eq!(first.users, vec!["u1".to_string()]);
        assert_eq!(first.count, 1);

        assert!(engine.join("42", "c2", Some("u1")).is_none());
        // Leaving one device while the other remains is silent.
        assert!(engine.leave("42", "c1", Some("u1")).is_none());
        assert!(engine.is_present("42", "u1"));

        let gone = engine.leave("42", "c2", Some("u1")).unwrap();
        assert!(gone.users.is_empty());
        assert_eq!(gone.count, 0);
    }

    #[test]
    fn anonymous_join_is_not_tracked() {
        let (engine, rooms, _users) = engine();
        assert!(engine.join("42", "c1", None).is_none());
        assert!(rooms.contains("42", "c1"));
        assert_eq!(engine.snapshot("42").count, 0);
        assert!(engine.leave("42", "c1", None).is_none());
    }

    #[test]
    fn leave_when_not_member_is_silent() {
        let (engine, _rooms, users) = engine();
        users.register("c1", "u1");
        assert!(engine.leave("42", "c1", Some("u1")).is_none());
    }

    #[test]
    fn snapshot_dedups_and_sorts_users() {
        let (engine, rooms, users) = engine();
        users.register("c1", "u2");
        users.register("c2", "u1");
        users.register("c3", "u2");
        for c in ["c1", "c2", "c3", "anon"] {
            rooms.join("42", c);
        }

        let snap = engine.snapshot("42");
        assert_eq!(snap.users, vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(snap.count, 2);
    }

    #[test]
    fn disconnect_reports_only_rooms_the_user_left() {
        let (engine, rooms, users) = engine();
        users.register("c1", "u1");
        users.register("c2", "u1");
        engine.join("A", "c1", Some("u1"));
        engine.join("B", "c1", Some("u1"));
        engine.join("B", "c2", Some("u1"));

        users.unregister("c1");
        let detached = rooms.detach("c1");
        let snaps = engine.on_disconnect(Some("u1"), &detached);

        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].project_id, "A");
        assert_eq!(snaps[0].count, 0);
    }

    #[test]
    fn registering_inside_a_room_updates_presence() {
        let (engine, _rooms, _users) = engine();
        engine.join("42", "c1", None);

        let snaps = engine.register("c1", "u1");
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].users, vec!["u1".to_string()]);

        // Same user again changes nothing.
        assert!(engine.register("c1", "u1").is_empty());

        let snaps = engine.register("c1", "u2");
        assert_eq!(snaps[0].users, vec!["u2".to_string()]);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let snap = PresenceSnapshot {
            project_id: "42".into(),
            users: vec!["u1".into()],
            count: 1,
        };
        assert_eq!(
            serde_json::to_value(&snap).unwrap(),
            serde_json::json!({ "projectId": "42", "users": ["u1"], "count": 1 })
        );
    }
}
