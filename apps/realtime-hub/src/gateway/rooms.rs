//! Room membership index. One instance holds project rooms, another holds
//! task rooms; the contract is identical.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

/// A room the connection was removed from by [`RoomIndex::detach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedRoom {
    pub room: String,
    /// The room had no members left and its entry was deleted.
    pub emptied: bool,
}

#[derive(Default)]
struct Inner {
    members: HashMap<String, HashSet<String>>,
    rooms_by_connection: HashMap<String, HashSet<String>>,
}

impl Inner {
    /// Remove `connection_id` from `room`. Returns `Some(emptied)` if it was a
    /// member. Empty sets are deleted in both directions.
    fn remove(&mut self, room: &str, connection_id: &str) -> Option<bool> {
        let set = self.members.get_mut(room)?;
        if !set.remove(connection_id) {
            return None;
        }
        let emptied = set.is_empty();
        if emptied {
            self.members.remove(room);
        }
        if let Some(rooms) = self.rooms_by_connection.get_mut(connection_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.rooms_by_connection.remove(connection_id);
            }
        }
        Some(emptied)
    }
}

/// `room_key -> connections` with a reverse index for O(rooms) detach.
pub struct RoomIndex {
    kind: &'static str,
    inner: Mutex<Inner>,
}

impl RoomIndex {
    /// `kind` only labels log lines (`"project"`, `"task"`).
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Add a connection to a room. Returns `true` if it was not already a member.
    pub fn join(&self, room: &str, connection_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let added = inner
            .members
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string());
        if added {
            inner
                .rooms_by_connection
                .entry(connection_id.to_string())
                .or_default()
                .insert(room.to_string());
        }
        added
    }

    /// Remove a connection from a room. Returns `true` if it was a member.
    pub fn leave(&self, room: &str, connection_id: &str) -> bool {
        let removed = self.inner.lock().remove(room, connection_id);
        if removed == Some(true) {
            tracing::trace!(kind = self.kind, room, "room emptied");
        }
        removed.is_some()
    }

    /// Members of a room (empty for unknown rooms).
    pub fn members_of(&self, room: &str) -> HashSet<String> {
        self.inner
            .lock()
            .members
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, room: &str, connection_id: &str) -> bool {
        self.inner
            .lock()
            .members
            .get(room)
            .is_some_and(|set| set.contains(connection_id))
    }

    /// Whether any of `connection_ids` is a member of `room`.
    pub fn contains_any(&self, room: &str, connection_ids: &HashSet<String>) -> bool {
        let inner = self.inner.lock();
        match inner.members.get(room) {
            Some(set) => connection_ids.iter().any(|id| set.contains(id)),
            None => false,
        }
    }

    /// Rooms a connection currently belongs to.
    pub fn rooms_of(&self, connection_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .rooms_by_connection
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a connection from every room it belongs to.
    pub fn detach(&self, connection_id: &str) -> Vec<DetachedRoom> {
        let mut inner = self.inner.lock();
        let Some(rooms) = inner.rooms_by_connection.remove(connection_id) else {
            return Vec::new();
        };

        let mut detached = Vec::with_capacity(rooms.len());
        for room in rooms {
            let Some(set) = inner.members.get_mut(&room) else {
                continue;
            };
            set.remove(connection_id);
            let emptied = set.is_empty();
            if emptied {
                inner.members.remove(&room);
            }
            detached.push(DetachedRoom { room, emptied });
        }
        detached
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.inner.lock().members.len()
    }
}
