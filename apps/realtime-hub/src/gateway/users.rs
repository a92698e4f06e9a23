//! User directory: which connections are authenticated as which user.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

#[derive(Default)]
struct Inner {
    by_user: HashMap<String, HashSet<String>>,
    by_connection: HashMap<String, String>,
}

impl Inner {
    /// Detach `connection_id` from its user, dropping the user entry when it
    /// becomes empty.
    fn detach(&mut self, connection_id: &str) -> Option<String> {
        let user_id = self.by_connection.remove(connection_id)?;
        if let Some(set) = self.by_user.get_mut(&user_id) {
            set.remove(connection_id);
            if set.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
        Some(user_id)
    }
}

/// `user_id <-> connection_id` index.
///
/// Both directions live behind one lock so a connection is never visible
/// under two users at once.
pub struct UserDirectory {
    inner: Mutex<Inner>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Bind a connection to a user. Last registration wins: a connection
    /// previously bound to another user is moved, not duplicated.
    ///
    /// Returns the previous user if it was different.
    pub fn register(&self, connection_id: &str, user_id: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        if inner.by_connection.get(connection_id).map(String::as_str) == Some(user_id) {
            return None;
        }
        let previous = inner.detach(connection_id);
        inner
            .by_connection
            .insert(connection_id.to_string(), user_id.to_string());
        inner
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        previous
    }

    /// Remove a connection from whatever user owns it. Returns that user.
    pub fn unregister(&self, connection_id: &str) -> Option<String> {
        self.inner.lock().detach(connection_id)
    }

    /// Connections currently registered as `user_id` (empty for unknown users).
    pub fn sockets_for(&self, user_id: &str) -> HashSet<String> {
        self.inner
            .lock()
            .by_user
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn user_for(&self, connection_id: &str) -> Option<String> {
        self.inner.lock().by_connection.get(connection_id).cloned()
    }

    /// Number of distinct users with at least one connection.
    pub fn user_count(&self) -> usize {
        self.inner.lock().by_user.len()
    }
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::new()
    }
}
