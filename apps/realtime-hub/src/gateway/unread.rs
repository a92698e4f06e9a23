//! Last pushed unread-notification count per user.
//!
//! Not the source of truth (the notification store is). There is no
//! "deliver on reconnect": a count set while the user is offline is only
//! remembered as the base for later increments.

use dashmap::DashMap;

pub struct UnreadCounters {
    counts: DashMap<String, u64>,
}

impl UnreadCounters {
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    /// Store `count`, clamped to zero, and hand the stored value to `publish`
    /// before the user's entry is released. Returns the stored value.
    pub fn set(&self, user_id: &str, count: i64, publish: impl FnOnce(u64)) -> u64 {
        self.update(user_id, publish, |_| clamp(count as i128))
    }

    /// Add `delta` to the current count (0 when unknown), clamped to zero.
    /// `publish` runs under the same entry lock as [`Self::set`].
    pub fn increment(&self, user_id: &str, delta: i64, publish: impl FnOnce(u64)) -> u64 {
        self.update(user_id, publish, |current| clamp(current as i128 + delta as i128))
    }

    /// Writers for one user are serialized on the DashMap shard lock held by
    /// the entry guard, so the last value published is the value stored.
    /// `publish` must not touch this map.
    fn update(
        &self,
        user_id: &str,
        publish: impl FnOnce(u64),
        next: impl FnOnce(u64) -> u64,
    ) -> u64 {
        let mut entry = self.counts.entry(user_id.to_string()).or_insert(0);
        *entry = next(*entry);
        let count = *entry;
        publish(count);
        count
    }

    pub fn get(&self, user_id: &str) -> u64 {
        self.counts.get(user_id).map(|c| *c).unwrap_or(0)
    }
}

impl Default for UnreadCounters {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp(value: i128) -> u64 {
    value.clamp(0, u64::MAX as i128) as u64
}
