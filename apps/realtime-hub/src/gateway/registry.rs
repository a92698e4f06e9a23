//! Connection registry: live transport connections and their outbound queues.

use std::sync::Arc;

use dashmap::DashMap;
use taskboard_common::id::prefix;
use taskboard_common::PrefixedId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::events::OutboundEvent;

pub type OutboundSender = mpsc::Sender<Arc<OutboundEvent>>;
pub type OutboundReceiver = mpsc::Receiver<Arc<OutboundEvent>>;

/// Capacity of each connection's outbound queue. A connection that falls this
/// far behind has further events dropped until it drains.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// `conn_` prefixed ULIDs.
pub struct ConnectionId;

impl PrefixedId for ConnectionId {
    const PREFIX: &'static str = prefix::CONNECTION;
}

/// Shared registry of all live connections.
///
/// Uses `DashMap` for shard-level concurrency. Every operation touches a
/// single key, so no cross-entry locking is needed here.
pub struct ConnectionRegistry {
    connections: DashMap<String, OutboundSender>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_queue_capacity(OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Allocate a new connection ID and its outbound queue.
    ///
    /// IDs are never reused while the process runs. No other index is touched.
    pub fn connect(&self) -> (String, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let connection_id = ConnectionId::generate();
        self.connections.insert(connection_id.clone(), tx);
        (connection_id, rx)
    }

    /// Drop a connection. Returns `false` if it was already gone.
    pub fn remove(&self, connection_id: &str) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Queue an event for one connection without blocking. Returns whether
    /// it was queued; a full queue drops the event.
    pub fn send(&self, connection_id: &str, event: Arc<OutboundEvent>) -> bool {
        let Some(tx) = self.connections.get(connection_id) else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    connection_id,
                    event = %event.event_name,
                    capacity = self.queue_capacity,
                    "connection lagging behind, outbound event dropped"
                );
                false
            }
            // A closed receiver means the socket task is already tearing down.
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queue an event for every connection in `targets`, skipping `exclude`.
    /// Returns the number of connections it was queued for.
    pub fn send_many<'a, I>(&self, targets: I, exclude: Option<&str>, event: OutboundEvent) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let event = Arc::new(event);
        targets
            .into_iter()
            .filter(|id| Some(id.as_str()) != exclude)
            .filter(|id| self.send(id, event.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
