//! Subscriber Registry
//!
//! The live set of downstream connections. Connection handlers add and
//! remove entries; the broadcast loop only takes snapshots.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::application::ports::SubscriberSink;

/// Identity of one downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Connected subscribers keyed by id.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    members: RwLock<HashMap<SubscriberId, Arc<dyn SubscriberSink>>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a new connection. Ids are never reused.
    pub fn next_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register a subscriber.
    ///
    /// Returns `false` and leaves the registry unchanged if `id` is
    /// already present.
    pub fn add(&self, id: SubscriberId, sink: Arc<dyn SubscriberSink>) -> bool {
        let mut members = self.members.write();
        if members.contains_key(&id) {
            return false;
        }
        members.insert(id, sink);
        true
    }

    /// Remove a subscriber. Removing an absent id is a no-op.
    pub fn remove(&self, id: SubscriberId) -> bool {
        self.members.write().remove(&id).is_some()
    }

    /// Current members, for iteration without holding the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(SubscriberId, Arc<dyn SubscriberSink>)> {
        self.members
            .read()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.members.read().contains_key(&id)
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// Whether nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
