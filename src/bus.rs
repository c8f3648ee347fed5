use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel as channel;
use dashmap::DashMap;
use tracing::warn;

use crate::sampler::Snapshot;

pub type SubscriberId = u64;

/// Receiving end handed to an observer. Dropping it unsubscribes on the next publish.
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: channel::Receiver<Snapshot>,
}

/// Fan-out of snapshots to any number of observers.
///
/// Each observer gets its own bounded queue, so it sees snapshots in publish
/// order, one at a time.
pub struct SnapshotBus {
    // concurrent map to avoid a global mutex during publish
    subscribers: DashMap<SubscriberId, channel::Sender<Snapshot>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl SnapshotBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = channel::bounded(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, tx);
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn dispose(&self) {
        self.subscribers.clear();
    }

    pub fn publish(&self, snapshot: &Snapshot) {
        // Clone senders out first; DashMap only holds brief per-shard locks.
        let targets: Vec<(SubscriberId, channel::Sender<Snapshot>)> =
            self.subscribers.iter().map(|e| (*e.key(), e.value().clone())).collect();

        let mut to_remove: Vec<SubscriberId> = Vec::new();
        for (id, tx) in targets.into_iter() {
            match tx.try_send(snapshot.clone()) {
                Ok(()) => {}
                Err(channel::TrySendError::Full(_)) => {
                    // Observer stopped draining: cut it loose
                    warn!(subscriber = id, capacity = self.capacity, "Dropping lagging subscriber");
                    to_remove.push(id);
                }
                Err(channel::TrySendError::Disconnected(_)) => {
                    to_remove.push(id);
                }
            }
        }

        for id in to_remove {
            self.unsubscribe(id);
        }
    }
}
