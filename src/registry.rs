//! Registry of live channels keyed by stream id.
//!
//! `ChannelRegistry` stores non-owning weak references so it never keeps a
//! channel alive on its own. It is the enumeration source for pool
//! teardown — evicted channels stay registered until they reach a terminal
//! state and are settled with the rest. Dead entries are pruned lazily at
//! lookup time or opportunistically via [`prune`](ChannelRegistry::prune).

use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::channel::{Channel, StreamId};

/// Concurrent registry of weak channel references.
#[derive(Default)]
pub struct ChannelRegistry(DashMap<StreamId, Weak<Channel>>);

impl ChannelRegistry {
    /// Retrieve the channel registered under `id` if it is still alive.
    pub fn get(&self, id: &StreamId) -> Option<Arc<Channel>> {
        let guard = self.0.get(id);
        let channel = guard.as_ref().and_then(|weak| weak.upgrade());
        drop(guard);
        if channel.is_none() {
            self.0.remove_if(id, |_, weak| weak.strong_count() == 0);
        }
        channel
    }

    /// Register a newly created channel.
    pub fn insert(&self, channel: &Arc<Channel>) {
        self.0.insert(channel.id(), Arc::downgrade(channel));
    }

    /// Remove all stale weak references.
    ///
    /// `DashMap::retain` acquires per-bucket write locks, so other
    /// operations may contend briefly while the registry is pruned.
    pub fn prune(&self) { self.0.retain(|_, weak| weak.strong_count() > 0); }

    /// Prune stale references, then collect the remaining live channels.
    #[must_use]
    pub fn live(&self) -> Vec<Arc<Channel>> {
        let mut channels = Vec::with_capacity(self.0.len());
        self.0.retain(|_, weak| {
            if let Some(channel) = weak.upgrade() {
                channels.push(channel);
                true
            } else {
                false
            }
        });
        channels
    }
}
