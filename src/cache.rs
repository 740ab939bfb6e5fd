use crate::model::{ListingSnapshot, PeerName};
use std::sync::Arc;

/// How many resident snapshots the cache keeps. The observed behavior of
/// the sampled system is a single global slot (browsing a new peer evicts
/// everyone else); `LruBounded` is the explicit alternative reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionPolicy {
    SingleSlot,
    LruBounded(usize),
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::SingleSlot
    }
}

/// Holds at most one resident snapshot per tracked peer, most recently used
/// first. Snapshots are immutable and handed out as `Arc`s, so replacing one
/// is an atomic swap from the reader's perspective: a reader holds either
/// the old listing or the new one in full, never a blend.
///
/// Owned exclusively by the service event loop (single writer); no lock.
#[derive(Debug, Default)]
pub struct BrowseCache {
    policy: EvictionPolicy,
    entries: Vec<(PeerName, Arc<ListingSnapshot>)>,
}

impl BrowseCache {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
        }
    }

    /// Look up a snapshot and mark it most recently used.
    pub fn get(&mut self, peer: &PeerName) -> Option<Arc<ListingSnapshot>> {
        let pos = self.entries.iter().position(|(name, _)| name == peer)?;
        let entry = self.entries.remove(pos);
        let snapshot = Arc::clone(&entry.1);
        self.entries.insert(0, entry);
        Some(snapshot)
    }

    /// Install a freshly fetched snapshot, evicting per policy.
    pub fn insert(&mut self, snapshot: ListingSnapshot) -> Arc<ListingSnapshot> {
        let peer = snapshot.peer.clone();
        let snapshot = Arc::new(snapshot);
        self.entries.retain(|(name, _)| name != &peer);
        self.entries.insert(0, (peer, Arc::clone(&snapshot)));
        let capacity = match self.policy {
            EvictionPolicy::SingleSlot => 1,
            EvictionPolicy::LruBounded(bound) => bound.max(1),
        };
        if self.entries.len() > capacity {
            for (evicted, _) in self.entries.drain(capacity..) {
                tracing::debug!(peer = %evicted, "evicted cached snapshot");
            }
        }
        snapshot
    }

    /// Drop the snapshot for `peer`, if resident. Used by forced refresh.
    pub fn remove(&mut self, peer: &PeerName) {
        self.entries.retain(|(name, _)| name != peer);
    }

    pub fn contains(&self, peer: &PeerName) -> bool {
        self.entries.iter().any(|(name, _)| name == peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
