//! Registry of reachable peers.
//!
//! Maps a peer ID to the link currently used to reach it. There is at most
//! one entry per ID: a new connection for a known ID replaces the stored
//! handle and keeps the entry's position, so listings stay stable while links
//! come and go.
//!
//! The registry is generic over the handle type and never performs I/O; the
//! session decides when entries are created, refreshed, or expired. Times
//! come from the Tokio clock.

use std::time::Duration;

use tokio::time::Instant;

use crate::code::PeerId;

/// A registered peer.
#[derive(Debug, Clone)]
pub struct PeerEntry<H> {
    /// Peer ID the link is keyed by
    pub peer_id: PeerId,
    /// Link used to reach the peer
    pub handle: H,
    /// When the peer was first registered
    pub first_seen: Instant,
    /// Last connection or inbound traffic
    pub last_seen: Instant,
}

impl<H> PeerEntry<H> {
    /// Time since the peer was last seen.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// Insertion-ordered peer registry, deduplicated by peer ID.
#[derive(Debug)]
pub struct PeerRegistry<H> {
    entries: Vec<PeerEntry<H>>,
}

impl<H> Default for PeerRegistry<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H> PeerRegistry<H> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer or replace the handle of an existing one.
    ///
    /// Returns the replaced handle, if any.
    pub fn upsert(&mut self, peer_id: PeerId, handle: H) -> Option<H> {
        let now = Instant::now();

        if let Some(entry) = self.entries.iter_mut().find(|e| e.peer_id == peer_id) {
            entry.last_seen = now;
            return Some(std::mem::replace(&mut entry.handle, handle));
        }

        self.entries.push(PeerEntry {
            peer_id,
            handle,
            first_seen: now,
            last_seen: now,
        });
        None
    }

    /// Look up a peer by exact ID.
    #[must_use]
    pub fn find(&self, peer_id: &PeerId) -> Option<&PeerEntry<H>> {
        self.entries.iter().find(|e| &e.peer_id == peer_id)
    }

    /// All peers in insertion order.
    #[must_use]
    pub fn list(&self) -> &[PeerEntry<H>] {
        &self.entries
    }

    /// Number of registered peers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Whether no peer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Refresh the last-seen time of a peer.
    ///
    /// Returns `false` if the peer is unknown.
    pub fn touch(&mut self, peer_id: &PeerId) -> bool {
        match self.entries.iter_mut().find(|e| &e.peer_id == peer_id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove a peer.
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PeerEntry<H>> {
        let index = self.entries.iter().position(|e| &e.peer_id == peer_id)?;
        Some(self.entries.remove(index))
    }

    /// Remove every entry matching `is_stale`, returning the removed IDs.
    pub fn expire<F>(&mut self, mut is_stale: F) -> Vec<PeerId>
    where
        F: FnMut(&PeerEntry<H>) -> bool,
    {
        let mut expired = Vec::new();
        self.entries.retain(|entry| {
            if is_stale(entry) {
                expired.push(entry.peer_id.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    /// Remove entries not seen for longer than `max_age`.
    pub fn expire_stale(&mut self, max_age: Duration) -> Vec<PeerId> {
        let now = Instant::now();
        self.expire(|entry| entry.idle_for(now) > max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        PeerId::parse(s).expect("valid id")
    }

    #[test]
    fn test_upsert_and_find() {
        let mut registry = PeerRegistry::new();
        assert!(registry.upsert(id("AAAA"), 1).is_none());

        let entry = registry.find(&id("AAAA")).expect("entry");
        assert_eq!(entry.handle, 1);
        assert!(registry.find(&id("BBBB")).is_none());
    }

    #[test]
    fn test_upsert_replaces_handle_without_duplicating() {
        let mut registry = PeerRegistry::new();
        registry.upsert(id("AAAA"), 1);
        registry.upsert(id("BBBB"), 2);

        let replaced = registry.upsert(id("AAAA"), 3);
        assert_eq!(replaced, Some(1));
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.find(&id("AAAA")).map(|e| e.handle), Some(3));
    }

    #[test]
    fn test_list_keeps_insertion_order() {
        let mut registry = PeerRegistry::new();
        registry.upsert(id("CCCC"), ());
        registry.upsert(id("AAAA"), ());
        registry.upsert(id("BBBB"), ());
        registry.upsert(id("CCCC"), ());

        let order: Vec<&str> = registry.list().iter().map(|e| e.peer_id.as_str()).collect();
        assert_eq!(order, vec!["CCCC", "AAAA", "BBBB"]);
    }

    #[test]
    fn test_remove_and_touch() {
        let mut registry = PeerRegistry::new();
        registry.upsert(id("AAAA"), ());

        assert!(registry.touch(&id("AAAA")));
        assert!(!registry.touch(&id("ZZZZ")));

        assert!(registry.remove(&id("AAAA")).is_some());
        assert!(registry.is_empty());
        assert!(registry.remove(&id("AAAA")).is_none());
    }

    #[test]
    fn test_expire_with_predicate() {
        let mut registry = PeerRegistry::new();
        registry.upsert(id("AAAA"), true);
        registry.upsert(id("BBBB"), false);
        registry.upsert(id("CCCC"), true);

        let expired = registry.expire(|e| e.handle);
        assert_eq!(expired, vec![id("AAAA"), id("CCCC")]);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_expire_stale_keeps_fresh_entries() {
        let mut registry = PeerRegistry::new();
        registry.upsert(id("AAAA"), ());

        assert!(registry.expire_stale(Duration::from_secs(60)).is_empty());
        assert_eq!(registry.count(), 1);

        std::thread::sleep(Duration::from_millis(5));
        let expired = registry.expire_stale(Duration::ZERO);
        assert_eq!(expired, vec![id("AAAA")]);
    }
}
