//! Process-wide presence tracking.
//!
//! One writer ([`PresenceTracker::apply`]) and read-only lookups. Every change
//! bumps a monotonic `last_updated` token so readers can detect a change
//! without comparing sets.

use std::collections::BTreeSet;

use kinship_proto::{Payload, UserId};

/// Snapshot of who is online.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSet {
    online: BTreeSet<UserId>,
    last_updated: u64,
}

impl PresenceSet {
    /// True if `user_id` currently has a live connection.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    /// Change counter. Strictly increases with every effective change.
    pub fn last_updated(&self) -> u64 {
        self.last_updated
    }

    /// Online users in id order.
    pub fn iter(&self) -> impl Iterator<Item = &UserId> {
        self.online.iter()
    }

    /// Number of online users.
    pub fn len(&self) -> usize {
        self.online.len()
    }

    /// True if nobody is online.
    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}

/// Single writer of the presence set.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    set: PresenceSet,
}

impl PresenceTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> &PresenceSet {
        &self.set
    }

    /// Lookup shortcut for [`PresenceSet::is_online`].
    pub fn is_online(&self, user_id: &str) -> bool {
        self.set.is_online(user_id)
    }

    /// Apply a presence event. Returns true if the set changed.
    ///
    /// Non-presence payloads and repeated events are no-ops.
    pub fn apply(&mut self, payload: &Payload) -> bool {
        let changed = match payload {
            Payload::Presence(update) if update.online => {
                self.set.online.insert(update.user_id.clone())
            },
            Payload::Presence(update) => self.set.online.remove(&update.user_id),
            Payload::PresenceSnapshot(snapshot) => {
                let next: BTreeSet<UserId> = snapshot.online.iter().cloned().collect();
                if next == self.set.online {
                    false
                } else {
                    self.set.online = next;
                    true
                }
            },
            _ => false,
        };

        if changed {
            self.set.last_updated += 1;
            tracing::debug!(
                online = self.set.online.len(),
                last_updated = self.set.last_updated,
                "presence changed"
            );
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use kinship_proto::{PresenceSnapshot, PresenceUpdate};

    use super::*;

    fn update(user_id: &str, online: bool) -> Payload {
        Payload::Presence(PresenceUpdate { user_id: user_id.into(), online })
    }

    #[test]
    fn updates_insert_and_remove() {
        let mut tracker = PresenceTracker::new();
        assert!(tracker.apply(&update("them", true)));
        assert!(tracker.is_online("them"));
        assert_eq!(tracker.snapshot().last_updated(), 1);

        assert!(tracker.apply(&update("them", false)));
        assert!(!tracker.is_online("them"));
        assert_eq!(tracker.snapshot().last_updated(), 2);
    }

    #[test]
    fn repeated_events_do_not_bump() {
        let mut tracker = PresenceTracker::new();
        tracker.apply(&update("them", true));
        assert!(!tracker.apply(&update("them", true)));
        assert!(!tracker.apply(&update("ghost", false)));
        assert_eq!(tracker.snapshot().last_updated(), 1);
    }

    #[test]
    fn snapshot_replaces_set() {
        let mut tracker = PresenceTracker::new();
        tracker.apply(&update("old", true));

        let snapshot =
            Payload::PresenceSnapshot(PresenceSnapshot { online: vec!["a".into(), "b".into()] });
        assert!(tracker.apply(&snapshot));
        assert!(!tracker.is_online("old"));
        assert_eq!(tracker.snapshot().iter().collect::<Vec<_>>(), vec!["a", "b"]);

        assert!(!tracker.apply(&snapshot));
        assert_eq!(tracker.snapshot().last_updated(), 2);
    }

    #[test]
    fn unrelated_payloads_are_ignored() {
        let mut tracker = PresenceTracker::new();
        let payload = Payload::Error(kinship_proto::ErrorPayload::invalid_payload("x"));
        assert!(!tracker.apply(&payload));
        assert!(tracker.snapshot().is_empty());
    }
}
