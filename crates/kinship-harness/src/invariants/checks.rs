//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashSet;

use kinship_core::{ConnectionState, MessageStatus, SenderRole, is_valid_transition};

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// No two entries of a window share a server id.
pub struct UniqueResolvedIds;

impl Invariant for UniqueResolvedIds {
    fn name(&self) -> &'static str {
        "unique_resolved_ids"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (conversation_id, window) in &client.conversations {
                let mut seen = HashSet::new();
                for id in window.entries.iter().filter_map(|e| e.id.as_deref()) {
                    if !seen.insert(id) {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "client {} conversation {conversation_id}: id {id} appears twice",
                                client.user_id
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Unconfirmed entries are own sends that are either in flight or failed.
pub struct UnconfirmedAreOwnSends;

impl Invariant for UnconfirmedAreOwnSends {
    fn name(&self) -> &'static str {
        "unconfirmed_are_own_sends"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (conversation_id, window) in &client.conversations {
                for entry in window.entries.iter().filter(|e| e.id.is_none()) {
                    let pending =
                        matches!(entry.status, MessageStatus::Sending | MessageStatus::Failed);
                    let own = entry.sender == SenderRole::Me && entry.client_temp_id.is_some();
                    if !own || !pending {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "client {} conversation {conversation_id}: unconfirmed entry {entry:?}",
                                client.user_id
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Statuses only move along the lattice between captures.
///
/// Entries are matched by server id, or by temp id while unconfirmed. An
/// unconfirmed entry that gained an id was confirmed, which resolves it to at
/// least `Sent` whatever it was before.
pub struct StatusMonotonicity;

impl Invariant for StatusMonotonicity {
    fn name(&self) -> &'static str {
        "status_monotonicity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (conversation_id, before) in &client.previous {
                let Some(after) = client.conversations.get(conversation_id) else {
                    continue;
                };

                for old in &before.entries {
                    let new = match (&old.id, &old.client_temp_id) {
                        (Some(id), _) => after.by_id(id),
                        (None, Some(temp_id)) => after.by_temp(temp_id),
                        (None, None) => None,
                    };
                    let Some(new) = new else {
                        continue;
                    };

                    let confirmed_now = old.id.is_none() && new.id.is_some();
                    let allowed = if confirmed_now {
                        new.status.rank().is_some_and(|rank| rank >= 1)
                    } else {
                        old.status == new.status || old.status.can_advance_to(new.status)
                    };
                    if !allowed {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "client {} conversation {conversation_id}: {:?} -> {:?} for {:?}",
                                client.user_id,
                                old.status,
                                new.status,
                                new.id.as_ref().or(new.client_temp_id.as_ref())
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Once a server id is in a window it stays there, and resolved entries keep
/// their relative order.
pub struct ResolvedEntriesRetained;

impl Invariant for ResolvedEntriesRetained {
    fn name(&self) -> &'static str {
        "resolved_entries_retained"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (conversation_id, before) in &client.previous {
                let Some(after) = client.conversations.get(conversation_id) else {
                    continue;
                };

                let old_ids: Vec<&str> =
                    before.entries.iter().filter_map(|e| e.id.as_deref()).collect();
                let positions: Vec<Option<usize>> = old_ids
                    .iter()
                    .map(|id| after.entries.iter().position(|e| e.id.as_deref() == Some(id)))
                    .collect();

                if let Some(missing) = old_ids.iter().zip(&positions).find(|(_, p)| p.is_none()) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {} conversation {conversation_id}: id {} disappeared",
                            client.user_id, missing.0
                        ),
                    });
                }
                if positions.windows(2).any(|pair| pair[0] > pair[1]) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {} conversation {conversation_id}: resolved entries reordered",
                            client.user_id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every reported connection state change follows a legal edge.
pub struct ValidConnectionTransitions;

impl Invariant for ValidConnectionTransitions {
    fn name(&self) -> &'static str {
        "valid_connection_transitions"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for pair in client.state_history.windows(2) {
                if !is_valid_transition(pair[0], pair[1]) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {}: illegal transition {:?} -> {:?}",
                            client.user_id, pair[0], pair[1]
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A connected client whose server connection is live holds every
/// subscription it registered.
pub struct SubscriptionsRestored;

impl Invariant for SubscriptionsRestored {
    fn name(&self) -> &'static str {
        "subscriptions_restored"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.state != ConnectionState::Connected || !client.server_connected {
                continue;
            }
            let missing: Vec<_> =
                client.expected_subscriptions.difference(&client.server_subscriptions).collect();
            if !missing.is_empty() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("client {}: not subscribed to {missing:?}", client.user_id),
                });
            }
        }
        Ok(())
    }
}
