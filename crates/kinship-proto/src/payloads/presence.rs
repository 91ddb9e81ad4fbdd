//! Presence payload types.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// A single user went online or offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// User whose presence changed
    pub user_id: UserId,
    /// `true` if the user now has a live connection
    pub online: bool,
}

/// Full list of online users, sent by the server after (re)subscribing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    /// Every user currently online
    pub online: Vec<UserId>,
}
