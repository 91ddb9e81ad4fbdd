//! Client errors.

use kinship_core::{SessionError, SyncError};
use kinship_proto::ConversationId;
use thiserror::Error;

/// Errors reported by [`crate::Client`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Operation on a conversation that is not open.
    #[error("conversation not open: {0}")]
    UnknownConversation(ConversationId),

    /// Rejected by the conversation synchronizer.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Rejected by the session manager.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ClientError {
    /// Returns true if the same operation may succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Session(err) => err.is_transient(),
            Self::UnknownConversation(_) | Self::Sync(_) => false,
        }
    }
}
