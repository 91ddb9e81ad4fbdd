//! Error types for the Kinship core.
//!
//! Three layers: transport failures (recovered by the session manager and
//! surfaced only as connection state), session errors (reported to the caller
//! of a single operation), and synchronizer errors (rejected user input or
//! operations on unknown messages).
//!
//! Duplicate deliveries and out-of-order status events are not errors. They
//! are dropped with a `debug!` log.

use kinship_proto::{ClientTempId, ProtocolError};
use thiserror::Error;

use crate::{message::MessageStatus, session::ConnectionState};

/// Why a transport attempt failed or an established transport dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// Endpoint could not be reached (DNS, refused, timeout).
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Established connection dropped.
    #[error("connection lost: {0}")]
    Lost(String),

    /// Server rejected the session (bad credentials, banned client).
    #[error("rejected: {0}")]
    Rejected(String),
}

impl TransportFailure {
    /// Returns true if reconnecting may succeed.
    ///
    /// A rejection will be repeated on every attempt, so it moves the session
    /// to `Failed` instead of `Reconnecting`.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Errors reported by [`crate::SessionManager`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Publish attempted while the session is not `Connected`.
    #[error("not connected (state: {state:?})")]
    NotConnected {
        /// State at the time of the publish
        state: ConnectionState,
    },

    /// Payload could not be framed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// Returns true if the same operation may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotConnected { .. })
    }
}

/// Errors reported by [`crate::Conversation`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Message text is empty after trimming.
    #[error("message is empty")]
    EmptyMessage,

    /// Message text exceeds the configured character limit.
    #[error("message too long: {len} characters (max {max})")]
    MessageTooLong {
        /// Length in characters after trimming
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// No entry with this temp id exists in the window.
    #[error("unknown message: {client_temp_id}")]
    UnknownMessage {
        /// Temp id that was looked up
        client_temp_id: ClientTempId,
    },

    /// Retry requested for a message that has not failed.
    #[error("message {client_temp_id} is {status:?}; only failed messages can be retried")]
    NotRetryable {
        /// Temp id of the message
        client_temp_id: ClientTempId,
        /// Its current status
        status: MessageStatus,
    },

    /// Operation on a closed conversation.
    #[error("conversation is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_not_transient() {
        assert!(TransportFailure::Unreachable("refused".into()).is_transient());
        assert!(TransportFailure::Lost("reset".into()).is_transient());
        assert!(!TransportFailure::Rejected("bad token".into()).is_transient());
    }

    #[test]
    fn not_connected_is_transient() {
        let err = SessionError::NotConnected { state: ConnectionState::Reconnecting };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "not connected (state: Reconnecting)");

        let err = SessionError::from(ProtocolError::PayloadTooLarge { size: 70_000, max: 65_536 });
        assert!(!err.is_transient());
    }
}
