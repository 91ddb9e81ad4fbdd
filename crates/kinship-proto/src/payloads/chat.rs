//! Chat message payload types.
//!
//! These payloads carry user-visible messages and their lifecycle: the
//! client's send request, the server's acknowledgement, the canonical
//! server-side message, and status updates.

use serde::{Deserialize, Serialize};

use crate::{ClientTempId, ConversationId, MessageId, UserId};

/// Delivery status as reported by the server.
///
/// The server never reports `sending` or `failed`; those are client-local
/// states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Persisted by the server
    Sent,
    /// Delivered to the recipient's device
    Delivered,
    /// Seen by the recipient
    Read,
}

/// Client request to send a message (published to
/// [`crate::topics::SEND_DESTINATION`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Target conversation
    pub conversation_id: ConversationId,
    /// Correlation token echoed back in the [`SendAck`]
    pub client_temp_id: ClientTempId,
    /// Sending user
    pub sender_id: UserId,
    /// Message text
    pub text: String,
    /// Client clock at send time, Unix milliseconds
    pub timestamp: u64,
}

/// Server acknowledgement of a [`SendMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    /// Conversation the message was sent to
    pub conversation_id: ConversationId,
    /// Correlation token from the send request
    pub client_temp_id: ClientTempId,
    /// Server-assigned message id
    pub message_id: MessageId,
    /// Server timestamp, Unix milliseconds
    pub timestamp: u64,
}

/// Canonical server-side message, delivered live or in history pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Server-assigned message id
    pub id: MessageId,
    /// Owning conversation
    pub conversation_id: ConversationId,
    /// Author
    pub sender_id: UserId,
    /// Message text
    pub text: String,
    /// Server timestamp, Unix milliseconds
    pub timestamp: u64,
    /// Current delivery status
    pub status: DeliveryStatus,
    /// Correlation token, present when the author's client supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<ClientTempId>,
}

/// Status change for one or more messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Owning conversation
    pub conversation_id: ConversationId,
    /// Messages whose status changed
    pub message_ids: Vec<MessageId>,
    /// New status
    pub status: DeliveryStatus,
}
