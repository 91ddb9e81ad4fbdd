//! Messages as held in a conversation window.

use kinship_proto::{ClientTempId, ConversationId, DeliveryStatus, MessageId, ServerMessage};

/// Who wrote a message, relative to the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderRole {
    /// The local user (on this or another device)
    Me,
    /// The counterpart
    Them,
}

/// Delivery status.
///
/// Moves forward along `Sending < Sent < Delivered < Read`. `Failed` is a side
/// branch reachable from `Sending` or `Sent`; only an explicit retry leaves it.
/// `Read` never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    /// Published, not yet acknowledged
    Sending,
    /// Acknowledged by the server
    Sent,
    /// Delivered to the counterpart's device
    Delivered,
    /// Read by the recipient
    Read,
    /// Could not be sent; waits for a user retry
    Failed,
}

impl MessageStatus {
    /// Position on the forward lattice. `None` for `Failed`.
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Sending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed => None,
        }
    }

    /// Returns true if a status event may move `self` to `next`.
    pub fn can_advance_to(self, next: Self) -> bool {
        match (self.rank(), next.rank()) {
            (None, _) => false,
            (Some(_), None) => matches!(self, Self::Sending | Self::Sent),
            (Some(current), Some(next)) => next > current,
        }
    }
}

impl From<DeliveryStatus> for MessageStatus {
    fn from(status: DeliveryStatus) -> Self {
        match status {
            DeliveryStatus::Sent => Self::Sent,
            DeliveryStatus::Delivered => Self::Delivered,
            DeliveryStatus::Read => Self::Read,
        }
    }
}

/// One window entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server id, once confirmed
    pub id: Option<MessageId>,
    /// Correlation token of a locally sent message
    pub client_temp_id: Option<ClientTempId>,
    /// Owning conversation
    pub conversation_id: ConversationId,
    /// Author relative to the local user
    pub sender: SenderRole,
    /// Body text
    pub text: String,
    /// Unix milliseconds
    pub timestamp: u64,
    /// Delivery status
    pub status: MessageStatus,
}

impl Message {
    /// Optimistic entry for a message the local user just sent.
    pub fn optimistic(
        conversation_id: impl Into<ConversationId>,
        client_temp_id: impl Into<ClientTempId>,
        text: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            id: None,
            client_temp_id: Some(client_temp_id.into()),
            conversation_id: conversation_id.into(),
            sender: SenderRole::Me,
            text: text.into(),
            timestamp,
            status: MessageStatus::Sending,
        }
    }

    /// Canonical entry from the server, with the sender resolved against the
    /// local user id.
    pub fn from_server(msg: &ServerMessage, me: &str) -> Self {
        let sender = if msg.sender_id == me { SenderRole::Me } else { SenderRole::Them };
        Self {
            id: Some(msg.id.clone()),
            client_temp_id: msg.client_temp_id.clone(),
            conversation_id: msg.conversation_id.clone(),
            sender,
            text: msg.text.clone(),
            timestamp: msg.timestamp,
            status: msg.status.into(),
        }
    }

    /// True if the local user wrote this message.
    pub fn is_mine(&self) -> bool {
        self.sender == SenderRole::Me
    }

    /// True if the server has not confirmed this message yet.
    pub fn is_pending(&self) -> bool {
        self.id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [MessageStatus; 5] = [
        MessageStatus::Sending,
        MessageStatus::Sent,
        MessageStatus::Delivered,
        MessageStatus::Read,
        MessageStatus::Failed,
    ];

    #[test]
    fn lattice_moves_forward_only() {
        assert!(MessageStatus::Sending.can_advance_to(MessageStatus::Sent));
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Read));
        assert!(!MessageStatus::Delivered.can_advance_to(MessageStatus::Sent));
        assert!(!MessageStatus::Sent.can_advance_to(MessageStatus::Sent));
    }

    #[test]
    fn read_and_failed_are_terminal() {
        for next in ALL {
            assert!(!MessageStatus::Read.can_advance_to(next));
            assert!(!MessageStatus::Failed.can_advance_to(next));
        }
    }

    #[test]
    fn failed_reachable_only_before_delivery() {
        assert!(MessageStatus::Sending.can_advance_to(MessageStatus::Failed));
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Failed));
        assert!(!MessageStatus::Delivered.can_advance_to(MessageStatus::Failed));
    }

    #[test]
    fn server_message_resolves_sender() {
        let msg = ServerMessage {
            id: "m-1".into(),
            conversation_id: "c1".into(),
            sender_id: "them".into(),
            text: "hi".into(),
            timestamp: 5,
            status: DeliveryStatus::Delivered,
            client_temp_id: None,
        };
        let entry = Message::from_server(&msg, "me");
        assert_eq!(entry.sender, SenderRole::Them);
        assert_eq!(entry.status, MessageStatus::Delivered);
        assert!(!entry.is_pending());

        let entry = Message::from_server(&msg, "them");
        assert!(entry.is_mine());
    }
}
