//! Ephemeral conversation signals: typing and read receipts.

use serde::{Deserialize, Serialize};

use crate::{ConversationId, MessageId, UserId};

/// Typing state of one participant.
///
/// Published to [`crate::topics::TYPING_DESTINATION`] and relayed on the
/// conversation topic. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    /// Conversation being typed in
    pub conversation_id: ConversationId,
    /// Typing user
    pub sender_id: UserId,
    /// `true` while a typing burst is active
    pub is_typing: bool,
}

/// Read receipt covering every message up to and including
/// `up_to_message_id`.
///
/// Published to [`crate::topics::READ_DESTINATION`] and relayed to the
/// author's receipts queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// Conversation that was read
    pub conversation_id: ConversationId,
    /// User who read the messages
    pub reader_id: UserId,
    /// Newest message covered by this receipt
    pub up_to_message_id: MessageId,
}
