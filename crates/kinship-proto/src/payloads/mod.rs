//! CBOR-encoded protocol messages.
//!
//! Frames carry a destination and an opaque body. The body is always a
//! [`Payload`], encoded as CBOR with an internal `type` tag. Unlike a header
//! opcode scheme, the destination does not identify the payload type (the
//! conversation topic carries messages, status updates and typing signals),
//! so the tag travels inside the body.
//!
//! # Invariants
//!
//! - Decoding never panics. Oversized, malformed or unknown bodies are
//!   rejected with a [`ProtocolError`].
//! - Encoding a `Payload` and decoding it again yields an equal value.

mod chat;
mod presence;
mod signal;

use bytes::BufMut;
pub use chat::{DeliveryStatus, SendAck, SendMessage, ServerMessage, StatusUpdate};
pub use presence::{PresenceSnapshot, PresenceUpdate};
use serde::{Deserialize, Serialize};
pub use signal::{ReadReceipt, TypingSignal};

use crate::{
    Frame,
    errors::{ProtocolError, Result},
};

/// All possible frame bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    // Client to server
    /// Send a chat message
    Send(SendMessage),
    /// Typing state change (also relayed server to client)
    Typing(TypingSignal),
    /// Read receipt (also relayed server to client)
    Read(ReadReceipt),

    // Server to client
    /// Acknowledgement of a send
    Ack(SendAck),
    /// Canonical chat message
    Message(ServerMessage),
    /// Status change for existing messages
    Status(StatusUpdate),
    /// Single presence change
    Presence(PresenceUpdate),
    /// Full presence list
    PresenceSnapshot(PresenceSnapshot),
    /// Server-side error report
    Error(ErrorPayload),
}

/// Error payload reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorPayload {
    /// Frame was rejected by the server.
    pub const FRAME_REJECTED: u16 = 0x0001;
    /// Conversation does not exist or the user is not a participant.
    pub const CONVERSATION_NOT_FOUND: u16 = 0x0002;
    /// Invalid payload format.
    pub const INVALID_PAYLOAD: u16 = 0x0004;

    /// Create a frame rejection error.
    pub fn frame_rejected(reason: impl Into<String>) -> Self {
        Self { code: Self::FRAME_REJECTED, message: reason.into() }
    }

    /// Create a conversation not found error.
    pub fn conversation_not_found(conversation_id: &str) -> Self {
        Self {
            code: Self::CONVERSATION_NOT_FOUND,
            message: format!("conversation not found: {conversation_id}"),
        }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into() }
    }
}

impl Payload {
    /// Short name of the payload type, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Send(_) => "send",
            Self::Typing(_) => "typing",
            Self::Read(_) => "read",
            Self::Ack(_) => "ack",
            Self::Message(_) => "message",
            Self::Status(_) => "status",
            Self::Presence(_) => "presence",
            Self::PresenceSnapshot(_) => "presence_snapshot",
            Self::Error(_) => "error",
        }
    }

    /// Conversation this payload belongs to. `None` for presence and errors.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::Send(p) => Some(&p.conversation_id),
            Self::Typing(p) => Some(&p.conversation_id),
            Self::Read(p) => Some(&p.conversation_id),
            Self::Ack(p) => Some(&p.conversation_id),
            Self::Message(p) => Some(&p.conversation_id),
            Self::Status(p) => Some(&p.conversation_id),
            Self::Presence(_) | Self::PresenceSnapshot(_) | Self::Error(_) => None,
        }
    }

    /// Encode payload to buffer.
    ///
    /// Does not enforce [`Frame::MAX_BODY_SIZE`]; [`Payload::into_frame`]
    /// does.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        ciborium::ser::into_writer(self, dst.writer())
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload from bytes.
    ///
    /// The size check runs before CBOR parsing begins.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed `MAX_BODY_SIZE`
    /// - `ProtocolError::CborDecode` if the body is malformed or its `type` tag
    ///   is unknown
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > Frame::MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: Frame::MAX_BODY_SIZE,
            });
        }

        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
    }

    /// Encode into a frame addressed to `destination`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    /// - `ProtocolError::PayloadTooLarge` if the encoded body exceeds
    ///   `MAX_BODY_SIZE`
    pub fn into_frame(&self, destination: impl Into<String>) -> Result<Frame> {
        let mut body = Vec::new();
        self.encode(&mut body)?;

        if body.len() > Frame::MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: body.len(),
                max: Frame::MAX_BODY_SIZE,
            });
        }

        Ok(Frame::new(destination, body))
    }

    /// Decode the body of a frame.
    ///
    /// # Errors
    ///
    /// See [`Payload::decode`].
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        Self::decode(&frame.body)
    }
}
