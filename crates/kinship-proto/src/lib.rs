//! Wire contract for the Kinship realtime conversation protocol.
//!
//! The transport primitive is a topic-oriented duplex connection: clients
//! subscribe to destinations and publish to destinations. This crate fixes the
//! client side of that contract:
//!
//! - [`topics`]: destination naming and topic keys
//! - [`Frame`]: a destination plus an opaque body
//! - [`Payload`]: the CBOR-encoded body of every frame
//!
//! Server behavior is out of scope. Anything the server sends that does not
//! decode into a [`Payload`] is rejected with a [`ProtocolError`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod errors;
mod frame;
pub mod payloads;
pub mod topics;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use payloads::{
    DeliveryStatus, ErrorPayload, Payload, PresenceSnapshot, PresenceUpdate, ReadReceipt,
    SendAck, SendMessage, ServerMessage, StatusUpdate, TypingSignal,
};
pub use topics::Topic;

/// Server-assigned conversation identifier.
pub type ConversationId = String;

/// Stable user identifier.
pub type UserId = String;

/// Server-assigned message identifier.
pub type MessageId = String;

/// Locally generated correlation token for an unconfirmed message.
pub type ClientTempId = String;
