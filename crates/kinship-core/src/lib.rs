//! Sans-IO core of the Kinship realtime conversation client.
//!
//! Three state machines, all driven by explicit events and returning actions
//! for the caller to execute:
//!
//! - [`SessionManager`]: the single realtime connection, its reconnect
//!   schedule, and the subscription registry
//! - [`Conversation`]: one open conversation's message window, optimistic
//!   sends, pagination, typing and read receipts
//! - [`PresenceTracker`]: the process-wide set of online users
//!
//! None of them perform I/O. Time and randomness come from an
//! [`Environment`], so the same code runs against the system clock in
//! production and a virtual clock under simulation.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod conversation;
pub mod env;
pub mod error;
pub mod message;
pub mod observe;
pub mod presence;
pub mod session;
pub mod window;

pub use backoff::{Backoff, BackoffPolicy};
pub use conversation::{
    Conversation, ConversationConfig, ConversationParams, HistoryPage, HistoryRequest, SyncAction,
    SyncPhase, Visibility,
};
pub use env::Environment;
pub use error::{SessionError, SyncError, TransportFailure};
pub use message::{Message, MessageStatus, SenderRole};
pub use observe::{Listener, ListenerId, Observers};
pub use presence::{PresenceSet, PresenceTracker};
pub use session::{
    ConnectionState, SessionAction, SessionConfig, SessionManager, SubscriptionHandle,
    SubscriptionId, is_valid_transition,
};
pub use window::ConversationWindow;
