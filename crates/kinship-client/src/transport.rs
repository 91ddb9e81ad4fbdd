//! Transport abstraction.
//!
//! The realtime connection is a topic-oriented duplex channel: subscribe to
//! destinations, publish frames to destinations. Commands are non-blocking;
//! their outcomes (and inbound frames) come back through
//! [`Transport::next_event`].

use std::future::Future;

use kinship_core::{SubscriptionId, TransportFailure};
use kinship_proto::Frame;
use thiserror::Error;

/// Something the transport reports to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Attempt `attempt` opened
    Opened {
        /// Attempt id passed to [`Transport::open`]
        attempt: u64,
    },
    /// Attempt `attempt` failed before opening
    Failed {
        /// Attempt id passed to [`Transport::open`]
        attempt: u64,
        /// Why it failed
        error: TransportFailure,
    },
    /// The connection opened by attempt `attempt` dropped
    Lost {
        /// Attempt id passed to [`Transport::open`]
        attempt: u64,
        /// Why it dropped
        error: TransportFailure,
    },
    /// Inbound frame on a subscribed destination
    Frame(Frame),
}

/// Errors from immediate transport commands.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No open connection
    #[error("transport not open")]
    NotOpen,

    /// Connection is shutting down or the peer went away
    #[error("transport closed: {0}")]
    Closed(String),

    /// Underlying I/O failed
    #[error("transport I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Returns true if the command may succeed once reconnected.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

/// A realtime transport.
///
/// Implementations MUST:
///
/// - report exactly one `Opened` or `Failed` per `open(attempt)` unless
///   `close()` is called first
/// - tag `Lost` with the attempt that opened the dropped connection
/// - deliver inbound frames in the order the server sent them
pub trait Transport: Send {
    /// Begin opening a connection. Report the outcome with `attempt`.
    fn open(&mut self, attempt: u64);

    /// Close the connection or abandon the attempt in flight.
    fn close(&mut self);

    /// Subscribe to `destination` under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not open.
    fn subscribe(&mut self, id: SubscriptionId, destination: &str) -> Result<(), TransportError>;

    /// Cancel subscription `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not open.
    fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), TransportError>;

    /// Send a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be handed to the connection.
    fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Wait for the next event. `None` once the transport is gone for good.
    fn next_event(&mut self) -> impl Future<Output = Option<TransportEvent>> + Send;
}
