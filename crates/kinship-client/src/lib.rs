//! Async runtime for the Kinship realtime conversation client.
//!
//! Executes the actions of the sans-IO core against two collaborators:
//!
//! - a [`Transport`]: the topic-oriented realtime connection
//! - a [`HistoryService`]: paged history fetches
//!
//! [`Client`] is the single owner of all mutable state; callers interact
//! through its operations and observe it through listeners and a presence
//! `watch` channel.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod env;
mod error;
mod history;
mod transport;

pub use client::{Client, ClientConfig, ClientUpdate, DEFAULT_TICK_INTERVAL};
pub use env::SystemEnv;
pub use error::ClientError;
pub use history::{HistoryError, HistoryService};
pub use transport::{Transport, TransportError, TransportEvent};
