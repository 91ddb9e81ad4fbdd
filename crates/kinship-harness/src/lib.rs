//! Deterministic simulation harness for Kinship client testing.
//!
//! In-memory implementations of the client's collaborators, driven on
//! tokio's paused clock with a seeded RNG so every run is reproducible:
//!
//! - [`SimEnv`]: virtual time and ChaCha randomness
//! - [`LoopbackServer`]: the server side of the realtime contract, with
//!   [`Faults`] for refused connections, lost acknowledgements and drops
//! - [`SimTransport`] and [`SimHistory`]: a client's view of that server
//!
//! # Invariant Testing
//!
//! The `invariants` module captures client state into snapshots and checks
//! behavioral properties against them. Use [`InvariantRegistry::standard()`]
//! for the window and connection invariants.
//!
//! # Model-Based Testing
//!
//! [`World`] runs two participants in one conversation and checks every
//! invariant after each scheduling round; property tests feed it random
//! [`Operation`] sequences.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod scenario;
pub mod sim_env;
pub mod sim_history;
pub mod sim_server;
pub mod sim_transport;

pub use invariants::{
    ClientSnapshot, EntrySnapshot, Invariant, InvariantRegistry, InvariantResult,
    ResolvedEntriesRetained, StatusMonotonicity, SubscriptionsRestored, SystemSnapshot,
    Transcript, TranscriptLine, UnconfirmedAreOwnSends, UniqueResolvedIds,
    ValidConnectionTransitions, Violation, WindowSnapshot,
};
pub use scenario::{CONVERSATION, Operation, Participant, SimClient, USERS, World};
pub use sim_env::SimEnv;
pub use sim_history::SimHistory;
pub use sim_server::{ConnectionId, Faults, LoopbackServer};
pub use sim_transport::SimTransport;
