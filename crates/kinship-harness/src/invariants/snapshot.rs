//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what a client exposes (connection state, window
//! contents) together with the server's view of its connection. Invariants
//! operate on snapshots rather than live state so every check sees one
//! consistent moment.

use std::collections::{BTreeMap, BTreeSet};

use kinship_client::{Client, HistoryService, Transport};
use kinship_core::{
    ConnectionState, ConversationWindow, Environment, MessageStatus, SenderRole,
};
use kinship_proto::{ClientTempId, ConversationId, MessageId, Topic, UserId};
use serde::Serialize;

use crate::sim_server::LoopbackServer;

/// Snapshot of the entire system state.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-client state snapshots.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no clients).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single client.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }

    /// Create a snapshot from multiple clients.
    pub fn from_clients(clients: Vec<ClientSnapshot>) -> Self {
        Self { clients }
    }
}

/// Snapshot of a single client's observable state.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// Local user.
    pub user_id: UserId,
    /// Connection state at capture time.
    pub state: ConnectionState,
    /// Every state the client reported, oldest first.
    pub state_history: Vec<ConnectionState>,
    /// True if the server holds a live connection for this user.
    pub server_connected: bool,
    /// Destinations the server has on record for this user.
    pub server_subscriptions: BTreeSet<String>,
    /// Destinations the client should be subscribed to while connected.
    pub expected_subscriptions: BTreeSet<String>,
    /// Open conversation windows.
    pub conversations: BTreeMap<ConversationId, WindowSnapshot>,
    /// Windows at the previous capture, for transition checks.
    pub previous: BTreeMap<ConversationId, WindowSnapshot>,
}

impl ClientSnapshot {
    /// Empty snapshot for `user_id` in state `Disconnected`.
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            state: ConnectionState::Disconnected,
            state_history: Vec::new(),
            server_connected: false,
            server_subscriptions: BTreeSet::new(),
            expected_subscriptions: BTreeSet::new(),
            conversations: BTreeMap::new(),
            previous: BTreeMap::new(),
        }
    }

    /// Capture a live client and the server's view of it.
    pub fn capture<T, S, E>(client: &Client<T, S, E>, server: &LoopbackServer) -> Self
    where
        T: Transport,
        S: HistoryService,
        E: Environment,
    {
        let user_id = client.user_id().clone();

        let mut expected_subscriptions: BTreeSet<String> = [
            Topic::Presence.destination(),
            Topic::Notifications(user_id.clone()).destination(),
        ]
        .into();
        let mut conversations = BTreeMap::new();
        for conversation_id in client.conversation_ids() {
            expected_subscriptions.insert(Topic::Conversation(conversation_id.clone()).destination());
            expected_subscriptions.insert(
                Topic::Receipts { user_id: user_id.clone(), conversation_id: conversation_id.clone() }
                    .destination(),
            );
            if let Some(conversation) = client.conversation(conversation_id) {
                conversations
                    .insert(conversation_id.clone(), WindowSnapshot::of(conversation.window()));
            }
        }

        Self {
            server_connected: server.connection_count(&user_id) > 0,
            server_subscriptions: server.subscriptions(&user_id),
            user_id,
            state: client.connection_state(),
            state_history: Vec::new(),
            expected_subscriptions,
            conversations,
            previous: BTreeMap::new(),
        }
    }

    /// Attach connection state history.
    #[must_use]
    pub fn with_state_history(mut self, history: Vec<ConnectionState>) -> Self {
        self.state_history = history;
        self
    }

    /// Attach the windows of the previous capture.
    #[must_use]
    pub fn with_previous(mut self, previous: BTreeMap<ConversationId, WindowSnapshot>) -> Self {
        self.previous = previous;
        self
    }
}

/// Snapshot of one conversation window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Entries, oldest first.
    pub entries: Vec<EntrySnapshot>,
}

impl WindowSnapshot {
    /// Capture a window.
    pub fn of(window: &ConversationWindow) -> Self {
        Self {
            entries: window
                .iter()
                .map(|m| EntrySnapshot {
                    id: m.id.clone(),
                    client_temp_id: m.client_temp_id.clone(),
                    sender: m.sender,
                    status: m.status,
                })
                .collect(),
        }
    }

    /// Entry with server id `id`.
    pub fn by_id(&self, id: &str) -> Option<&EntrySnapshot> {
        self.entries.iter().find(|e| e.id.as_deref() == Some(id))
    }

    /// Entry carrying temp id `temp_id`, confirmed or not.
    pub fn by_temp(&self, temp_id: &str) -> Option<&EntrySnapshot> {
        self.entries.iter().find(|e| e.client_temp_id.as_deref() == Some(temp_id))
    }
}

/// Snapshot of one window entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    /// Server id once confirmed.
    pub id: Option<MessageId>,
    /// Correlation token of an own send.
    pub client_temp_id: Option<ClientTempId>,
    /// Who wrote it.
    pub sender: SenderRole,
    /// Delivery status.
    pub status: MessageStatus,
}

/// Human-readable rendering of a window, for snapshot assertions.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    /// Entries, oldest first.
    pub lines: Vec<TranscriptLine>,
}

/// One transcript line.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptLine {
    /// `me` or `them`.
    pub sender: &'static str,
    /// Message text.
    pub text: String,
    /// Lowercase status.
    pub status: String,
    /// True once the server id is known.
    pub confirmed: bool,
}

impl Transcript {
    /// Render a window.
    pub fn of(window: &ConversationWindow) -> Self {
        Self {
            lines: window
                .iter()
                .map(|m| TranscriptLine {
                    sender: match m.sender {
                        SenderRole::Me => "me",
                        SenderRole::Them => "them",
                    },
                    text: m.text.clone(),
                    status: format!("{:?}", m.status).to_lowercase(),
                    confirmed: m.id.is_some(),
                })
                .collect(),
        }
    }
}
