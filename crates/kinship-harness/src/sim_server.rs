//! In-memory loopback server.
//!
//! `LoopbackServer` plays the server side of the realtime contract for any
//! number of [`SimTransport`](crate::SimTransport) connections:
//!
//! - sends are stored, acknowledged on the sender's receipt queue and echoed
//!   on the conversation topic, then marked delivered once another user is
//!   subscribed
//! - typing signals are relayed to the other subscribers of the conversation
//! - read receipts mark the stored history read and are relayed to every
//!   other receipt subscriber of the conversation
//! - presence is derived from open connections and announced on the presence
//!   topic, with a snapshot for each new presence subscriber
//! - publishes that cannot be decoded, routed or matched to a conversation
//!   are answered with an error payload on the publisher's notification queue
//!
//! Events are pushed into each connection's channel synchronously, so a test
//! sees a deterministic interleaving. [`Faults`] injects the failures the
//! client has to survive.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use kinship_client::{HistoryError, TransportError, TransportEvent};
use kinship_core::{HistoryPage, SubscriptionId, TransportFailure};
use kinship_proto::{
    ConversationId, DeliveryStatus, ErrorPayload, Frame, Payload, PresenceSnapshot, PresenceUpdate,
    ReadReceipt, SendAck, SendMessage, ServerMessage, StatusUpdate, Topic, UserId, topics,
};
use tokio::sync::mpsc;

use crate::{SimHistory, SimTransport, sim_env::DEFAULT_EPOCH_MILLIS};

/// Server-side connection identifier.
pub type ConnectionId = u64;

/// Failures injected into the loopback server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// Refuse this many upcoming connection attempts as unreachable.
    pub refuse_connects: u32,
    /// Reject every connection attempt (credentials revoked).
    pub reject_connects: bool,
    /// Store sends without acknowledging them.
    pub drop_acks: bool,
    /// Store sends without echoing them on the conversation topic.
    pub suppress_echo: bool,
    /// Fail every history request.
    pub history_unavailable: bool,
}

struct Connection {
    user_id: UserId,
    attempt: u64,
    subscriptions: BTreeMap<SubscriptionId, String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Default)]
struct ServerState {
    connections: BTreeMap<ConnectionId, Connection>,
    next_connection: ConnectionId,
    conversations: HashMap<ConversationId, Vec<ServerMessage>>,
    next_message: u64,
    clock_millis: u64,
    faults: Faults,
}

/// Shared handle to the loopback server. Clones address the same server.
#[derive(Clone, Default)]
pub struct LoopbackServer {
    state: Arc<Mutex<ServerState>>,
}

impl LoopbackServer {
    /// Create an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// New transport for `user_id`. Connects on the first `open`.
    pub fn transport(&self, user_id: impl Into<UserId>) -> SimTransport {
        SimTransport::new(self.clone(), user_id.into())
    }

    /// History service backed by this server's storage.
    pub fn history(&self) -> SimHistory {
        SimHistory::new(self.clone())
    }

    /// Currently injected faults.
    pub fn faults(&self) -> Faults {
        self.lock().faults
    }

    /// Replace the injected faults.
    pub fn set_faults(&self, faults: Faults) {
        self.lock().faults = faults;
    }

    /// Store a message without announcing it, as history that predates the
    /// session.
    pub fn seed_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> ServerMessage {
        self.lock().store(conversation_id, sender_id, text, None)
    }

    /// Store a message and broadcast it on the conversation topic, as if
    /// `sender_id` sent it from a device the simulation does not model.
    pub fn post_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> ServerMessage {
        let mut state = self.lock();
        let message = state.store(conversation_id, sender_id, text, None);
        let destination = Topic::Conversation(conversation_id.to_owned()).destination();
        state.deliver(&destination, &Payload::Message(message.clone()), None);
        message
    }

    /// Push `payload` to every subscriber of `destination`. Returns the
    /// number of connections reached.
    pub fn deliver(&self, destination: &str, payload: &Payload) -> usize {
        self.lock().deliver(destination, payload, None)
    }

    /// Stored history of a conversation, oldest first.
    pub fn messages(&self, conversation_id: &str) -> Vec<ServerMessage> {
        self.lock().conversations.get(conversation_id).cloned().unwrap_or_default()
    }

    /// Users with at least one open connection.
    pub fn online_users(&self) -> BTreeSet<UserId> {
        self.lock().online_users()
    }

    /// Open connections of `user_id`.
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.lock().connections.values().filter(|c| c.user_id == user_id).count()
    }

    /// Destinations `user_id` is subscribed to, across all connections.
    pub fn subscriptions(&self, user_id: &str) -> BTreeSet<String> {
        self.lock()
            .connections
            .values()
            .filter(|c| c.user_id == user_id)
            .flat_map(|c| c.subscriptions.values().cloned())
            .collect()
    }

    /// Drop every connection of `user_id` from the server side. Returns the
    /// number of connections dropped.
    pub fn drop_user(&self, user_id: &str) -> usize {
        let mut state = self.lock();
        let ids: Vec<_> = state
            .connections
            .iter()
            .filter(|(_, c)| c.user_id == user_id)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(connection) = state.connections.remove(id) {
                let _ = connection.events.send(TransportEvent::Lost {
                    attempt: connection.attempt,
                    error: TransportFailure::Lost("dropped by server".into()),
                });
            }
        }
        if !ids.is_empty() {
            state.announce(user_id, false);
        }
        tracing::info!(user_id, dropped = ids.len(), "connections dropped");
        ids.len()
    }

    pub(crate) fn connect(
        &self,
        user_id: &str,
        attempt: u64,
        events: &mpsc::UnboundedSender<TransportEvent>,
    ) -> Option<ConnectionId> {
        let mut state = self.lock();

        let refusal = if state.faults.reject_connects {
            Some(TransportFailure::Rejected("credentials rejected".into()))
        } else if state.faults.refuse_connects > 0 {
            state.faults.refuse_connects -= 1;
            Some(TransportFailure::Unreachable("connection refused".into()))
        } else {
            None
        };
        if let Some(error) = refusal {
            tracing::debug!(user_id, attempt, %error, "connection refused");
            let _ = events.send(TransportEvent::Failed { attempt, error });
            return None;
        }

        let was_online = state.is_online(user_id);
        let id = state.next_connection;
        state.next_connection += 1;
        state.connections.insert(id, Connection {
            user_id: user_id.to_owned(),
            attempt,
            subscriptions: BTreeMap::new(),
            events: events.clone(),
        });
        let _ = events.send(TransportEvent::Opened { attempt });

        if !was_online {
            state.announce(user_id, true);
        }
        tracing::debug!(user_id, attempt, connection = id, "connection accepted");
        Some(id)
    }

    pub(crate) fn disconnect(&self, id: ConnectionId) {
        let mut state = self.lock();
        if let Some(connection) = state.connections.remove(&id)
            && !state.is_online(&connection.user_id)
        {
            state.announce(&connection.user_id, false);
        }
    }

    pub(crate) fn subscribe(
        &self,
        id: ConnectionId,
        subscription: SubscriptionId,
        destination: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        let snapshot = (destination == topics::PRESENCE_DESTINATION).then(|| {
            Payload::PresenceSnapshot(PresenceSnapshot {
                online: state.online_users().into_iter().collect(),
            })
        });

        let connection = state.connection_mut(id)?;
        connection.subscriptions.insert(subscription, destination.to_owned());
        if let Some(snapshot) = snapshot
            && let Ok(frame) = snapshot.into_frame(destination)
        {
            let _ = connection.events.send(TransportEvent::Frame(frame));
        }
        Ok(())
    }

    pub(crate) fn unsubscribe(
        &self,
        id: ConnectionId,
        subscription: SubscriptionId,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connection_mut(id)?.subscriptions.remove(&subscription);
        Ok(())
    }

    pub(crate) fn receive(&self, id: ConnectionId, frame: &Frame) -> Result<(), TransportError> {
        let mut state = self.lock();
        let user_id = state.connection_mut(id)?.user_id.clone();

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, destination = %frame.destination, "undecodable publish");
                state.reply_error(id, ErrorPayload::invalid_payload(error.to_string()));
                return Ok(());
            },
        };

        match (frame.destination.as_str(), payload) {
            (topics::SEND_DESTINATION, Payload::Send(send)) => state.accept(&user_id, send),
            (topics::TYPING_DESTINATION, Payload::Typing(mut signal)) => {
                signal.sender_id = user_id;
                let destination = Topic::Conversation(signal.conversation_id.clone()).destination();
                state.deliver(&destination, &Payload::Typing(signal), Some(id));
            },
            (topics::READ_DESTINATION, Payload::Read(mut receipt)) => {
                if !state.conversations.contains_key(&receipt.conversation_id) {
                    tracing::debug!(conversation_id = %receipt.conversation_id, "receipt for unknown conversation");
                    let error = ErrorPayload::conversation_not_found(&receipt.conversation_id);
                    state.reply_error(id, error);
                    return Ok(());
                }
                receipt.reader_id = user_id;
                state.mark_read(&receipt);
                let conversation_id = receipt.conversation_id.clone();
                state.deliver_receipts(&conversation_id, &Payload::Read(receipt), Some(id));
            },
            (destination, payload) => {
                tracing::debug!(destination, kind = payload.kind(), "unroutable publish rejected");
                let reason = format!("{} not accepted on {destination}", payload.kind());
                state.reply_error(id, ErrorPayload::frame_rejected(reason));
            },
        }
        Ok(())
    }

    pub(crate) fn fetch(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<HistoryPage, HistoryError> {
        let state = self.lock();
        if state.faults.history_unavailable {
            return Err(HistoryError::Unavailable("history service down".into()));
        }

        let Some(messages) = state.conversations.get(conversation_id) else {
            return Ok(HistoryPage::default());
        };
        let end = match before {
            Some(cursor) => messages
                .iter()
                .position(|m| m.id == cursor)
                .ok_or_else(|| HistoryError::NotFound(cursor.to_owned()))?,
            None => messages.len(),
        };
        let start = end.saturating_sub(limit);
        Ok(HistoryPage { messages: messages[start..end].to_vec(), has_more: start > 0 })
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ServerState {
    fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut Connection, TransportError> {
        self.connections
            .get_mut(&id)
            .ok_or_else(|| TransportError::Closed("connection dropped".into()))
    }

    /// Report a rejected publish on the publisher's notification queue.
    fn reply_error(&self, id: ConnectionId, error: ErrorPayload) {
        let Some(connection) = self.connections.get(&id) else {
            return;
        };
        let destination = Topic::Notifications(connection.user_id.clone()).destination();
        let subscribed = connection.subscriptions.values().any(|d| *d == destination);
        if subscribed && let Ok(frame) = Payload::Error(error).into_frame(&destination) {
            let _ = connection.events.send(TransportEvent::Frame(frame));
        }
    }

    fn is_online(&self, user_id: &str) -> bool {
        self.connections.values().any(|c| c.user_id == user_id)
    }

    fn online_users(&self) -> BTreeSet<UserId> {
        self.connections.values().map(|c| c.user_id.clone()).collect()
    }

    fn store(
        &mut self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
        client_temp_id: Option<String>,
    ) -> ServerMessage {
        self.next_message += 1;
        self.clock_millis += 1;
        let message = ServerMessage {
            id: format!("m-{:04}", self.next_message),
            conversation_id: conversation_id.to_owned(),
            sender_id: sender_id.to_owned(),
            text: text.to_owned(),
            timestamp: DEFAULT_EPOCH_MILLIS + self.clock_millis,
            status: DeliveryStatus::Sent,
            client_temp_id,
        };
        self.conversations.entry(conversation_id.to_owned()).or_default().push(message.clone());
        message
    }

    fn accept(&mut self, sender_id: &str, send: SendMessage) {
        let message =
            self.store(&send.conversation_id, sender_id, &send.text, Some(send.client_temp_id));
        let receipts = Topic::Receipts {
            user_id: sender_id.to_owned(),
            conversation_id: send.conversation_id.clone(),
        }
        .destination();

        if !self.faults.drop_acks {
            let ack = Payload::Ack(SendAck {
                conversation_id: message.conversation_id.clone(),
                client_temp_id: message.client_temp_id.clone().unwrap_or_default(),
                message_id: message.id.clone(),
                timestamp: message.timestamp,
            });
            self.deliver(&receipts, &ack, None);
        }

        let live = Topic::Conversation(message.conversation_id.clone()).destination();
        if !self.faults.suppress_echo {
            self.deliver(&live, &Payload::Message(message.clone()), None);
        }

        let recipient_online = self.connections.values().any(|c| {
            c.user_id != sender_id && c.subscriptions.values().any(|d| *d == live)
        });
        if recipient_online {
            self.set_status(&message.conversation_id, &message.id, DeliveryStatus::Delivered);
            let status = Payload::Status(StatusUpdate {
                conversation_id: message.conversation_id.clone(),
                message_ids: vec![message.id.clone()],
                status: DeliveryStatus::Delivered,
            });
            self.deliver(&receipts, &status, None);
        }
        tracing::debug!(message_id = %message.id, sender_id, recipient_online, "message accepted");
    }

    fn set_status(&mut self, conversation_id: &str, message_id: &str, status: DeliveryStatus) {
        if let Some(message) = self
            .conversations
            .get_mut(conversation_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
        {
            message.status = status;
        }
    }

    fn mark_read(&mut self, receipt: &ReadReceipt) {
        let Some(messages) = self.conversations.get_mut(&receipt.conversation_id) else {
            return;
        };
        let Some(end) = messages.iter().position(|m| m.id == receipt.up_to_message_id) else {
            tracing::debug!(up_to = %receipt.up_to_message_id, "receipt for unknown message");
            return;
        };
        for message in &mut messages[..=end] {
            if message.sender_id != receipt.reader_id {
                message.status = DeliveryStatus::Read;
            }
        }
    }

    /// Deliver to every user's receipt queue for `conversation_id`.
    fn deliver_receipts(
        &mut self,
        conversation_id: &str,
        payload: &Payload,
        exclude: Option<ConnectionId>,
    ) {
        let destinations: BTreeSet<String> = self
            .connections
            .values()
            .flat_map(|c| c.subscriptions.values())
            .filter(|d| {
                matches!(
                    Topic::parse(d),
                    Some(Topic::Receipts { conversation_id: ref cid, .. }) if cid == conversation_id
                )
            })
            .cloned()
            .collect();

        for destination in destinations {
            self.deliver(&destination, payload, exclude);
        }
    }

    fn announce(&mut self, user_id: &str, online: bool) {
        let update = Payload::Presence(PresenceUpdate { user_id: user_id.to_owned(), online });
        self.deliver(topics::PRESENCE_DESTINATION, &update, None);
    }

    fn deliver(
        &mut self,
        destination: &str,
        payload: &Payload,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let frame = match payload.into_frame(destination) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%error, destination, "payload not deliverable");
                return 0;
            },
        };

        let mut reached = 0;
        for (id, connection) in &self.connections {
            if Some(*id) == exclude || !connection.subscriptions.values().any(|d| d == destination)
            {
                continue;
            }
            if connection.events.send(TransportEvent::Frame(frame.clone())).is_ok() {
                reached += 1;
            }
        }
        reached
    }
}
