//! Client runtime.
//!
//! [`Client`] owns the session manager, the presence tracker and every open
//! conversation, and executes their actions against a [`Transport`] and a
//! [`HistoryService`]. All state changes happen inside [`Client::pump`] or a
//! public operation, one event at a time, in arrival order.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use kinship_core::{
    ConnectionState, Conversation, ConversationConfig, ConversationParams, Environment,
    HistoryPage, HistoryRequest, Listener, Observers, PresenceSet, PresenceTracker,
    SessionAction, SessionConfig, SessionManager, SubscriptionHandle, SyncAction, Visibility,
};
use kinship_proto::{ClientTempId, ConversationId, Frame, Payload, Topic, UserId};
use tokio::sync::{mpsc, watch};

use crate::{
    error::ClientError,
    history::{HistoryError, HistoryService},
    transport::{Transport, TransportEvent},
};

/// Default interval between timer ticks (reconnect schedule, typing expiry).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local user
    pub user_id: UserId,
    /// Session manager tuning
    pub session: SessionConfig,
    /// Defaults for every opened conversation
    pub conversation: ConversationConfig,
    /// Timer tick interval
    pub tick_interval: Duration,
}

impl ClientConfig {
    /// Default configuration for `user_id`.
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            session: SessionConfig::default(),
            conversation: ConversationConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientUpdate {
    /// Window contents or loading flags of a conversation changed
    WindowChanged(ConversationId),
    /// Counterpart typing indicator changed
    TypingChanged {
        /// Conversation
        conversation_id: ConversationId,
        /// New indicator value
        typing: bool,
    },
    /// Payload received on the personal notification queue, including
    /// `Payload::Error` reports for rejected publishes
    Notification(Payload),
}

/// What a subscription's frames are for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Conversation(ConversationId),
    Presence,
    Notifications,
}

#[derive(Debug)]
struct HistoryResult {
    conversation_id: ConversationId,
    /// Which opening of the conversation asked; tokens restart on reopen
    generation: u64,
    token: u64,
    result: Result<HistoryPage, HistoryError>,
}

type Pending = VecDeque<(Option<ConversationId>, SyncAction)>;

/// Realtime conversation client.
///
/// # Type Parameters
///
/// - `T`: realtime transport
/// - `S`: history page service
/// - `E`: environment (clock and randomness)
pub struct Client<T, S, E>
where
    T: Transport,
    S: HistoryService,
    E: Environment,
{
    env: E,
    config: ClientConfig,
    transport: T,
    history: Arc<S>,
    session: SessionManager<E, Route>,
    presence: PresenceTracker,
    presence_tx: watch::Sender<PresenceSet>,
    conversations: HashMap<ConversationId, Conversation<E>>,
    generations: HashMap<ConversationId, u64>,
    next_generation: u64,
    history_tx: mpsc::UnboundedSender<HistoryResult>,
    history_rx: mpsc::UnboundedReceiver<HistoryResult>,
    connection_observers: Observers<ConnectionState>,
    connectivity_observers: Observers<bool>,
    update_observers: Observers<ClientUpdate>,
    was_connected: bool,
    next_tick: E::Instant,
    _global_subscriptions: Vec<SubscriptionHandle>,
}

impl<T, S, E> Client<T, S, E>
where
    T: Transport,
    S: HistoryService,
    E: Environment,
{
    /// Create a disconnected client.
    ///
    /// Registers the presence topic and the personal notification queue; both
    /// are issued on the first connect.
    pub fn new(transport: T, history: S, env: E, config: ClientConfig) -> Self {
        let mut session = SessionManager::new(env.clone(), config.session);

        let mut global = Vec::new();
        for (topic, route) in [
            (Topic::Presence, Route::Presence),
            (Topic::Notifications(config.user_id.clone()), Route::Notifications),
        ] {
            // Not connected yet, so nothing is issued.
            let (handle, _) = session.subscribe(topic.key(), topic.destination(), route);
            global.push(handle);
        }

        let next_tick = env.now() + config.tick_interval;
        let (presence_tx, _) = watch::channel(PresenceSet::default());
        let (history_tx, history_rx) = mpsc::unbounded_channel();

        Self {
            env,
            config,
            transport,
            history: Arc::new(history),
            session,
            presence: PresenceTracker::new(),
            presence_tx,
            conversations: HashMap::new(),
            generations: HashMap::new(),
            next_generation: 0,
            history_tx,
            history_rx,
            connection_observers: Observers::new(),
            connectivity_observers: Observers::new(),
            update_observers: Observers::new(),
            was_connected: false,
            next_tick,
            _global_subscriptions: global,
        }
    }

    /// Local user id.
    pub fn user_id(&self) -> &UserId {
        &self.config.user_id
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// True while connected.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Open conversation `conversation_id`, if any.
    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation<E>> {
        self.conversations.get(conversation_id)
    }

    /// Ids of every open conversation.
    pub fn conversation_ids(&self) -> impl Iterator<Item = &ConversationId> {
        self.conversations.keys()
    }

    /// True while the counterpart of `conversation_id` is typing.
    pub fn is_other_user_typing(&self, conversation_id: &str) -> bool {
        self.conversations
            .get(conversation_id)
            .is_some_and(|c| c.is_other_user_typing(self.env.now()))
    }

    /// True while the counterpart of `conversation_id` is online.
    pub fn is_other_user_online(&self, conversation_id: &str) -> bool {
        self.conversations
            .get(conversation_id)
            .is_some_and(|c| c.is_other_user_online(self.presence.snapshot()))
    }

    /// Connection state listener. Receives the current state immediately,
    /// then every transition.
    pub fn on_connection_state(&mut self) -> Listener<ConnectionState> {
        self.connection_observers.register(self.session.state())
    }

    /// Connectivity listener. Receives the current value immediately, then
    /// only changes between connected and not connected.
    pub fn on_connection_change(&mut self) -> Listener<bool> {
        self.connectivity_observers.register(self.session.is_connected())
    }

    /// Listener for window, typing and notification updates.
    pub fn updates(&mut self) -> Listener<ClientUpdate> {
        self.update_observers.subscribe()
    }

    /// Presence snapshots. The receiver always holds the latest set.
    pub fn presence(&self) -> watch::Receiver<PresenceSet> {
        self.presence_tx.subscribe()
    }

    /// Start connecting.
    pub fn connect(&mut self) {
        let actions = self.session.connect(self.env.now());
        self.run_session(actions);
    }

    /// Intentional disconnect. No reconnect until [`Self::connect`].
    pub fn disconnect(&mut self) {
        let actions = self.session.disconnect();
        self.run_session(actions);
    }

    /// Host application moved to the foreground (`true`) or background.
    pub fn set_foreground(&mut self, active: bool) {
        let actions = self.session.set_foreground(active, self.env.now());
        self.run_session(actions);
    }

    /// Reconnect immediately (connection banner tap).
    pub fn retry_now(&mut self) {
        let actions = self.session.retry_now(self.env.now());
        self.run_session(actions);
    }

    /// Publish a raw payload.
    ///
    /// # Errors
    ///
    /// - `ClientError::Session` if not connected or the payload cannot be
    ///   framed
    pub fn publish(&mut self, destination: &str, payload: &Payload) -> Result<(), ClientError> {
        let action = self.session.publish(destination, payload)?;
        self.run_session(vec![action]);
        Ok(())
    }

    /// Open a conversation with `counterpart`. No-op if already open.
    pub fn open_conversation(
        &mut self,
        conversation_id: impl Into<ConversationId>,
        counterpart: impl Into<UserId>,
    ) {
        let conversation_id = conversation_id.into();
        if self.conversations.contains_key(&conversation_id) {
            return;
        }

        let params = ConversationParams {
            conversation_id: conversation_id.clone(),
            me: self.config.user_id.clone(),
            counterpart: counterpart.into(),
        };
        let (conversation, actions) = Conversation::open(
            self.env.clone(),
            params,
            self.config.conversation,
            &mut self.session,
            Route::Conversation(conversation_id.clone()),
        );
        self.conversations.insert(conversation_id.clone(), conversation);
        self.generations.insert(conversation_id.clone(), self.next_generation);
        self.next_generation += 1;
        self.run(Some(&conversation_id), actions);
    }

    /// Close a conversation and discard its window.
    ///
    /// # Errors
    ///
    /// - `ClientError::UnknownConversation` if it is not open
    pub fn close_conversation(&mut self, conversation_id: &str) -> Result<(), ClientError> {
        let mut conversation = self
            .conversations
            .remove(conversation_id)
            .ok_or_else(|| ClientError::UnknownConversation(conversation_id.to_owned()))?;
        self.generations.remove(conversation_id);
        let actions = conversation.close(&mut self.session);
        self.run(None, actions);
        Ok(())
    }

    /// Send a message. Returns the temp id of the optimistic entry, which is
    /// also the handle for [`Self::retry_message`] if sending fails.
    ///
    /// # Errors
    ///
    /// - `ClientError::UnknownConversation` if it is not open
    /// - `ClientError::Sync` if the text is rejected
    pub fn send_message(
        &mut self,
        conversation_id: &str,
        text: &str,
    ) -> Result<ClientTempId, ClientError> {
        let conversation = lookup(&mut self.conversations, conversation_id)?;
        let (temp_id, actions) = conversation.send_message(text, &self.session)?;
        self.run(Some(&conversation_id.to_owned()), actions);
        Ok(temp_id)
    }

    /// Retry a failed message. Returns its new temp id.
    ///
    /// # Errors
    ///
    /// - `ClientError::UnknownConversation` if it is not open
    /// - `ClientError::Sync` if the message is unknown or has not failed
    pub fn retry_message(
        &mut self,
        conversation_id: &str,
        temp_id: &str,
    ) -> Result<ClientTempId, ClientError> {
        let conversation = lookup(&mut self.conversations, conversation_id)?;
        let (new_temp_id, actions) = conversation.retry_message(temp_id, &self.session)?;
        self.run(Some(&conversation_id.to_owned()), actions);
        Ok(new_temp_id)
    }

    /// Keystroke (`true`) or cleared input (`false`).
    ///
    /// # Errors
    ///
    /// - `ClientError::UnknownConversation` if it is not open
    pub fn send_typing_indicator(
        &mut self,
        conversation_id: &str,
        is_typing: bool,
    ) -> Result<(), ClientError> {
        let now = self.env.now();
        let conversation = lookup(&mut self.conversations, conversation_id)?;
        let actions = conversation.send_typing_indicator(is_typing, &self.session, now);
        self.run(Some(&conversation_id.to_owned()), actions);
        Ok(())
    }

    /// Mark the conversation read if it is visible.
    ///
    /// # Errors
    ///
    /// - `ClientError::UnknownConversation` if it is not open
    pub fn mark_as_read(
        &mut self,
        conversation_id: &str,
        visibility: Visibility,
    ) -> Result<(), ClientError> {
        let conversation = lookup(&mut self.conversations, conversation_id)?;
        let actions = conversation.mark_as_read(visibility, &self.session);
        self.run(Some(&conversation_id.to_owned()), actions);
        Ok(())
    }

    /// Load the next page of older history.
    ///
    /// # Errors
    ///
    /// - `ClientError::UnknownConversation` if it is not open
    pub fn load_more(&mut self, conversation_id: &str) -> Result<(), ClientError> {
        let actions = lookup(&mut self.conversations, conversation_id)?.load_more();
        self.run(Some(&conversation_id.to_owned()), actions);
        Ok(())
    }

    /// Wait for the next transport event, history result or timer tick and
    /// process it.
    ///
    /// Ticks are scheduled on a fixed cadence, so a steady stream of events
    /// cannot starve the timers.
    pub async fn pump(&mut self) {
        let now = self.env.now();
        let until_tick =
            if self.next_tick > now { self.next_tick - now } else { Duration::ZERO };
        tokio::select! {
            Some(event) = self.transport.next_event() => self.handle_transport_event(event),
            Some(result) = self.history_rx.recv() => self.handle_history_result(result),
            () = self.env.sleep(until_tick) => self.tick(),
        }
    }

    /// Run timers: scheduled reconnects and typing expiry.
    pub fn tick(&mut self) {
        let now = self.env.now();
        self.next_tick = now + self.config.tick_interval;
        let actions = self.session.tick(now);
        self.run_session(actions);

        let mut pending = Pending::new();
        for (id, conversation) in &mut self.conversations {
            pending.extend(
                conversation.tick(&self.session, now).into_iter().map(|a| (Some(id.clone()), a)),
            );
        }
        self.drain(pending);
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        let now = self.env.now();
        let actions = match event {
            TransportEvent::Opened { attempt } => self.session.handle_transport_opened(attempt),
            TransportEvent::Failed { attempt, error } => {
                self.session.handle_transport_failed(attempt, &error, now)
            },
            TransportEvent::Lost { attempt, error } => {
                self.session.handle_transport_lost(attempt, &error, now)
            },
            TransportEvent::Frame(frame) => {
                self.handle_frame(&frame);
                return;
            },
        };
        self.run_session(actions);
    }

    fn handle_frame(&mut self, frame: &Frame) {
        let routes = self.session.route(&frame.destination);
        if routes.is_empty() {
            tracing::debug!(destination = %frame.destination, "frame for unsubscribed destination");
            return;
        }

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(destination = %frame.destination, %error, "undecodable frame dropped");
                return;
            },
        };

        let now = self.env.now();
        for route in routes {
            match route {
                Route::Conversation(conversation_id) => {
                    if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
                        let actions = conversation.handle_payload(&payload, now);
                        self.run(Some(&conversation_id), actions);
                    }
                },
                Route::Presence => self.apply_presence(&payload),
                Route::Notifications => {
                    if matches!(payload, Payload::Presence(_) | Payload::PresenceSnapshot(_)) {
                        self.apply_presence(&payload);
                    } else {
                        if let Payload::Error(error) = &payload {
                            tracing::warn!(code = error.code, message = %error.message, "server rejected a publish");
                        }
                        self.update_observers.notify(&ClientUpdate::Notification(payload.clone()));
                    }
                },
            }
        }
    }

    fn apply_presence(&mut self, payload: &Payload) {
        if self.presence.apply(payload) {
            self.presence_tx.send_replace(self.presence.snapshot().clone());
        }
    }

    fn handle_history_result(&mut self, result: HistoryResult) {
        let current = self.generations.get(&result.conversation_id) == Some(&result.generation);
        let conversation = match self.conversations.get_mut(&result.conversation_id) {
            Some(conversation) if current => conversation,
            _ => {
                tracing::debug!(conversation_id = %result.conversation_id, "history for closed conversation");
                return;
            },
        };

        let actions = match result.result {
            Ok(page) => conversation.handle_history_page(result.token, page),
            Err(error) => conversation.handle_history_failed(result.token, &error.to_string()),
        };
        self.run(Some(&result.conversation_id), actions);
    }

    fn spawn_fetch(&self, request: HistoryRequest) {
        let Some(&generation) = self.generations.get(&request.conversation_id) else {
            return;
        };
        let history = Arc::clone(&self.history);
        let tx = self.history_tx.clone();
        tokio::spawn(async move {
            let result = history
                .fetch_page(&request.conversation_id, request.before.as_deref(), request.limit)
                .await;
            // Receiver lives as long as the client
            let _ = tx.send(HistoryResult {
                conversation_id: request.conversation_id,
                generation,
                token: request.token,
                result,
            });
        });
    }

    fn run_session(&mut self, actions: Vec<SessionAction>) {
        self.drain(actions.into_iter().map(|a| (None, SyncAction::Session(a))).collect());
    }

    fn run(&mut self, origin: Option<&ConversationId>, actions: Vec<SyncAction>) {
        self.drain(actions.into_iter().map(|a| (origin.cloned(), a)).collect());
    }

    /// Execute actions in order. Executing one may queue more.
    fn drain(&mut self, mut pending: Pending) {
        while let Some((origin, action)) = pending.pop_front() {
            match action {
                SyncAction::Session(action) => self.execute(action, &mut pending),
                SyncAction::FetchHistory(request) => self.spawn_fetch(request),
                SyncAction::WindowChanged => {
                    if let Some(conversation_id) = origin {
                        self.update_observers.notify(&ClientUpdate::WindowChanged(conversation_id));
                    }
                },
                SyncAction::TypingChanged(typing) => {
                    if let Some(conversation_id) = origin {
                        self.update_observers
                            .notify(&ClientUpdate::TypingChanged { conversation_id, typing });
                    }
                },
            }
        }
    }

    fn execute(&mut self, action: SessionAction, pending: &mut Pending) {
        match action {
            SessionAction::OpenTransport { attempt } => self.transport.open(attempt),
            SessionAction::CloseTransport => self.transport.close(),
            SessionAction::Subscribe { id, destination } => {
                if let Err(error) = self.transport.subscribe(id, &destination) {
                    tracing::warn!(%id, %destination, %error, "subscribe failed");
                }
            },
            SessionAction::Unsubscribe { id } => {
                if let Err(error) = self.transport.unsubscribe(id) {
                    tracing::debug!(%id, %error, "unsubscribe failed");
                }
            },
            SessionAction::Send(frame) => {
                if let Err(error) = self.transport.send(frame.clone()) {
                    tracing::warn!(destination = %frame.destination, %error, "send failed");
                    self.handle_send_failure(&frame, pending);
                }
            },
            SessionAction::StateChanged(state) => self.handle_state_change(state, pending),
        }
    }

    fn handle_send_failure(&mut self, frame: &Frame, pending: &mut Pending) {
        let (conversation_id, actions) = match Payload::from_frame(frame) {
            Ok(Payload::Send(message)) => {
                let Some(conversation) = self.conversations.get_mut(&message.conversation_id) else {
                    return;
                };
                (message.conversation_id, conversation.handle_publish_failed(&message.client_temp_id))
            },
            Ok(Payload::Read(receipt)) => {
                let Some(conversation) = self.conversations.get_mut(&receipt.conversation_id) else {
                    return;
                };
                (receipt.conversation_id, conversation.handle_receipt_failed(&receipt.up_to_message_id))
            },
            _ => return,
        };
        pending.extend(actions.into_iter().map(|a| (Some(conversation_id.clone()), a)));
    }

    fn handle_state_change(&mut self, state: ConnectionState, pending: &mut Pending) {
        self.connection_observers.notify(&state);

        let connected = state.is_connected();
        if connected == self.was_connected {
            return;
        }
        self.was_connected = connected;
        self.connectivity_observers.notify(&connected);

        for (id, conversation) in &mut self.conversations {
            let actions = if connected {
                conversation.handle_reconnected()
            } else {
                conversation.handle_connection_lost()
            };
            pending.extend(actions.into_iter().map(|a| (Some(id.clone()), a)));
        }
    }
}

fn lookup<'a, E: Environment>(
    conversations: &'a mut HashMap<ConversationId, Conversation<E>>,
    conversation_id: &str,
) -> Result<&'a mut Conversation<E>, ClientError> {
    conversations
        .get_mut(conversation_id)
        .ok_or_else(|| ClientError::UnknownConversation(conversation_id.to_owned()))
}
