//! Conversation synchronizer.
//!
//! Keeps the window of one open conversation consistent with the server while
//! the user types, sends, scrolls back and reads. Optimistic sends appear
//! immediately and are reconciled in place when the server confirms them; live
//! events are applied in transport order and deduplicated; history pages are
//! merged around what is already loaded.
//!
//! Like [`crate::SessionManager`], a `Conversation` performs no I/O. It
//! publishes through a borrowed session manager (which only frames payloads)
//! and returns [`SyncAction`]s for the driver.
//!
//! # Lifecycle
//!
//! ```text
//!   open() ──> Loading ──initial page (or failure)──> Ready ──close()──> Closed
//! ```

use std::time::Duration;

use kinship_proto::{
    ClientTempId, ConversationId, MessageId, Payload, ReadReceipt, SendMessage, ServerMessage,
    Topic, TypingSignal, UserId, topics,
};

use crate::{
    env::Environment,
    error::SyncError,
    message::{Message, MessageStatus, SenderRole},
    presence::PresenceSet,
    session::{SessionAction, SessionManager, SubscriptionHandle},
    window::ConversationWindow,
};

/// Default number of messages per history page.
pub const DEFAULT_PAGE_SIZE: usize = 30;

/// Default maximum message length, in characters.
pub const DEFAULT_MAX_TEXT_CHARS: usize = 1000;

/// Default silence after the last keystroke before `typing=false` is sent.
pub const DEFAULT_TYPING_QUIET: Duration = Duration::from_secs(2);

/// Default lifetime of a received `typing=true` without a follow-up.
pub const DEFAULT_REMOTE_TYPING_EXPIRY: Duration = Duration::from_secs(5);

/// Synchronizer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationConfig {
    /// History page size
    pub page_size: usize,
    /// Maximum message length after trimming
    pub max_text_chars: usize,
    /// Local typing burst ends after this much silence
    pub typing_quiet: Duration,
    /// Remote typing indicator expires after this long
    pub remote_typing_expiry: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            typing_quiet: DEFAULT_TYPING_QUIET,
            remote_typing_expiry: DEFAULT_REMOTE_TYPING_EXPIRY,
        }
    }
}

/// Identity of an open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationParams {
    /// Conversation to open
    pub conversation_id: ConversationId,
    /// Local user
    pub me: UserId,
    /// The other participant
    pub counterpart: UserId,
}

/// Coarse synchronizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Waiting for the initial history page
    Loading,
    /// Window is usable
    Ready,
    /// Closed; every operation is a no-op
    Closed,
}

/// Whether the conversation is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    /// Conversation view is focused
    pub focused: bool,
    /// Host application is in the foreground
    pub foregrounded: bool,
}

/// Request for one page of history.
///
/// The driver fetches the page and reports back with `token`. Results for
/// tokens the synchronizer no longer waits for are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Correlation token
    pub token: u64,
    /// Conversation to fetch
    pub conversation_id: ConversationId,
    /// Fetch messages strictly older than this one; `None` for the newest page
    pub before: Option<MessageId>,
    /// Maximum number of messages
    pub limit: usize,
}

/// One page of history, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryPage {
    /// Messages, oldest first
    pub messages: Vec<ServerMessage>,
    /// True if older messages exist beyond this page
    pub has_more: bool,
}

/// Actions the driver must execute on behalf of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Pass through to the transport
    Session(SessionAction),
    /// Fetch a history page
    FetchHistory(HistoryRequest),
    /// Window contents or loading flags changed
    WindowChanged,
    /// Counterpart typing indicator changed
    TypingChanged(bool),
}

/// Synchronizer for one open conversation.
pub struct Conversation<E: Environment> {
    env: E,
    params: ConversationParams,
    config: ConversationConfig,
    phase: SyncPhase,
    window: ConversationWindow,
    subscriptions: Vec<SubscriptionHandle>,
    next_token: u64,
    next_temp: u64,
    older_in_flight: Option<u64>,
    catch_up_in_flight: Option<u64>,
    last_keystroke: Option<E::Instant>,
    remote_typing_until: Option<E::Instant>,
    /// Last receipt handed to the session and the entries it marked read
    last_receipt: Option<(MessageId, Vec<(MessageId, MessageStatus)>)>,
}

impl<E: Environment> Conversation<E> {
    /// Open a conversation: subscribe to its live topic and receipts queue,
    /// and request the initial history page.
    pub fn open<H: Clone>(
        env: E,
        params: ConversationParams,
        config: ConversationConfig,
        session: &mut SessionManager<E, H>,
        handler: H,
    ) -> (Self, Vec<SyncAction>) {
        let live = Topic::Conversation(params.conversation_id.clone());
        let receipts = Topic::Receipts {
            user_id: params.me.clone(),
            conversation_id: params.conversation_id.clone(),
        };

        let mut actions = Vec::new();
        let mut subscriptions = Vec::new();
        for topic in [live, receipts] {
            let (handle, issued) =
                session.subscribe(topic.key(), topic.destination(), handler.clone());
            subscriptions.push(handle);
            actions.extend(issued.into_iter().map(SyncAction::Session));
        }

        let mut conversation = Self {
            env,
            params,
            config,
            phase: SyncPhase::Loading,
            window: ConversationWindow::new(),
            subscriptions,
            next_token: 0,
            next_temp: 0,
            older_in_flight: None,
            catch_up_in_flight: None,
            last_keystroke: None,
            remote_typing_until: None,
            last_receipt: None,
        };

        let request = conversation.request(None);
        conversation.older_in_flight = Some(request.token);
        actions.push(SyncAction::FetchHistory(request));

        tracing::info!(conversation_id = %conversation.params.conversation_id, "conversation opened");
        (conversation, actions)
    }

    /// Conversation id.
    pub fn id(&self) -> &ConversationId {
        &self.params.conversation_id
    }

    /// The other participant.
    pub fn counterpart(&self) -> &UserId {
        &self.params.counterpart
    }

    /// Coarse state.
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Loaded messages, oldest first.
    pub fn window(&self) -> &ConversationWindow {
        &self.window
    }

    /// True while an older page is being fetched after the initial load.
    pub fn is_loading_more(&self) -> bool {
        self.phase == SyncPhase::Ready && self.older_in_flight.is_some()
    }

    /// True if scrolling back may load more history.
    pub fn has_more_messages(&self) -> bool {
        self.window.has_more_older()
    }

    /// True while the counterpart's typing indicator is live.
    pub fn is_other_user_typing(&self, now: E::Instant) -> bool {
        self.remote_typing_until.is_some_and(|until| now < until)
    }

    /// Presence lookup for the counterpart.
    pub fn is_other_user_online(&self, presence: &PresenceSet) -> bool {
        presence.is_online(&self.params.counterpart)
    }

    /// Number of unread messages from the counterpart.
    pub fn unread_count(&self) -> usize {
        self.window.unread_incoming()
    }

    /// Send a message.
    ///
    /// The entry is appended as `Sending` before anything is published. If
    /// publishing fails (including while disconnected) the entry is marked
    /// `Failed` and the temp id is still returned, so the caller can offer a
    /// retry.
    ///
    /// # Errors
    ///
    /// - `SyncError::EmptyMessage` if `text` is blank
    /// - `SyncError::MessageTooLong` if `text` exceeds `max_text_chars`
    /// - `SyncError::Closed` after `close()`
    pub fn send_message<H: Clone>(
        &mut self,
        text: &str,
        session: &SessionManager<E, H>,
    ) -> Result<(ClientTempId, Vec<SyncAction>), SyncError> {
        if self.phase == SyncPhase::Closed {
            return Err(SyncError::Closed);
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let len = text.chars().count();
        if len > self.config.max_text_chars {
            return Err(SyncError::MessageTooLong { len, max: self.config.max_text_chars });
        }

        let temp_id = self.mint_temp_id();
        let timestamp = self.env.unix_millis();
        self.window.push_optimistic(Message::optimistic(
            self.params.conversation_id.clone(),
            temp_id.clone(),
            text,
            timestamp,
        ));

        let mut actions = vec![SyncAction::WindowChanged];
        actions.extend(self.publish_message(&temp_id, text, timestamp, session));

        // Sending ends the typing burst
        if self.last_keystroke.take().is_some() {
            actions.extend(self.publish_typing(false, session));
        }

        Ok((temp_id, actions))
    }

    /// Resend a failed message under a new temp id. The entry keeps its
    /// position.
    ///
    /// # Errors
    ///
    /// - `SyncError::UnknownMessage` if no unconfirmed entry has `temp_id`
    /// - `SyncError::NotRetryable` if the entry has not failed
    /// - `SyncError::Closed` after `close()`
    pub fn retry_message<H: Clone>(
        &mut self,
        temp_id: &str,
        session: &SessionManager<E, H>,
    ) -> Result<(ClientTempId, Vec<SyncAction>), SyncError> {
        if self.phase == SyncPhase::Closed {
            return Err(SyncError::Closed);
        }

        let Some(entry) = self.window.get_by_temp(temp_id) else {
            return Err(SyncError::UnknownMessage { client_temp_id: temp_id.to_owned() });
        };
        if entry.status != MessageStatus::Failed {
            return Err(SyncError::NotRetryable {
                client_temp_id: temp_id.to_owned(),
                status: entry.status,
            });
        }
        let text = entry.text.clone();

        let new_temp_id = self.mint_temp_id();
        let timestamp = self.env.unix_millis();
        self.window.restart(temp_id, &new_temp_id, timestamp);
        tracing::info!(old = temp_id, new = %new_temp_id, "retrying failed message");

        let mut actions = vec![SyncAction::WindowChanged];
        actions.extend(self.publish_message(&new_temp_id, &text, timestamp, session));
        Ok((new_temp_id, actions))
    }

    /// The transport refused a send frame that was already handed to it.
    pub fn handle_publish_failed(&mut self, temp_id: &str) -> Vec<SyncAction> {
        let sending =
            self.window.get_by_temp(temp_id).is_some_and(|m| m.status == MessageStatus::Sending);
        if sending && self.window.mark_failed(temp_id) {
            tracing::warn!(temp_id, "send failed");
            vec![SyncAction::WindowChanged]
        } else {
            Vec::new()
        }
    }

    /// The transport refused the read receipt through `up_to`.
    ///
    /// The entries that receipt marked read go back to their previous status,
    /// so the next [`Self::mark_as_read`] sends it again.
    pub fn handle_receipt_failed(&mut self, up_to: &str) -> Vec<SyncAction> {
        let Some((_, marked)) = self.last_receipt.take_if(|receipt| receipt.0 == up_to) else {
            return Vec::new();
        };
        let restored = self.window.restore_statuses(&marked);
        tracing::warn!(up_to, restored, "read receipt not delivered");
        if restored > 0 { vec![SyncAction::WindowChanged] } else { Vec::new() }
    }

    /// Apply an inbound payload routed to this conversation.
    ///
    /// Duplicates and backwards status moves are dropped silently.
    pub fn handle_payload(&mut self, payload: &Payload, now: E::Instant) -> Vec<SyncAction> {
        if self.phase == SyncPhase::Closed
            || payload.conversation_id() != Some(self.params.conversation_id.as_str())
        {
            return Vec::new();
        }

        match payload {
            Payload::Message(msg) => self.receive_message(msg, now),
            Payload::Ack(ack) => {
                if self.window.confirm(&ack.client_temp_id, &ack.message_id, ack.timestamp) {
                    vec![SyncAction::WindowChanged]
                } else {
                    tracing::debug!(temp_id = %ack.client_temp_id, "ack for unknown or retired temp id");
                    Vec::new()
                }
            },
            Payload::Status(update) => {
                let status = MessageStatus::from(update.status);
                let applied = update
                    .message_ids
                    .iter()
                    .filter(|id| self.window.apply_status(id, status))
                    .count();
                if applied == 0 {
                    tracing::debug!(?status, "status update changed nothing");
                    Vec::new()
                } else {
                    vec![SyncAction::WindowChanged]
                }
            },
            Payload::Typing(signal) if signal.sender_id == self.params.counterpart => {
                let before = self.is_other_user_typing(now);
                self.remote_typing_until =
                    signal.is_typing.then(|| now + self.config.remote_typing_expiry);
                let after = self.is_other_user_typing(now);
                if before == after { Vec::new() } else { vec![SyncAction::TypingChanged(after)] }
            },
            Payload::Read(receipt) => self.receive_read_receipt(receipt),
            _ => Vec::new(),
        }
    }

    /// Load the page older than the oldest loaded message.
    ///
    /// No-op while loading, after the oldest page, or when a page is already
    /// in flight.
    pub fn load_more(&mut self) -> Vec<SyncAction> {
        if self.phase != SyncPhase::Ready
            || self.older_in_flight.is_some()
            || !self.window.has_more_older()
        {
            return Vec::new();
        }

        let before = self.window.oldest_loaded_id().cloned();
        let request = self.request(before);
        self.older_in_flight = Some(request.token);
        vec![SyncAction::FetchHistory(request), SyncAction::WindowChanged]
    }

    /// A requested history page arrived.
    pub fn handle_history_page(&mut self, token: u64, page: HistoryPage) -> Vec<SyncAction> {
        if self.older_in_flight == Some(token) {
            self.older_in_flight = None;
            let mut messages = Vec::new();
            let mut confirmed = 0;
            for msg in &page.messages {
                if msg.conversation_id != self.params.conversation_id {
                    continue;
                }
                // A send made while loading may already be in the page.
                if self.confirm_pending(msg) {
                    confirmed += 1;
                } else {
                    messages.push(Message::from_server(msg, &self.params.me));
                }
            }
            let added = self.window.prepend_older(messages, page.has_more);
            self.phase = SyncPhase::Ready;

            tracing::debug!(
                conversation_id = %self.params.conversation_id,
                added,
                confirmed,
                has_more = page.has_more,
                "history page merged"
            );
            vec![SyncAction::WindowChanged]
        } else if self.catch_up_in_flight == Some(token) {
            self.catch_up_in_flight = None;
            let mut changed = false;
            for msg in &page.messages {
                if msg.conversation_id == self.params.conversation_id {
                    changed |= self.merge_server_message(msg);
                }
            }
            if changed { vec![SyncAction::WindowChanged] } else { Vec::new() }
        } else {
            tracing::debug!(token, "stale history page dropped");
            Vec::new()
        }
    }

    /// A requested history page could not be fetched.
    ///
    /// `has_more_messages` is left unchanged so scrolling retries. A failed
    /// initial load still moves to `Ready`.
    pub fn handle_history_failed(&mut self, token: u64, reason: &str) -> Vec<SyncAction> {
        if self.older_in_flight == Some(token) {
            self.older_in_flight = None;
            self.phase = match self.phase {
                SyncPhase::Loading => SyncPhase::Ready,
                phase => phase,
            };
            tracing::warn!(conversation_id = %self.params.conversation_id, reason, "history fetch failed");
            vec![SyncAction::WindowChanged]
        } else if self.catch_up_in_flight == Some(token) {
            self.catch_up_in_flight = None;
            tracing::warn!(conversation_id = %self.params.conversation_id, reason, "catch-up fetch failed");
            Vec::new()
        } else {
            Vec::new()
        }
    }

    /// Keystroke (`true`) or cleared input (`false`).
    ///
    /// `typing=true` is published once per burst; `typing=false` when the
    /// input is cleared or after `typing_quiet` without keystrokes (see
    /// [`Self::tick`]).
    pub fn send_typing_indicator<H: Clone>(
        &mut self,
        is_typing: bool,
        session: &SessionManager<E, H>,
        now: E::Instant,
    ) -> Vec<SyncAction> {
        if self.phase == SyncPhase::Closed {
            return Vec::new();
        }

        if !is_typing {
            return match self.last_keystroke.take() {
                Some(_) => self.publish_typing(false, session).into_iter().collect(),
                None => Vec::new(),
            };
        }

        let starting = self.last_keystroke.replace(now).is_none();
        if !starting {
            return Vec::new();
        }

        match self.publish_typing(true, session) {
            Some(action) => vec![action],
            None => {
                // Not connected: the next keystroke tries again.
                self.last_keystroke = None;
                Vec::new()
            },
        }
    }

    /// Expire typing state on both sides.
    pub fn tick<H: Clone>(
        &mut self,
        session: &SessionManager<E, H>,
        now: E::Instant,
    ) -> Vec<SyncAction> {
        let mut actions = Vec::new();

        if let Some(last) = self.last_keystroke
            && now - last >= self.config.typing_quiet
        {
            self.last_keystroke = None;
            actions.extend(self.publish_typing(false, session));
        }

        if let Some(until) = self.remote_typing_until
            && now >= until
        {
            self.remote_typing_until = None;
            actions.push(SyncAction::TypingChanged(false));
        }

        actions
    }

    /// Publish a read receipt for the newest unread message from the
    /// counterpart and mark their loaded messages read.
    ///
    /// Only while visible and foregrounded. If publishing fails, or the
    /// transport later refuses the frame ([`Self::handle_receipt_failed`]),
    /// the messages stay unread so a later call retries.
    pub fn mark_as_read<H: Clone>(
        &mut self,
        visibility: Visibility,
        session: &SessionManager<E, H>,
    ) -> Vec<SyncAction> {
        if self.phase == SyncPhase::Closed || !visibility.focused || !visibility.foregrounded {
            return Vec::new();
        }
        let Some(up_to) = self.window.newest_unread_incoming().cloned() else {
            return Vec::new();
        };

        let payload = Payload::Read(ReadReceipt {
            conversation_id: self.params.conversation_id.clone(),
            reader_id: self.params.me.clone(),
            up_to_message_id: up_to.clone(),
        });
        match session.publish(topics::READ_DESTINATION, &payload) {
            Ok(action) => {
                let marked = self.window.read_through(&up_to, SenderRole::Them).unwrap_or_default();
                self.last_receipt = Some((up_to, marked));
                vec![SyncAction::Session(action), SyncAction::WindowChanged]
            },
            Err(error) => {
                tracing::warn!(%error, up_to = %up_to, "read receipt not sent");
                Vec::new()
            },
        }
    }

    /// The session lost its connection.
    ///
    /// Entries still `Sending` can no longer be acknowledged and become
    /// `Failed`. The local typing burst ends without a signal.
    pub fn handle_connection_lost(&mut self) -> Vec<SyncAction> {
        self.last_keystroke = None;
        let failed = self.window.fail_all_sending();
        if failed == 0 {
            return Vec::new();
        }

        tracing::info!(conversation_id = %self.params.conversation_id, failed, "pending sends failed");
        vec![SyncAction::WindowChanged]
    }

    /// The session (re)connected: fetch the newest page to fill the gap.
    pub fn handle_reconnected(&mut self) -> Vec<SyncAction> {
        if self.phase != SyncPhase::Ready || self.catch_up_in_flight.is_some() {
            return Vec::new();
        }

        let request = self.request(None);
        self.catch_up_in_flight = Some(request.token);
        vec![SyncAction::FetchHistory(request)]
    }

    /// Close: end the typing burst, dispose of both subscriptions and discard
    /// the window.
    pub fn close<H: Clone>(&mut self, session: &mut SessionManager<E, H>) -> Vec<SyncAction> {
        if self.phase == SyncPhase::Closed {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.last_keystroke.take().is_some() {
            actions.extend(self.publish_typing(false, session));
        }
        for handle in self.subscriptions.drain(..) {
            actions.extend(session.unsubscribe(&handle).into_iter().map(SyncAction::Session));
        }

        self.window.clear();
        self.last_receipt = None;
        self.phase = SyncPhase::Closed;
        self.older_in_flight = None;
        self.catch_up_in_flight = None;
        self.remote_typing_until = None;

        tracing::info!(conversation_id = %self.params.conversation_id, "conversation closed");
        actions
    }

    fn receive_message(&mut self, msg: &ServerMessage, now: E::Instant) -> Vec<SyncAction> {
        let mut actions = Vec::new();

        // A message from the counterpart ends their typing burst.
        if msg.sender_id == self.params.counterpart {
            let was_typing = self.is_other_user_typing(now);
            self.remote_typing_until = None;
            if was_typing {
                actions.push(SyncAction::TypingChanged(false));
            }
        }

        if self.merge_server_message(msg) {
            actions.push(SyncAction::WindowChanged);
        } else {
            tracing::debug!(message_id = %msg.id, "duplicate delivery ignored");
        }
        actions
    }

    /// Returns true if the window changed.
    fn merge_server_message(&mut self, msg: &ServerMessage) -> bool {
        if self.confirm_pending(msg) {
            return true;
        }

        if self.window.get_by_id(&msg.id).is_some() {
            return self.window.apply_status(&msg.id, msg.status.into());
        }

        self.window.push_back(Message::from_server(msg, &self.params.me))
    }

    /// Confirm our own unconfirmed entry in place if `msg` is its server copy.
    fn confirm_pending(&mut self, msg: &ServerMessage) -> bool {
        let Some(temp_id) = &msg.client_temp_id else {
            return false;
        };
        if msg.sender_id != self.params.me || self.window.get_by_temp(temp_id).is_none() {
            return false;
        }
        self.window.confirm(temp_id, &msg.id, msg.timestamp);
        self.window.apply_status(&msg.id, msg.status.into());
        true
    }

    fn receive_read_receipt(&mut self, receipt: &ReadReceipt) -> Vec<SyncAction> {
        // A receipt from our own user is another device catching up.
        let side = if receipt.reader_id == self.params.counterpart {
            SenderRole::Me
        } else if receipt.reader_id == self.params.me {
            SenderRole::Them
        } else {
            return Vec::new();
        };

        match self.window.mark_read_through(&receipt.up_to_message_id, side) {
            Some(0) => Vec::new(),
            Some(_) => vec![SyncAction::WindowChanged],
            None => {
                tracing::debug!(up_to = %receipt.up_to_message_id, "receipt for unloaded message");
                Vec::new()
            },
        }
    }

    fn publish_message<H: Clone>(
        &mut self,
        temp_id: &str,
        text: &str,
        timestamp: u64,
        session: &SessionManager<E, H>,
    ) -> Option<SyncAction> {
        let payload = Payload::Send(SendMessage {
            conversation_id: self.params.conversation_id.clone(),
            client_temp_id: temp_id.to_owned(),
            sender_id: self.params.me.clone(),
            text: text.to_owned(),
            timestamp,
        });

        match session.publish(topics::SEND_DESTINATION, &payload) {
            Ok(action) => Some(SyncAction::Session(action)),
            Err(error) => {
                tracing::warn!(%error, temp_id, "send failed");
                self.window.mark_failed(temp_id);
                None
            },
        }
    }

    fn publish_typing<H: Clone>(
        &self,
        is_typing: bool,
        session: &SessionManager<E, H>,
    ) -> Option<SyncAction> {
        let payload = Payload::Typing(TypingSignal {
            conversation_id: self.params.conversation_id.clone(),
            sender_id: self.params.me.clone(),
            is_typing,
        });

        match session.publish(topics::TYPING_DESTINATION, &payload) {
            Ok(action) => Some(SyncAction::Session(action)),
            Err(error) => {
                tracing::debug!(%error, is_typing, "typing signal dropped");
                None
            },
        }
    }

    fn request(&mut self, before: Option<MessageId>) -> HistoryRequest {
        let token = self.next_token;
        self.next_token += 1;
        HistoryRequest {
            token,
            conversation_id: self.params.conversation_id.clone(),
            before,
            limit: self.config.page_size,
        }
    }

    fn mint_temp_id(&mut self) -> ClientTempId {
        let seq = self.next_temp;
        self.next_temp += 1;
        format!("tmp-{:016x}-{seq}", self.env.random_u64())
    }
}
