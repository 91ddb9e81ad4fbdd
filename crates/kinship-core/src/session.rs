//! Connection session manager.
//!
//! Owns the single realtime connection for the process: its lifecycle state,
//! the reconnect schedule, and the registry of topic subscriptions that must be
//! re-issued after every (re)connect.
//!
//! # State Machine
//!
//! ```text
//!                  connect()
//!   ┌──────────────┐ ───────> ┌────────────┐  opened   ┌───────────┐
//!   │ Disconnected │          │ Connecting │ ────────> │ Connected │
//!   └──────────────┘          └────────────┘           └───────────┘
//!          ▲                     │      │ transient        │  ▲
//!          │ disconnect()        │      │ failure     lost │  │ opened
//!          │ (from any state)    │      ▼                  ▼  │
//!          │                     │   ┌──────────────┐ <──────┘
//!   ┌──────────────┐  rejected   │   │ Reconnecting │  retry after backoff
//!   │    Failed    │ <───────────┴── └──────────────┘ ──┐
//!   └──────────────┘                        ▲           │
//!                                           └───────────┘
//! ```
//!
//! The manager performs no I/O. Every operation returns [`SessionAction`]s for
//! the driver to execute, and transport outcomes are fed back through
//! `handle_transport_*`. Each `OpenTransport` carries a fresh attempt id;
//! outcomes for any other attempt are stale and ignored.
//!
//! # Invariants
//!
//! - State changes only along edges accepted by [`is_valid_transition`].
//! - At most one transport attempt is in flight.
//! - At most one registration per topic key. Replacing a registration
//!   un-issues the old subscription before issuing the new one.
//! - `Reconnecting` is left only by a successful attempt, a fatal failure, or
//!   an explicit `disconnect()`.

use std::{collections::BTreeMap, fmt};

use kinship_proto::{Frame, Payload};

use crate::{
    backoff::{Backoff, BackoffPolicy},
    env::Environment,
    error::{SessionError, TransportFailure},
};

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and none wanted
    Disconnected,
    /// First attempt after `connect()` in flight
    Connecting,
    /// Transport open, subscriptions issued
    Connected,
    /// Connection lost or attempt failed; retrying with backoff
    Reconnecting,
    /// Server rejected the session; waits for an explicit `connect()`
    Failed,
}

impl ConnectionState {
    /// True only for `Connected`.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// Returns true if the session manager may move from `from` to `to`.
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::{Connected, Connecting, Disconnected, Failed, Reconnecting};

    matches!(
        (from, to),
        (Disconnected | Failed, Connecting)
            | (Connecting | Reconnecting, Connected)
            | (Connecting | Connected, Reconnecting)
            | (Connecting | Connected | Reconnecting, Failed)
            | (Connecting | Connected | Reconnecting | Failed, Disconnected)
    )
}

/// Transport-level id of one issued subscription.
///
/// Fresh for every registration, so a replaced subscription and its
/// replacement never share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for SubscriptionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Disposer returned by [`SessionManager::subscribe`].
///
/// Removes only the registration it was created for. Once that registration
/// has been replaced under the same key, disposing is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    topic_key: String,
    id: SubscriptionId,
}

impl SubscriptionHandle {
    /// Topic key this handle was registered under.
    pub fn topic_key(&self) -> &str {
        &self.topic_key
    }

    /// Subscription id of the registration.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

/// Actions the driver must execute on behalf of the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Start opening the transport. Report the outcome with this attempt id.
    OpenTransport {
        /// Attempt id
        attempt: u64,
    },
    /// Close the transport (or abandon the attempt in flight).
    CloseTransport,
    /// Issue a subscription on the open transport.
    Subscribe {
        /// Subscription id to use on the wire
        id: SubscriptionId,
        /// Destination to subscribe to
        destination: String,
    },
    /// Cancel an issued subscription.
    Unsubscribe {
        /// Subscription id passed to the earlier `Subscribe`
        id: SubscriptionId,
    },
    /// Send a frame on the open transport.
    Send(Frame),
    /// The connection state changed. Notify observers.
    StateChanged(ConnectionState),
}

/// Session manager configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionConfig {
    /// Reconnect backoff
    pub backoff: BackoffPolicy,
}

#[derive(Debug)]
struct Registration<H> {
    id: SubscriptionId,
    destination: String,
    handler: H,
}

/// Connection session manager.
///
/// Generic over the environment `E` and the handler type `H` that the driver
/// attaches to each subscription (typically a small routing enum). Handlers
/// are returned by [`SessionManager::route`] for inbound frames.
pub struct SessionManager<E: Environment, H> {
    env: E,
    state: ConnectionState,
    backoff: Backoff,
    registrations: BTreeMap<String, Registration<H>>,
    next_subscription: u64,
    next_attempt: u64,
    attempt_in_flight: Option<u64>,
    open_attempt: Option<u64>,
    retry_at: Option<E::Instant>,
    foreground: bool,
}

impl<E: Environment, H: Clone> SessionManager<E, H> {
    /// Create a manager in `Disconnected` with no registrations.
    pub fn new(env: E, config: SessionConfig) -> Self {
        Self {
            env,
            state: ConnectionState::Disconnected,
            backoff: Backoff::new(config.backoff),
            registrations: BTreeMap::new(),
            next_subscription: 0,
            next_attempt: 0,
            attempt_in_flight: None,
            open_attempt: None,
            retry_at: None,
            foreground: true,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True if publishing is currently possible.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Attempt id currently in flight, if any.
    pub fn attempt_in_flight(&self) -> Option<u64> {
        self.attempt_in_flight
    }

    /// Attempt id of the transport currently open, if any.
    pub fn open_attempt(&self) -> Option<u64> {
        self.open_attempt
    }

    /// When the next scheduled retry becomes due.
    pub fn retry_at(&self) -> Option<E::Instant> {
        self.retry_at
    }

    /// True if the host application is active.
    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.registrations.len()
    }

    /// True if a subscription is registered under `topic_key`.
    pub fn has_subscription(&self, topic_key: &str) -> bool {
        self.registrations.contains_key(topic_key)
    }

    /// Start connecting.
    ///
    /// No-op while `Connected` or `Connecting`. From `Reconnecting` this
    /// behaves like [`Self::retry_now`].
    pub fn connect(&mut self, now: E::Instant) -> Vec<SessionAction> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => Vec::new(),
            ConnectionState::Reconnecting => self.retry_now(now),
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.backoff.reset();
                let mut actions = Vec::new();
                actions.extend(self.transition(ConnectionState::Connecting));
                actions.push(self.start_attempt());
                actions
            },
        }
    }

    /// Intentional shutdown. No reconnect happens until the next `connect()`.
    ///
    /// Registrations are kept and will be re-issued on the next connect.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }

        self.attempt_in_flight = None;
        self.open_attempt = None;
        self.retry_at = None;
        self.backoff.reset();

        let mut actions = vec![SessionAction::CloseTransport];
        actions.extend(self.transition(ConnectionState::Disconnected));
        actions
    }

    /// Register a subscription under `topic_key`.
    ///
    /// Issued immediately when connected; otherwise issued on the next
    /// successful connect. An existing registration under the same key is
    /// replaced (and un-issued if connected).
    pub fn subscribe(
        &mut self,
        topic_key: impl Into<String>,
        destination: impl Into<String>,
        handler: H,
    ) -> (SubscriptionHandle, Vec<SessionAction>) {
        let topic_key = topic_key.into();
        let destination = destination.into();
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;

        let mut actions = Vec::new();
        let replaced = self.registrations.insert(
            topic_key.clone(),
            Registration { id, destination: destination.clone(), handler },
        );

        if self.is_connected() {
            if let Some(old) = replaced {
                actions.push(SessionAction::Unsubscribe { id: old.id });
            }
            actions.push(SessionAction::Subscribe { id, destination });
        }

        (SubscriptionHandle { topic_key, id }, actions)
    }

    /// Dispose of a registration.
    ///
    /// No-op if the handle's registration was already removed or replaced.
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Vec<SessionAction> {
        let current = self.registrations.get(&handle.topic_key).map(|r| r.id);
        if current != Some(handle.id) {
            tracing::debug!(topic = %handle.topic_key, id = %handle.id, "stale disposer ignored");
            return Vec::new();
        }

        self.registrations.remove(&handle.topic_key);
        if self.is_connected() {
            vec![SessionAction::Unsubscribe { id: handle.id }]
        } else {
            Vec::new()
        }
    }

    /// Frame `payload` for `destination`.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotConnected` unless `Connected`. Nothing is queued.
    /// - `SessionError::Protocol` if the payload cannot be framed
    pub fn publish(
        &self,
        destination: &str,
        payload: &Payload,
    ) -> Result<SessionAction, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected { state: self.state });
        }

        let frame = payload.into_frame(destination)?;
        Ok(SessionAction::Send(frame))
    }

    /// Handlers registered for an inbound frame's destination.
    pub fn route(&self, destination: &str) -> Vec<H> {
        self.registrations
            .values()
            .filter(|r| r.destination == destination)
            .map(|r| r.handler.clone())
            .collect()
    }

    /// Transport attempt `attempt` opened.
    ///
    /// Moves to `Connected` and re-issues every registration.
    pub fn handle_transport_opened(&mut self, attempt: u64) -> Vec<SessionAction> {
        if self.attempt_in_flight != Some(attempt) {
            tracing::debug!(attempt, state = ?self.state, "stale transport open ignored");
            // Superseded by disconnect(): the late transport must not linger.
            return if self.attempt_in_flight.is_none() && !self.is_connected() {
                vec![SessionAction::CloseTransport]
            } else {
                Vec::new()
            };
        }

        self.attempt_in_flight = None;
        self.open_attempt = Some(attempt);
        self.retry_at = None;
        self.backoff.reset();

        let mut actions = Vec::new();
        actions.extend(self.transition(ConnectionState::Connected));
        actions.extend(self.registrations.values().map(|r| SessionAction::Subscribe {
            id: r.id,
            destination: r.destination.clone(),
        }));

        tracing::info!(attempt, subscriptions = self.registrations.len(), "connected");
        actions
    }

    /// Transport attempt `attempt` failed before opening.
    pub fn handle_transport_failed(
        &mut self,
        attempt: u64,
        error: &TransportFailure,
        now: E::Instant,
    ) -> Vec<SessionAction> {
        if self.attempt_in_flight != Some(attempt) {
            tracing::debug!(attempt, %error, "stale transport failure ignored");
            return Vec::new();
        }

        self.attempt_in_flight = None;
        self.fail(error, now)
    }

    /// The transport opened by attempt `attempt` dropped.
    ///
    /// While that attempt is still in flight this counts as it failing.
    /// Losses reported for any other attempt are stale and ignored, as is
    /// every loss while `Disconnected` or `Failed`.
    pub fn handle_transport_lost(
        &mut self,
        attempt: u64,
        error: &TransportFailure,
        now: E::Instant,
    ) -> Vec<SessionAction> {
        match self.state {
            ConnectionState::Connected if self.open_attempt == Some(attempt) => {
                self.open_attempt = None;
                self.fail(error, now)
            },
            ConnectionState::Connecting | ConnectionState::Reconnecting
                if self.attempt_in_flight == Some(attempt) =>
            {
                self.attempt_in_flight = None;
                self.fail(error, now)
            },
            _ => {
                tracing::debug!(attempt, state = ?self.state, %error, "stale transport loss ignored");
                Vec::new()
            },
        }
    }

    /// Launch the scheduled retry if it is due.
    ///
    /// Retries are paused while the host application is in the background.
    pub fn tick(&mut self, now: E::Instant) -> Vec<SessionAction> {
        let due = self.retry_at.is_some_and(|at| at <= now);
        if self.state == ConnectionState::Reconnecting
            && self.foreground
            && self.attempt_in_flight.is_none()
            && due
        {
            vec![self.start_attempt()]
        } else {
            Vec::new()
        }
    }

    /// Host application moved to the foreground (`true`) or background.
    ///
    /// Becoming active while `Reconnecting` retries immediately.
    pub fn set_foreground(&mut self, active: bool, now: E::Instant) -> Vec<SessionAction> {
        let was_active = std::mem::replace(&mut self.foreground, active);
        if active && !was_active {
            tracing::info!(state = ?self.state, "application active");
            if self.state == ConnectionState::Reconnecting {
                return self.retry_now(now);
            }
        }
        Vec::new()
    }

    /// Immediate reconnect attempt, bypassing the backoff schedule.
    ///
    /// From `Disconnected` or `Failed` this is `connect()`. No-op while
    /// connected or while an attempt is already in flight.
    pub fn retry_now(&mut self, now: E::Instant) -> Vec<SessionAction> {
        match self.state {
            ConnectionState::Reconnecting if self.attempt_in_flight.is_none() => {
                vec![self.start_attempt()]
            },
            ConnectionState::Disconnected | ConnectionState::Failed => self.connect(now),
            _ => Vec::new(),
        }
    }

    fn fail(&mut self, error: &TransportFailure, now: E::Instant) -> Vec<SessionAction> {
        if !error.is_transient() {
            tracing::warn!(%error, "session rejected");
            self.retry_at = None;
            return self.transition(ConnectionState::Failed).into_iter().collect();
        }

        let delay = self.backoff.next_delay(self.env.random_u64());
        self.retry_at = Some(now + delay);
        tracing::warn!(%error, attempt = self.backoff.attempt(), ?delay, "reconnect scheduled");

        self.transition(ConnectionState::Reconnecting).into_iter().collect()
    }

    fn start_attempt(&mut self) -> SessionAction {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        self.attempt_in_flight = Some(attempt);
        self.retry_at = None;

        tracing::debug!(attempt, state = ?self.state, "opening transport");
        SessionAction::OpenTransport { attempt }
    }

    fn transition(&mut self, next: ConnectionState) -> Option<SessionAction> {
        if self.state == next {
            return None;
        }

        debug_assert!(
            is_valid_transition(self.state, next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::info!(from = ?self.state, to = ?next, "connection state changed");
        self.state = next;
        Some(SessionAction::StateChanged(next))
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use kinship_proto::{TypingSignal, topics};

    use super::*;

    #[derive(Clone)]
    struct TestEnv;

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn unix_millis(&self) -> u64 {
            1_700_000_000_000
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            // Deterministic for tests
            buffer.fill(0);
        }
    }

    fn manager() -> SessionManager<TestEnv, &'static str> {
        SessionManager::new(TestEnv, SessionConfig::default())
    }

    fn opened(session: &mut SessionManager<TestEnv, &'static str>, t0: Instant) -> Vec<SessionAction> {
        let actions = session.connect(t0);
        let Some(SessionAction::OpenTransport { attempt }) = actions.last().cloned() else {
            panic!("expected OpenTransport, got {actions:?}");
        };
        session.handle_transport_opened(attempt)
    }

    fn typing() -> Payload {
        Payload::Typing(TypingSignal {
            conversation_id: "c1".into(),
            sender_id: "me".into(),
            is_typing: true,
        })
    }

    #[test]
    fn connect_lifecycle() {
        let mut session = manager();
        let t0 = Instant::now();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        let actions = session.connect(t0);
        assert_eq!(
            actions,
            vec![
                SessionAction::StateChanged(ConnectionState::Connecting),
                SessionAction::OpenTransport { attempt: 0 },
            ]
        );

        // Idempotent while connecting
        assert!(session.connect(t0).is_empty());

        let actions = session.handle_transport_opened(0);
        assert_eq!(actions, vec![SessionAction::StateChanged(ConnectionState::Connected)]);
        assert!(session.is_connected());
        assert!(session.connect(t0).is_empty());

        let actions = session.disconnect();
        assert_eq!(
            actions,
            vec![
                SessionAction::CloseTransport,
                SessionAction::StateChanged(ConnectionState::Disconnected),
            ]
        );
        assert!(session.disconnect().is_empty());
    }

    #[test]
    fn subscriptions_queue_until_connected_and_replay() {
        let mut session = manager();
        let t0 = Instant::now();

        let (_, actions) = session.subscribe("conversation:c1", "/topic/conversations/c1", "conv");
        assert!(actions.is_empty());

        let actions = opened(&mut session, t0);
        assert!(actions.contains(&SessionAction::Subscribe {
            id: SubscriptionId(0),
            destination: "/topic/conversations/c1".into(),
        }));

        // Drop and come back: subscription replayed with the same id
        session.handle_transport_lost(0, &TransportFailure::Lost("reset".into()), t0);
        assert_eq!(session.state(), ConnectionState::Reconnecting);
        let attempt = match session.retry_now(t0).as_slice() {
            [SessionAction::OpenTransport { attempt }] => *attempt,
            other => panic!("expected OpenTransport, got {other:?}"),
        };
        let actions = session.handle_transport_opened(attempt);
        assert_eq!(
            actions,
            vec![
                SessionAction::StateChanged(ConnectionState::Connected),
                SessionAction::Subscribe {
                    id: SubscriptionId(0),
                    destination: "/topic/conversations/c1".into(),
                },
            ]
        );
    }

    #[test]
    fn resubscribe_replaces_registration() {
        let mut session = manager();
        let t0 = Instant::now();
        opened(&mut session, t0);

        let (first, _) = session.subscribe("presence", topics::PRESENCE_DESTINATION, "a");
        let (second, actions) = session.subscribe("presence", topics::PRESENCE_DESTINATION, "b");
        assert_eq!(
            actions,
            vec![
                SessionAction::Unsubscribe { id: first.id() },
                SessionAction::Subscribe {
                    id: second.id(),
                    destination: topics::PRESENCE_DESTINATION.into(),
                },
            ]
        );
        assert_eq!(session.subscription_count(), 1);
        assert_eq!(session.route(topics::PRESENCE_DESTINATION), vec!["b"]);

        // Stale disposer leaves the replacement alone
        assert!(session.unsubscribe(&first).is_empty());
        assert!(session.has_subscription("presence"));

        assert_eq!(session.unsubscribe(&second), vec![SessionAction::Unsubscribe {
            id: second.id()
        }]);
        assert!(!session.has_subscription("presence"));
        assert!(session.route(topics::PRESENCE_DESTINATION).is_empty());
    }

    #[test]
    fn unsubscribe_while_disconnected_emits_nothing() {
        let mut session = manager();
        let (handle, _) = session.subscribe("notifications", "/user/me/queue/notifications", "n");
        assert!(session.unsubscribe(&handle).is_empty());
        assert_eq!(session.subscription_count(), 0);
    }

    #[test]
    fn publish_requires_connection() {
        let mut session = manager();
        let t0 = Instant::now();

        let err = session.publish(topics::TYPING_DESTINATION, &typing()).unwrap_err();
        assert_eq!(err, SessionError::NotConnected { state: ConnectionState::Disconnected });

        opened(&mut session, t0);
        let action = session.publish(topics::TYPING_DESTINATION, &typing()).unwrap();
        let SessionAction::Send(frame) = action else {
            panic!("expected Send, got {action:?}");
        };
        assert_eq!(frame.destination, topics::TYPING_DESTINATION);
        assert_eq!(Payload::from_frame(&frame).unwrap(), typing());
    }

    #[test]
    fn failed_attempt_backs_off_then_retries_on_tick() {
        let mut session = manager();
        let t0 = Instant::now();
        session.connect(t0);

        let actions =
            session.handle_transport_failed(0, &TransportFailure::Unreachable("refused".into()), t0);
        assert_eq!(actions, vec![SessionAction::StateChanged(ConnectionState::Reconnecting)]);

        // random_bytes yields zero, so the delay is the full ceiling
        assert_eq!(session.retry_at(), Some(t0 + Duration::from_secs(1)));
        assert!(session.tick(t0 + Duration::from_millis(999)).is_empty());
        assert_eq!(session.tick(t0 + Duration::from_secs(1)), vec![SessionAction::OpenTransport {
            attempt: 1
        }]);

        // Second failure doubles the delay and stays in Reconnecting
        let t1 = t0 + Duration::from_secs(1);
        let actions =
            session.handle_transport_failed(1, &TransportFailure::Unreachable("refused".into()), t1);
        assert!(actions.is_empty());
        assert_eq!(session.state(), ConnectionState::Reconnecting);
        assert_eq!(session.retry_at(), Some(t1 + Duration::from_secs(2)));
    }

    #[test]
    fn rejection_moves_to_failed_until_connect() {
        let mut session = manager();
        let t0 = Instant::now();
        session.connect(t0);

        let actions =
            session.handle_transport_failed(0, &TransportFailure::Rejected("bad token".into()), t0);
        assert_eq!(actions, vec![SessionAction::StateChanged(ConnectionState::Failed)]);
        assert_eq!(session.retry_at(), None);
        assert!(session.tick(t0 + Duration::from_secs(60)).is_empty());

        let actions = session.connect(t0);
        assert_eq!(
            actions,
            vec![
                SessionAction::StateChanged(ConnectionState::Connecting),
                SessionAction::OpenTransport { attempt: 1 },
            ]
        );
    }

    #[test]
    fn stale_attempt_outcomes_are_ignored() {
        let mut session = manager();
        let t0 = Instant::now();
        session.connect(t0);
        session.disconnect();
        session.connect(t0);

        // Attempt 0 was superseded by attempt 1
        assert!(
            session
                .handle_transport_failed(0, &TransportFailure::Unreachable("late".into()), t0)
                .is_empty()
        );
        assert!(session.handle_transport_opened(0).is_empty());
        assert_eq!(session.state(), ConnectionState::Connecting);

        let actions = session.handle_transport_opened(1);
        assert_eq!(actions, vec![SessionAction::StateChanged(ConnectionState::Connected)]);
    }

    #[test]
    fn late_open_after_disconnect_is_closed() {
        let mut session = manager();
        let t0 = Instant::now();
        session.connect(t0);
        session.disconnect();

        assert_eq!(session.handle_transport_opened(0), vec![SessionAction::CloseTransport]);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn background_pauses_retries_and_foreground_retries_now() {
        let mut session = manager();
        let t0 = Instant::now();
        opened(&mut session, t0);

        assert!(session.set_foreground(false, t0).is_empty());
        session.handle_transport_lost(0, &TransportFailure::Lost("reset".into()), t0);
        assert_eq!(session.state(), ConnectionState::Reconnecting);
        assert!(session.tick(t0 + Duration::from_secs(120)).is_empty());

        let actions = session.set_foreground(true, t0 + Duration::from_secs(120));
        assert_eq!(actions, vec![SessionAction::OpenTransport { attempt: 1 }]);
    }

    #[test]
    fn retry_now_skips_backoff() {
        let mut session = manager();
        let t0 = Instant::now();
        opened(&mut session, t0);
        session.handle_transport_lost(0, &TransportFailure::Lost("reset".into()), t0);

        assert_eq!(session.retry_now(t0), vec![SessionAction::OpenTransport { attempt: 1 }]);
        // Already in flight
        assert!(session.retry_now(t0).is_empty());
        assert_eq!(session.retry_at(), None);
    }

    #[test]
    fn loss_of_a_superseded_transport_is_ignored() {
        let mut session = manager();
        let t0 = Instant::now();
        opened(&mut session, t0);
        session.handle_transport_lost(0, &TransportFailure::Lost("reset".into()), t0);
        let actions = session.retry_now(t0);
        assert_eq!(actions, vec![SessionAction::OpenTransport { attempt: 1 }]);

        // Late close of attempt 0 while attempt 1 is connecting
        assert!(session.handle_transport_lost(0, &TransportFailure::Lost("late".into()), t0).is_empty());
        assert_eq!(session.attempt_in_flight(), Some(1));
        assert_eq!(session.state(), ConnectionState::Reconnecting);

        session.handle_transport_opened(1);
        assert_eq!(session.open_attempt(), Some(1));

        // Late close of attempt 0 after attempt 1 opened
        assert!(session.handle_transport_lost(0, &TransportFailure::Lost("late".into()), t0).is_empty());
        assert_eq!(session.state(), ConnectionState::Connected);

        let actions = session.handle_transport_lost(1, &TransportFailure::Lost("reset".into()), t0);
        assert_eq!(actions, vec![SessionAction::StateChanged(ConnectionState::Reconnecting)]);
        assert_eq!(session.open_attempt(), None);
    }

    #[test]
    fn loss_while_disconnected_is_ignored() {
        let mut session = manager();
        let t0 = Instant::now();
        assert!(session.handle_transport_lost(0, &TransportFailure::Lost("x".into()), t0).is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn transition_table() {
        use ConnectionState::{Connected, Connecting, Disconnected, Failed, Reconnecting};

        assert!(is_valid_transition(Disconnected, Connecting));
        assert!(is_valid_transition(Reconnecting, Connected));
        assert!(is_valid_transition(Failed, Connecting));
        assert!(!is_valid_transition(Reconnecting, Connecting));
        assert!(!is_valid_transition(Disconnected, Connected));
        assert!(!is_valid_transition(Failed, Reconnecting));
        assert!(!is_valid_transition(Disconnected, Disconnected));
    }
}
