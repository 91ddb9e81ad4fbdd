//! Property-based tests for the conversation synchronizer.
//!
//! Random interleavings of sends, acknowledgements, echoes, live messages,
//! status events, connection drops and retries, with every server event
//! possibly delivered twice.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use kinship_core::{
    Conversation, ConversationConfig, ConversationParams, Environment, HistoryPage, MessageStatus,
    SessionAction, SessionConfig, SessionManager, SyncAction,
};
use kinship_proto::{DeliveryStatus, Payload, SendAck, ServerMessage, StatusUpdate};
use proptest::prelude::*;

#[derive(Clone)]
struct TestEnv;

impl Environment for TestEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        0
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(7);
    }
}

#[derive(Debug, Clone)]
enum Op {
    Send,
    /// Acknowledge the n-th sent temp id
    Ack { nth: usize, twice: bool },
    /// Echo the n-th sent temp id on the live topic
    Echo { nth: usize, twice: bool },
    Incoming { id: u8, twice: bool },
    Status { id: u8, status: DeliveryStatus },
    Drop,
    Reconnect,
    /// Retry the n-th failed message
    Retry { nth: usize },
}

fn status_strategy() -> impl Strategy<Value = DeliveryStatus> {
    prop_oneof![
        Just(DeliveryStatus::Sent),
        Just(DeliveryStatus::Delivered),
        Just(DeliveryStatus::Read),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Send),
        3 => (0usize..8, any::<bool>()).prop_map(|(nth, twice)| Op::Ack { nth, twice }),
        1 => (0usize..8, any::<bool>()).prop_map(|(nth, twice)| Op::Echo { nth, twice }),
        3 => (0u8..16, any::<bool>()).prop_map(|(id, twice)| Op::Incoming { id, twice }),
        2 => (0u8..32, status_strategy()).prop_map(|(id, status)| Op::Status { id, status }),
        1 => Just(Op::Drop),
        1 => Just(Op::Reconnect),
        1 => (0usize..4).prop_map(|nth| Op::Retry { nth }),
    ]
}

fn rank(status: MessageStatus) -> u8 {
    match status {
        MessageStatus::Sending => 0,
        MessageStatus::Sent => 1,
        MessageStatus::Delivered => 2,
        MessageStatus::Read => 3,
        MessageStatus::Failed => 4,
    }
}

/// Allowed status moves for one entry between two observations.
fn allowed(before: MessageStatus, after: MessageStatus, retried: bool) -> bool {
    if before == after {
        return true;
    }
    match (before, after) {
        // Retry restarts; a late confirmation resolves a failure
        (MessageStatus::Failed, MessageStatus::Sending) => retried,
        (MessageStatus::Failed, next) => rank(next) >= rank(MessageStatus::Sent),
        (_, MessageStatus::Failed) => {
            matches!(before, MessageStatus::Sending | MessageStatus::Sent)
        },
        (MessageStatus::Read, _) => false,
        (_, next) => rank(next) > rank(before),
    }
}

fn server_message(id: String, sender: &str, temp: Option<String>) -> ServerMessage {
    ServerMessage {
        id,
        conversation_id: "c1".into(),
        sender_id: sender.into(),
        text: "x".into(),
        timestamp: 0,
        status: DeliveryStatus::Sent,
        client_temp_id: temp,
    }
}

proptest! {
    #[test]
    fn prop_window_stays_consistent(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let mut session: SessionManager<TestEnv, ()> =
            SessionManager::new(TestEnv, SessionConfig::default());
        session.connect(Instant::now());
        session.handle_transport_opened(0);

        let params = ConversationParams {
            conversation_id: "c1".into(),
            me: "me".into(),
            counterpart: "them".into(),
        };
        let (mut conversation, _) =
            Conversation::open(TestEnv, params, ConversationConfig::default(), &mut session, ());
        conversation.handle_history_page(0, HistoryPage::default());

        let now = Instant::now();
        let mut sent: Vec<String> = Vec::new();
        let mut next_server_id = 100u32;
        let mut assigned: HashMap<String, String> = HashMap::new();

        for op in ops {
            // Snapshot statuses keyed by server id or temp id
            let before: HashMap<String, MessageStatus> = conversation
                .window()
                .iter()
                .filter_map(|m| m.id.clone().or_else(|| m.client_temp_id.clone()).map(|k| (k, m.status)))
                .collect();
            let before_len = conversation.window().len();
            let mut retried = None;

            match op {
                Op::Send => {
                    let (temp, _) = conversation.send_message("hello", &session).unwrap();
                    sent.push(temp);
                },
                Op::Ack { nth, twice } | Op::Echo { nth, twice } => {
                    let Some(temp) = sent.get(nth).cloned() else { continue };
                    let id = assigned
                        .entry(temp.clone())
                        .or_insert_with(|| {
                            next_server_id += 1;
                            format!("m-{next_server_id}")
                        })
                        .clone();
                    let payload = if matches!(op, Op::Ack { .. }) {
                        Payload::Ack(SendAck {
                            conversation_id: "c1".into(),
                            client_temp_id: temp.clone(),
                            message_id: id,
                            timestamp: 0,
                        })
                    } else {
                        Payload::Message(server_message(id, "me", Some(temp.clone())))
                    };
                    let times = if twice { 2 } else { 1 };
                    for _ in 0..times {
                        conversation.handle_payload(&payload, now);
                    }
                },
                Op::Incoming { id, twice } => {
                    let payload = Payload::Message(server_message(format!("in-{id}"), "them", None));
                    let times = if twice { 2 } else { 1 };
                    for _ in 0..times {
                        conversation.handle_payload(&payload, now);
                    }
                },
                Op::Status { id, status } => {
                    let message_id = if id < 16 { format!("in-{id}") } else { format!("m-{}", 100 + u32::from(id)) };
                    let payload = Payload::Status(StatusUpdate {
                        conversation_id: "c1".into(),
                        message_ids: vec![message_id],
                        status,
                    });
                    conversation.handle_payload(&payload, now);
                },
                Op::Drop => {
                    if let Some(attempt) = session.open_attempt().or(session.attempt_in_flight()) {
                        session.handle_transport_lost(attempt, &kinship_core::TransportFailure::Lost("x".into()), now);
                    }
                    conversation.handle_connection_lost();
                },
                Op::Reconnect => {
                    let actions = session.retry_now(now);
                    if let Some(SessionAction::OpenTransport { attempt }) = actions.first() {
                        session.handle_transport_opened(*attempt);
                        for action in conversation.handle_reconnected() {
                            if let SyncAction::FetchHistory(request) = action {
                                conversation.handle_history_page(request.token, HistoryPage::default());
                            }
                        }
                    }
                },
                Op::Retry { nth } => {
                    let failed: Vec<String> = conversation
                        .window()
                        .iter()
                        .filter(|m| m.status == MessageStatus::Failed && m.id.is_none())
                        .filter_map(|m| m.client_temp_id.clone())
                        .collect();
                    if let Some(temp) = failed.get(nth) {
                        let position = conversation.window().position_of_temp(temp);
                        if let Ok((new_temp, _)) = conversation.retry_message(temp, &session) {
                            prop_assert_eq!(conversation.window().position_of_temp(&new_temp), position);
                            retried = Some(new_temp.clone());
                            sent.push(new_temp);
                        }
                    }
                },
            }

            let window = conversation.window();

            // Never shrinks, never duplicates a server id
            prop_assert!(window.len() >= before_len);
            let ids: Vec<_> = window.iter().filter_map(|m| m.id.clone()).collect();
            let unique: HashSet<_> = ids.iter().collect();
            prop_assert_eq!(ids.len(), unique.len());

            // Statuses only move along allowed edges
            for message in window.iter() {
                let key = message.id.clone().or_else(|| message.client_temp_id.clone());
                let Some(key) = key else { continue };
                let previous = before.get(&key).copied().or_else(|| {
                    // Confirmed since the snapshot: look up by temp id
                    message.client_temp_id.as_ref().and_then(|t| before.get(t).copied())
                });
                if let Some(previous) = previous {
                    let was_retried = retried.as_deref() == message.client_temp_id.as_deref();
                    prop_assert!(
                        allowed(previous, message.status, was_retried),
                        "{:?} -> {:?} for {}", previous, message.status, key
                    );
                }
            }
        }
    }
}
