//! End-to-end scenarios on the simulated world.
//!
//! Every scenario also runs the standard invariant registry after each
//! scheduling round (see `World::run_for`).

use std::time::Duration;

use kinship_core::{ConnectionState, MessageStatus, SenderRole};
use kinship_harness::{CONVERSATION, Faults, LoopbackServer, Operation, Transcript, World};

const ALICE: u8 = 0;
const BOB: u8 = 1;

#[tokio::test(start_paused = true)]
async fn message_confirms_in_place_and_is_read() {
    let mut world = World::new(1).await;

    world.apply(Operation::Send { who: ALICE }).await;

    let alice = world.window(ALICE);
    assert_eq!(alice.entries.len(), 1);
    let sent = &alice.entries[0];
    assert!(sent.id.is_some());
    assert_eq!(sent.status, MessageStatus::Delivered);

    let bob = world.window(BOB);
    assert_eq!(bob.entries.len(), 1);
    assert_eq!(bob.entries[0].id, sent.id);
    assert_eq!(bob.entries[0].sender, SenderRole::Them);
    assert_eq!(world.client(BOB).conversation(CONVERSATION).unwrap().unread_count(), 1);

    world.apply(Operation::MarkRead { who: BOB }).await;
    assert_eq!(world.client(BOB).conversation(CONVERSATION).unwrap().unread_count(), 0);

    let window = world.client(ALICE).conversation(CONVERSATION).unwrap().window();
    insta::assert_json_snapshot!(Transcript::of(window), @r#"
    {
      "lines": [
        {
          "sender": "me",
          "text": "alice #1",
          "status": "read",
          "confirmed": true
        }
      ]
    }
    "#);
}

#[tokio::test(start_paused = true)]
async fn typing_indicator_ends_after_quiet_period() {
    let mut world = World::new(2).await;

    world.apply(Operation::Typing { who: ALICE, active: true }).await;
    assert!(world.client(BOB).is_other_user_typing(CONVERSATION));
    assert!(!world.client(ALICE).is_other_user_typing(CONVERSATION));

    world.run_for(Duration::from_secs(3)).await;
    assert!(!world.client(BOB).is_other_user_typing(CONVERSATION));
}

#[tokio::test(start_paused = true)]
async fn sending_a_message_clears_the_typing_indicator() {
    let mut world = World::new(3).await;

    world.apply(Operation::Typing { who: ALICE, active: true }).await;
    assert!(world.client(BOB).is_other_user_typing(CONVERSATION));

    world.apply(Operation::Send { who: ALICE }).await;
    assert!(!world.client(BOB).is_other_user_typing(CONVERSATION));
}

#[tokio::test(start_paused = true)]
async fn send_while_reconnecting_fails_and_retry_succeeds() {
    let mut world = World::new(4).await;

    world.apply(Operation::Drop { who: ALICE }).await;
    assert_eq!(world.client(ALICE).connection_state(), ConnectionState::Reconnecting);

    world.apply(Operation::Send { who: ALICE }).await;
    assert_eq!(world.window(ALICE).entries[0].status, MessageStatus::Failed);

    world.run_for(Duration::from_secs(2)).await;
    assert!(world.client(ALICE).is_connected());
    assert_eq!(world.server().subscriptions("alice").len(), 4);
    assert_eq!(world.window(ALICE).entries[0].status, MessageStatus::Failed);

    world.apply(Operation::Retry { who: ALICE }).await;
    let alice = world.window(ALICE);
    assert_eq!(alice.entries.len(), 1);
    assert!(alice.entries[0].id.is_some());
    assert_eq!(world.window(BOB).entries.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_send_is_confirmed_by_catch_up() {
    let mut world = World::new(5).await;
    world.apply(Operation::DropAcks(true)).await;
    world.apply(Operation::SuppressEcho(true)).await;

    world.apply(Operation::Send { who: ALICE }).await;
    assert_eq!(world.window(ALICE).entries[0].status, MessageStatus::Sending);

    world.apply(Operation::Drop { who: ALICE }).await;
    assert_eq!(world.window(ALICE).entries[0].status, MessageStatus::Failed);

    world.server().set_faults(Faults::default());
    world.run_for(Duration::from_secs(2)).await;

    let alice = world.window(ALICE);
    assert_eq!(alice.entries.len(), 1);
    let stored = world.server().messages(CONVERSATION);
    assert_eq!(alice.entries[0].id.as_deref(), Some(stored[0].id.as_str()));
    assert_eq!(alice.entries[0].status, MessageStatus::Delivered);
}

#[tokio::test(start_paused = true)]
async fn reconnect_catches_up_on_missed_messages() {
    let mut world = World::new(6).await;

    world.apply(Operation::Drop { who: BOB }).await;
    for _ in 0..3 {
        world.apply(Operation::Send { who: ALICE }).await;
    }
    assert!(world.window(BOB).entries.is_empty());

    world.run_for(Duration::from_secs(2)).await;
    assert!(world.client(BOB).is_connected());

    let bob = world.window(BOB);
    let server_ids: Vec<_> =
        world.server().messages(CONVERSATION).into_iter().map(|m| Some(m.id)).collect();
    let bob_ids: Vec<_> = bob.entries.iter().map(|e| e.id.clone()).collect();
    assert_eq!(bob_ids, server_ids);
}

#[tokio::test(start_paused = true)]
async fn history_pages_load_oldest_last() {
    let server = LoopbackServer::new();
    for i in 0..75 {
        server.seed_message(CONVERSATION, "bob", &format!("old {i}"));
    }
    let mut world = World::with_server(server, 7, |_| {}).await;

    assert_eq!(world.window(ALICE).entries.len(), 30);
    assert!(world.client(ALICE).conversation(CONVERSATION).unwrap().has_more_messages());

    world.apply(Operation::LoadMore { who: ALICE }).await;
    assert_eq!(world.window(ALICE).entries.len(), 60);

    world.apply(Operation::LoadMore { who: ALICE }).await;
    let conversation = world.client(ALICE).conversation(CONVERSATION).unwrap();
    assert_eq!(conversation.window().len(), 75);
    assert!(!conversation.has_more_messages());

    let ids: Vec<_> = world.window(ALICE).entries.into_iter().filter_map(|e| e.id).collect();
    let expected: Vec<_> =
        world.server().messages(CONVERSATION).into_iter().map(|m| m.id).collect();
    assert_eq!(ids, expected);

    world.apply(Operation::LoadMore { who: ALICE }).await;
    assert_eq!(world.window(ALICE).entries.len(), 75);
}

#[tokio::test(start_paused = true)]
async fn presence_follows_counterpart_connection() {
    let mut world = World::new(8).await;
    assert!(world.client(ALICE).is_other_user_online(CONVERSATION));

    world.apply(Operation::Drop { who: BOB }).await;
    assert!(!world.client(ALICE).is_other_user_online(CONVERSATION));

    world.run_for(Duration::from_secs(2)).await;
    assert!(world.client(ALICE).is_other_user_online(CONVERSATION));
}

#[tokio::test(start_paused = true)]
async fn rejected_session_stays_failed_until_connect() {
    let mut world = World::new(9).await;
    world.server().set_faults(Faults { reject_connects: true, ..Faults::default() });

    world.apply(Operation::Drop { who: ALICE }).await;
    world.run_for(Duration::from_secs(5)).await;
    assert_eq!(world.client(ALICE).connection_state(), ConnectionState::Failed);
    assert_eq!(world.server().connection_count("alice"), 0);

    world.run_for(Duration::from_secs(30)).await;
    assert_eq!(world.client(ALICE).connection_state(), ConnectionState::Failed);

    world.server().set_faults(Faults::default());
    world.client_mut(ALICE).connect();
    world.run_for(Duration::from_millis(100)).await;
    assert!(world.client(ALICE).is_connected());
}

#[tokio::test(start_paused = true)]
async fn background_pauses_reconnect() {
    let mut world = World::new(10).await;

    world.apply(Operation::Foreground { who: ALICE, active: false }).await;
    world.apply(Operation::Drop { who: ALICE }).await;
    world.run_for(Duration::from_secs(10)).await;
    assert_eq!(world.client(ALICE).connection_state(), ConnectionState::Reconnecting);
    assert_eq!(world.server().connection_count("alice"), 0);

    world.apply(Operation::Foreground { who: ALICE, active: true }).await;
    assert!(world.client(ALICE).is_connected());
}

#[tokio::test(start_paused = true)]
async fn refused_attempts_back_off_until_accepted() {
    let mut world = World::new(11).await;
    world.server().set_faults(Faults { refuse_connects: 3, ..Faults::default() });

    world.apply(Operation::Drop { who: ALICE }).await;
    world.run_for(Duration::from_millis(300)).await;
    assert_eq!(world.server().faults().refuse_connects, 3);

    world.run_for(Duration::from_secs(20)).await;
    assert!(world.client(ALICE).is_connected());
    assert_eq!(world.server().faults().refuse_connects, 0);
}

#[tokio::test(start_paused = true)]
async fn retry_now_skips_the_backoff() {
    let mut world = World::new(12).await;
    world.server().set_faults(Faults { refuse_connects: 1, ..Faults::default() });

    world.apply(Operation::Drop { who: ALICE }).await;
    world.apply(Operation::RetryNow { who: ALICE }).await;
    assert_eq!(world.client(ALICE).connection_state(), ConnectionState::Reconnecting);

    world.apply(Operation::RetryNow { who: ALICE }).await;
    assert!(world.client(ALICE).is_connected());
}
