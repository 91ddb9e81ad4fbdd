//! Two-party simulated world.
//!
//! A [`World`] wires one [`Client`] per participant to a shared
//! [`LoopbackServer`], all in one conversation, on tokio's paused clock.
//! [`World::run_for`] interleaves the clients round-robin and checks the
//! standard invariants after every round, so any test driving a `World` is
//! also an invariant test.
//!
//! [`Operation`] is the vocabulary for model-based tests: each one is a user
//! action, a network fault, or the passage of time.

use std::{collections::BTreeMap, time::Duration};

use arbitrary::Arbitrary;
use kinship_client::{Client, ClientConfig};
use kinship_core::{ConnectionState, Listener, MessageStatus, Visibility};
use kinship_proto::{ClientTempId, ConversationId};
use tokio::time::Instant;

use crate::{
    SimEnv, SimHistory, SimTransport,
    invariants::{ClientSnapshot, InvariantRegistry, SystemSnapshot, WindowSnapshot},
    sim_server::{Faults, LoopbackServer},
};

/// Client type used by the simulation.
pub type SimClient = Client<SimTransport, SimHistory, SimEnv>;

/// Conversation shared by the participants.
pub const CONVERSATION: &str = "c1";

/// Participant user ids, by index.
pub const USERS: [&str; 2] = ["alice", "bob"];

/// Virtual time each client may wait for an event within one round.
const ROUND_STEP: Duration = Duration::from_millis(10);

/// Index of a participant (taken modulo the participant count).
pub type Participant = u8;

/// Actions applied to a [`World`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Send a message.
    Send {
        /// Sender
        who: Participant,
    },
    /// Keystroke (`true`) or cleared input.
    Typing {
        /// Typist
        who: Participant,
        /// Keystroke or clear
        active: bool,
    },
    /// Mark the conversation read while it is visible.
    MarkRead {
        /// Reader
        who: Participant,
    },
    /// Scroll to the top of the window.
    LoadMore {
        /// Reader
        who: Participant,
    },
    /// Retry the oldest failed message, if any.
    Retry {
        /// Sender
        who: Participant,
    },
    /// Server drops the participant's connections.
    Drop {
        /// Dropped participant
        who: Participant,
    },
    /// Connection banner tap.
    RetryNow {
        /// Participant
        who: Participant,
    },
    /// App moved to the background or foreground.
    Foreground {
        /// Participant
        who: Participant,
        /// Foreground (`true`) or background
        active: bool,
    },
    /// Refuse the next connection attempt.
    RefuseNextConnect,
    /// Toggle acknowledgement loss.
    DropAcks(bool),
    /// Toggle echo loss.
    SuppressEcho(bool),
    /// Let virtual time pass.
    Advance {
        /// Milliseconds of virtual time, scaled by 10
        centis: u8,
    },
}

struct Member {
    client: SimClient,
    states: Listener<ConnectionState>,
    state_history: Vec<ConnectionState>,
    previous: BTreeMap<ConversationId, WindowSnapshot>,
    sent: u32,
}

/// Simulated participants sharing one conversation.
pub struct World {
    server: LoopbackServer,
    members: Vec<Member>,
    invariants: InvariantRegistry,
}

impl World {
    /// Two connected participants with the conversation open.
    pub async fn new(seed: u64) -> Self {
        Self::with_config(seed, |_| {}).await
    }

    /// Like [`Self::new`], adjusting each client's configuration first.
    pub async fn with_config(seed: u64, configure: impl Fn(&mut ClientConfig)) -> Self {
        Self::with_server(LoopbackServer::new(), seed, configure).await
    }

    /// Like [`Self::with_config`] over an existing server, for worlds that
    /// start with seeded history.
    pub async fn with_server(
        server: LoopbackServer,
        seed: u64,
        configure: impl Fn(&mut ClientConfig),
    ) -> Self {
        let env = SimEnv::with_seed(seed);
        let members = USERS
            .iter()
            .enumerate()
            .map(|(index, user)| {
                let mut config = ClientConfig::new(*user);
                configure(&mut config);
                let counterpart = USERS[(index + 1) % USERS.len()];

                let mut client =
                    Client::new(server.transport(*user), server.history(), env.clone(), config);
                let states = client.on_connection_state();
                client.open_conversation(CONVERSATION, counterpart);
                client.connect();
                Member {
                    client,
                    states,
                    state_history: Vec::new(),
                    previous: BTreeMap::new(),
                    sent: 0,
                }
            })
            .collect();

        let mut world = Self { server, members, invariants: InvariantRegistry::standard() };
        world.run_for(Duration::from_millis(100)).await;
        world
    }

    /// The shared server.
    pub fn server(&self) -> &LoopbackServer {
        &self.server
    }

    /// Participant `who`.
    pub fn client(&self, who: Participant) -> &SimClient {
        &self.members[self.index(who)].client
    }

    /// Participant `who`, mutably.
    pub fn client_mut(&mut self, who: Participant) -> &mut SimClient {
        let index = self.index(who);
        &mut self.members[index].client
    }

    /// Current window of participant `who`.
    pub fn window(&self, who: Participant) -> WindowSnapshot {
        self.client(who)
            .conversation(CONVERSATION)
            .map(|c| WindowSnapshot::of(c.window()))
            .unwrap_or_default()
    }

    /// Apply one operation, then let the clients process its effects.
    pub async fn apply(&mut self, operation: Operation) {
        tracing::debug!(?operation, "apply");
        match operation {
            Operation::Send { who } => {
                let index = self.index(who);
                let member = &mut self.members[index];
                member.sent += 1;
                let text = format!("{} #{}", USERS[index], member.sent);
                // Rejections (not connected, empty) are part of the model.
                let _ = member.client.send_message(CONVERSATION, &text);
            },
            Operation::Typing { who, active } => {
                let _ = self.client_mut(who).send_typing_indicator(CONVERSATION, active);
            },
            Operation::MarkRead { who } => {
                let visible = Visibility { focused: true, foregrounded: true };
                let _ = self.client_mut(who).mark_as_read(CONVERSATION, visible);
            },
            Operation::LoadMore { who } => {
                let _ = self.client_mut(who).load_more(CONVERSATION);
            },
            Operation::Retry { who } => {
                if let Some(temp_id) = self.oldest_failed(who) {
                    let _ = self.client_mut(who).retry_message(CONVERSATION, &temp_id);
                }
            },
            Operation::Drop { who } => {
                let user = USERS[self.index(who)];
                self.server.drop_user(user);
            },
            Operation::RetryNow { who } => self.client_mut(who).retry_now(),
            Operation::Foreground { who, active } => self.client_mut(who).set_foreground(active),
            Operation::RefuseNextConnect => {
                self.update_faults(|f| f.refuse_connects += 1);
            },
            Operation::DropAcks(enabled) => self.update_faults(|f| f.drop_acks = enabled),
            Operation::SuppressEcho(enabled) => self.update_faults(|f| f.suppress_echo = enabled),
            Operation::Advance { centis } => {
                self.run_for(Duration::from_millis(u64::from(centis) * 10)).await;
            },
        }
        self.run_for(ROUND_STEP * 5).await;
    }

    /// Interleave the clients for `duration` of virtual time, checking
    /// invariants after every round.
    pub async fn run_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            for member in &mut self.members {
                // Elapsed only means nothing was ready within the step.
                let _ = tokio::time::timeout(ROUND_STEP, member.client.pump()).await;
            }
            self.check("during run");
            if Instant::now() >= deadline {
                break;
            }
        }
    }

    /// Clear faults, force one reconnect per participant and run until both
    /// are connected and caught up.
    ///
    /// The forced reconnect makes every participant fetch the newest page, so
    /// frames lost to `SuppressEcho` or `DropAcks` are recovered.
    pub async fn heal(&mut self) {
        self.server.set_faults(Faults::default());
        for user in USERS {
            self.server.drop_user(user);
        }
        self.run_for(ROUND_STEP * 5).await;
        for member in &mut self.members {
            member.client.set_foreground(true);
            member.client.retry_now();
        }
        self.run_for(Duration::from_secs(2)).await;
    }

    /// Capture every participant and assert the standard invariants.
    pub fn check(&mut self, context: &str) {
        let mut clients = Vec::with_capacity(self.members.len());
        for member in &mut self.members {
            member.state_history.extend(member.states.drain());
            let snapshot = ClientSnapshot::capture(&member.client, &self.server)
                .with_state_history(member.state_history.clone())
                .with_previous(std::mem::take(&mut member.previous));
            member.previous = snapshot.conversations.clone();
            clients.push(snapshot);
        }
        self.invariants.assert_all(&SystemSnapshot::from_clients(clients), context);
    }

    fn oldest_failed(&self, who: Participant) -> Option<ClientTempId> {
        self.window(who)
            .entries
            .into_iter()
            .find(|e| e.status == MessageStatus::Failed)
            .and_then(|e| e.client_temp_id)
    }

    fn update_faults(&self, update: impl FnOnce(&mut Faults)) {
        let mut faults = self.server.faults();
        update(&mut faults);
        self.server.set_faults(faults);
    }

    fn index(&self, who: Participant) -> usize {
        usize::from(who) % self.members.len()
    }
}
