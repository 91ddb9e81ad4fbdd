//! Topic and destination naming.
//!
//! Subscriptions are keyed by a *topic key* (at most one live subscription per
//! key) and addressed by a *destination* string on the transport. Outgoing
//! actions are published to fixed application destinations.
//!
//! | Topic | Key | Destination |
//! |---|---|---|
//! | conversation live events | `conversation:{cid}` | `/topic/conversations/{cid}` |
//! | send acks and receipts | `receipts:{cid}` | `/user/{uid}/queue/conversations/{cid}/receipts` |
//! | personal notifications | `notifications` | `/user/{uid}/queue/notifications` |
//! | global presence | `presence` | `/topic/presence` |

use crate::{ConversationId, UserId};

/// Destination for outgoing message sends.
pub const SEND_DESTINATION: &str = "/app/chat.send";

/// Destination for outgoing typing signals.
pub const TYPING_DESTINATION: &str = "/app/chat.typing";

/// Destination for outgoing read receipts.
pub const READ_DESTINATION: &str = "/app/chat.read";

/// Destination of the global presence topic.
pub const PRESENCE_DESTINATION: &str = "/topic/presence";

const CONVERSATION_PREFIX: &str = "/topic/conversations/";
const USER_PREFIX: &str = "/user/";

/// A subscribable topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Live messages, status updates and typing for one conversation.
    Conversation(ConversationId),
    /// Send acknowledgements and delivery/read receipts for one user in one
    /// conversation.
    Receipts {
        /// Subscribing user
        user_id: UserId,
        /// Conversation the receipts belong to
        conversation_id: ConversationId,
    },
    /// Cross-conversation notifications for one user.
    Notifications(UserId),
    /// Global presence announcements.
    Presence,
}

impl Topic {
    /// Registry key. Re-subscribing with the same key replaces the previous
    /// subscription.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Conversation(cid) => format!("conversation:{cid}"),
            Self::Receipts { conversation_id, .. } => format!("receipts:{conversation_id}"),
            Self::Notifications(_) => "notifications".to_owned(),
            Self::Presence => "presence".to_owned(),
        }
    }

    /// Transport destination string.
    #[must_use]
    pub fn destination(&self) -> String {
        match self {
            Self::Conversation(cid) => format!("{CONVERSATION_PREFIX}{cid}"),
            Self::Receipts { user_id, conversation_id } => {
                format!("{USER_PREFIX}{user_id}/queue/conversations/{conversation_id}/receipts")
            },
            Self::Notifications(uid) => format!("{USER_PREFIX}{uid}/queue/notifications"),
            Self::Presence => PRESENCE_DESTINATION.to_owned(),
        }
    }

    /// Parse a destination back into a topic. `None` for publish destinations
    /// and unknown shapes.
    #[must_use]
    pub fn parse(destination: &str) -> Option<Self> {
        if destination == PRESENCE_DESTINATION {
            return Some(Self::Presence);
        }

        if let Some(cid) = destination.strip_prefix(CONVERSATION_PREFIX) {
            return (!cid.is_empty() && !cid.contains('/'))
                .then(|| Self::Conversation(cid.to_owned()));
        }

        let rest = destination.strip_prefix(USER_PREFIX)?;
        let (user_id, queue) = rest.split_once('/')?;
        if user_id.is_empty() {
            return None;
        }

        if queue == "queue/notifications" {
            return Some(Self::Notifications(user_id.to_owned()));
        }

        let cid = queue.strip_prefix("queue/conversations/")?.strip_suffix("/receipts")?;
        (!cid.is_empty() && !cid.contains('/')).then(|| Self::Receipts {
            user_id: user_id.to_owned(),
            conversation_id: cid.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destinations_parse_back_to_topics() {
        let topics = [
            Topic::Conversation("c1".into()),
            Topic::Receipts { user_id: "u1".into(), conversation_id: "c1".into() },
            Topic::Notifications("u1".into()),
            Topic::Presence,
        ];

        for topic in topics {
            assert_eq!(Topic::parse(&topic.destination()), Some(topic));
        }
    }

    #[test]
    fn publish_destinations_are_not_topics() {
        assert_eq!(Topic::parse(SEND_DESTINATION), None);
        assert_eq!(Topic::parse(TYPING_DESTINATION), None);
        assert_eq!(Topic::parse(READ_DESTINATION), None);
        assert_eq!(Topic::parse("/topic/conversations/"), None);
        assert_eq!(Topic::parse("/user//queue/notifications"), None);
    }

    #[test]
    fn conversation_destination_is_a_path() {
        assert_eq!(Topic::Conversation("c1".into()).destination(), "/topic/conversations/c1");
        assert_eq!(Topic::parse("/topic/conversation.c1"), None);
    }

    #[test]
    fn receipts_and_conversation_keys_differ() {
        let live = Topic::Conversation("c1".into());
        let receipts = Topic::Receipts { user_id: "u1".into(), conversation_id: "c1".into() };
        assert_ne!(live.key(), receipts.key());
    }
}
