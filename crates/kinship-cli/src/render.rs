//! Incremental transcript rendering.

use std::collections::HashMap;

use kinship_core::{ConversationWindow, Message, MessageStatus, SenderRole};

/// Prints each window entry when it first appears and again whenever its
/// status changes.
#[derive(Debug, Default)]
pub struct Renderer {
    seen: HashMap<String, MessageStatus>,
}

impl Renderer {
    /// Lines for entries that are new or changed since the last call, in
    /// window order.
    pub fn changes(&mut self, me: &str, counterpart: &str, window: &ConversationWindow) -> Vec<String> {
        let mut lines = Vec::new();
        for message in window.iter() {
            let Some(key) = message.client_temp_id.as_ref().or(message.id.as_ref()) else {
                continue;
            };
            if self.seen.get(key) == Some(&message.status) {
                continue;
            }
            self.seen.insert(key.clone(), message.status);
            lines.push(line(me, counterpart, message));
        }
        lines
    }
}

fn line(me: &str, counterpart: &str, message: &Message) -> String {
    let author = match message.sender {
        SenderRole::Me => me,
        SenderRole::Them => counterpart,
    };
    let status = format!("{:?}", message.status).to_lowercase();
    match (&message.status, &message.client_temp_id) {
        (MessageStatus::Failed, Some(temp_id)) => {
            format!("[{status}] {author}: {} (/retry {temp_id})", message.text)
        },
        _ => format!("[{status}] {author}: {}", message.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_new_and_changed_entries_once() {
        let mut window = ConversationWindow::new();
        window.push_optimistic(Message::optimistic("c1", "tmp-1", "hello", 1));

        let mut renderer = Renderer::default();
        assert_eq!(renderer.changes("alice", "bob", &window), vec!["[sending] alice: hello"]);
        assert!(renderer.changes("alice", "bob", &window).is_empty());

        window.mark_failed("tmp-1");
        assert_eq!(renderer.changes("alice", "bob", &window), vec![
            "[failed] alice: hello (/retry tmp-1)"
        ]);
    }

    #[test]
    fn confirmation_keeps_the_same_line_identity() {
        let mut window = ConversationWindow::new();
        window.push_optimistic(Message::optimistic("c1", "tmp-1", "hello", 1));

        let mut renderer = Renderer::default();
        renderer.changes("alice", "bob", &window);

        window.confirm("tmp-1", "m-0001", 2);
        assert_eq!(renderer.changes("alice", "bob", &window), vec!["[sent] alice: hello"]);
    }
}
