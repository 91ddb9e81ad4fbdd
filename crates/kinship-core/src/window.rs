//! Ordered message window for one open conversation.
//!
//! Entries live in an arena (`slots`) and the visible order is a deque of slot
//! indices, newest last. Two indices map server ids and pending temp ids to
//! slots, so confirming an optimistic entry is a lookup plus an in-place
//! update and never moves it.
//!
//! # Invariants
//!
//! - No two ordered entries share a server id.
//! - A temp id is indexed only while its entry is unconfirmed, and is retired
//!   exactly once (on confirmation or retry).
//! - Status changes go through [`MessageStatus::can_advance_to`], except
//!   confirmation of a failed entry and an explicit retry. Undoing a read
//!   receipt that never left ([`ConversationWindow::restore_statuses`]) is
//!   the one backward move.

use std::collections::{HashMap, VecDeque};

use kinship_proto::{ClientTempId, MessageId};

use crate::message::{Message, MessageStatus, SenderRole};

/// Messages of one conversation, oldest first.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    slots: Vec<Message>,
    order: VecDeque<usize>,
    by_id: HashMap<MessageId, usize>,
    by_temp: HashMap<ClientTempId, usize>,
    has_more_older: bool,
    oldest_loaded_id: Option<MessageId>,
}

impl Default for ConversationWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationWindow {
    /// Empty window. Older history is assumed to exist until a page says
    /// otherwise.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            order: VecDeque::new(),
            by_id: HashMap::new(),
            by_temp: HashMap::new(),
            has_more_older: true,
            oldest_loaded_id: None,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if the window holds no entries.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entries, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> + ExactSizeIterator {
        self.order.iter().map(|&slot| &self.slots[slot])
    }

    /// Entry at `position`, counting from the oldest.
    pub fn get(&self, position: usize) -> Option<&Message> {
        self.order.get(position).map(|&slot| &self.slots[slot])
    }

    /// Newest entry.
    pub fn last(&self) -> Option<&Message> {
        self.order.back().map(|&slot| &self.slots[slot])
    }

    /// Entry with server id `id`.
    pub fn get_by_id(&self, id: &str) -> Option<&Message> {
        self.by_id.get(id).map(|&slot| &self.slots[slot])
    }

    /// Unconfirmed entry with temp id `temp_id`.
    pub fn get_by_temp(&self, temp_id: &str) -> Option<&Message> {
        self.by_temp.get(temp_id).map(|&slot| &self.slots[slot])
    }

    /// Position of the entry with server id `id`.
    pub fn position_of_id(&self, id: &str) -> Option<usize> {
        let slot = *self.by_id.get(id)?;
        self.order.iter().position(|&s| s == slot)
    }

    /// Position of the unconfirmed entry with temp id `temp_id`.
    pub fn position_of_temp(&self, temp_id: &str) -> Option<usize> {
        let slot = *self.by_temp.get(temp_id)?;
        self.order.iter().position(|&s| s == slot)
    }

    /// Temp ids of every unconfirmed entry.
    pub fn pending_temp_ids(&self) -> impl Iterator<Item = &ClientTempId> {
        self.by_temp.keys()
    }

    /// True if history older than the oldest loaded entry may exist.
    pub fn has_more_older(&self) -> bool {
        self.has_more_older
    }

    /// Pagination boundary: the oldest entry with a server id.
    pub fn oldest_loaded_id(&self) -> Option<&MessageId> {
        self.oldest_loaded_id.as_ref()
    }

    /// Append a locally sent, unconfirmed message.
    ///
    /// Returns false (and changes nothing) if the entry has no temp id or the
    /// temp id is already pending.
    pub fn push_optimistic(&mut self, message: Message) -> bool {
        let Some(temp_id) = message.client_temp_id.clone() else {
            return false;
        };
        if message.id.is_some() || self.by_temp.contains_key(&temp_id) {
            return false;
        }

        let slot = self.alloc(message);
        self.by_temp.insert(temp_id, slot);
        self.order.push_back(slot);
        true
    }

    /// Append a server message in arrival order.
    ///
    /// Returns false if an entry with the same server id already exists.
    pub fn push_back(&mut self, message: Message) -> bool {
        let Some(id) = message.id.clone() else {
            return self.push_optimistic(message);
        };
        if self.by_id.contains_key(&id) {
            return false;
        }

        let slot = self.alloc(message);
        self.by_id.insert(id, slot);
        self.order.push_back(slot);
        self.refresh_oldest();
        true
    }

    /// Prepend a page of older history, given oldest first.
    ///
    /// Entries already present are skipped; the rest keep their relative order
    /// and land before everything currently loaded. Returns the number of
    /// entries added.
    pub fn prepend_older(&mut self, page: Vec<Message>, has_more: bool) -> usize {
        let mut added = 0;
        for message in page.into_iter().rev() {
            let Some(id) = message.id.clone() else {
                continue;
            };
            if self.by_id.contains_key(&id) {
                continue;
            }

            let slot = self.alloc(message);
            self.by_id.insert(id, slot);
            self.order.push_front(slot);
            added += 1;
        }

        self.has_more_older = has_more;
        self.refresh_oldest();
        added
    }

    /// Confirm the unconfirmed entry `temp_id` as server message `id`.
    ///
    /// The entry keeps its position and moves to `Sent` (a failed entry too:
    /// the server has it). Returns false if `temp_id` is not pending.
    ///
    /// If another entry already carries `id` (a history page raced the
    /// acknowledgement), that entry is dropped so the optimistic one stays in
    /// place.
    pub fn confirm(&mut self, temp_id: &str, id: &str, timestamp: u64) -> bool {
        let Some(slot) = self.by_temp.remove(temp_id) else {
            return false;
        };

        if let Some(other) = self.by_id.insert(id.to_owned(), slot)
            && other != slot
        {
            self.order.retain(|&s| s != other);
            tracing::debug!(temp_id, id, "dropped duplicate entry of confirmed message");
        }

        let message = &mut self.slots[slot];
        message.id = Some(id.to_owned());
        message.timestamp = timestamp;
        if message.status == MessageStatus::Failed
            || message.status.can_advance_to(MessageStatus::Sent)
        {
            message.status = MessageStatus::Sent;
        }

        self.refresh_oldest();
        true
    }

    /// Move entry `id` forward to `status`.
    ///
    /// Returns false if the entry is unknown or the move is not forward.
    pub fn apply_status(&mut self, id: &str, status: MessageStatus) -> bool {
        let Some(&slot) = self.by_id.get(id) else {
            return false;
        };
        let message = &mut self.slots[slot];
        if !message.status.can_advance_to(status) {
            return false;
        }
        message.status = status;
        true
    }

    /// Mark the unconfirmed entry `temp_id` failed.
    pub fn mark_failed(&mut self, temp_id: &str) -> bool {
        let Some(&slot) = self.by_temp.get(temp_id) else {
            return false;
        };
        self.slots[slot].status = MessageStatus::Failed;
        true
    }

    /// Mark every unconfirmed `Sending` entry failed. Returns how many changed.
    pub fn fail_all_sending(&mut self) -> usize {
        let mut failed = 0;
        for &slot in self.by_temp.values() {
            let message = &mut self.slots[slot];
            if message.status == MessageStatus::Sending {
                message.status = MessageStatus::Failed;
                failed += 1;
            }
        }
        failed
    }

    /// Retry a failed entry in place under a new temp id.
    ///
    /// Returns false unless `old_temp_id` is pending and `Failed`.
    pub fn restart(&mut self, old_temp_id: &str, new_temp_id: &str, timestamp: u64) -> bool {
        let Some(&slot) = self.by_temp.get(old_temp_id) else {
            return false;
        };
        if self.slots[slot].status != MessageStatus::Failed {
            return false;
        }

        self.by_temp.remove(old_temp_id);
        self.by_temp.insert(new_temp_id.to_owned(), slot);

        let message = &mut self.slots[slot];
        message.client_temp_id = Some(new_temp_id.to_owned());
        message.status = MessageStatus::Sending;
        message.timestamp = timestamp;
        true
    }

    /// Mark every confirmed entry written by `sender`, up to and including
    /// entry `id`, as read. Returns how many changed, or `None` if `id` is not
    /// loaded.
    pub fn mark_read_through(&mut self, id: &str, sender: SenderRole) -> Option<usize> {
        self.read_through(id, sender).map(|marked| marked.len())
    }

    /// [`Self::mark_read_through`], returning every entry it marked together
    /// with the status it had before.
    pub fn read_through(
        &mut self,
        id: &str,
        sender: SenderRole,
    ) -> Option<Vec<(MessageId, MessageStatus)>> {
        let end = self.position_of_id(id)?;
        let mut marked = Vec::new();
        for &slot in self.order.iter().take(end + 1) {
            let message = &mut self.slots[slot];
            if message.sender == sender
                && let Some(message_id) = &message.id
                && message.status.can_advance_to(MessageStatus::Read)
            {
                marked.push((message_id.clone(), message.status));
                message.status = MessageStatus::Read;
            }
        }
        Some(marked)
    }

    /// Undo a local [`Self::read_through`] whose receipt never left.
    ///
    /// This is the only backward status move. Entries no longer `Read` are
    /// left alone. Returns the number restored.
    pub fn restore_statuses(&mut self, previous: &[(MessageId, MessageStatus)]) -> usize {
        let mut restored = 0;
        for (id, status) in previous {
            if let Some(&slot) = self.by_id.get(id)
                && self.slots[slot].status == MessageStatus::Read
            {
                self.slots[slot].status = *status;
                restored += 1;
            }
        }
        restored
    }

    /// Server id of the newest unread message from the counterpart.
    pub fn newest_unread_incoming(&self) -> Option<&MessageId> {
        self.iter()
            .rev()
            .find(|m| m.sender == SenderRole::Them && m.status != MessageStatus::Read)
            .and_then(|m| m.id.as_ref())
    }

    /// Number of unread messages from the counterpart.
    pub fn unread_incoming(&self) -> usize {
        self.iter()
            .filter(|m| m.sender == SenderRole::Them && m.status != MessageStatus::Read)
            .count()
    }

    /// Drop every entry and reset pagination.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    fn alloc(&mut self, message: Message) -> usize {
        self.slots.push(message);
        self.slots.len() - 1
    }

    fn refresh_oldest(&mut self) {
        self.oldest_loaded_id = self.order.iter().find_map(|&slot| self.slots[slot].id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theirs(id: &str) -> Message {
        Message {
            id: Some(id.into()),
            client_temp_id: None,
            conversation_id: "c1".into(),
            sender: SenderRole::Them,
            text: format!("text {id}"),
            timestamp: 0,
            status: MessageStatus::Delivered,
        }
    }

    fn mine(id: &str) -> Message {
        Message { sender: SenderRole::Me, status: MessageStatus::Sent, ..theirs(id) }
    }

    fn ids(window: &ConversationWindow) -> Vec<String> {
        window
            .iter()
            .map(|m| m.id.clone().or_else(|| m.client_temp_id.clone()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn optimistic_entry_confirmed_in_place() {
        let mut window = ConversationWindow::new();
        window.push_back(theirs("m-1"));
        assert!(window.push_optimistic(Message::optimistic("c1", "tmp-1", "Hello", 10)));
        window.push_back(theirs("m-2"));

        assert!(window.confirm("tmp-1", "m-42", 11));
        assert_eq!(ids(&window), vec!["m-1", "m-42", "m-2"]);

        let entry = window.get_by_id("m-42").unwrap();
        assert_eq!(entry.status, MessageStatus::Sent);
        assert_eq!(entry.timestamp, 11);
        assert_eq!(window.position_of_id("m-42"), Some(1));

        // Temp id retired exactly once
        assert!(window.get_by_temp("tmp-1").is_none());
        assert!(!window.confirm("tmp-1", "m-42", 11));
    }

    #[test]
    fn duplicate_server_ids_are_rejected() {
        let mut window = ConversationWindow::new();
        assert!(window.push_back(theirs("m-1")));
        assert!(!window.push_back(theirs("m-1")));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn prepend_keeps_page_order_and_skips_known() {
        let mut window = ConversationWindow::new();
        window.push_back(theirs("m-3"));
        window.push_back(theirs("m-4"));

        let added = window.prepend_older(vec![theirs("m-1"), theirs("m-2"), theirs("m-3")], false);
        assert_eq!(added, 2);
        assert_eq!(ids(&window), vec!["m-1", "m-2", "m-3", "m-4"]);
        assert_eq!(window.oldest_loaded_id().map(String::as_str), Some("m-1"));
        assert!(!window.has_more_older());
    }

    #[test]
    fn status_moves_forward_only() {
        let mut window = ConversationWindow::new();
        window.push_back(mine("m-1"));

        assert!(window.apply_status("m-1", MessageStatus::Read));
        assert!(!window.apply_status("m-1", MessageStatus::Delivered));
        assert!(!window.apply_status("m-1", MessageStatus::Read));
        assert!(!window.apply_status("unknown", MessageStatus::Read));
        assert_eq!(window.get_by_id("m-1").unwrap().status, MessageStatus::Read);
    }

    #[test]
    fn failed_entry_restarts_under_new_temp_id() {
        let mut window = ConversationWindow::new();
        window.push_optimistic(Message::optimistic("c1", "tmp-1", "Hi", 1));

        // Only failed entries restart
        assert!(!window.restart("tmp-1", "tmp-2", 2));

        assert_eq!(window.fail_all_sending(), 1);
        assert!(window.restart("tmp-1", "tmp-2", 2));
        assert!(window.get_by_temp("tmp-1").is_none());

        let entry = window.get_by_temp("tmp-2").unwrap();
        assert_eq!(entry.status, MessageStatus::Sending);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn late_confirmation_resolves_failed_entry() {
        let mut window = ConversationWindow::new();
        window.push_optimistic(Message::optimistic("c1", "tmp-1", "Hi", 1));
        window.mark_failed("tmp-1");

        assert!(window.confirm("tmp-1", "m-9", 3));
        assert_eq!(window.get_by_id("m-9").unwrap().status, MessageStatus::Sent);
    }

    #[test]
    fn confirmation_drops_raced_duplicate() {
        let mut window = ConversationWindow::new();
        window.push_optimistic(Message::optimistic("c1", "tmp-1", "Hi", 1));
        window.push_back(mine("m-9"));

        assert!(window.confirm("tmp-1", "m-9", 3));
        assert_eq!(window.len(), 1);
        assert_eq!(window.position_of_id("m-9"), Some(0));
    }

    #[test]
    fn read_through_marks_only_one_side() {
        let mut window = ConversationWindow::new();
        window.push_back(mine("m-1"));
        window.push_back(theirs("m-2"));
        window.push_back(mine("m-3"));
        window.push_back(mine("m-4"));

        assert_eq!(window.mark_read_through("m-3", SenderRole::Me), Some(2));
        assert_eq!(window.get_by_id("m-4").unwrap().status, MessageStatus::Sent);
        assert_eq!(window.get_by_id("m-2").unwrap().status, MessageStatus::Delivered);
        assert_eq!(window.mark_read_through("nope", SenderRole::Me), None);
    }

    #[test]
    fn read_through_can_be_restored() {
        let mut window = ConversationWindow::new();
        window.push_back(theirs("m-1"));
        window.push_back(theirs("m-2"));
        window.apply_status("m-2", MessageStatus::Delivered);
        window.mark_read_through("m-1", SenderRole::Them);

        let marked = window.read_through("m-2", SenderRole::Them).unwrap();
        assert_eq!(marked, vec![("m-2".to_owned(), MessageStatus::Delivered)]);
        assert_eq!(window.unread_incoming(), 0);

        assert_eq!(window.restore_statuses(&marked), 1);
        assert_eq!(window.get_by_id("m-1").unwrap().status, MessageStatus::Read);
        assert_eq!(window.get_by_id("m-2").unwrap().status, MessageStatus::Delivered);
        assert_eq!(window.newest_unread_incoming(), Some(&"m-2".to_owned()));
    }

    #[test]
    fn read_through_skips_unconfirmed_entries() {
        let mut window = ConversationWindow::new();
        window.push_optimistic(Message::optimistic("c1", "tmp-1", "Hi", 1));
        window.push_back(mine("m-2"));

        assert_eq!(window.mark_read_through("m-2", SenderRole::Me), Some(1));
        assert_eq!(window.get_by_temp("tmp-1").unwrap().status, MessageStatus::Sending);
    }

    #[test]
    fn unread_incoming_tracks_newest() {
        let mut window = ConversationWindow::new();
        assert_eq!(window.newest_unread_incoming(), None);

        window.push_back(theirs("m-1"));
        window.push_back(mine("m-2"));
        window.push_back(theirs("m-3"));
        assert_eq!(window.unread_incoming(), 2);
        assert_eq!(window.newest_unread_incoming().map(String::as_str), Some("m-3"));

        window.mark_read_through("m-3", SenderRole::Them);
        assert_eq!(window.unread_incoming(), 0);
    }
}
