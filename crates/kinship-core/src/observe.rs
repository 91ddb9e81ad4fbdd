//! Observable values.
//!
//! Readers register a [`Listener`] and receive the current value immediately,
//! then every change. Listeners are plain unbounded channels, so notifying
//! never blocks the writer. Dropping a listener unsubscribes it; the closed
//! channel is pruned on the next notify.

use tokio::sync::mpsc;

/// Identifies one registration in an [`Observers`] registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Receiving half of a registration.
#[derive(Debug)]
pub struct Listener<T> {
    id: ListenerId,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Listener<T> {
    /// Registration id, for [`Observers::remove`].
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Wait for the next value. `None` once the registry is dropped or this
    /// listener was removed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next value if one is queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Every queued value, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Registry of listeners for values of type `T`.
#[derive(Debug)]
pub struct Observers<T> {
    next_id: u64,
    senders: Vec<(ListenerId, mpsc::UnboundedSender<T>)>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self { next_id: 0, senders: Vec::new() }
    }
}

impl<T: Clone> Observers<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and deliver `current` to it.
    pub fn register(&mut self, current: T) -> Listener<T> {
        let listener = self.subscribe();
        if let Some((_, tx)) = self.senders.last() {
            // Receiver is alive, cannot fail.
            let _ = tx.send(current);
        }
        listener
    }

    /// Register a listener that only sees future notifications.
    pub fn subscribe(&mut self) -> Listener<T> {
        let id = ListenerId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push((id, tx));
        Listener { id, rx }
    }

    /// Remove a registration. Returns false if it was already gone.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.senders.len();
        self.senders.retain(|(existing, _)| *existing != id);
        self.senders.len() != before
    }

    /// Deliver `value` to every live listener and prune dropped ones.
    pub fn notify(&mut self, value: &T) {
        self.senders.retain(|(_, tx)| tx.send(value.clone()).is_ok());
    }

    /// Number of registrations not yet pruned.
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
