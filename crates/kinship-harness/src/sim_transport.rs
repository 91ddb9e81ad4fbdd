//! Transport over the loopback server.
//!
//! Commands go straight into the shared [`LoopbackServer`]; everything the
//! server pushes back lands in one channel per transport, kept across
//! reconnects so the client sees a single ordered event stream.

use std::future::Future;

use kinship_client::{Transport, TransportError, TransportEvent};
use kinship_core::SubscriptionId;
use kinship_proto::{Frame, UserId};
use tokio::sync::mpsc;

use crate::sim_server::{ConnectionId, LoopbackServer};

/// Simulated realtime connection for one user.
pub struct SimTransport {
    server: LoopbackServer,
    user_id: UserId,
    connection: Option<ConnectionId>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl SimTransport {
    pub(crate) fn new(server: LoopbackServer, user_id: UserId) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self { server, user_id, connection: None, events_tx, events_rx }
    }

    /// User this transport authenticates as.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Server-side id of the current connection, if one was accepted.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    fn require_open(&self) -> Result<ConnectionId, TransportError> {
        self.connection.ok_or(TransportError::NotOpen)
    }
}

impl Transport for SimTransport {
    fn open(&mut self, attempt: u64) {
        if let Some(previous) = self.connection.take() {
            self.server.disconnect(previous);
        }
        self.connection = self.server.connect(&self.user_id, attempt, &self.events_tx);
    }

    fn close(&mut self) {
        if let Some(id) = self.connection.take() {
            self.server.disconnect(id);
        }
    }

    fn subscribe(&mut self, id: SubscriptionId, destination: &str) -> Result<(), TransportError> {
        self.server.subscribe(self.require_open()?, id, destination)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), TransportError> {
        self.server.unsubscribe(self.require_open()?, id)
    }

    fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.server.receive(self.require_open()?, &frame)
    }

    fn next_event(&mut self) -> impl Future<Output = Option<TransportEvent>> + Send {
        self.events_rx.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_reports_through_event_stream() {
        let server = LoopbackServer::new();
        let mut transport = server.transport("alice");

        let frame = Frame::new("/app/chat.send", Vec::new());
        assert_eq!(transport.send(frame), Err(TransportError::NotOpen));

        transport.open(3);
        assert_eq!(transport.next_event().await, Some(TransportEvent::Opened { attempt: 3 }));
        assert_eq!(server.connection_count("alice"), 1);

        transport.open(4);
        assert_eq!(transport.next_event().await, Some(TransportEvent::Opened { attempt: 4 }));
        assert_eq!(server.connection_count("alice"), 1);

        transport.close();
        assert!(server.online_users().is_empty());
        assert_eq!(transport.connection(), None);
    }

    #[tokio::test]
    async fn server_drop_surfaces_as_lost() {
        let server = LoopbackServer::new();
        let mut transport = server.transport("alice");
        transport.open(0);
        let _ = transport.next_event().await;

        server.drop_user("alice");
        assert!(matches!(
            transport.next_event().await,
            Some(TransportEvent::Lost { attempt: 0, .. })
        ));
        assert!(matches!(
            transport.subscribe(SubscriptionId::from(1), "/topic/presence"),
            Err(TransportError::Closed(_))
        ));
    }
}
