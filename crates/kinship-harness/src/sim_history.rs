//! History service over the loopback server's storage.

use std::time::Duration;

use async_trait::async_trait;
use kinship_client::{HistoryError, HistoryService};
use kinship_core::HistoryPage;

use crate::sim_server::LoopbackServer;

/// Paged history with an optional virtual-time latency.
#[derive(Clone)]
pub struct SimHistory {
    server: LoopbackServer,
    latency: Duration,
}

impl SimHistory {
    pub(crate) fn new(server: LoopbackServer) -> Self {
        Self { server, latency: Duration::ZERO }
    }

    /// Delay every page by `latency` of virtual time, so live events can
    /// overtake an in-flight fetch.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl HistoryService for SimHistory {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<HistoryPage, HistoryError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.server.fetch(conversation_id, before, limit)
    }
}
