//! History page service.

use async_trait::async_trait;
use kinship_core::HistoryPage;
use thiserror::Error;

/// Errors from a history fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// Service unreachable or timed out
    #[error("history unavailable: {0}")]
    Unavailable(String),

    /// Conversation unknown to the service
    #[error("conversation not found: {0}")]
    NotFound(String),
}

impl HistoryError {
    /// Returns true if fetching again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Fetches pages of conversation history.
///
/// Independent of the realtime connection: fetches may succeed while the
/// session is reconnecting.
#[async_trait]
pub trait HistoryService: Send + Sync + 'static {
    /// Fetch up to `limit` messages strictly older than `before` (the newest
    /// page if `None`), oldest first.
    async fn fetch_page(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<HistoryPage, HistoryError>;
}
