//! The transport seam: everything the engine asks of the outside world.
//!
//! The engine never interprets transport framing; it consumes already
//! decoded values. [`TimelineProvider`] is the one trait a transport layer
//! implements — pagination fetches, sends, and the small per-event commands.
//! Incoming live diffs arrive separately through the
//! [`TimelineFeed`](crate::TimelineFeed) channel.

use async_trait::async_trait;
use thiserror::Error;

use ebbtide_types::{
    EventContent, EventId, MessageContent, PaginationDirection, TimelineEvent, TransactionId,
};

/// A transport-level failure. Recoverable: the store is left unchanged and
/// the error is surfaced to the caller for retry.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The request never completed (connection loss, timeout).
    #[error("network failure: {0}")]
    Network(String),
    /// The server answered with a rejection.
    #[error("request rejected by server: {0}")]
    Rejected(String),
}

/// One fetched page of history.
#[derive(Debug, Clone)]
pub struct TimelinePage {
    /// Events in timeline order (oldest first).
    pub events: Vec<TimelineEvent>,
    /// Whether this page exhausted history in the requested direction.
    pub reached_end: bool,
}

/// External sync/push service boundary.
///
/// All methods may suspend on the network; results are applied back into
/// the store through the engine's single-writer path, never directly by
/// the implementor.
#[async_trait]
pub trait TimelineProvider: Send + Sync {
    /// Fetch up to `count` events of history in `direction`.
    async fn paginate(
        &self,
        direction: PaginationDirection,
        count: u16,
    ) -> Result<TimelinePage, TransportError>;

    /// Send a new event. The transaction id is echoed back by the server on
    /// the confirmed event so the engine can reconcile the local echo.
    async fn send(
        &self,
        transaction_id: TransactionId,
        content: EventContent,
    ) -> Result<EventId, TransportError>;

    /// Replace the content of a confirmed event.
    async fn edit(
        &self,
        event_id: &EventId,
        new_content: MessageContent,
    ) -> Result<(), TransportError>;

    /// Redact a confirmed event.
    async fn redact(&self, event_id: &EventId, reason: Option<&str>)
    -> Result<(), TransportError>;

    /// Add or remove a reaction to a confirmed event.
    async fn toggle_reaction(&self, emoji: &str, event_id: &EventId)
    -> Result<(), TransportError>;

    /// Pin (`pinned = true`) or unpin a confirmed event.
    async fn set_pinned(&self, event_id: &EventId, pinned: bool) -> Result<(), TransportError>;

    /// Answer a running poll.
    async fn send_poll_response(
        &self,
        poll_start: &EventId,
        answers: Vec<String>,
    ) -> Result<(), TransportError>;

    /// Close a running poll.
    async fn end_poll(&self, poll_start: &EventId, text: &str) -> Result<(), TransportError>;
}
