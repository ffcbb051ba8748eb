//! Event payloads: content, send state, and origin.
//!
//! `TimelineEvent` is the decoded wire payload an incoming diff carries for
//! an event slot. It has no `UniqueId` — slot identity is minted locally at
//! insertion time by the engine, never by the server.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::ids::{EventId, EventOrTransactionId, TransactionId};

/// Where an event entered the timeline from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, Serialize, Deserialize)]
pub enum EventOrigin {
    /// Pushed by the live sync stream.
    Sync,
    /// Fetched by a pagination request.
    Pagination,
    /// Created locally as an optimistic echo.
    Local,
}

/// Send lifecycle of a locally originated item.
///
/// Only meaningful for local echoes; remote events have no send state.
/// A failed item stays in the list so the consumer can offer retry or
/// discard — it is never removed automatically.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SendState {
    /// Handed to the transport, no result yet.
    Sending,
    /// Confirmed by the server.
    Sent,
    /// The transport reported failure.
    Failed {
        /// Human-readable failure reason, surfaced for retry affordances.
        reason: String,
    },
}

/// Message body with optional HTML rendering and reply linkage.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    /// Plain-text body.
    pub body: String,
    /// Optional HTML-formatted body.
    pub html_body: Option<String>,
    /// Event this message replies to, if any.
    pub in_reply_to: Option<EventId>,
}

impl MessageContent {
    /// Plain-text message with no formatting or reply.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            html_body: None,
            in_reply_to: None,
        }
    }
}

/// Poll discipline: whether votes are visible before the poll closes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, Serialize, Deserialize)]
pub enum PollKind {
    /// Votes hidden until the poll ends.
    Undisclosed,
    /// Votes visible while the poll runs.
    Disclosed,
}

/// Decoded event content.
///
/// Closed sum — the applier matches exhaustively. Server data the engine
/// does not recognize decodes to `Unknown` rather than being dropped, so
/// list indices stay aligned with the authoritative source.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventContent {
    /// A room message.
    Message(MessageContent),
    /// The event was redacted; only the tombstone remains.
    Redacted,
    /// A poll start event.
    Poll {
        question: String,
        answers: Vec<String>,
        kind: PollKind,
    },
    /// A static location share.
    Location {
        body: String,
        /// RFC 5870 geo URI, e.g. `geo:51.5008,-0.1247`.
        geo_uri: String,
    },
    /// Recognized event type, unrecognized content.
    Unknown,
}

/// Decoded wire payload for one event slot.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Confirmed event id, or the local transaction id for an echo.
    pub id: EventOrTransactionId,
    /// Server echo of the client transaction id on a confirmed event —
    /// the reconciliation join key for a remote echo.
    pub remote_echo_transaction_id: Option<TransactionId>,
    /// Sender user id.
    pub sender: String,
    /// Origin server timestamp, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Decoded content.
    pub content: EventContent,
    /// Where this event entered the timeline from.
    pub origin: EventOrigin,
    /// Send lifecycle; `None` for remote events.
    pub send_state: Option<SendState>,
}

impl TimelineEvent {
    /// The confirmed event id, if any.
    pub fn event_id(&self) -> Option<&EventId> {
        self.id.event_id()
    }

    /// The transaction id joining this payload to a local echo: either the
    /// id itself (unconfirmed echo) or the server's echo of it.
    pub fn echo_transaction_id(&self) -> Option<TransactionId> {
        self.id
            .transaction_id()
            .or(self.remote_echo_transaction_id)
    }
}
