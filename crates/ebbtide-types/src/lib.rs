//! Shared identifier and item types for ebbtide.
//!
//! The data model for the timeline and room-list sync engine: typed ids,
//! timeline items, room summaries, and pagination state. No I/O, no
//! channels — just the vocabulary the other crates speak.

pub mod event;
pub mod ids;
pub mod item;
pub mod pagination;
pub mod room;

pub use event::{
    EventContent, EventOrigin, MessageContent, PollKind, SendState, TimelineEvent,
};
pub use ids::{EventId, EventOrTransactionId, RoomId, TransactionId, UniqueId};
pub use item::{TimelineItem, TimelineItemKind, VirtualItem};
pub use pagination::{PaginationDirection, PaginationStatus};
pub use room::{RoomDetails, RoomSummary};
