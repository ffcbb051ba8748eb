//! Room-list engine
//!
//! The list-of-rooms counterpart of the timeline engine: server-pushed
//! `ListDiff<RoomSummary>` batches applied by a single writer task, with
//! replay-latest snapshots published over a watch channel. Room summaries
//! carry their own identity (`RoomId`), so there is no slot-id minting or
//! echo reconciliation here; diffs apply directly.

mod list;

pub use list::{RoomList, RoomListError, RoomListFeed, RoomListNotification};
