//! Ordered item store, diff applier, and replay-latest publisher.
//!
//! The list machinery shared by the timeline and room-list engines:
//! a [`ListDiff`] vocabulary of index-addressed mutations, an
//! [`ObservableList`] store that applies them one at a time under a single
//! logical writer, and a watch-channel publisher that fans the store out to
//! any number of subscribers with replay-latest semantics.
//!
//! Item-type agnostic: the timeline instantiates it with `TimelineItem`,
//! the room list with `RoomSummary`.

mod diff;
mod store;

pub use diff::{DiffEffect, DiffError, ListDiff};
pub use store::ObservableList;
