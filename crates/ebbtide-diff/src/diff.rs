//! The diff vocabulary: one atomic, index-addressed mutation per value.
//!
//! `ListDiff` is a closed sum and the applier matches it exhaustively —
//! that is a correctness requirement, not a style choice. An out-of-range
//! index means the local copy has desynchronized from the authoritative
//! source; it surfaces as [`DiffError::IndexOutOfBounds`] and the canonical
//! recovery is a forced `Reset`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One atomic mutation instruction for an ordered list.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ListDiff<T> {
    /// Insert at the front.
    PushFront(T),
    /// Insert at the back.
    PushBack(T),
    /// Append several values at the back, in order.
    Append(Vec<T>),
    /// Insert at `index`, shifting later entries right.
    Insert { index: usize, value: T },
    /// Replace the value at `index`.
    Set { index: usize, value: T },
    /// Remove the value at `index`.
    Remove { index: usize },
    /// Remove the front value.
    PopFront,
    /// Remove the back value.
    PopBack,
    /// Drop every entry past the first `length`.
    Truncate { length: usize },
    /// Move the value at `from` so it ends up at `to`.
    Move { from: usize, to: usize },
    /// Replace the entire list. Full resync: all prior slot identity is void.
    Reset(Vec<T>),
    /// Remove everything. Full resync, same as `Reset` with no values.
    Clear,
    /// Mark the slot at `index` stale without touching its content. A later
    /// `Set`/`Reset` is expected; this is never a content change.
    Invalidate { index: usize },
}

impl<T> ListDiff<T> {
    /// Map the carried values, keeping the operation shape.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> ListDiff<U> {
        match self {
            Self::PushFront(value) => ListDiff::PushFront(f(value)),
            Self::PushBack(value) => ListDiff::PushBack(f(value)),
            Self::Append(values) => ListDiff::Append(values.into_iter().map(f).collect()),
            Self::Insert { index, value } => ListDiff::Insert {
                index,
                value: f(value),
            },
            Self::Set { index, value } => ListDiff::Set {
                index,
                value: f(value),
            },
            Self::Remove { index } => ListDiff::Remove { index },
            Self::PopFront => ListDiff::PopFront,
            Self::PopBack => ListDiff::PopBack,
            Self::Truncate { length } => ListDiff::Truncate { length },
            Self::Move { from, to } => ListDiff::Move { from, to },
            Self::Reset(values) => ListDiff::Reset(values.into_iter().map(f).collect()),
            Self::Clear => ListDiff::Clear,
            Self::Invalidate { index } => ListDiff::Invalidate { index },
        }
    }

    /// Short operation name for logging.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::PushFront(_) => "push_front",
            Self::PushBack(_) => "push_back",
            Self::Append(_) => "append",
            Self::Insert { .. } => "insert",
            Self::Set { .. } => "set",
            Self::Remove { .. } => "remove",
            Self::PopFront => "pop_front",
            Self::PopBack => "pop_back",
            Self::Truncate { .. } => "truncate",
            Self::Move { .. } => "move",
            Self::Reset(_) => "reset",
            Self::Clear => "clear",
            Self::Invalidate { .. } => "invalidate",
        }
    }
}

/// What applying a diff did to the list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiffEffect {
    /// Contents changed; subscribers were given a new snapshot.
    Changed,
    /// `Invalidate` only marked a slot stale. Content-neutral: no snapshot
    /// was published and no new-item side effects may fire.
    MarkedStale,
}

/// Errors from diff application.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DiffError {
    /// The diff referenced an index the local list does not have. The local
    /// copy has desynchronized from the authoritative source — this is a
    /// reportable bug, not a recoverable condition.
    #[error("diff index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}
