//! Room summaries for the room-list view.

use serde::{Deserialize, Serialize};

use crate::ids::RoomId;

/// Materialized details for a room-list entry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RoomDetails {
    pub room_id: RoomId,
    pub name: Option<String>,
    /// Body of the most recent message, for the list preview.
    pub last_message: Option<String>,
    pub unread_count: u64,
    /// Timestamp of the latest activity, milliseconds since the Unix epoch.
    pub timestamp: Option<u64>,
}

/// One slot in the room list.
///
/// `Empty` is a placeholder whose content has not been materialized yet
/// (e.g. during fast scrolling); it carries just enough identity to be
/// replaced by a later `Set` or `Reset`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RoomSummary {
    Empty { room_id: RoomId },
    Filled(RoomDetails),
}

impl RoomSummary {
    /// Placeholder slot for a room whose details are not yet loaded.
    pub fn empty(room_id: impl Into<RoomId>) -> Self {
        Self::Empty {
            room_id: room_id.into(),
        }
    }

    /// The room this slot refers to.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::Empty { room_id } => room_id,
            Self::Filled(details) => &details.room_id,
        }
    }

    /// Whether details have been materialized.
    pub fn is_filled(&self) -> bool {
        matches!(self, Self::Filled(_))
    }
}
