//! Timeline configuration.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_PAGINATION_SIZE;
use ebbtide_types::{EventId, RoomId};

/// Configuration for one open timeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Room this timeline views.
    pub room_id: RoomId,
    /// Our own user id — the sender stamped on local echoes.
    pub own_user_id: String,
    /// Live timelines receive new events by push and never paginate
    /// forwards; a detached (event-focused) view paginates both ways.
    pub is_live: bool,
    /// Events requested per pagination call.
    pub pagination_size: u16,
    /// Currently pinned events, seeded from room state.
    pub pinned_events: Vec<EventId>,
}

impl TimelineConfig {
    /// Live timeline with default tuning.
    pub fn live(room_id: impl Into<RoomId>, own_user_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            own_user_id: own_user_id.into(),
            is_live: true,
            pagination_size: DEFAULT_PAGINATION_SIZE,
            pinned_events: Vec::new(),
        }
    }

    /// Detached view focused on an event in history; paginates both ways.
    pub fn detached(room_id: impl Into<RoomId>, own_user_id: impl Into<String>) -> Self {
        Self {
            is_live: false,
            ..Self::live(room_id, own_user_id)
        }
    }
}
