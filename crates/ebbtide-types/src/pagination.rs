//! Pagination direction and observable status.

use serde::{Deserialize, Serialize};
use strum::Display;

/// History-loading direction, tracked independently per direction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Display, Serialize, Deserialize)]
pub enum PaginationDirection {
    /// Older history.
    Backwards,
    /// Newer history, relative to a non-live view.
    Forwards,
}

/// Observable pagination status for one direction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PaginationStatus {
    /// A request for this direction is currently in flight.
    pub is_paginating: bool,
    /// The server may have more history in this direction.
    pub has_more_to_load: bool,
}

impl PaginationStatus {
    /// Starting status: idle, with `has_more` seeding `has_more_to_load`.
    pub fn idle(has_more: bool) -> Self {
        Self {
            is_paginating: false,
            has_more_to_load: has_more,
        }
    }

    /// Whether a new request may be issued right now.
    pub fn can_paginate(&self) -> bool {
        !self.is_paginating && self.has_more_to_load
    }
}
