//! Per-direction pagination state machine.
//!
//! Each direction is an independent `watch`-published [`PaginationStatus`].
//! [`PaginationTracker::try_begin`] is the only way to move a direction into
//! `is_paginating` and it is atomic (the check-and-set runs inside the watch
//! channel's send lock), so at most one request per direction is ever in
//! flight. The returned [`PaginationGuard`] resets the status if the caller
//! is cancelled mid-request — a dropped future must not wedge the direction.
//!
//! `start_of_timeline_reached` is a monotonic latch: it encodes a durable
//! fact about history exhaustion and never reverts within a session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, info};

use ebbtide_types::{PaginationDirection, PaginationStatus};

#[derive(Debug)]
pub(crate) struct PaginationTracker {
    backwards: watch::Sender<PaginationStatus>,
    forwards: watch::Sender<PaginationStatus>,
    start_reached: AtomicBool,
}

impl PaginationTracker {
    /// A live timeline starts with forwards exhausted (new events arrive by
    /// push); a detached view has both directions open.
    pub fn new(is_live: bool) -> Self {
        Self {
            backwards: watch::channel(PaginationStatus::idle(true)).0,
            forwards: watch::channel(PaginationStatus::idle(!is_live)).0,
            start_reached: AtomicBool::new(false),
        }
    }

    fn sender(&self, direction: PaginationDirection) -> &watch::Sender<PaginationStatus> {
        match direction {
            PaginationDirection::Backwards => &self.backwards,
            PaginationDirection::Forwards => &self.forwards,
        }
    }

    /// Observe one direction's status, replay-latest.
    pub fn subscribe(&self, direction: PaginationDirection) -> watch::Receiver<PaginationStatus> {
        self.sender(direction).subscribe()
    }

    pub fn status(&self, direction: PaginationDirection) -> PaginationStatus {
        *self.sender(direction).borrow()
    }

    /// Whether the beginning of the room's history has been reached.
    /// Monotonic within a session.
    pub fn start_of_timeline_reached(&self) -> bool {
        self.start_reached.load(Ordering::Acquire)
    }

    /// Atomically claim the in-flight slot for `direction`. Returns `None`
    /// when a request is already running or there is nothing more to load —
    /// the caller's no-op `Ok(false)` path, with no transport contact.
    pub fn try_begin(self: &Arc<Self>, direction: PaginationDirection) -> Option<PaginationGuard> {
        let mut claimed = false;
        self.sender(direction).send_if_modified(|status| {
            if status.can_paginate() {
                status.is_paginating = true;
                claimed = true;
                true
            } else {
                false
            }
        });
        if claimed {
            debug!(%direction, "pagination started");
            Some(PaginationGuard {
                tracker: Arc::clone(self),
                direction,
                armed: true,
            })
        } else {
            None
        }
    }

    fn settle(&self, direction: PaginationDirection, reached_end: Option<bool>) {
        if reached_end == Some(true) && direction == PaginationDirection::Backwards {
            if !self.start_reached.swap(true, Ordering::AcqRel) {
                info!("start of timeline reached");
            }
        }
        let latched = direction == PaginationDirection::Backwards
            && self.start_of_timeline_reached();
        self.sender(direction).send_modify(|status| {
            status.is_paginating = false;
            if let Some(reached_end) = reached_end {
                status.has_more_to_load = !(reached_end || latched);
            }
            // On failure (reached_end = None) has_more_to_load is left
            // unchanged so the caller may retry.
        });
    }
}

/// In-flight pagination claim. `finish` records the page outcome; dropping
/// the guard without finishing (transport error, caller cancelled) returns
/// the direction to idle with `has_more_to_load` unchanged.
#[derive(Debug)]
pub(crate) struct PaginationGuard {
    tracker: Arc<PaginationTracker>,
    direction: PaginationDirection,
    armed: bool,
}

impl PaginationGuard {
    pub fn finish(mut self, reached_end: bool) {
        self.armed = false;
        self.tracker.settle(self.direction, Some(reached_end));
    }
}

impl Drop for PaginationGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(direction = %self.direction, "pagination abandoned, returning to idle");
            self.tracker.settle(self.direction, None);
        }
    }
}
