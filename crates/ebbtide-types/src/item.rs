//! Timeline items: event slots, virtual separators, and opaque placeholders.

use serde::{Deserialize, Serialize};

use crate::event::{SendState, TimelineEvent};
use crate::ids::{EventId, TransactionId, UniqueId};

/// A non-event item interleaved into the timeline by the engine or server.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum VirtualItem {
    /// A divider between messages of two days. The value is a timestamp in
    /// milliseconds since the Unix epoch on the given day.
    DateDivider(u64),
    /// The user's own read marker.
    ReadMarker,
    /// The beginning of the room's history — no more events before this.
    TimelineStart,
    /// A back-pagination request is in flight above this point.
    LoadingIndicator,
}

/// What occupies a timeline slot.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TimelineItemKind {
    /// A room event (message, poll, location, ...).
    Event(TimelineEvent),
    /// A non-event separator or indicator.
    Virtual(VirtualItem),
    /// Unrecognized server data — kept as an opaque placeholder so local
    /// indices never drift from the authoritative list.
    Other,
}

/// One slot in the ordered timeline.
///
/// The `unique_id` is minted when the slot is first inserted and is carried
/// across identity changes (`Set` diffs, echo confirmation), so consumers
/// diffing by position never see an item vanish and reappear.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub unique_id: UniqueId,
    pub kind: TimelineItemKind,
}

impl TimelineItem {
    /// Wrap a kind with a freshly minted slot id.
    pub fn new(kind: TimelineItemKind) -> Self {
        Self {
            unique_id: UniqueId::new(),
            kind,
        }
    }

    /// Same kind, explicit slot id — used when identity must carry over.
    pub fn with_unique_id(unique_id: UniqueId, kind: TimelineItemKind) -> Self {
        Self { unique_id, kind }
    }

    /// The event payload, if this slot holds one.
    pub fn as_event(&self) -> Option<&TimelineEvent> {
        match &self.kind {
            TimelineItemKind::Event(event) => Some(event),
            _ => None,
        }
    }

    /// Mutable event payload, if this slot holds one.
    pub fn as_event_mut(&mut self) -> Option<&mut TimelineEvent> {
        match &mut self.kind {
            TimelineItemKind::Event(event) => Some(event),
            _ => None,
        }
    }

    /// The virtual item, if this slot holds one.
    pub fn as_virtual(&self) -> Option<&VirtualItem> {
        match &self.kind {
            TimelineItemKind::Virtual(virt) => Some(virt),
            _ => None,
        }
    }

    /// Confirmed event id, if any.
    pub fn event_id(&self) -> Option<&EventId> {
        self.as_event().and_then(TimelineEvent::event_id)
    }

    /// Transaction id, if this slot is an unconfirmed local echo.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.as_event().and_then(|event| event.id.transaction_id())
    }

    /// Send state, if this slot is locally originated.
    pub fn send_state(&self) -> Option<&SendState> {
        self.as_event().and_then(|event| event.send_state.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventContent, EventOrigin, MessageContent};

    #[test]
    fn test_fresh_items_get_distinct_slot_ids() {
        let a = TimelineItem::new(TimelineItemKind::Other);
        let b = TimelineItem::new(TimelineItemKind::Other);
        assert_ne!(a.unique_id, b.unique_id);
    }

    #[test]
    fn test_identity_carry_over() {
        let original = TimelineItem::new(TimelineItemKind::Virtual(VirtualItem::ReadMarker));
        let replacement = TimelineItem::with_unique_id(
            original.unique_id,
            TimelineItemKind::Event(TimelineEvent {
                id: EventId::new("$e1").into(),
                remote_echo_transaction_id: None,
                sender: "@bob:example.org".into(),
                timestamp: 0,
                content: EventContent::Message(MessageContent::text("hello")),
                origin: EventOrigin::Sync,
                send_state: None,
            }),
        );
        assert_eq!(original.unique_id, replacement.unique_id);
        assert_eq!(
            replacement.event_id().map(EventId::as_str),
            Some("$e1")
        );
    }

    #[test]
    fn test_accessors_on_non_event_slots() {
        let item = TimelineItem::new(TimelineItemKind::Virtual(VirtualItem::TimelineStart));
        assert!(item.as_event().is_none());
        assert!(item.event_id().is_none());
        assert!(item.send_state().is_none());
        assert_eq!(item.as_virtual(), Some(&VirtualItem::TimelineStart));
    }
}
