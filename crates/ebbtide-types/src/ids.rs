//! Typed identifiers for events, rooms, transactions, and item slots.
//!
//! Two families:
//!
//! - **Server-minted** (`EventId`, `RoomId`): opaque strings assigned by the
//!   homeserver. The engine never inspects their structure.
//! - **Client-minted** (`TransactionId`, `UniqueId`): UUIDv7 (time-ordered,
//!   globally unique), generated locally. `TransactionId` correlates an
//!   optimistic local send with its eventual server confirmation.
//!   `UniqueId` is the stable key for a list *slot*: it is assigned when an
//!   item is first inserted and survives identity changes (a pending send
//!   acquiring a real event id), so position-based list diffing stays
//!   correct across reconciliation.
//!
//! The `short()` form (first 8 hex chars) is for human-facing logs only —
//! never used as a lookup key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A server-assigned event identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

/// A server-assigned room identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

// ── Server-minted (opaque string) ids ───────────────────────────────────────

macro_rules! impl_string_id {
    ($T:ident) => {
        impl $T {
            /// Wrap a server-provided identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw identifier string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($T), "({})"), self.0)
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

impl_string_id!(EventId);
impl_string_id!(RoomId);

// ── Client-minted (UUIDv7) ids ──────────────────────────────────────────────

/// A client-generated correlation id for an outgoing send.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(uuid::Uuid);

/// A stable synthetic key for a list slot (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(uuid::Uuid);

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters — for human display only, not lookup.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Full 32-character hex string (no hyphens).
            pub fn to_hex(&self) -> String {
                self.0.as_simple().to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.as_simple())
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($name, "({})"), self.short())
            }
        }
    };
}

impl_typed_id!(TransactionId, "TransactionId");
impl_typed_id!(UniqueId, "UniqueId");

/// The reconciliation join key: a confirmed `EventId` or a local
/// `TransactionId` — never both meaningfully at once.
#[derive(Clone, Hash, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum EventOrTransactionId {
    /// Server-confirmed event.
    Event(EventId),
    /// Local echo awaiting confirmation.
    Transaction(TransactionId),
}

impl EventOrTransactionId {
    /// The confirmed event id, if this item has one.
    pub fn event_id(&self) -> Option<&EventId> {
        match self {
            Self::Event(id) => Some(id),
            Self::Transaction(_) => None,
        }
    }

    /// The local transaction id, if this item is still an unconfirmed echo.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            Self::Event(_) => None,
            Self::Transaction(txn) => Some(*txn),
        }
    }
}

impl From<EventId> for EventOrTransactionId {
    fn from(id: EventId) -> Self {
        Self::Event(id)
    }
}

impl From<TransactionId> for EventOrTransactionId {
    fn from(txn: TransactionId) -> Self {
        Self::Transaction(txn)
    }
}

impl fmt::Display for EventOrTransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(id) => write!(f, "{id}"),
            Self::Transaction(txn) => write!(f, "txn:{}", txn.short()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ids_are_distinct() {
        let a = UniqueId::new();
        let b = UniqueId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_is_prefix_of_hex() {
        let id = TransactionId::new();
        assert_eq!(id.short(), id.to_hex()[..8]);
    }

    #[test]
    fn test_parse_round_trip() {
        let id = UniqueId::new();
        let parsed = UniqueId::parse(&id.to_hex()).expect("parse hex");
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_event_or_transaction_sides() {
        let evt = EventOrTransactionId::from(EventId::new("$abc"));
        assert_eq!(evt.event_id().map(EventId::as_str), Some("$abc"));
        assert!(evt.transaction_id().is_none());

        let txn = TransactionId::new();
        let pending = EventOrTransactionId::from(txn);
        assert!(pending.event_id().is_none());
        assert_eq!(pending.transaction_id(), Some(txn));
    }
}
