//! Room timeline engine
//!
//! Maintains an ordered list of timeline items from server-pushed list
//! diffs, reconciles optimistic local echoes with their confirmed
//! counterparts, paginates history, and publishes replay-latest snapshots
//! to any number of subscribers. Exactly one writer task per timeline
//! applies mutations in strict arrival order.

pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod provider;
pub mod timeline;

mod echo;
mod pagination;

pub use config::TimelineConfig;
pub use controller::{TimelineNotification, TimelinePayload};
pub use error::TimelineError;
pub use provider::{TimelinePage, TimelineProvider, TransportError};
pub use timeline::{SendHandle, Timeline, TimelineFeed};
