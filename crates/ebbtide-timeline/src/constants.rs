//! Engine tuning constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

/// Events requested per pagination call.
pub const DEFAULT_PAGINATION_SIZE: u16 = 50;

/// Buffered notifications per subscriber before the oldest are dropped.
/// A lagging subscriber misses notifications, never snapshots — the item
/// stream is a watch channel and always carries the latest state.
pub const NOTIFICATION_BUFFER: usize = 64;
