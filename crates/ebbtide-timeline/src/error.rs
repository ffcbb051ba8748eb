//! Error types for the timeline engine.

use thiserror::Error;

use crate::provider::TransportError;
use ebbtide_diff::DiffError;
use ebbtide_types::TransactionId;

/// Errors surfaced by [`Timeline`](crate::Timeline) commands.
///
/// Individual command failures never crash the writer path; they come back
/// to the caller as one of these. "Already in progress" and "already in the
/// requested state" are `Ok(false)` no-ops, not errors.
#[derive(Error, Debug)]
pub enum TimelineError {
    /// The transport failed; the store is unchanged and the command may be
    /// retried.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The local list desynchronized from the authoritative source. Fatal
    /// for the current contents; recovery is a forced `Reset` resync.
    #[error("local list desynchronized: {0}")]
    Desync(#[from] DiffError),

    /// No local echo is registered under this transaction id.
    #[error("no local echo for transaction {0}")]
    EchoNotFound(TransactionId),

    /// The timeline was closed; no further commands are accepted.
    #[error("timeline closed")]
    Closed,
}
