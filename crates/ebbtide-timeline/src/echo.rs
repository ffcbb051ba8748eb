//! Local-echo bookkeeping.
//!
//! Every optimistic send is registered here under its `TransactionId`,
//! together with the slot `UniqueId` it occupies in the store. The registry
//! answers one question for every incoming event payload: *is this the
//! server-confirmed counterpart of something we inserted optimistically?* —
//! matching first by transaction id, then by the event id of an
//! already-acked send (the transport ack can race ahead of the remote echo,
//! and the later sync push must still deduplicate).
//!
//! Phases: `Sending` → `Acked` (transport confirmed, remote echo pending)
//! → resolved (entry removed once the confirmed event lands in the store),
//! or `Sending` → `Failed` (entry and item retained for retry/discard).

use indexmap::IndexMap;
use tokio::sync::watch;
use tracing::debug;

use ebbtide_types::{
    EventId, SendState, TimelineEvent, TimelineItem, TimelineItemKind, TransactionId, UniqueId,
};

/// Where an echo is in its send lifecycle.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum EchoPhase {
    /// Handed to the transport, no result yet.
    Sending,
    /// Transport confirmed with this event id; remote echo not yet seen.
    Acked(EventId),
    /// Transport reported failure; item stays in the list.
    Failed(String),
}

/// One registered local echo.
#[derive(Debug)]
pub(crate) struct EchoEntry {
    /// Slot identity — carried onto the confirmed item at reconciliation.
    pub unique_id: UniqueId,
    /// The optimistic event as inserted (id is the transaction id).
    pub event: TimelineEvent,
    pub phase: EchoPhase,
    /// Per-send state channel, held by the caller's `SendHandle`.
    pub state_tx: watch::Sender<SendState>,
}

impl EchoEntry {
    /// The send state this entry's phase maps to.
    pub fn send_state(&self) -> SendState {
        match &self.phase {
            EchoPhase::Sending => SendState::Sending,
            EchoPhase::Acked(_) => SendState::Sent,
            EchoPhase::Failed(reason) => SendState::Failed {
                reason: reason.clone(),
            },
        }
    }

    /// Rebuild the store item for this echo (used when a `Reset` resync
    /// would otherwise drop pending local items).
    pub fn rebuild_item(&self) -> TimelineItem {
        let mut event = self.event.clone();
        event.send_state = Some(self.send_state());
        if let EchoPhase::Acked(event_id) = &self.phase {
            // Keep the transaction id as the join key so commands holding
            // the stale id still resolve to the confirmed event.
            event.remote_echo_transaction_id = event.id.transaction_id();
            event.id = event_id.clone().into();
        }
        TimelineItem::with_unique_id(self.unique_id, TimelineItemKind::Event(event))
    }
}

/// Registry of in-flight and failed local echoes, in insertion order.
#[derive(Debug, Default)]
pub(crate) struct EchoRegistry {
    entries: IndexMap<TransactionId, EchoEntry>,
}

impl EchoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh echo. Returns a watch receiver for its send state.
    pub fn register(
        &mut self,
        txn: TransactionId,
        unique_id: UniqueId,
        event: TimelineEvent,
    ) -> watch::Receiver<SendState> {
        let (state_tx, state_rx) = watch::channel(SendState::Sending);
        debug!(txn = %txn.short(), slot = %unique_id.short(), "local echo registered");
        self.entries.insert(
            txn,
            EchoEntry {
                unique_id,
                event,
                phase: EchoPhase::Sending,
                state_tx,
            },
        );
        state_rx
    }

    pub fn get(&self, txn: TransactionId) -> Option<&EchoEntry> {
        self.entries.get(&txn)
    }

    pub fn get_mut(&mut self, txn: TransactionId) -> Option<&mut EchoEntry> {
        self.entries.get_mut(&txn)
    }

    pub fn remove(&mut self, txn: TransactionId) -> Option<EchoEntry> {
        self.entries.shift_remove(&txn)
    }

    /// Re-key a failed echo for retry: same slot identity, fresh
    /// transaction id, phase back to `Sending`.
    pub fn rekey_for_retry(
        &mut self,
        old_txn: TransactionId,
        new_txn: TransactionId,
    ) -> Option<&EchoEntry> {
        let mut entry = self.entries.shift_remove(&old_txn)?;
        entry.phase = EchoPhase::Sending;
        entry.event.id = new_txn.into();
        let _ = entry.state_tx.send(SendState::Sending);
        self.entries.insert(new_txn, entry);
        self.entries.get(&new_txn)
    }

    /// Find the echo an incoming confirmed event reconciles, if any:
    /// by transaction id (the server echoes it on the confirmed event),
    /// falling back to the event id of an already-acked send.
    pub fn match_incoming(&self, event: &TimelineEvent) -> Option<TransactionId> {
        if let Some(txn) = event.echo_transaction_id() {
            if self.entries.contains_key(&txn) {
                return Some(txn);
            }
        }
        let event_id = event.event_id()?;
        self.entries
            .iter()
            .find(|(_, entry)| matches!(&entry.phase, EchoPhase::Acked(acked) if acked == event_id))
            .map(|(txn, _)| *txn)
    }

    /// Entries still awaiting resolution, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&TransactionId, &EchoEntry)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
