//! The single-writer controller task.
//!
//! Exactly one logical writer mutates the ordered item store: this task.
//! Everything that can change the list — live push diffs, command results,
//! send acks, pagination pages — arrives through one mpsc channel and is
//! applied strictly in arrival order, so a pagination result and a live
//! push can never interleave destructively.
//!
//! ```text
//!   Timeline (Send+Sync)        mpsc       TimelineController (task)
//!   ┌────────────────────┐   ────────▶   ┌───────────────────────────┐
//!   │ .send()            │               │ ObservableList<Item>      │
//!   │ .paginate()        │   ◀────────   │ EchoRegistry              │
//!   │ .redact()          │    oneshot    │ sequential diff apply     │
//!   └────────────────────┘               └───────────────────────────┘
//!        TimelineFeed ──────────┘  (decoded diff batches from sync)
//! ```

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::TimelineConfig;
use crate::echo::{EchoPhase, EchoRegistry};
use crate::error::TimelineError;
use ebbtide_diff::{DiffEffect, DiffError, ListDiff, ObservableList};
use ebbtide_types::{
    EventContent, EventId, EventOrigin, PaginationDirection, SendState, TimelineEvent,
    TimelineItem, TimelineItemKind, TransactionId, VirtualItem,
};

/// Decoded payload carried by an incoming diff. No `UniqueId` — slot
/// identity is minted locally when the payload is adopted into the store.
#[derive(Clone, Debug)]
pub enum TimelinePayload {
    Event(TimelineEvent),
    Virtual(VirtualItem),
    /// Unrecognized server data; kept as a placeholder so indices stay
    /// aligned with the authoritative list.
    Other,
}

/// Out-of-band signals broadcast to subscribers.
#[derive(Clone, Debug)]
pub enum TimelineNotification {
    /// A sync-origin event entered the timeline (new-message affordances).
    /// Never fired for `Invalidate` — invalidation is content-neutral.
    NewSyncedEvent,
    /// A diff referenced an index the local list does not have. The local
    /// copy is desynchronized; a `Reset` resync is required.
    Desynchronized { error: DiffError },
}

/// Outcome of a cancellation request against a local echo.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum EchoCancellation {
    /// The echo was removed before the server confirmed it.
    /// `was_in_flight` distinguishes a still-running transport send (the
    /// abort marker must stay armed for it) from an already-failed one.
    Discarded { was_in_flight: bool },
    /// The send was already confirmed; the caller redacts this event.
    AlreadyConfirmed(EventId),
    NotFound,
}

/// Internal command sent from `Timeline` / `TimelineFeed` → controller.
pub(crate) enum Command {
    /// A batch of decoded diffs from the sync service.
    ApplyDiffs(Vec<ListDiff<TimelinePayload>>),
    /// Register an optimistic local echo.
    RegisterEcho {
        txn: TransactionId,
        content: EventContent,
        reply: oneshot::Sender<watch::Receiver<SendState>>,
    },
    /// Transport confirmed a send.
    SendSucceeded {
        txn: TransactionId,
        event_id: EventId,
    },
    /// Transport reported a send failure.
    SendFailed { txn: TransactionId, reason: String },
    /// Re-key a failed echo for retry; replies with the content to resend
    /// and the (unchanged) send-state channel.
    RetryEcho {
        old_txn: TransactionId,
        new_txn: TransactionId,
        reply: oneshot::Sender<Result<(EventContent, watch::Receiver<SendState>), TimelineError>>,
    },
    /// Discard a pending or failed echo.
    CancelEcho {
        txn: TransactionId,
        reply: oneshot::Sender<EchoCancellation>,
    },
    /// Inject a fetched history page at the boundary.
    ApplyPage {
        direction: PaginationDirection,
        events: Vec<TimelineEvent>,
        reached_end: bool,
        reply: oneshot::Sender<Result<(), TimelineError>>,
    },
    Shutdown,
}

pub(crate) struct TimelineController {
    store: ObservableList<TimelineItem>,
    echoes: EchoRegistry,
    config: TimelineConfig,
    notify_tx: broadcast::Sender<TimelineNotification>,
}

impl TimelineController {
    /// Build the controller and hand back the item stream it publishes to.
    pub fn new(
        config: TimelineConfig,
        notify_tx: broadcast::Sender<TimelineNotification>,
    ) -> (Self, watch::Receiver<Vec<TimelineItem>>) {
        let store = ObservableList::new();
        let items = store.subscribe();
        (
            Self {
                store,
                echoes: EchoRegistry::new(),
                config,
                notify_tx,
            },
            items,
        )
    }

    /// Process commands until shutdown or until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(room = %self.config.room_id, "timeline controller started");
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::ApplyDiffs(diffs) => self.apply_diffs(diffs),
                Command::RegisterEcho {
                    txn,
                    content,
                    reply,
                } => {
                    let state_rx = self.register_echo(txn, content);
                    let _ = reply.send(state_rx);
                }
                Command::SendSucceeded { txn, event_id } => {
                    self.on_send_succeeded(txn, event_id);
                }
                Command::SendFailed { txn, reason } => self.on_send_failed(txn, reason),
                Command::RetryEcho {
                    old_txn,
                    new_txn,
                    reply,
                } => {
                    let _ = reply.send(self.retry_echo(old_txn, new_txn));
                }
                Command::CancelEcho { txn, reply } => {
                    let _ = reply.send(self.cancel_echo(txn));
                }
                Command::ApplyPage {
                    direction,
                    events,
                    reached_end,
                    reply,
                } => {
                    let _ = reply.send(self.apply_page(direction, events, reached_end));
                }
                Command::Shutdown => break,
            }
        }
        info!(room = %self.config.room_id, "timeline controller stopped");
    }

    // ── Diff application ────────────────────────────────────────────────

    fn apply_diffs(&mut self, diffs: Vec<ListDiff<TimelinePayload>>) {
        let mut saw_sync_event = false;
        for diff in diffs {
            let mut saw_sync = false;
            match self.apply_one(diff, &mut saw_sync) {
                Ok(_) => saw_sync_event |= saw_sync,
                Err(error) => {
                    // Never swallowed: the subscriber triggers a forced resync.
                    error!(%error, "diff application failed, resync required");
                    let _ = self
                        .notify_tx
                        .send(TimelineNotification::Desynchronized { error });
                }
            }
        }
        if saw_sync_event {
            let _ = self.notify_tx.send(TimelineNotification::NewSyncedEvent);
        }
    }

    fn apply_one(
        &mut self,
        diff: ListDiff<TimelinePayload>,
        saw_sync: &mut bool,
    ) -> Result<DiffEffect, DiffError> {
        match diff {
            ListDiff::PushFront(payload) => {
                let item = self.adopt_insert(payload, None, saw_sync);
                self.store.apply(ListDiff::PushFront(item))
            }
            ListDiff::PushBack(payload) => {
                let item = self.adopt_insert(payload, None, saw_sync);
                self.store.apply(ListDiff::PushBack(item))
            }
            ListDiff::Append(payloads) => {
                let items = payloads
                    .into_iter()
                    .map(|payload| self.adopt_insert(payload, None, saw_sync))
                    .collect();
                self.store.apply(ListDiff::Append(items))
            }
            ListDiff::Insert { mut index, value } => {
                let item = self.adopt_insert(value, Some(&mut index), saw_sync);
                self.store.apply(ListDiff::Insert { index, value: item })
            }
            ListDiff::Set { mut index, value } => {
                let item = self.adopt_set(value, &mut index, saw_sync);
                self.store.apply(ListDiff::Set { index, value: item })
            }
            ListDiff::Remove { index } => self.store.apply(ListDiff::Remove { index }),
            ListDiff::PopFront => self.store.apply(ListDiff::PopFront),
            ListDiff::PopBack => self.store.apply(ListDiff::PopBack),
            ListDiff::Truncate { length } => self.store.apply(ListDiff::Truncate { length }),
            ListDiff::Move { from, to } => self.store.apply(ListDiff::Move { from, to }),
            ListDiff::Reset(payloads) => self.reset(payloads, saw_sync),
            ListDiff::Clear => self.reset(Vec::new(), saw_sync),
            ListDiff::Invalidate { index } => self.store.apply(ListDiff::Invalidate { index }),
        }
    }

    /// Materialize a payload about to be inserted, reconciling a matching
    /// local echo: the optimistic item is removed (silently — subscribers
    /// observe a single snapshot, never the vanished state), the confirmed
    /// item inherits its `UniqueId`, and a pending insert index is adjusted
    /// for the removal. This also covers the fast-echo race: a confirmation
    /// arriving before the transport ack suppresses the duplicate insert.
    fn adopt_insert(
        &mut self,
        payload: TimelinePayload,
        index: Option<&mut usize>,
        saw_sync: &mut bool,
    ) -> TimelineItem {
        match payload {
            TimelinePayload::Virtual(virt) => {
                TimelineItem::new(TimelineItemKind::Virtual(virt))
            }
            TimelinePayload::Other => TimelineItem::new(TimelineItemKind::Other),
            TimelinePayload::Event(mut event) => {
                if event.origin == EventOrigin::Sync {
                    *saw_sync = true;
                }
                if let Some(txn) = self.echoes.match_incoming(&event) {
                    if let Some(entry) = self.echoes.remove(txn) {
                        if let Some(pos) = self
                            .store
                            .position(|item| item.unique_id == entry.unique_id)
                        {
                            let _ = self.store.apply_silent(ListDiff::Remove { index: pos });
                            if let Some(index) = index {
                                if pos < *index {
                                    *index -= 1;
                                }
                            }
                        }
                        event.send_state = Some(SendState::Sent);
                        let _ = entry.state_tx.send(SendState::Sent);
                        debug!(
                            txn = %txn.short(),
                            slot = %entry.unique_id.short(),
                            "remote echo reconciled"
                        );
                        return TimelineItem::with_unique_id(
                            entry.unique_id,
                            TimelineItemKind::Event(event),
                        );
                    }
                }
                TimelineItem::new(TimelineItemKind::Event(event))
            }
        }
    }

    /// Materialize a payload for `Set`: the slot's identity survives the
    /// content replacement, and a matching echo entry resolves in place.
    /// When the confirmation lands at a slot other than the echo's own,
    /// the stale optimistic copy is removed silently (the `Set` publishes
    /// one snapshot) and the target index adjusted for the removal.
    fn adopt_set(
        &mut self,
        payload: TimelinePayload,
        slot_index: &mut usize,
        saw_sync: &mut bool,
    ) -> TimelineItem {
        let kind = match payload {
            TimelinePayload::Virtual(virt) => TimelineItemKind::Virtual(virt),
            TimelinePayload::Other => TimelineItemKind::Other,
            TimelinePayload::Event(mut event) => {
                if event.origin == EventOrigin::Sync {
                    *saw_sync = true;
                }
                if let Some(txn) = self.echoes.match_incoming(&event) {
                    if let Some(entry) = self.echoes.remove(txn) {
                        if let Some(pos) = self
                            .store
                            .position(|item| item.unique_id == entry.unique_id)
                        {
                            if pos != *slot_index {
                                warn!(
                                    txn = %txn.short(),
                                    pos,
                                    slot = *slot_index,
                                    "echo confirmed by set at another slot, dropping stale copy"
                                );
                                let _ = self.store.apply_silent(ListDiff::Remove { index: pos });
                                if pos < *slot_index {
                                    *slot_index -= 1;
                                }
                            }
                        }
                        event.send_state = Some(SendState::Sent);
                        let _ = entry.state_tx.send(SendState::Sent);
                    }
                }
                TimelineItemKind::Event(event)
            }
        };
        match self.store.get(*slot_index).map(|item| item.unique_id) {
            Some(unique_id) => TimelineItem::with_unique_id(unique_id, kind),
            // Out of range — materialize anyway and let apply() report it.
            None => TimelineItem::new(kind),
        }
    }

    /// Full resync. Prior slot identity is void, but pending local echoes
    /// are never silently dropped: unresolved ones re-append at the bottom
    /// with their identity intact.
    fn reset(
        &mut self,
        payloads: Vec<TimelinePayload>,
        saw_sync: &mut bool,
    ) -> Result<DiffEffect, DiffError> {
        let mut items: Vec<TimelineItem> = payloads
            .into_iter()
            .map(|payload| self.adopt_insert(payload, None, saw_sync))
            .collect();
        if !self.echoes.is_empty() {
            debug!(count = self.echoes.len(), "re-appending local echoes after reset");
            items.extend(self.echoes.iter().map(|(_, entry)| entry.rebuild_item()));
        }
        self.store.apply(ListDiff::Reset(items))
    }

    // ── Local echoes ────────────────────────────────────────────────────

    fn register_echo(
        &mut self,
        txn: TransactionId,
        content: EventContent,
    ) -> watch::Receiver<SendState> {
        let event = TimelineEvent {
            id: txn.into(),
            remote_echo_transaction_id: None,
            sender: self.config.own_user_id.clone(),
            timestamp: now_ms(),
            content,
            origin: EventOrigin::Local,
            send_state: Some(SendState::Sending),
        };
        let item = TimelineItem::new(TimelineItemKind::Event(event.clone()));
        let state_rx = self.echoes.register(txn, item.unique_id, event);
        self.must_apply(ListDiff::PushBack(item));
        state_rx
    }

    fn on_send_succeeded(&mut self, txn: TransactionId, event_id: EventId) {
        let Some(entry) = self.echoes.get_mut(txn) else {
            // Remote echo already reconciled, or the echo was discarded.
            debug!(txn = %txn.short(), "send ack for unknown echo, ignoring");
            return;
        };
        entry.phase = EchoPhase::Acked(event_id.clone());
        let _ = entry.state_tx.send(SendState::Sent);
        let unique_id = entry.unique_id;
        let updated = entry.rebuild_item();
        info!(txn = %txn.short(), event = %event_id, "send confirmed");
        self.replace_echo_item(unique_id, updated);
    }

    fn on_send_failed(&mut self, txn: TransactionId, reason: String) {
        let Some(entry) = self.echoes.get_mut(txn) else {
            debug!(txn = %txn.short(), "send failure for unknown echo, ignoring");
            return;
        };
        warn!(txn = %txn.short(), %reason, "send failed");
        entry.phase = EchoPhase::Failed(reason.clone());
        let _ = entry.state_tx.send(SendState::Failed { reason });
        let unique_id = entry.unique_id;
        let updated = entry.rebuild_item();
        // Kept in the list for retry/discard, never removed automatically.
        self.replace_echo_item(unique_id, updated);
    }

    fn retry_echo(
        &mut self,
        old_txn: TransactionId,
        new_txn: TransactionId,
    ) -> Result<(EventContent, watch::Receiver<SendState>), TimelineError> {
        match self.echoes.get(old_txn).map(|entry| &entry.phase) {
            Some(EchoPhase::Failed(_)) => {}
            _ => return Err(TimelineError::EchoNotFound(old_txn)),
        }
        let Some(entry) = self.echoes.rekey_for_retry(old_txn, new_txn) else {
            return Err(TimelineError::EchoNotFound(old_txn));
        };
        let content = entry.event.content.clone();
        let state_rx = entry.state_tx.subscribe();
        let unique_id = entry.unique_id;
        let updated = entry.rebuild_item();
        info!(
            old = %old_txn.short(),
            new = %new_txn.short(),
            "retrying failed send"
        );
        self.replace_echo_item(unique_id, updated);
        Ok((content, state_rx))
    }

    fn cancel_echo(&mut self, txn: TransactionId) -> EchoCancellation {
        match self.echoes.get(txn).map(|entry| entry.phase.clone()) {
            None => EchoCancellation::NotFound,
            Some(EchoPhase::Acked(event_id)) => EchoCancellation::AlreadyConfirmed(event_id),
            Some(phase @ (EchoPhase::Sending | EchoPhase::Failed(_))) => {
                if let Some(entry) = self.echoes.remove(txn) {
                    if let Some(pos) = self
                        .store
                        .position(|item| item.unique_id == entry.unique_id)
                    {
                        self.must_apply(ListDiff::Remove { index: pos });
                    }
                }
                info!(txn = %txn.short(), "local echo discarded");
                EchoCancellation::Discarded {
                    was_in_flight: phase == EchoPhase::Sending,
                }
            }
        }
    }

    /// Replace a local echo's item in place, preserving its position and
    /// slot identity.
    fn replace_echo_item(&mut self, unique_id: ebbtide_types::UniqueId, updated: TimelineItem) {
        if let Some(pos) = self.store.position(|item| item.unique_id == unique_id) {
            if let Err(error) = self.store.replace_at(pos, updated) {
                error!(%error, "echo item replacement failed");
            }
        }
    }

    // ── Pagination injection ────────────────────────────────────────────

    fn apply_page(
        &mut self,
        direction: PaginationDirection,
        events: Vec<TimelineEvent>,
        reached_end: bool,
    ) -> Result<(), TimelineError> {
        let count = events.len();
        let mut ignored = false;
        match direction {
            PaginationDirection::Backwards => {
                // Insert above everything except a leading start marker.
                let mut base = usize::from(self.starts_with_timeline_start());
                for event in events {
                    let mut index = base;
                    let item = self.adopt_insert(
                        TimelinePayload::Event(event),
                        Some(&mut index),
                        &mut ignored,
                    );
                    self.store.apply(ListDiff::Insert { index, value: item })?;
                    base = index + 1;
                }
                if reached_end && !self.starts_with_timeline_start() {
                    self.must_apply(ListDiff::PushFront(TimelineItem::new(
                        TimelineItemKind::Virtual(VirtualItem::TimelineStart),
                    )));
                }
            }
            PaginationDirection::Forwards => {
                for event in events {
                    let item =
                        self.adopt_insert(TimelinePayload::Event(event), None, &mut ignored);
                    self.store.apply(ListDiff::PushBack(item))?;
                }
            }
        }
        debug!(%direction, count, reached_end, "pagination page applied");
        Ok(())
    }

    fn starts_with_timeline_start(&self) -> bool {
        matches!(
            self.store.get(0).and_then(TimelineItem::as_virtual),
            Some(VirtualItem::TimelineStart)
        )
    }

    /// Apply a diff whose indices were computed against our own store —
    /// failure here is a writer-side bug, reported but not propagated.
    fn must_apply(&mut self, diff: ListDiff<TimelineItem>) {
        if let Err(error) = self.store.apply(diff) {
            error!(%error, "writer-side diff failed");
            let _ = self
                .notify_tx
                .send(TimelineNotification::Desynchronized { error });
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
