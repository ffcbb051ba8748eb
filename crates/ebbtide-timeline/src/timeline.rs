//! The public timeline handle.
//!
//! `Timeline` is a cheap cloneable handle over the controller task. Every
//! mutation funnels through the controller's command channel; transport
//! calls happen on the caller's (or a spawned) task and only their results
//! enter the single-writer path.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexSet;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::TimelineConfig;
use crate::constants::NOTIFICATION_BUFFER;
use crate::controller::{
    Command, EchoCancellation, TimelineController, TimelineNotification, TimelinePayload,
};
use crate::error::TimelineError;
use crate::provider::TimelineProvider;
use ebbtide_diff::ListDiff;
use ebbtide_types::{
    EventContent, EventId, EventOrTransactionId, MessageContent, PaginationDirection,
    PaginationStatus, PollKind, SendState, TimelineItem, TransactionId,
};

use crate::pagination::PaginationTracker;

/// Handle to one in-flight send: the correlation id plus a live view of
/// its state (`Sending` → `Sent` / `Failed`).
#[derive(Debug, Clone)]
pub struct SendHandle {
    pub transaction_id: TransactionId,
    pub send_state: watch::Receiver<SendState>,
}

/// The ingest side of a timeline: the sync service pushes decoded diff
/// batches through this handle. Kept separate from [`Timeline`] so the
/// transport layer never holds the command surface.
#[derive(Clone)]
pub struct TimelineFeed {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl TimelineFeed {
    /// Queue a batch of diffs for in-order application. The batch is
    /// published as it applies; errors inside it surface as
    /// [`TimelineNotification::Desynchronized`].
    pub fn push_diffs(
        &self,
        diffs: Vec<ListDiff<TimelinePayload>>,
    ) -> Result<(), TimelineError> {
        self.cmd_tx
            .send(Command::ApplyDiffs(diffs))
            .map_err(|_| TimelineError::Closed)
    }
}

struct Shared {
    /// Sends cancelled while still in flight. The send task checks this
    /// on ack and best-effort redacts instead of confirming.
    aborted: Mutex<HashSet<TransactionId>>,
    /// Pinned events, seeded from room state and kept current locally.
    pinned: Mutex<IndexSet<EventId>>,
    pagination: Arc<PaginationTracker>,
    notify_tx: broadcast::Sender<TimelineNotification>,
}

/// A room timeline: replay-latest item stream plus the command surface.
#[derive(Clone)]
pub struct Timeline {
    cmd_tx: mpsc::UnboundedSender<Command>,
    provider: Arc<dyn TimelineProvider>,
    shared: Arc<Shared>,
    items: watch::Receiver<Vec<TimelineItem>>,
    pagination_size: u16,
}

impl Timeline {
    /// Open a timeline: spawns the controller task and returns the command
    /// handle plus the diff-ingest feed.
    pub fn open(
        provider: Arc<dyn TimelineProvider>,
        config: TimelineConfig,
    ) -> (Timeline, TimelineFeed) {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let shared = Arc::new(Shared {
            aborted: Mutex::new(HashSet::new()),
            pinned: Mutex::new(config.pinned_events.iter().cloned().collect()),
            pagination: Arc::new(PaginationTracker::new(config.is_live)),
            notify_tx: notify_tx.clone(),
        });
        let pagination_size = config.pagination_size;
        let (controller, items) = TimelineController::new(config, notify_tx);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(controller.run(cmd_rx));
        (
            Timeline {
                cmd_tx: cmd_tx.clone(),
                provider,
                shared,
                items,
                pagination_size,
            },
            TimelineFeed { cmd_tx },
        )
    }

    // ── Item stream ─────────────────────────────────────────────────────

    /// Subscribe to the item stream. The receiver immediately holds the
    /// current snapshot; a slow reader coalesces to the latest state and
    /// never lags behind unboundedly.
    pub fn items(&self) -> watch::Receiver<Vec<TimelineItem>> {
        self.items.clone()
    }

    /// The current item snapshot.
    pub fn snapshot(&self) -> Vec<TimelineItem> {
        self.items.borrow().clone()
    }

    /// Out-of-band signals (new synced events, desync).
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<TimelineNotification> {
        self.shared.notify_tx.subscribe()
    }

    // ── Sending ─────────────────────────────────────────────────────────

    /// Send a message. Returns immediately with the local echo registered;
    /// the handle's state channel tracks the transport outcome.
    pub async fn send(&self, content: MessageContent) -> Result<SendHandle, TimelineError> {
        self.send_content(EventContent::Message(content)).await
    }

    /// Send a message in reply to a confirmed event.
    pub async fn reply_message(
        &self,
        in_reply_to: EventId,
        mut content: MessageContent,
    ) -> Result<SendHandle, TimelineError> {
        content.in_reply_to = Some(in_reply_to);
        self.send(content).await
    }

    /// Share a location.
    pub async fn send_location(
        &self,
        body: impl Into<String>,
        geo_uri: impl Into<String>,
    ) -> Result<SendHandle, TimelineError> {
        self.send_content(EventContent::Location {
            body: body.into(),
            geo_uri: geo_uri.into(),
        })
        .await
    }

    /// Start a poll.
    pub async fn create_poll(
        &self,
        question: impl Into<String>,
        answers: Vec<String>,
        kind: PollKind,
    ) -> Result<SendHandle, TimelineError> {
        self.send_content(EventContent::Poll {
            question: question.into(),
            answers,
            kind,
        })
        .await
    }

    async fn send_content(&self, content: EventContent) -> Result<SendHandle, TimelineError> {
        let txn = TransactionId::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::RegisterEcho {
                txn,
                content: content.clone(),
                reply: reply_tx,
            })
            .map_err(|_| TimelineError::Closed)?;
        let send_state = reply_rx.await.map_err(|_| TimelineError::Closed)?;
        self.spawn_send(txn, content);
        Ok(SendHandle {
            transaction_id: txn,
            send_state,
        })
    }

    /// Run the transport send off the writer path; only its result is fed
    /// back through the command channel.
    fn spawn_send(&self, txn: TransactionId, content: EventContent) {
        let provider = Arc::clone(&self.provider);
        let shared = Arc::clone(&self.shared);
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let result = provider.send(txn, content).await;
            let aborted = shared.aborted.lock().await.remove(&txn);
            match result {
                Ok(event_id) if aborted => {
                    // Cancelled after the request left; the event exists on
                    // the server, so undo it as far as we can.
                    debug!(txn = %txn.short(), event = %event_id, "cancelled send was delivered, redacting");
                    if let Err(error) = provider.redact(&event_id, Some("cancelled")).await {
                        warn!(txn = %txn.short(), %error, "redaction of cancelled send failed");
                    }
                }
                Ok(event_id) => {
                    let _ = cmd_tx.send(Command::SendSucceeded { txn, event_id });
                }
                Err(_) if aborted => {}
                Err(error) => {
                    let _ = cmd_tx.send(Command::SendFailed {
                        txn,
                        reason: error.to_string(),
                    });
                }
            }
        });
    }

    /// Retry a failed send under a fresh transaction id. The echo keeps
    /// its position and slot identity.
    pub async fn retry_send(&self, txn: TransactionId) -> Result<SendHandle, TimelineError> {
        let new_txn = TransactionId::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::RetryEcho {
                old_txn: txn,
                new_txn,
                reply: reply_tx,
            })
            .map_err(|_| TimelineError::Closed)?;
        let (content, send_state) = reply_rx.await.map_err(|_| TimelineError::Closed)??;
        self.spawn_send(new_txn, content);
        Ok(SendHandle {
            transaction_id: new_txn,
            send_state,
        })
    }

    /// Cancel a send. A pending or failed echo is discarded and `Ok(true)`
    /// returned; a send that already reached the server returns `Ok(false)`
    /// (redact it instead). An in-flight send is discarded locally and
    /// best-effort redacted if it turns out to have been delivered.
    pub async fn cancel_send(&self, txn: TransactionId) -> Result<bool, TimelineError> {
        // Mark before asking the controller so an ack racing us is caught.
        self.shared.aborted.lock().await.insert(txn);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::CancelEcho {
                txn,
                reply: reply_tx,
            })
            .map_err(|_| TimelineError::Closed)?;
        match reply_rx.await.map_err(|_| TimelineError::Closed)? {
            EchoCancellation::Discarded { was_in_flight } => {
                // A failed send has no task left to consume the marker.
                if !was_in_flight {
                    self.shared.aborted.lock().await.remove(&txn);
                }
                Ok(true)
            }
            EchoCancellation::AlreadyConfirmed(event_id) => {
                self.shared.aborted.lock().await.remove(&txn);
                debug!(txn = %txn.short(), event = %event_id, "cancel refused, send already confirmed");
                Ok(false)
            }
            EchoCancellation::NotFound => {
                self.shared.aborted.lock().await.remove(&txn);
                Ok(false)
            }
        }
    }

    // ── Event commands ──────────────────────────────────────────────────

    /// Edit an event. A confirmed event edits on the server; an
    /// unconfirmed local echo is cancelled and resent with the new content.
    pub async fn edit(
        &self,
        target: EventOrTransactionId,
        new_content: MessageContent,
    ) -> Result<(), TimelineError> {
        match target {
            EventOrTransactionId::Event(event_id) => {
                self.provider.edit(&event_id, new_content).await?;
                Ok(())
            }
            EventOrTransactionId::Transaction(txn) => {
                if self.cancel_send(txn).await? {
                    self.send(new_content).await?;
                    Ok(())
                } else {
                    // Confirmed under our feet; edit the real event if the
                    // echo still knows it, otherwise report the stale id.
                    match self.confirmed_event_id(txn) {
                        Some(event_id) => {
                            self.provider.edit(&event_id, new_content).await?;
                            Ok(())
                        }
                        None => Err(TimelineError::EchoNotFound(txn)),
                    }
                }
            }
        }
    }

    /// Redact an event, or discard it if it is still a local echo.
    pub async fn redact(
        &self,
        target: EventOrTransactionId,
        reason: Option<&str>,
    ) -> Result<(), TimelineError> {
        match target {
            EventOrTransactionId::Event(event_id) => {
                self.provider.redact(&event_id, reason).await?;
                Ok(())
            }
            EventOrTransactionId::Transaction(txn) => {
                if self.cancel_send(txn).await? {
                    return Ok(());
                }
                match self.confirmed_event_id(txn) {
                    Some(event_id) => {
                        self.provider.redact(&event_id, reason).await?;
                        Ok(())
                    }
                    None => Err(TimelineError::EchoNotFound(txn)),
                }
            }
        }
    }

    /// Add or remove a reaction on a confirmed event.
    pub async fn toggle_reaction(
        &self,
        emoji: &str,
        event_id: &EventId,
    ) -> Result<(), TimelineError> {
        self.provider.toggle_reaction(emoji, event_id).await?;
        Ok(())
    }

    /// Pin an event. `Ok(false)` if it is already pinned.
    pub async fn pin_event(&self, event_id: &EventId) -> Result<bool, TimelineError> {
        let mut pinned = self.shared.pinned.lock().await;
        if pinned.contains(event_id) {
            return Ok(false);
        }
        self.provider.set_pinned(event_id, true).await?;
        pinned.insert(event_id.clone());
        info!(event = %event_id, "event pinned");
        Ok(true)
    }

    /// Unpin an event. `Ok(false)` if it was not pinned.
    pub async fn unpin_event(&self, event_id: &EventId) -> Result<bool, TimelineError> {
        let mut pinned = self.shared.pinned.lock().await;
        if !pinned.contains(event_id) {
            return Ok(false);
        }
        self.provider.set_pinned(event_id, false).await?;
        pinned.shift_remove(event_id);
        info!(event = %event_id, "event unpinned");
        Ok(true)
    }

    /// Currently pinned events, in pin order.
    pub async fn pinned_events(&self) -> Vec<EventId> {
        self.shared.pinned.lock().await.iter().cloned().collect()
    }

    /// Answer a running poll.
    pub async fn send_poll_response(
        &self,
        poll_start: &EventId,
        answers: Vec<String>,
    ) -> Result<(), TimelineError> {
        self.provider.send_poll_response(poll_start, answers).await?;
        Ok(())
    }

    /// Close a running poll.
    pub async fn end_poll(&self, poll_start: &EventId, text: &str) -> Result<(), TimelineError> {
        self.provider.end_poll(poll_start, text).await?;
        Ok(())
    }

    // ── Pagination ──────────────────────────────────────────────────────

    /// Fetch one page of history. At most one request per direction is in
    /// flight; a call while one is running (or once the direction is
    /// exhausted) is an `Ok(false)` no-op. A transport failure leaves the
    /// store unchanged and the direction available for retry.
    pub async fn paginate(&self, direction: PaginationDirection) -> Result<bool, TimelineError> {
        let Some(guard) = self.shared.pagination.try_begin(direction) else {
            return Ok(false);
        };
        let page = match self
            .provider
            .paginate(direction, self.pagination_size)
            .await
        {
            Ok(page) => page,
            Err(error) => {
                // Guard drop resets the direction to idle for retry.
                drop(guard);
                return Err(error.into());
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ApplyPage {
                direction,
                events: page.events,
                reached_end: page.reached_end,
                reply: reply_tx,
            })
            .map_err(|_| TimelineError::Closed)?;
        reply_rx.await.map_err(|_| TimelineError::Closed)??;
        guard.finish(page.reached_end);
        Ok(true)
    }

    /// Current pagination status for `direction`.
    pub fn pagination_status(&self, direction: PaginationDirection) -> PaginationStatus {
        self.shared.pagination.status(direction)
    }

    /// Live view of the pagination status for `direction`.
    pub fn subscribe_pagination(
        &self,
        direction: PaginationDirection,
    ) -> watch::Receiver<PaginationStatus> {
        self.shared.pagination.subscribe(direction)
    }

    /// Whether the start of the room's history has been reached.
    pub fn start_of_timeline_reached(&self) -> bool {
        self.shared.pagination.start_of_timeline_reached()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Shut the controller down. Further commands return
    /// [`TimelineError::Closed`]; existing item receivers keep the last
    /// snapshot.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    /// The confirmed event id behind an acked echo, if its slot is still
    /// in the list.
    fn confirmed_event_id(&self, txn: TransactionId) -> Option<EventId> {
        self.items.borrow().iter().find_map(|item| {
            let event = item.as_event()?;
            if event.echo_transaction_id() == Some(txn)
                || event.id.transaction_id() == Some(txn)
            {
                event.event_id().cloned()
            } else {
                None
            }
        })
    }
}
