//! End-to-end tests for the timeline engine over a scripted transport.
//!
//! Exercises the full path: `Timeline` command surface → controller task →
//! ordered store → watch snapshots, with a `MockProvider` standing in for
//! the network. Gates (`Notify`) hold transport calls open to force the
//! orderings the engine must survive: echo-before-ack, cancel-while-in-
//! flight, concurrent pagination.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use ebbtide_diff::ListDiff;
use ebbtide_timeline::{
    Timeline, TimelineConfig, TimelineError, TimelinePage, TimelinePayload, TimelineProvider,
    TransportError,
};
use ebbtide_types::{
    EventContent, EventId, EventOrigin, EventOrTransactionId, MessageContent,
    PaginationDirection, SendState, TimelineEvent, TransactionId, VirtualItem,
};

// ============================================================================
// Mock transport
// ============================================================================

#[derive(Default)]
struct MockProvider {
    paginate_calls: AtomicUsize,
    /// When set, `paginate` blocks until the gate is released.
    paginate_gate: Option<Arc<Notify>>,
    pages: Mutex<VecDeque<TimelinePage>>,
    /// When set, `send` blocks until the gate is released.
    send_gate: Option<Arc<Notify>>,
    send_results: Mutex<VecDeque<Result<EventId, TransportError>>>,
    edits: Mutex<Vec<(EventId, MessageContent)>>,
    redactions: Mutex<Vec<(EventId, Option<String>)>>,
    pin_calls: Mutex<Vec<(EventId, bool)>>,
}

#[async_trait]
impl TimelineProvider for MockProvider {
    async fn paginate(
        &self,
        _direction: PaginationDirection,
        _count: u16,
    ) -> Result<TimelinePage, TransportError> {
        self.paginate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.paginate_gate {
            gate.notified().await;
        }
        self.pages
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| TransportError::Network("no scripted page".into()))
    }

    async fn send(
        &self,
        _transaction_id: TransactionId,
        _content: EventContent,
    ) -> Result<EventId, TransportError> {
        if let Some(gate) = &self.send_gate {
            gate.notified().await;
        }
        self.send_results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(EventId::new("$auto")))
    }

    async fn edit(
        &self,
        event_id: &EventId,
        new_content: MessageContent,
    ) -> Result<(), TransportError> {
        self.edits
            .lock()
            .await
            .push((event_id.clone(), new_content));
        Ok(())
    }

    async fn redact(
        &self,
        event_id: &EventId,
        reason: Option<&str>,
    ) -> Result<(), TransportError> {
        self.redactions
            .lock()
            .await
            .push((event_id.clone(), reason.map(str::to_string)));
        Ok(())
    }

    async fn toggle_reaction(
        &self,
        _emoji: &str,
        _event_id: &EventId,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn set_pinned(&self, event_id: &EventId, pinned: bool) -> Result<(), TransportError> {
        self.pin_calls.lock().await.push((event_id.clone(), pinned));
        Ok(())
    }

    async fn send_poll_response(
        &self,
        _poll_start: &EventId,
        _answers: Vec<String>,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn end_poll(&self, _poll_start: &EventId, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Route engine logs through the test harness; repeated calls are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> TimelineConfig {
    init_tracing();
    TimelineConfig::live("!room:example.org", "@me:example.org")
}

fn synced(event_id: &str) -> TimelineEvent {
    TimelineEvent {
        id: EventId::new(event_id).into(),
        remote_echo_transaction_id: None,
        sender: "@alice:example.org".into(),
        timestamp: 10,
        content: EventContent::Message(MessageContent::text(event_id)),
        origin: EventOrigin::Sync,
        send_state: None,
    }
}

fn paginated(event_id: &str) -> TimelineEvent {
    TimelineEvent {
        origin: EventOrigin::Pagination,
        ..synced(event_id)
    }
}

fn push(event: TimelineEvent) -> ListDiff<TimelinePayload> {
    ListDiff::PushBack(TimelinePayload::Event(event))
}

/// Poll until the spawned send/pagination tasks have observably run.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test]
async fn test_send_echo_then_confirmation() {
    let gate = Arc::new(Notify::new());
    let provider = Arc::new(MockProvider {
        send_gate: Some(gate.clone()),
        ..MockProvider::default()
    });
    provider
        .send_results
        .lock()
        .await
        .push_back(Ok(EventId::new("$e1")));
    let (timeline, _feed) = Timeline::open(provider, config());

    let mut handle = timeline
        .send(MessageContent::text("hello"))
        .await
        .unwrap();
    // The echo is visible immediately, before any transport progress.
    let mut items = timeline.items();
    let snapshot = items.wait_for(|v| v.len() == 1).await.unwrap().clone();
    assert_eq!(snapshot[0].transaction_id(), Some(handle.transaction_id));
    assert_eq!(*handle.send_state.borrow(), SendState::Sending);

    gate.notify_one();
    handle
        .send_state
        .wait_for(|state| *state == SendState::Sent)
        .await
        .unwrap();
    let snapshot = items
        .wait_for(|v| v.first().is_some_and(|item| item.event_id().is_some()))
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].event_id().map(EventId::as_str), Some("$e1"));
    assert_eq!(snapshot[0].send_state(), Some(&SendState::Sent));
}

#[tokio::test]
async fn test_remote_echo_wins_race_against_ack() {
    let gate = Arc::new(Notify::new());
    let provider = Arc::new(MockProvider {
        send_gate: Some(gate.clone()),
        ..MockProvider::default()
    });
    provider
        .send_results
        .lock()
        .await
        .push_back(Ok(EventId::new("$e1")));
    let (timeline, feed) = Timeline::open(provider, config());

    let handle = timeline.send(MessageContent::text("out")).await.unwrap();
    let mut items = timeline.items();
    items.wait_for(|v| v.len() == 1).await.unwrap();

    // The server's push beats the transport ack.
    let mut confirmed = synced("$e1");
    confirmed.remote_echo_transaction_id = Some(handle.transaction_id);
    feed.push_diffs(vec![push(confirmed)]).unwrap();
    items
        .wait_for(|v| v.len() == 1 && v[0].event_id().is_some())
        .await
        .unwrap();

    // Release the ack; it must not duplicate the item.
    gate.notify_one();
    settle().await;
    let snapshot = timeline.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].event_id().map(EventId::as_str), Some("$e1"));
    assert_eq!(snapshot[0].send_state(), Some(&SendState::Sent));
}

#[tokio::test]
async fn test_failed_send_then_retry() {
    let provider = Arc::new(MockProvider::default());
    {
        let mut results = provider.send_results.lock().await;
        results.push_back(Err(TransportError::Network("connection reset".into())));
        results.push_back(Ok(EventId::new("$e1")));
    }
    let (timeline, _feed) = Timeline::open(provider, config());

    let mut handle = timeline.send(MessageContent::text("out")).await.unwrap();
    handle
        .send_state
        .wait_for(|state| matches!(state, SendState::Failed { .. }))
        .await
        .unwrap();
    let mut items = timeline.items();
    let slot = timeline.snapshot()[0].unique_id;

    let mut retry = timeline.retry_send(handle.transaction_id).await.unwrap();
    assert_ne!(retry.transaction_id, handle.transaction_id);
    retry
        .send_state
        .wait_for(|state| *state == SendState::Sent)
        .await
        .unwrap();

    let snapshot = items
        .wait_for(|v| v.first().is_some_and(|item| item.event_id().is_some()))
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].unique_id, slot, "retry preserves the slot");
    assert_eq!(snapshot[0].event_id().map(EventId::as_str), Some("$e1"));
}

#[tokio::test]
async fn test_cancel_in_flight_send_redacts_late_delivery() {
    let gate = Arc::new(Notify::new());
    let provider = Arc::new(MockProvider {
        send_gate: Some(gate.clone()),
        ..MockProvider::default()
    });
    provider
        .send_results
        .lock()
        .await
        .push_back(Ok(EventId::new("$e1")));
    let (timeline, _feed) = Timeline::open(provider.clone(), config());

    let handle = timeline.send(MessageContent::text("oops")).await.unwrap();
    let mut items = timeline.items();
    items.wait_for(|v| v.len() == 1).await.unwrap();

    // Cancel while the request is still in flight.
    assert!(timeline.cancel_send(handle.transaction_id).await.unwrap());
    items.wait_for(|v| v.is_empty()).await.unwrap();

    // The request then turns out to have been delivered.
    gate.notify_one();
    let mut redacted = false;
    for _ in 0..200 {
        if !provider.redactions.lock().await.is_empty() {
            redacted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(redacted, "late delivery of a cancelled send is redacted");
    assert_eq!(
        provider.redactions.lock().await[0].0,
        EventId::new("$e1")
    );
    // The discarded echo never resurfaces.
    assert!(timeline.snapshot().is_empty());
}

#[tokio::test]
async fn test_cancel_after_confirmation_is_refused() {
    let provider = Arc::new(MockProvider::default());
    provider
        .send_results
        .lock()
        .await
        .push_back(Ok(EventId::new("$e1")));
    let (timeline, _feed) = Timeline::open(provider, config());

    let mut handle = timeline.send(MessageContent::text("kept")).await.unwrap();
    handle
        .send_state
        .wait_for(|state| *state == SendState::Sent)
        .await
        .unwrap();

    assert!(!timeline.cancel_send(handle.transaction_id).await.unwrap());
    assert_eq!(timeline.snapshot().len(), 1);
}

// ============================================================================
// Edit and redact
// ============================================================================

#[tokio::test]
async fn test_edit_of_pending_echo_cancels_and_resends() {
    let gate = Arc::new(Notify::new());
    let provider = Arc::new(MockProvider {
        send_gate: Some(gate.clone()),
        ..MockProvider::default()
    });
    {
        let mut results = provider.send_results.lock().await;
        results.push_back(Ok(EventId::new("$e1")));
        results.push_back(Ok(EventId::new("$e2")));
    }
    let (timeline, _feed) = Timeline::open(provider.clone(), config());

    let handle = timeline.send(MessageContent::text("tpyo")).await.unwrap();
    let mut items = timeline.items();
    items.wait_for(|v| v.len() == 1).await.unwrap();

    // Editing a still-pending echo discards it and sends the new content.
    timeline
        .edit(
            EventOrTransactionId::Transaction(handle.transaction_id),
            MessageContent::text("typo fixed"),
        )
        .await
        .unwrap();
    let snapshot = items
        .wait_for(|v| {
            v.len() == 1
                && v[0].as_event().is_some_and(|e| {
                    e.content == EventContent::Message(MessageContent::text("typo fixed"))
                })
        })
        .await
        .unwrap()
        .clone();
    assert_ne!(
        snapshot[0].transaction_id(),
        Some(handle.transaction_id),
        "the replacement is a fresh send"
    );
    assert!(provider.edits.lock().await.is_empty(), "no server-side edit");

    // Release both parked transport sends: the cancelled one is redacted,
    // the replacement confirms.
    gate.notify_one();
    settle().await;
    gate.notify_one();
    let snapshot = items
        .wait_for(|v| v.first().is_some_and(|item| item.event_id().is_some()))
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.len(), 1);
    let confirmed = snapshot[0].event_id().cloned().unwrap();

    let mut redacted = false;
    for _ in 0..200 {
        if !provider.redactions.lock().await.is_empty() {
            redacted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(redacted, "the cancelled original is redacted on delivery");
    let redactions = provider.redactions.lock().await;
    assert_ne!(redactions[0].0, confirmed);
    for id in [&redactions[0].0, &confirmed] {
        assert!(["$e1", "$e2"].contains(&id.as_str()));
    }
}

#[tokio::test]
async fn test_edit_of_confirmed_event_edits_on_server() {
    let provider = Arc::new(MockProvider::default());
    let (timeline, _feed) = Timeline::open(provider.clone(), config());

    timeline
        .edit(
            EventOrTransactionId::Event(EventId::new("$e1")),
            MessageContent::text("v2"),
        )
        .await
        .unwrap();
    let edits = provider.edits.lock().await;
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, EventId::new("$e1"));
    assert_eq!(edits[0].1, MessageContent::text("v2"));
}

#[tokio::test]
async fn test_edit_by_stale_transaction_id_reaches_confirmed_event() {
    let provider = Arc::new(MockProvider::default());
    provider
        .send_results
        .lock()
        .await
        .push_back(Ok(EventId::new("$e1")));
    let (timeline, _feed) = Timeline::open(provider.clone(), config());

    let mut handle = timeline.send(MessageContent::text("v1")).await.unwrap();
    handle
        .send_state
        .wait_for(|state| *state == SendState::Sent)
        .await
        .unwrap();

    // The caller still holds the transaction id; the send was confirmed
    // under its feet, so the edit falls through to the real event.
    timeline
        .edit(
            EventOrTransactionId::Transaction(handle.transaction_id),
            MessageContent::text("v2"),
        )
        .await
        .unwrap();
    let edits = provider.edits.lock().await;
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, EventId::new("$e1"));
    assert_eq!(timeline.snapshot().len(), 1, "no echo was re-sent");
}

#[tokio::test]
async fn test_redact_of_pending_echo_is_cancellation() {
    let gate = Arc::new(Notify::new());
    let provider = Arc::new(MockProvider {
        send_gate: Some(gate.clone()),
        ..MockProvider::default()
    });
    provider
        .send_results
        .lock()
        .await
        .push_back(Ok(EventId::new("$e1")));
    let (timeline, _feed) = Timeline::open(provider.clone(), config());

    let handle = timeline.send(MessageContent::text("oops")).await.unwrap();
    let mut items = timeline.items();
    items.wait_for(|v| v.len() == 1).await.unwrap();

    timeline
        .redact(
            EventOrTransactionId::Transaction(handle.transaction_id),
            None,
        )
        .await
        .unwrap();
    items.wait_for(|v| v.is_empty()).await.unwrap();

    // The in-flight send turns out delivered: best-effort redact follows.
    gate.notify_one();
    let mut redacted = false;
    for _ in 0..200 {
        if !provider.redactions.lock().await.is_empty() {
            redacted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(redacted);
    assert_eq!(provider.redactions.lock().await[0].0, EventId::new("$e1"));
}

#[tokio::test]
async fn test_redact_of_confirmed_event_passes_reason() {
    let provider = Arc::new(MockProvider::default());
    let (timeline, _feed) = Timeline::open(provider.clone(), config());

    timeline
        .redact(
            EventOrTransactionId::Event(EventId::new("$e1")),
            Some("spam"),
        )
        .await
        .unwrap();
    let redactions = provider.redactions.lock().await;
    assert_eq!(
        redactions[0],
        (EventId::new("$e1"), Some("spam".to_string()))
    );
}

// ============================================================================
// Live diffs
// ============================================================================

#[tokio::test]
async fn test_feed_diffs_publish_in_order() {
    let provider = Arc::new(MockProvider::default());
    let (timeline, feed) = Timeline::open(provider, config());
    let mut notify = timeline.subscribe_notifications();

    feed.push_diffs(vec![push(synced("$a")), push(synced("$b"))])
        .unwrap();
    feed.push_diffs(vec![ListDiff::Insert {
        index: 1,
        value: TimelinePayload::Event(synced("$x")),
    }])
    .unwrap();

    let mut items = timeline.items();
    let snapshot = items.wait_for(|v| v.len() == 3).await.unwrap().clone();
    let ids: Vec<_> = snapshot
        .iter()
        .map(|item| item.event_id().map(EventId::as_str).unwrap())
        .collect();
    assert_eq!(ids, ["$a", "$x", "$b"]);

    assert!(matches!(
        notify.recv().await,
        Ok(ebbtide_timeline::TimelineNotification::NewSyncedEvent)
    ));
}

#[tokio::test]
async fn test_out_of_range_diff_signals_desync() {
    let provider = Arc::new(MockProvider::default());
    let (timeline, feed) = Timeline::open(provider, config());
    let mut notify = timeline.subscribe_notifications();

    feed.push_diffs(vec![ListDiff::Set {
        index: 4,
        value: TimelinePayload::Event(synced("$a")),
    }])
    .unwrap();

    assert!(matches!(
        notify.recv().await,
        Ok(ebbtide_timeline::TimelineNotification::Desynchronized { .. })
    ));
    // The engine keeps accepting work afterwards.
    feed.push_diffs(vec![push(synced("$a"))]).unwrap();
    let mut items = timeline.items();
    items.wait_for(|v| v.len() == 1).await.unwrap();
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_concurrent_paginate_collapses_to_one_request() {
    let gate = Arc::new(Notify::new());
    let provider = Arc::new(MockProvider {
        paginate_gate: Some(gate.clone()),
        ..MockProvider::default()
    });
    provider.pages.lock().await.push_back(TimelinePage {
        events: vec![paginated("$old1"), paginated("$old2")],
        reached_end: true,
    });
    let (timeline, feed) = Timeline::open(provider.clone(), config());
    feed.push_diffs(vec![push(synced("$live"))]).unwrap();
    let mut items = timeline.items();
    items.wait_for(|v| v.len() == 1).await.unwrap();

    let first = tokio::spawn({
        let timeline = timeline.clone();
        async move { timeline.paginate(PaginationDirection::Backwards).await }
    });
    // Let the first request claim the direction and park at the gate.
    while provider.paginate_calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert!(timeline.pagination_status(PaginationDirection::Backwards).is_paginating);

    // Second call while one is in flight: no-op, no second request.
    assert!(!timeline
        .paginate(PaginationDirection::Backwards)
        .await
        .unwrap());

    gate.notify_one();
    assert!(first.await.unwrap().unwrap());
    assert_eq!(provider.paginate_calls.load(Ordering::SeqCst), 1);

    // [TimelineStart, $old1, $old2, $live]
    let snapshot = items.wait_for(|v| v.len() == 4).await.unwrap().clone();
    assert_eq!(snapshot[0].as_virtual(), Some(&VirtualItem::TimelineStart));
    assert_eq!(snapshot[1].event_id().map(EventId::as_str), Some("$old1"));
    assert_eq!(snapshot[2].event_id().map(EventId::as_str), Some("$old2"));
    assert_eq!(snapshot[3].event_id().map(EventId::as_str), Some("$live"));

    // History is exhausted: further calls are no-ops, monotonic.
    let status = timeline.pagination_status(PaginationDirection::Backwards);
    assert!(!status.has_more_to_load);
    assert!(timeline.start_of_timeline_reached());
    assert!(!timeline
        .paginate(PaginationDirection::Backwards)
        .await
        .unwrap());
    assert_eq!(provider.paginate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_live_timeline_never_paginates_forwards() {
    let provider = Arc::new(MockProvider::default());
    let (timeline, _feed) = Timeline::open(provider.clone(), config());

    assert!(!timeline
        .paginate(PaginationDirection::Forwards)
        .await
        .unwrap());
    assert_eq!(provider.paginate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pagination_failure_leaves_direction_retryable() {
    let provider = Arc::new(MockProvider::default());
    // No scripted page: the first request fails.
    let (timeline, _feed) = Timeline::open(provider.clone(), config());

    let result = timeline.paginate(PaginationDirection::Backwards).await;
    assert!(matches!(result, Err(TimelineError::Transport(_))));
    assert!(timeline.snapshot().is_empty(), "store untouched on failure");

    let status = timeline.pagination_status(PaginationDirection::Backwards);
    assert!(!status.is_paginating);
    assert!(status.has_more_to_load, "failure does not exhaust history");

    provider.pages.lock().await.push_back(TimelinePage {
        events: vec![paginated("$old")],
        reached_end: false,
    });
    assert!(timeline
        .paginate(PaginationDirection::Backwards)
        .await
        .unwrap());
    assert_eq!(timeline.snapshot().len(), 1);
}

// ============================================================================
// Pinning and lifecycle
// ============================================================================

#[tokio::test]
async fn test_pin_and_unpin_are_idempotent() {
    let provider = Arc::new(MockProvider::default());
    let (timeline, _feed) = Timeline::open(provider.clone(), config());
    let event = EventId::new("$pinme");

    assert!(timeline.pin_event(&event).await.unwrap());
    assert!(!timeline.pin_event(&event).await.unwrap(), "already pinned");
    assert_eq!(timeline.pinned_events().await, vec![event.clone()]);

    assert!(timeline.unpin_event(&event).await.unwrap());
    assert!(!timeline.unpin_event(&event).await.unwrap(), "already unpinned");
    // One transport call per actual state change.
    assert_eq!(provider.pin_calls.lock().await.len(), 2);
}

#[tokio::test]
async fn test_closed_timeline_rejects_commands() {
    let provider = Arc::new(MockProvider::default());
    let (timeline, feed) = Timeline::open(provider, config());
    timeline.close();
    settle().await;

    assert!(matches!(
        timeline.send(MessageContent::text("late")).await,
        Err(TimelineError::Closed)
    ));
    assert!(matches!(
        feed.push_diffs(vec![push(synced("$a"))]),
        Err(TimelineError::Closed)
    ));
}
