//! Room-list handle and writer task.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info};

use ebbtide_diff::{DiffError, ListDiff, ObservableList};
use ebbtide_types::RoomSummary;

/// Buffered notifications per subscriber before the oldest are dropped.
const NOTIFICATION_BUFFER: usize = 16;

#[derive(Error, Debug)]
pub enum RoomListError {
    /// The room list was closed; no further diffs are accepted.
    #[error("room list closed")]
    Closed,
}

/// Out-of-band signals from the room-list writer.
#[derive(Clone, Debug)]
pub enum RoomListNotification {
    /// A diff referenced an index the local list does not have; a `Reset`
    /// resync is required.
    Desynchronized { error: DiffError },
}

enum Command {
    ApplyDiffs(Vec<ListDiff<RoomSummary>>),
    Shutdown,
}

/// The ingest side: the sync service pushes decoded summary diffs here.
#[derive(Clone)]
pub struct RoomListFeed {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl RoomListFeed {
    /// Queue a batch of diffs for in-order application.
    pub fn push_diffs(&self, diffs: Vec<ListDiff<RoomSummary>>) -> Result<(), RoomListError> {
        self.cmd_tx
            .send(Command::ApplyDiffs(diffs))
            .map_err(|_| RoomListError::Closed)
    }
}

/// Observable, ordered list of room summaries.
#[derive(Clone)]
pub struct RoomList {
    cmd_tx: mpsc::UnboundedSender<Command>,
    summaries: watch::Receiver<Vec<RoomSummary>>,
    notify_tx: broadcast::Sender<RoomListNotification>,
}

impl RoomList {
    /// Spawn the writer task and return the handle plus the ingest feed.
    pub fn open() -> (RoomList, RoomListFeed) {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let store: ObservableList<RoomSummary> = ObservableList::new();
        let summaries = store.subscribe();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(store, notify_tx.clone(), cmd_rx));
        (
            RoomList {
                cmd_tx: cmd_tx.clone(),
                summaries,
                notify_tx,
            },
            RoomListFeed { cmd_tx },
        )
    }

    /// Subscribe to the summary stream. The receiver immediately holds the
    /// current snapshot; slow readers coalesce to the latest state.
    pub fn summaries(&self) -> watch::Receiver<Vec<RoomSummary>> {
        self.summaries.clone()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Vec<RoomSummary> {
        self.summaries.borrow().clone()
    }

    /// Out-of-band signals (desync).
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<RoomListNotification> {
        self.notify_tx.subscribe()
    }

    /// Shut the writer down. Existing receivers keep the last snapshot.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

async fn run(
    mut store: ObservableList<RoomSummary>,
    notify_tx: broadcast::Sender<RoomListNotification>,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    info!("room list writer started");
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::ApplyDiffs(diffs) => {
                for diff in diffs {
                    let op = diff.op_name();
                    if let Err(error) = store.apply(diff) {
                        error!(%error, op, "room-list diff failed — resync required");
                        let _ = notify_tx.send(RoomListNotification::Desynchronized { error });
                    }
                }
                debug!(rooms = store.len(), "room-list batch applied");
            }
            Command::Shutdown => break,
        }
    }
    info!("room list writer stopped");
}
