//! The ordered item store and its replay-latest publisher.
//!
//! [`ObservableList`] is the single source of truth for "what the list
//! currently looks like". Diffs are applied one at a time, strictly in
//! arrival order, by exactly one logical writer; every content change
//! publishes a fresh snapshot through a `tokio::sync::watch` channel.
//!
//! The watch channel gives the publisher its two required properties for
//! free: a new subscriber immediately observes the current snapshot (a late
//! subscriber never perceives an empty list), and a slow subscriber samples
//! the latest value instead of blocking the writer.

use tokio::sync::watch;
use tracing::{debug, error, trace};

use crate::diff::{DiffEffect, DiffError, ListDiff};

/// One slot: a value plus its staleness mark.
///
/// `stale` is set by `Invalidate` and cleared when the slot's content is
/// replaced. It never travels through the snapshot stream — invalidation is
/// content-neutral by contract.
#[derive(Clone, Debug)]
struct Slot<T> {
    value: T,
    stale: bool,
}

impl<T> Slot<T> {
    fn fresh(value: T) -> Self {
        Self {
            value,
            stale: false,
        }
    }
}

/// Mutable, indexable ordered sequence with a replay-latest publisher.
#[derive(Debug)]
pub struct ObservableList<T: Clone> {
    slots: Vec<Slot<T>>,
    tx: watch::Sender<Vec<T>>,
}

impl<T: Clone> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ObservableList<T> {
    /// New, empty list.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            slots: Vec::new(),
            tx,
        }
    }

    /// New list seeded with `items` (e.g. a replayed persisted snapshot).
    pub fn with_items(items: Vec<T>) -> Self {
        let (tx, _rx) = watch::channel(items.clone());
        Self {
            slots: items.into_iter().map(Slot::fresh).collect(),
            tx,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The value at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).map(|slot| &slot.value)
    }

    /// Whether the slot at `index` has been invalidated since its content
    /// was last replaced.
    pub fn is_stale(&self, index: usize) -> Option<bool> {
        self.slots.get(index).map(|slot| slot.stale)
    }

    /// Iterate over values in order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|slot| &slot.value)
    }

    /// Index of the first value matching `pred`.
    pub fn position(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.slots.iter().position(|slot| pred(&slot.value))
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<T> {
        self.slots.iter().map(|slot| slot.value.clone()).collect()
    }

    /// Subscribe to snapshots. The receiver starts out holding the current
    /// contents and observes every subsequent content change (coalesced if
    /// the reader lags).
    pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
        self.tx.subscribe()
    }

    /// Replace the value at `index` in place, preserving position. Clears
    /// the slot's stale mark and publishes. For writer-side mutations that
    /// are not server diffs (echo state transitions).
    pub fn replace_at(&mut self, index: usize, value: T) -> Result<(), DiffError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(DiffError::IndexOutOfBounds { index, len })?;
        slot.value = value;
        slot.stale = false;
        self.publish();
        Ok(())
    }

    /// Apply one diff, strictly in arrival order.
    ///
    /// Content changes publish a new snapshot before returning. An
    /// out-of-range index leaves the list untouched and surfaces the
    /// desynchronization to the caller.
    pub fn apply(&mut self, diff: ListDiff<T>) -> Result<DiffEffect, DiffError> {
        let effect = self.apply_silent(diff)?;
        if effect == DiffEffect::Changed {
            self.publish();
        }
        Ok(effect)
    }

    /// Apply one diff without publishing.
    ///
    /// For compound writer-side operations (echo reconciliation removes the
    /// optimistic item and inserts its confirmed replacement) that must be
    /// observable as a single snapshot — subscribers must never sample the
    /// intermediate state where the item has vanished.
    pub fn apply_silent(&mut self, diff: ListDiff<T>) -> Result<DiffEffect, DiffError> {
        let len = self.slots.len();
        trace!(op = diff.op_name(), len, "applying diff");
        match diff {
            ListDiff::PushFront(value) => {
                self.slots.insert(0, Slot::fresh(value));
            }
            ListDiff::PushBack(value) => {
                self.slots.push(Slot::fresh(value));
            }
            ListDiff::Append(values) => {
                self.slots.extend(values.into_iter().map(Slot::fresh));
            }
            ListDiff::Insert { index, value } => {
                // Insertion allows index == len (append position).
                if index > len {
                    return Err(self.desync(index));
                }
                self.slots.insert(index, Slot::fresh(value));
            }
            ListDiff::Set { index, value } => {
                let slot = self.slot_mut(index)?;
                slot.value = value;
                slot.stale = false;
            }
            ListDiff::Remove { index } => {
                self.check_index(index)?;
                self.slots.remove(index);
            }
            ListDiff::PopFront => {
                self.check_index(0)?;
                self.slots.remove(0);
            }
            ListDiff::PopBack => {
                self.check_index(0)?;
                self.slots.pop();
            }
            ListDiff::Truncate { length } => {
                self.slots.truncate(length);
            }
            ListDiff::Move { from, to } => {
                self.check_index(from)?;
                self.check_index(to)?;
                // The stale mark belongs to the value, so it moves with it.
                let slot = self.slots.remove(from);
                self.slots.insert(to, slot);
            }
            ListDiff::Reset(values) => {
                debug!(old_len = len, new_len = values.len(), "list reset");
                self.slots = values.into_iter().map(Slot::fresh).collect();
            }
            ListDiff::Clear => {
                debug!(old_len = len, "list cleared");
                self.slots.clear();
            }
            ListDiff::Invalidate { index } => {
                self.slot_mut(index)?.stale = true;
                // Content-neutral: no snapshot, no side effects.
                return Ok(DiffEffect::MarkedStale);
            }
        }
        Ok(DiffEffect::Changed)
    }

    /// Push the current contents to subscribers. Writer-side callers that
    /// used [`apply_silent`](Self::apply_silent) call this once at the end
    /// of their compound operation.
    pub fn publish(&self) {
        self.tx.send_replace(self.snapshot());
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Slot<T>, DiffError> {
        let len = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or(DiffError::IndexOutOfBounds { index, len })
    }

    fn check_index(&self, index: usize) -> Result<(), DiffError> {
        if index < self.slots.len() {
            Ok(())
        } else {
            Err(self.desync(index))
        }
    }

    fn desync(&self, index: usize) -> DiffError {
        let len = self.slots.len();
        error!(index, len, "diff index out of bounds — local list desynchronized");
        DiffError::IndexOutOfBounds { index, len }
    }
}
