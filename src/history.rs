//! Timestamp-ordered undo/redo history with debounced coalescing.
//!
//! The undo stack is kept sorted ascending by entry timestamp rather than
//! insertion order, because coalesced entries finalize when their debounce
//! window settles — which can be long after a later-started action already
//! pushed its own entry. `perform_undo` therefore always pops the entry
//! with the latest timestamp, giving true chronological undo.
//!
//! Rapid property bursts (opacity sliders, text typing, arrow-key nudges,
//! canvas background changes) coalesce into a single entry: the first
//! change in a burst captures the initial value, every further change
//! within the window replaces the latest value and rearms the timer, and
//! the entry that finally settles is `{undo: initial, redo: latest}`
//! stamped with the timestamp of the *first* change in the burst.

#[cfg(test)]
#[path = "history_test.rs"]
mod history_test;

use std::collections::HashMap;

use uuid::Uuid;

use crate::consts::{
    BACKGROUND_DEBOUNCE_MS, NUDGE_DEBOUNCE_MS, PROPERTY_DEBOUNCE_MS, TEXT_DEBOUNCE_MS,
};
use crate::shape::{PartialShape, Shape, ShapeId};

/// Where a history entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    /// A direct user action.
    User,
    /// A programmatic edit (e.g. an assistant acting on the canvas).
    Agent,
}

/// A single reversible mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Apply `fields` to the shape.
    Update {
        /// Target shape.
        shape_id: ShapeId,
        /// Fields to apply.
        fields: PartialShape,
    },
    /// Recreate a shape (redo of create, undo of delete).
    Create {
        /// The full shape to insert.
        shape: Box<Shape>,
    },
    /// Remove a shape (undo of create, redo of delete).
    Delete {
        /// Target shape.
        shape_id: ShapeId,
    },
    /// Change the canvas background color.
    CanvasBackground {
        /// CSS color string.
        color: String,
    },
}

/// One undo/redo unit: the operations to revert and reapply an action.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Operations reverting the action, applied in listed order.
    pub undo: Vec<Operation>,
    /// Operations reapplying the action, applied in listed order.
    pub redo: Vec<Operation>,
    /// Start timestamp of the action (for coalesced bursts, the first
    /// change; for gestures, the gesture start), in epoch milliseconds.
    pub timestamp: i64,
    /// Origin of the entry.
    pub source: EntrySource,
}

impl HistoryEntry {
    /// A single-shape update entry.
    #[must_use]
    pub fn update(
        shape_id: ShapeId,
        before: PartialShape,
        after: PartialShape,
        timestamp: i64,
    ) -> Self {
        Self {
            undo: vec![Operation::Update { shape_id, fields: before }],
            redo: vec![Operation::Update { shape_id, fields: after }],
            timestamp,
            source: EntrySource::User,
        }
    }
}

/// The undo/redo stacks.
///
/// Invariant: `undo` is always sorted ascending by `timestamp`, so the last
/// element is the most recently *started* action even when entries were
/// pushed out of chronological order.
#[derive(Default)]
pub struct HistoryManager {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
}

impl HistoryManager {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, restore the timestamp ordering, and clear the redo
    /// stack — any new action invalidates redo.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.undo.push(entry);
        self.undo.sort_by_key(|e| e.timestamp);
        self.redo.clear();
    }

    /// Pop the entry with the latest timestamp, move it to the redo stack,
    /// and return its undo operations for the caller to apply in order.
    pub fn perform_undo(&mut self) -> Option<Vec<Operation>> {
        let entry = self.undo.pop()?;
        let ops = entry.undo.clone();
        self.redo.push(entry);
        Some(ops)
    }

    /// Mirror of [`perform_undo`](Self::perform_undo): pop the most recent
    /// redo entry, move it back to the undo stack, and return its redo
    /// operations.
    pub fn perform_redo(&mut self) -> Option<Vec<Operation>> {
        let entry = self.redo.pop()?;
        let ops = entry.redo.clone();
        self.undo.push(entry);
        self.undo.sort_by_key(|e| e.timestamp);
        Some(ops)
    }

    /// Number of undoable entries.
    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Number of redoable entries.
    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Whether anything can be undone.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Whether anything can be redone.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}

/// Identity of a coalescing burst. Changes with the same key merge into one
/// pending entry; changes with different keys settle independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoalesceKey {
    /// A slider-style property burst on one shape (opacity, shadow
    /// strength, color, border, font size).
    ShapeProperty(ShapeId),
    /// A text-editing burst on one shape.
    Text(ShapeId),
    /// An arrow-key nudge burst on the current selection.
    Nudge,
    /// A canvas background color burst.
    Background(Uuid),
}

impl CoalesceKey {
    /// The debounce window for this burst kind, in milliseconds.
    #[must_use]
    pub fn window_ms(self) -> i64 {
        match self {
            Self::ShapeProperty(_) => PROPERTY_DEBOUNCE_MS,
            Self::Text(_) => TEXT_DEBOUNCE_MS,
            Self::Nudge => NUDGE_DEBOUNCE_MS,
            Self::Background(_) => BACKGROUND_DEBOUNCE_MS,
        }
    }
}

struct PendingBurst {
    /// Undo operations captured at the first change; never replaced.
    initial: Vec<Operation>,
    /// Redo operations from the most recent change; replaced every change.
    latest: Vec<Operation>,
    /// Timestamp of the first change; becomes the entry timestamp.
    first_ts: i64,
    /// Timestamp of the most recent change; the window measures from here.
    last_ts: i64,
}

/// Debounced merger of rapid edit bursts into single history entries.
#[derive(Default)]
pub struct Coalescer {
    pending: HashMap<CoalesceKey, PendingBurst>,
}

impl Coalescer {
    /// Create an empty coalescer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one change in a burst. The first change for a key captures
    /// `undo` as the burst's initial state; every change replaces `redo`
    /// and rearms the debounce timer.
    pub fn on_change(
        &mut self,
        key: CoalesceKey,
        undo: Vec<Operation>,
        redo: Vec<Operation>,
        now_ms: i64,
    ) {
        match self.pending.get_mut(&key) {
            Some(burst) => {
                burst.latest = redo;
                burst.last_ts = now_ms;
            }
            None => {
                self.pending.insert(
                    key,
                    PendingBurst { initial: undo, latest: redo, first_ts: now_ms, last_ts: now_ms },
                );
            }
        }
    }

    /// Whether a burst is pending for `key`.
    #[must_use]
    pub fn is_pending(&self, key: CoalesceKey) -> bool {
        self.pending.contains_key(&key)
    }

    /// Finalize every burst whose debounce window has elapsed at `now_ms`,
    /// returning the settled entries stamped with their first-change
    /// timestamps. Called from the session's periodic maintenance.
    pub fn settle(&mut self, now_ms: i64) -> Vec<HistoryEntry> {
        let mut settled = Vec::new();
        let done: Vec<CoalesceKey> = self
            .pending
            .iter()
            .filter(|(key, burst)| now_ms.saturating_sub(burst.last_ts) >= key.window_ms())
            .map(|(key, _)| *key)
            .collect();
        for key in done {
            if let Some(burst) = self.pending.remove(&key) {
                settled.push(HistoryEntry {
                    undo: burst.initial,
                    redo: burst.latest,
                    timestamp: burst.first_ts,
                    source: EntrySource::User,
                });
            }
        }
        // Present settled entries oldest-first for deterministic pushes.
        settled.sort_by_key(|e| e.timestamp);
        settled
    }

    /// Finalize every pending burst immediately, regardless of timers.
    /// Used at session teardown so no recorded edit is lost.
    pub fn flush_all(&mut self) -> Vec<HistoryEntry> {
        let mut settled: Vec<HistoryEntry> = self
            .pending
            .drain()
            .map(|(_, burst)| HistoryEntry {
                undo: burst.initial,
                redo: burst.latest,
                timestamp: burst.first_ts,
                source: EntrySource::User,
            })
            .collect();
        settled.sort_by_key(|e| e.timestamp);
        settled
    }
}
