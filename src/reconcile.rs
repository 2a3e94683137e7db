//! Reconciliation of optimistic local edits against server echoes.
//!
//! Every locally-initiated mutation records a grace entry here before (or
//! together with) the optimistic send. When a server `SHAPE_UPDATE` or
//! `SHAPES_BATCH_UPDATE` later arrives for a shape with an active entry,
//! the preserved local field values are overlaid onto the incoming update
//! instead of accepting the server version verbatim for those fields; all
//! other fields still flow through, so a concurrent edit by someone else to
//! a different property is never lost.
//!
//! Entries have two tiers. While a gesture is in progress the touched
//! fields are fully owned locally and the entry never expires. When the
//! gesture ends the entry downgrades to a timed window (the grace window)
//! that absorbs latency-delayed echoes of the client's own stale
//! intermediate values; after it elapses the entry is swept and server
//! state is trusted unconditionally. This is what prevents visible
//! snap-back from eventually-consistent echo delivery.

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod reconcile_test;

use std::collections::HashMap;

use crate::consts::GRACE_WINDOW_MS;
use crate::shape::{PartialShape, ShapeId};

/// Lifetime tier of a grace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    /// A gesture is actively mutating these fields; never expires.
    Live,
    /// Gesture ended at the contained time; expires after the grace window.
    Expiring(i64),
}

struct GraceEntry {
    /// Latest local value for every field the gesture has touched.
    preserved: PartialShape,
    tier: Tier,
}

/// Registry of per-shape grace windows.
///
/// One registry serves every gesture and property kind; the preserved
/// field set is whatever subset of [`PartialShape`] the gesture touched,
/// so drag, resize, rotate, and slider edits all share a single expiry
/// sweep instead of parallel ad hoc maps.
#[derive(Default)]
pub struct GraceRegistry {
    entries: HashMap<ShapeId, GraceEntry>,
}

impl GraceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record locally-edited fields for a shape whose gesture is in
    /// progress. Repeated calls merge: the newest value per field wins,
    /// and the entry is (re)promoted to the live tier.
    pub fn record_live(&mut self, shape_id: ShapeId, fields: &PartialShape) {
        let entry = self
            .entries
            .entry(shape_id)
            .or_insert_with(|| GraceEntry { preserved: PartialShape::default(), tier: Tier::Live });
        entry.preserved.merge(fields);
        entry.tier = Tier::Live;
    }

    /// Record a one-shot local edit with no surrounding gesture (e.g. a
    /// single property change). The entry starts directly in the timed
    /// tier at `now_ms`.
    pub fn record(&mut self, shape_id: ShapeId, fields: &PartialShape, now_ms: i64) {
        let entry = self.entries.entry(shape_id).or_insert_with(|| GraceEntry {
            preserved: PartialShape::default(),
            tier: Tier::Expiring(now_ms),
        });
        entry.preserved.merge(fields);
        if let Tier::Expiring(_) = entry.tier {
            entry.tier = Tier::Expiring(now_ms);
        }
    }

    /// The gesture on `shape_id` ended at `now_ms`: downgrade its entry to
    /// the timed tier so the last local values keep winning for the grace
    /// window and then age out.
    pub fn end_gesture(&mut self, shape_id: ShapeId, now_ms: i64) {
        if let Some(entry) = self.entries.get_mut(&shape_id) {
            entry.tier = Tier::Expiring(now_ms);
        }
    }

    /// Overlay the preserved local values for `shape_id` onto an incoming
    /// server update. Fields without a preserved value pass through
    /// unchanged. Idempotent: any number of inbound updates in any order
    /// yield the same preserved values until the entry expires.
    pub fn filter_incoming(&self, shape_id: ShapeId, incoming: &mut PartialShape, now_ms: i64) {
        let Some(entry) = self.entries.get(&shape_id) else {
            return;
        };
        if entry_expired(entry, now_ms) {
            return;
        }
        incoming.overlay(&entry.preserved);
    }

    /// Whether any unexpired entry exists for `shape_id`.
    #[must_use]
    pub fn is_protected(&self, shape_id: ShapeId, now_ms: i64) -> bool {
        self.entries
            .get(&shape_id)
            .is_some_and(|e| !entry_expired(e, now_ms))
    }

    /// Drop the entry for a shape immediately (e.g. the shape was deleted).
    pub fn forget(&mut self, shape_id: ShapeId) {
        self.entries.remove(&shape_id);
    }

    /// Evict every timed entry whose grace window has elapsed. Live entries
    /// are never swept. Called from the session's periodic maintenance.
    pub fn sweep(&mut self, now_ms: i64) {
        self.entries.retain(|_, e| !entry_expired(e, now_ms));
    }

    /// Number of tracked entries, live or timed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is being preserved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn entry_expired(entry: &GraceEntry, now_ms: i64) -> bool {
    match entry.tier {
        Tier::Live => false,
        Tier::Expiring(ended_at) => now_ms.saturating_sub(ended_at) >= GRACE_WINDOW_MS,
    }
}
