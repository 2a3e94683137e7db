//! Soft, time-limited edit locks on shapes.
//!
//! Locks are advisory and client-trusted: acquiring one sends a normal
//! `SHAPE_UPDATE` carrying the lock fields, and every client independently
//! times out stale locks from the last known `locked_at` — there is no
//! server-side enforcement and no explicit expiry push. A shape is not
//! editable locally while another user's unexpired lock is on it; the
//! gesture is rejected with a notice naming the holder.

#[cfg(test)]
#[path = "locks_test.rs"]
mod locks_test;

use crate::consts::IDLE_DESELECT_MS;
use crate::presence::Roster;
use crate::protocol::Message;
use crate::shape::{PartialShape, Shape, ShapeId, ShapeStore, UserId};

/// A gesture was rejected because another user holds an unexpired lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDenied {
    /// The shape that is locked.
    pub shape_id: ShapeId,
    /// The lock holder's connection id, if known.
    pub holder: Option<UserId>,
    /// Display name for the notice, resolved from the roster with a
    /// `"another user"` fallback.
    pub holder_name: String,
}

impl LockDenied {
    /// The user-facing notice text.
    #[must_use]
    pub fn notice(&self) -> String {
        format!("This shape is being edited by {}", self.holder_name)
    }
}

/// Acquires and releases soft locks for the local user.
pub struct LockCoordinator {
    user_id: UserId,
}

impl LockCoordinator {
    /// Create a coordinator locking on behalf of `user_id`.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    /// Check that every shape in `shape_ids` is editable by the local user
    /// at `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns the first [`LockDenied`] for a shape locked by another user
    /// whose lock has not yet expired. Missing shapes are skipped.
    pub fn check_editable(
        &self,
        store: &ShapeStore,
        shape_ids: &[ShapeId],
        roster: &Roster,
        now_ms: i64,
    ) -> Result<(), LockDenied> {
        for id in shape_ids {
            let Some(shape) = store.get(id) else {
                continue;
            };
            if shape.is_locked_by_other(self.user_id, now_ms) {
                return Err(LockDenied {
                    shape_id: *id,
                    holder: shape.locked_by,
                    holder_name: roster.display_name(shape.locked_by),
                });
            }
        }
        Ok(())
    }

    /// Lock fields for an acquire at `now_ms`.
    #[must_use]
    pub fn acquire_fields(&self, now_ms: i64) -> PartialShape {
        PartialShape {
            locked_at: Some(Some(now_ms)),
            locked_by: Some(Some(self.user_id)),
            ..PartialShape::default()
        }
    }

    /// Lock fields for a release.
    #[must_use]
    pub fn release_fields() -> PartialShape {
        PartialShape {
            locked_at: Some(None),
            locked_by: Some(None),
            ..PartialShape::default()
        }
    }

    /// Build one `SHAPE_UPDATE` per shape claiming the lock, and mirror the
    /// claim into the local store so contention checks see it immediately.
    pub fn acquire(
        &self,
        store: &mut ShapeStore,
        shape_ids: &[ShapeId],
        now_ms: i64,
    ) -> Vec<Message> {
        let fields = self.acquire_fields(now_ms);
        shape_ids
            .iter()
            .filter(|id| store.apply_partial(id, &fields))
            .map(|id| Message::shape_update(*id, fields.clone()))
            .collect()
    }

    /// Build one `SHAPE_UPDATE` per shape releasing the lock, mirrored into
    /// the local store.
    pub fn release(&self, store: &mut ShapeStore, shape_ids: &[ShapeId]) -> Vec<Message> {
        let fields = Self::release_fields();
        shape_ids
            .iter()
            .filter(|id| store.apply_partial(id, &fields))
            .map(|id| Message::shape_update(*id, fields.clone()))
            .collect()
    }

    /// Whether a selected shape should be auto-cleared from the selection:
    /// the local lock has expired **and** the local cursor has been idle
    /// for the deselect threshold. Requiring both avoids deselect flicker
    /// when an active edit merely straddles the lock timeout.
    #[must_use]
    pub fn should_autoclear(&self, shape: &Shape, last_activity_ms: i64, now_ms: i64) -> bool {
        let own_lock_expired =
            shape.locked_by == Some(self.user_id) && !shape.is_locked(now_ms);
        own_lock_expired && now_ms.saturating_sub(last_activity_ms) >= IDLE_DESELECT_MS
    }
}
