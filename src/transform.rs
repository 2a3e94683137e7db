//! Multi-shape gesture math: group drag, resize, and rotate.
//!
//! Each gesture is an explicit context struct created at gesture start and
//! consumed at gesture end, so every baseline (start positions, cached
//! offsets, last computed targets) lives in one place instead of ambient
//! mutable cells shared between callbacks.
//!
//! The first shape of the selection is the primary: its position is driven
//! directly by the input device and never recomputed, which avoids feedback
//! jitter. Every other selected shape caches a `{dx, dy}` offset from the
//! primary at gesture start and follows at `primary + offset`. Canvas-bounds
//! clamping is evaluated per shape against its own geometry — a clamped
//! primary does not un-clamp followers, and vice versa.

#[cfg(test)]
#[path = "transform_test.rs"]
mod transform_test;

use std::collections::HashMap;

use crate::consts::GROUP_THROTTLE_MS;
use crate::history::{EntrySource, HistoryEntry, Operation};
use crate::shape::{PartialShape, ShapeId, ShapeStore, wrap_rotation};

/// Canvas dimensions that shape positions are clamped against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasBounds {
    /// Canvas width.
    pub width: f64,
    /// Canvas height.
    pub height: f64,
}

impl CanvasBounds {
    /// Clamp a bounding-box top-left so a `w × h` shape stays on canvas.
    #[must_use]
    pub fn clamp(&self, x: f64, y: f64, w: f64, h: f64) -> (f64, f64) {
        let max_x = (self.width - w).max(0.0);
        let max_y = (self.height - h).max(0.0);
        (x.clamp(0.0, max_x), y.clamp(0.0, max_y))
    }
}

/// Per-member baseline captured at gesture start.
#[derive(Debug, Clone)]
struct Member {
    id: ShapeId,
    /// Offset from the primary's position at gesture start. Zero for the
    /// primary itself.
    dx: f64,
    dy: f64,
    start_x: f64,
    start_y: f64,
    start_w: f64,
    start_h: f64,
    start_rotation: f64,
    /// Circle shapes scale their radius instead of width/height.
    uses_radius: bool,
    /// Text shapes scale their font size instead of width/height.
    uses_font: bool,
    start_radius: f64,
    start_font_size: f64,
}

fn capture_members(store: &ShapeStore, selection: &[ShapeId]) -> Option<Vec<Member>> {
    let primary = store.get(selection.first()?)?;
    let (px, py) = (primary.x, primary.y);
    let mut members = Vec::with_capacity(selection.len());
    for id in selection {
        let Some(shape) = store.get(id) else {
            continue;
        };
        members.push(Member {
            id: *id,
            dx: shape.x - px,
            dy: shape.y - py,
            start_x: shape.x,
            start_y: shape.y,
            start_w: shape.bounds_width(),
            start_h: shape.bounds_height(),
            start_rotation: shape.rotation,
            uses_radius: shape.radius.is_some(),
            uses_font: shape.font_size.is_some(),
            start_radius: shape.radius.unwrap_or(0.0),
            start_font_size: shape.font_size.unwrap_or(0.0),
        });
    }
    if members.is_empty() { None } else { Some(members) }
}

/// Throttle gate shared by the gesture kinds: one network batch per tick.
#[derive(Debug, Clone, Copy)]
struct Throttle {
    last_sent_at: i64,
}

impl Throttle {
    fn new() -> Self {
        Self { last_sent_at: i64::MIN }
    }

    fn ready(&mut self, now_ms: i64) -> bool {
        if now_ms.saturating_sub(self.last_sent_at) >= GROUP_THROTTLE_MS {
            self.last_sent_at = now_ms;
            true
        } else {
            false
        }
    }
}

/// Updates and the batched history entry produced when a gesture ends.
#[derive(Debug, Clone)]
pub struct GestureOutcome {
    /// Every shape that was part of the gesture, whether or not it ended up
    /// with an update. Callers use this to close per-shape bookkeeping even
    /// for a gesture that never moved.
    pub members: Vec<ShapeId>,
    /// Final per-shape updates, taken from the most recently computed
    /// targets rather than re-read from shape state, so the outcome cannot
    /// race with the last throttled tick.
    pub updates: Vec<(ShapeId, PartialShape)>,
    /// One batched undo/redo entry covering every member, stamped with the
    /// gesture's start timestamp.
    pub history: HistoryEntry,
}

fn batch_entry(
    members: &[Member],
    undo_of: impl Fn(&Member) -> PartialShape,
    redo_of: impl Fn(&Member) -> Option<PartialShape>,
    started_at: i64,
) -> HistoryEntry {
    let mut undo = Vec::new();
    let mut redo = Vec::new();
    for member in members {
        let Some(after) = redo_of(member) else {
            continue;
        };
        undo.push(Operation::Update { shape_id: member.id, fields: undo_of(member) });
        redo.push(Operation::Update { shape_id: member.id, fields: after });
    }
    // Undo operations run in listed order; reversing restores the batch
    // back-to-front.
    undo.reverse();
    HistoryEntry { undo, redo, timestamp: started_at, source: EntrySource::User }
}

/// An in-progress multi-shape drag.
pub struct DragGesture {
    started_at: i64,
    members: Vec<Member>,
    last_positions: HashMap<ShapeId, (f64, f64)>,
    throttle: Throttle,
}

impl DragGesture {
    /// Capture baselines for a drag of `selection` (primary first).
    /// Returns `None` when the primary shape is missing from the store.
    #[must_use]
    pub fn begin(store: &ShapeStore, selection: &[ShapeId], now_ms: i64) -> Option<Self> {
        Some(Self {
            started_at: now_ms,
            members: capture_members(store, selection)?,
            last_positions: HashMap::new(),
            throttle: Throttle::new(),
        })
    }

    /// The gesture's start timestamp.
    #[must_use]
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Ids of every gesture member, in selection order.
    #[must_use]
    pub fn member_ids(&self) -> Vec<ShapeId> {
        self.members.iter().map(|m| m.id).collect()
    }

    /// Move the primary to `(primary_x, primary_y)` and recompute every
    /// follower at `primary + offset`, clamping each shape independently
    /// against `bounds`. Returns the per-shape position updates to apply
    /// optimistically.
    pub fn update(
        &mut self,
        primary_x: f64,
        primary_y: f64,
        bounds: CanvasBounds,
    ) -> Vec<(ShapeId, PartialShape)> {
        let mut updates = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let (x, y) = bounds.clamp(
                primary_x + member.dx,
                primary_y + member.dy,
                member.start_w,
                member.start_h,
            );
            self.last_positions.insert(member.id, (x, y));
            updates.push((member.id, PartialShape::at(x, y)));
        }
        updates
    }

    /// Whether a network batch should be flushed now (~30 fps).
    pub fn should_flush(&mut self, now_ms: i64) -> bool {
        self.throttle.ready(now_ms)
    }

    /// End the drag, producing final updates and the batched history entry.
    #[must_use]
    pub fn finish(self) -> GestureOutcome {
        let members = self.member_ids();
        let last = &self.last_positions;
        let updates = self
            .members
            .iter()
            .filter_map(|m| last.get(&m.id).map(|&(x, y)| (m.id, PartialShape::at(x, y))))
            .collect();
        let history = batch_entry(
            &self.members,
            |m| PartialShape::at(m.start_x, m.start_y),
            |m| last.get(&m.id).map(|&(x, y)| PartialShape::at(x, y)),
            self.started_at,
        );
        GestureOutcome { members, updates, history }
    }
}

/// An in-progress multi-shape resize, driven by the primary's new size.
pub struct ResizeGesture {
    started_at: i64,
    members: Vec<Member>,
    primary_start_w: f64,
    primary_start_h: f64,
    last_fields: HashMap<ShapeId, PartialShape>,
    throttle: Throttle,
}

impl ResizeGesture {
    /// Capture baselines for a resize of `selection` (primary first).
    #[must_use]
    pub fn begin(store: &ShapeStore, selection: &[ShapeId], now_ms: i64) -> Option<Self> {
        let members = capture_members(store, selection)?;
        let primary_start_w = members[0].start_w.max(1.0);
        let primary_start_h = members[0].start_h.max(1.0);
        Some(Self {
            started_at: now_ms,
            members,
            primary_start_w,
            primary_start_h,
            last_fields: HashMap::new(),
            throttle: Throttle::new(),
        })
    }

    /// The gesture's start timestamp.
    #[must_use]
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Ids of every gesture member, in selection order.
    #[must_use]
    pub fn member_ids(&self) -> Vec<ShapeId> {
        self.members.iter().map(|m| m.id).collect()
    }

    /// Resize the primary to `primary_w × primary_h`; every member scales
    /// its own size and its offset from the primary by the same factors,
    /// then clamps its position against `bounds`.
    pub fn update(
        &mut self,
        primary_w: f64,
        primary_h: f64,
        bounds: CanvasBounds,
    ) -> Vec<(ShapeId, PartialShape)> {
        let fx = (primary_w / self.primary_start_w).max(0.01);
        let fy = (primary_h / self.primary_start_h).max(0.01);
        let (px, py) = (self.members[0].start_x, self.members[0].start_y);

        let mut updates = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let w = member.start_w * fx;
            let h = member.start_h * fy;
            let (x, y) = bounds.clamp(px + member.dx * fx, py + member.dy * fy, w, h);

            let mut fields = PartialShape::at(x, y);
            if member.uses_radius {
                // Circles stay circular: scale by the smaller factor.
                fields.radius = Some(member.start_radius * fx.min(fy));
            } else if member.uses_font {
                fields.font_size = Some(member.start_font_size * fx.min(fy));
            } else {
                fields.width = Some(w);
                fields.height = Some(h);
            }
            self.last_fields.insert(member.id, fields.clone());
            updates.push((member.id, fields));
        }
        updates
    }

    /// Whether a network batch should be flushed now.
    pub fn should_flush(&mut self, now_ms: i64) -> bool {
        self.throttle.ready(now_ms)
    }

    /// End the resize, producing final updates and the batched history entry.
    #[must_use]
    pub fn finish(self) -> GestureOutcome {
        let members = self.member_ids();
        let last = &self.last_fields;
        let updates = self
            .members
            .iter()
            .filter_map(|m| last.get(&m.id).map(|f| (m.id, f.clone())))
            .collect();
        let history = batch_entry(
            &self.members,
            |m| {
                let mut before = PartialShape::at(m.start_x, m.start_y);
                if m.uses_radius {
                    before.radius = Some(m.start_radius);
                } else if m.uses_font {
                    before.font_size = Some(m.start_font_size);
                } else {
                    before.width = Some(m.start_w);
                    before.height = Some(m.start_h);
                }
                before
            },
            |m| last.get(&m.id).cloned(),
            self.started_at,
        );
        GestureOutcome { members, updates, history }
    }
}

/// An in-progress multi-shape rotation, driven by an angle delta on the
/// primary. Every member's rotation is its start rotation plus the same
/// delta, wrapped into `[0, 360)`.
pub struct RotateGesture {
    started_at: i64,
    members: Vec<Member>,
    last_rotations: HashMap<ShapeId, f64>,
    throttle: Throttle,
}

impl RotateGesture {
    /// Capture baselines for a rotation of `selection` (primary first).
    #[must_use]
    pub fn begin(store: &ShapeStore, selection: &[ShapeId], now_ms: i64) -> Option<Self> {
        Some(Self {
            started_at: now_ms,
            members: capture_members(store, selection)?,
            last_rotations: HashMap::new(),
            throttle: Throttle::new(),
        })
    }

    /// The gesture's start timestamp.
    #[must_use]
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Ids of every gesture member, in selection order.
    #[must_use]
    pub fn member_ids(&self) -> Vec<ShapeId> {
        self.members.iter().map(|m| m.id).collect()
    }

    /// Apply `delta_degrees` relative to every member's start rotation.
    pub fn update(&mut self, delta_degrees: f64) -> Vec<(ShapeId, PartialShape)> {
        let mut updates = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let rotation = wrap_rotation(member.start_rotation + delta_degrees);
            self.last_rotations.insert(member.id, rotation);
            updates.push((
                member.id,
                PartialShape { rotation: Some(rotation), ..PartialShape::default() },
            ));
        }
        updates
    }

    /// Whether a network batch should be flushed now.
    pub fn should_flush(&mut self, now_ms: i64) -> bool {
        self.throttle.ready(now_ms)
    }

    /// End the rotation, producing final updates and the batched history entry.
    #[must_use]
    pub fn finish(self) -> GestureOutcome {
        let members = self.member_ids();
        let last = &self.last_rotations;
        let updates = self
            .members
            .iter()
            .filter_map(|m| {
                last.get(&m.id).map(|&r| {
                    (m.id, PartialShape { rotation: Some(r), ..PartialShape::default() })
                })
            })
            .collect();
        let history = batch_entry(
            &self.members,
            |m| PartialShape { rotation: Some(m.start_rotation), ..PartialShape::default() },
            |m| {
                last.get(&m.id)
                    .map(|&r| PartialShape { rotation: Some(r), ..PartialShape::default() })
            },
            self.started_at,
        );
        GestureOutcome { members, updates, history }
    }
}
