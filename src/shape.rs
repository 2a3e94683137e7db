//! Shape model and the client-side shape store.
//!
//! This module defines the canvas shape record as it exists on the wire and
//! in memory (`Shape`, `ShapeKind`), a sparse-update type for incremental
//! edits (`PartialShape`), and the runtime store that owns all live shapes
//! for one canvas (`ShapeStore`).
//!
//! Data flows into this layer from the network (message dispatch) and from
//! the gesture coordinators (optimistic local mutations). The rendering
//! layer reads from `ShapeStore` via `sorted_shapes` to determine draw order.

#[cfg(test)]
#[path = "shape_test.rs"]
mod shape_test;

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::consts::LOCK_TIMEOUT_MS;

/// Deserialize a double-`Option` field. Plain serde would decode a present
/// `null` into the outer `None` ("unchanged"); this maps it to `Some(None)`
/// ("clear") instead. Absent fields still fall to `None` via
/// `#[serde(default)]`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Unique identifier for a canvas shape.
pub type ShapeId = Uuid;

/// Unique identifier for a user.
pub type UserId = Uuid;

/// The kind of a canvas shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// Axis-aligned rectangle sized by `width`/`height`.
    Rectangle,
    /// Circle sized by `radius`.
    Circle,
    /// Text block sized by `font_size`.
    Text,
    /// Bitmap image sized by `width`/`height`.
    Image,
    /// Vector icon sized by `width`/`height`.
    Icon,
}

/// A canvas shape as stored locally and on the wire.
///
/// Geometry fields are kind-specific: rectangles, images and icons carry
/// `width`/`height`, circles carry `radius`, text carries `font_size`.
/// Fields that do not apply to the kind stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    /// Unique identifier, server-assigned or client-generated.
    pub id: ShapeId,
    /// Shape kind.
    #[serde(rename = "type")]
    pub kind: ShapeKind,
    /// Left edge of the bounding box in canvas coordinates.
    pub x: f64,
    /// Top edge of the bounding box in canvas coordinates.
    pub y: f64,
    /// Width, for rectangle/image/icon shapes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Height, for rectangle/image/icon shapes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Radius, for circle shapes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    /// Font size, for text shapes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    /// Text content, for text shapes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Clockwise rotation in degrees, normalized to `[0, 360)`.
    #[serde(default)]
    pub rotation: f64,
    /// Fill color as a CSS color string.
    pub color: String,
    /// Opacity in `0..=1`.
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    /// Shadow color, if the shape has a shadow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_color: Option<String>,
    /// Shadow strength in `0..=1`, if the shape has a shadow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_strength: Option<f64>,
    /// Border color, if the shape has a border.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    /// Border width, if the shape has a border.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_width: Option<f64>,
    /// Weak group reference: shapes sharing a `group_id` move together.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    /// Stacking order; lower values are drawn beneath higher values. Not unique.
    #[serde(default)]
    pub z_index: i64,
    /// Epoch milliseconds when the current soft lock was taken, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<i64>,
    /// Holder of the current soft lock, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<UserId>,
}

fn default_opacity() -> f64 {
    1.0
}

impl Shape {
    /// Whether the shape is currently soft-locked: `locked_at` is set and
    /// less than the lock timeout has elapsed. Locks expire by time alone;
    /// there is no explicit release message.
    #[must_use]
    pub fn is_locked(&self, now_ms: i64) -> bool {
        self.locked_at
            .is_some_and(|at| now_ms.saturating_sub(at) < LOCK_TIMEOUT_MS)
    }

    /// Whether the shape is locked by someone other than `user` at `now_ms`.
    #[must_use]
    pub fn is_locked_by_other(&self, user: UserId, now_ms: i64) -> bool {
        self.is_locked(now_ms) && self.locked_by.is_some_and(|by| by != user)
    }

    /// Bounding-box width used for canvas clamping, regardless of kind.
    #[must_use]
    pub fn bounds_width(&self) -> f64 {
        match self.kind {
            ShapeKind::Circle => self.radius.unwrap_or(0.0) * 2.0,
            _ => self.width.unwrap_or(0.0),
        }
    }

    /// Bounding-box height used for canvas clamping, regardless of kind.
    #[must_use]
    pub fn bounds_height(&self) -> f64 {
        match self.kind {
            ShapeKind::Circle => self.radius.unwrap_or(0.0) * 2.0,
            _ => self.height.unwrap_or(0.0),
        }
    }
}

/// Normalize a rotation in degrees into `[0, 360)`.
#[must_use]
pub fn wrap_rotation(degrees: f64) -> f64 {
    let r = degrees % 360.0;
    if r < 0.0 { r + 360.0 } else { r }
}

/// Sparse update for a shape. Only present fields are applied.
///
/// Lock and group fields use a double `Option` so the wire can distinguish
/// "leave unchanged" (absent) from "clear" (explicit null).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialShape {
    /// New x, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    /// New y, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// New width, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// New height, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// New radius, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    /// New font size, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    /// New text content, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// New rotation in degrees, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    /// New fill color, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// New opacity, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    /// New shadow color, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_color: Option<String>,
    /// New shadow strength, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_strength: Option<f64>,
    /// New border color, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    /// New border width, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_width: Option<f64>,
    /// New z-index, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    /// Group membership: absent = unchanged, `Some(None)` = ungroup.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub group_id: Option<Option<Uuid>>,
    /// Lock timestamp: absent = unchanged, `Some(None)` = release.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub locked_at: Option<Option<i64>>,
    /// Lock holder: absent = unchanged, `Some(None)` = release.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub locked_by: Option<Option<UserId>>,
}

impl PartialShape {
    /// A partial moving a shape to `(x, y)`.
    #[must_use]
    pub fn at(x: f64, y: f64) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::default() }
    }

    /// Whether no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay every field present in `preserved` onto `self`, replacing
    /// whatever the server sent for those fields. Fields absent from
    /// `preserved` are left untouched.
    pub fn overlay(&mut self, preserved: &PartialShape) {
        macro_rules! keep {
            ($($field:ident),* $(,)?) => {
                $(if preserved.$field.is_some() {
                    self.$field = preserved.$field;
                })*
            };
        }
        macro_rules! keep_cloned {
            ($($field:ident),* $(,)?) => {
                $(if preserved.$field.is_some() {
                    self.$field.clone_from(&preserved.$field);
                })*
            };
        }
        keep!(
            x,
            y,
            width,
            height,
            radius,
            font_size,
            rotation,
            opacity,
            shadow_strength,
            border_width,
            z_index,
            group_id,
            locked_at,
            locked_by,
        );
        keep_cloned!(text, color, shadow_color, border_color);
    }

    /// Merge `other` into `self`: fields present in `other` win. Used to
    /// accumulate the latest local value per field across a gesture.
    pub fn merge(&mut self, other: &PartialShape) {
        self.overlay(other);
    }

    /// Capture the current values of the fields set in `self` from `shape`,
    /// producing the inverse partial needed to undo this update.
    #[must_use]
    pub fn capture_before(&self, shape: &Shape) -> PartialShape {
        let mut before = PartialShape::default();
        if self.x.is_some() {
            before.x = Some(shape.x);
        }
        if self.y.is_some() {
            before.y = Some(shape.y);
        }
        if self.width.is_some() {
            before.width = shape.width;
        }
        if self.height.is_some() {
            before.height = shape.height;
        }
        if self.radius.is_some() {
            before.radius = shape.radius;
        }
        if self.font_size.is_some() {
            before.font_size = shape.font_size;
        }
        if self.text.is_some() {
            before.text = shape.text.clone();
        }
        if self.rotation.is_some() {
            before.rotation = Some(shape.rotation);
        }
        if self.color.is_some() {
            before.color = Some(shape.color.clone());
        }
        if self.opacity.is_some() {
            before.opacity = Some(shape.opacity);
        }
        if self.shadow_color.is_some() {
            before.shadow_color = shape.shadow_color.clone();
        }
        if self.shadow_strength.is_some() {
            before.shadow_strength = shape.shadow_strength;
        }
        if self.border_color.is_some() {
            before.border_color = shape.border_color.clone();
        }
        if self.border_width.is_some() {
            before.border_width = shape.border_width;
        }
        if self.z_index.is_some() {
            before.z_index = Some(shape.z_index);
        }
        if self.group_id.is_some() {
            before.group_id = Some(shape.group_id);
        }
        if self.locked_at.is_some() {
            before.locked_at = Some(shape.locked_at);
        }
        if self.locked_by.is_some() {
            before.locked_by = Some(shape.locked_by);
        }
        before
    }
}

/// In-memory store of the shapes on one canvas.
///
/// The single mutable shape map of the session; mutated only via the
/// message-driven reducers and the gesture coordinators.
pub struct ShapeStore {
    shapes: HashMap<ShapeId, Shape>,
}

impl ShapeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { shapes: HashMap::new() }
    }

    /// Insert or replace a shape.
    pub fn insert(&mut self, shape: Shape) {
        self.shapes.insert(shape.id, shape);
    }

    /// Remove a shape by id, returning it if it was present.
    pub fn remove(&mut self, id: &ShapeId) -> Option<Shape> {
        self.shapes.remove(id)
    }

    /// Return a reference to a shape by id.
    #[must_use]
    pub fn get(&self, id: &ShapeId) -> Option<&Shape> {
        self.shapes.get(id)
    }

    /// Apply a partial update to an existing shape. Rotation is normalized
    /// into `[0, 360)`. Returns false if the shape doesn't exist.
    pub fn apply_partial(&mut self, id: &ShapeId, partial: &PartialShape) -> bool {
        let Some(shape) = self.shapes.get_mut(id) else {
            return false;
        };
        if let Some(x) = partial.x {
            shape.x = x;
        }
        if let Some(y) = partial.y {
            shape.y = y;
        }
        if let Some(w) = partial.width {
            shape.width = Some(w);
        }
        if let Some(h) = partial.height {
            shape.height = Some(h);
        }
        if let Some(r) = partial.radius {
            shape.radius = Some(r);
        }
        if let Some(fs) = partial.font_size {
            shape.font_size = Some(fs);
        }
        if let Some(ref text) = partial.text {
            shape.text = Some(text.clone());
        }
        if let Some(rot) = partial.rotation {
            shape.rotation = wrap_rotation(rot);
        }
        if let Some(ref color) = partial.color {
            shape.color = color.clone();
        }
        if let Some(opacity) = partial.opacity {
            shape.opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(ref sc) = partial.shadow_color {
            shape.shadow_color = Some(sc.clone());
        }
        if let Some(ss) = partial.shadow_strength {
            shape.shadow_strength = Some(ss.clamp(0.0, 1.0));
        }
        if let Some(ref bc) = partial.border_color {
            shape.border_color = Some(bc.clone());
        }
        if let Some(bw) = partial.border_width {
            shape.border_width = Some(bw);
        }
        if let Some(z) = partial.z_index {
            shape.z_index = z;
        }
        if let Some(group) = partial.group_id {
            shape.group_id = group;
        }
        if let Some(at) = partial.locked_at {
            shape.locked_at = at;
        }
        if let Some(by) = partial.locked_by {
            shape.locked_by = by;
        }
        true
    }

    /// Replace all shapes with a full snapshot.
    pub fn load_snapshot(&mut self, shapes: Vec<Shape>) {
        self.shapes.clear();
        for shape in shapes {
            self.shapes.insert(shape.id, shape);
        }
    }

    /// Ids of all shapes sharing `group_id`.
    #[must_use]
    pub fn group_members(&self, group_id: Uuid) -> Vec<ShapeId> {
        self.shapes
            .values()
            .filter(|s| s.group_id == Some(group_id))
            .map(|s| s.id)
            .collect()
    }

    /// Return all shapes sorted by `(z_index, id)` for draw order.
    #[must_use]
    pub fn sorted_shapes(&self) -> Vec<&Shape> {
        let mut shapes: Vec<&Shape> = self.shapes.values().collect();
        shapes.sort_by(|a, b| a.z_index.cmp(&b.z_index).then_with(|| a.id.cmp(&b.id)));
        shapes
    }

    /// Number of shapes currently in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Returns `true` if the store contains no shapes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

impl Default for ShapeStore {
    fn default() -> Self {
        Self::new()
    }
}
