//! The canvas session: composition root of the sync core.
//!
//! `CanvasSession` owns the shape store, roster, grace registry, history,
//! coalescer, and the active gesture context. It is explicitly constructed
//! by the host at canvas-open and torn down at canvas-close — there is no
//! module-level singleton. The rendering layer calls the gesture methods;
//! the transport layer feeds inbound messages to [`CanvasSession::handle_message`].
//!
//! Every method is synchronous and returns `Vec<Effect>`: messages for the
//! host to hand to the connection manager, user-facing notices, and render
//! requests. Nothing in here performs I/O or panics on bad input — a
//! malformed inbound payload is logged and dropped, and a rejected gesture
//! is reported as a notice, per the error-handling contract.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::history::{CoalesceKey, Coalescer, EntrySource, HistoryEntry, HistoryManager, Operation};
use crate::locks::LockCoordinator;
use crate::presence::Roster;
use crate::protocol::{
    ActiveUsersPayload, CanvasMetaUpdate, CanvasSyncPayload, CursorMovePayload, ErrorPayload,
    Message, MessageType, ShapeDeletePayload, ShapesBatchUpdatePayload, ShapeUpdatePayload,
    UserLeavePayload,
};
use crate::reconcile::GraceRegistry;
use crate::shape::{PartialShape, Shape, ShapeId, ShapeStore, UserId};
use crate::transform::{
    CanvasBounds, DragGesture, GestureOutcome, ResizeGesture, RotateGesture,
};

/// Side effect for the host to process, in order.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Hand this message to the connection manager for sending.
    Send(Message),
    /// Show a transient user-facing notice.
    Notice(String),
    /// The visible state changed; redraw.
    Render,
}

/// The gesture currently in progress, if any.
enum ActiveGesture {
    None,
    Drag(DragGesture),
    Resize(ResizeGesture),
    Rotate(RotateGesture),
}

/// Canvas-level metadata mirrored from the server.
#[derive(Debug, Clone, Default)]
pub struct CanvasMetaState {
    /// Canvas display name.
    pub name: Option<String>,
    /// Background color as a CSS color string.
    pub background_color: Option<String>,
}

/// One client's live session on a canvas.
pub struct CanvasSession {
    user_id: UserId,
    canvas_id: Uuid,
    bounds: CanvasBounds,
    store: ShapeStore,
    roster: Roster,
    grace: GraceRegistry,
    history: HistoryManager,
    coalescer: Coalescer,
    locks: LockCoordinator,
    /// Ordered selection; the first id is the primary shape.
    selection: Vec<ShapeId>,
    gesture: ActiveGesture,
    meta: CanvasMetaState,
    /// Last local cursor/gesture activity, for the idle-deselect rule.
    last_activity_ms: i64,
}

impl CanvasSession {
    /// Create a session for `user_id` on `canvas_id`.
    #[must_use]
    pub fn new(user_id: UserId, canvas_id: Uuid, bounds: CanvasBounds) -> Self {
        Self {
            user_id,
            canvas_id,
            bounds,
            store: ShapeStore::new(),
            roster: Roster::new(),
            grace: GraceRegistry::new(),
            history: HistoryManager::new(),
            coalescer: Coalescer::new(),
            locks: LockCoordinator::new(user_id),
            selection: Vec::new(),
            gesture: ActiveGesture::None,
            meta: CanvasMetaState::default(),
            last_activity_ms: 0,
        }
    }

    /// The local user id.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The shape store, for the rendering layer.
    #[must_use]
    pub fn store(&self) -> &ShapeStore {
        &self.store
    }

    /// The active-user roster, for the rendering layer.
    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// The current selection, primary first.
    #[must_use]
    pub fn selection(&self) -> &[ShapeId] {
        &self.selection
    }

    /// Canvas metadata (name, background color).
    #[must_use]
    pub fn meta(&self) -> &CanvasMetaState {
        &self.meta
    }

    /// The undo/redo history.
    #[must_use]
    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    fn outbound(&self, mut message: Message) -> Effect {
        message = message.from_user(self.user_id, self.canvas_id);
        Effect::Send(message)
    }

    // ── Inbound dispatch ────────────────────────────────────────

    /// Process one inbound message from the socket.
    ///
    /// Messages carrying the local `userId` are ignored (echo suppression);
    /// malformed payloads are logged and dropped without unwinding into the
    /// reconciliation or history components.
    pub fn handle_message(&mut self, message: &Message, now_ms: i64) -> Vec<Effect> {
        if message.user_id == Some(self.user_id) {
            return Vec::new();
        }

        match message.kind {
            MessageType::CanvasSync => self.on_canvas_sync(message),
            MessageType::CanvasUpdate => self.on_canvas_update(message),
            MessageType::ShapeCreate => self.on_shape_create(message),
            MessageType::ShapeUpdate => self.on_shape_update(message, now_ms),
            MessageType::ShapesBatchUpdate => self.on_shapes_batch(message, now_ms),
            MessageType::ShapeDelete => self.on_shape_delete(message),
            MessageType::CursorMove => self.on_cursor_move(message),
            MessageType::UserJoin => self.on_user_join(message),
            MessageType::UserLeave => self.on_user_leave(message),
            MessageType::ActiveUsers => self.on_active_users(message),
            MessageType::Ping => vec![self.outbound(Message::new(
                MessageType::Pong,
                serde_json::Value::Null,
            ))],
            MessageType::Pong | MessageType::ReconnectRequest => Vec::new(),
            MessageType::Error => self.on_error(message),
        }
    }

    fn on_canvas_sync(&mut self, message: &Message) -> Vec<Effect> {
        let payload: CanvasSyncPayload = match message.decode_payload() {
            Ok(p) => p,
            Err(e) => return drop_malformed(&e),
        };
        self.store.load_snapshot(payload.shapes);
        self.roster.replace(payload.users);
        self.meta.name = payload.canvas.name;
        self.meta.background_color = payload.canvas.background_color;
        self.selection.retain(|id| self.store.get(id).is_some());
        vec![Effect::Render]
    }

    fn on_canvas_update(&mut self, message: &Message) -> Vec<Effect> {
        let payload: CanvasMetaUpdate = match message.decode_payload() {
            Ok(p) => p,
            Err(e) => return drop_malformed(&e),
        };
        if let Some(name) = payload.name {
            self.meta.name = Some(name);
        }
        if let Some(color) = payload.background_color {
            self.meta.background_color = Some(color);
        }
        vec![Effect::Render]
    }

    fn on_shape_create(&mut self, message: &Message) -> Vec<Effect> {
        let shape: Shape = match message.decode_payload() {
            Ok(s) => s,
            Err(e) => return drop_malformed(&e),
        };
        self.store.insert(shape);
        vec![Effect::Render]
    }

    fn on_shape_update(&mut self, message: &Message, now_ms: i64) -> Vec<Effect> {
        let mut payload: ShapeUpdatePayload = match message.decode_payload() {
            Ok(p) => p,
            Err(e) => return drop_malformed(&e),
        };
        self.grace.filter_incoming(payload.shape_id, &mut payload.fields, now_ms);
        self.store.apply_partial(&payload.shape_id, &payload.fields);
        vec![Effect::Render]
    }

    fn on_shapes_batch(&mut self, message: &Message, now_ms: i64) -> Vec<Effect> {
        let payload: ShapesBatchUpdatePayload = match message.decode_payload() {
            Ok(p) => p,
            Err(e) => return drop_malformed(&e),
        };
        // One pass over the whole batch before a single render, so partial
        // application is never visible.
        for mut update in payload.shapes {
            self.grace.filter_incoming(update.shape_id, &mut update.fields, now_ms);
            self.store.apply_partial(&update.shape_id, &update.fields);
        }
        vec![Effect::Render]
    }

    fn on_shape_delete(&mut self, message: &Message) -> Vec<Effect> {
        let payload: ShapeDeletePayload = match message.decode_payload() {
            Ok(p) => p,
            Err(e) => return drop_malformed(&e),
        };
        for id in &payload.shape_ids {
            self.store.remove(id);
            self.grace.forget(*id);
        }
        self.selection.retain(|id| !payload.shape_ids.contains(id));
        vec![Effect::Render]
    }

    fn on_cursor_move(&mut self, message: &Message) -> Vec<Effect> {
        let payload: CursorMovePayload = match message.decode_payload() {
            Ok(p) => p,
            Err(e) => return drop_malformed(&e),
        };
        let Some(user_id) = message.user_id else {
            return Vec::new();
        };
        self.roster.set_cursor(user_id, payload.into());
        vec![Effect::Render]
    }

    fn on_user_join(&mut self, message: &Message) -> Vec<Effect> {
        match message.decode_payload() {
            Ok(user) => {
                self.roster.join(user);
                vec![Effect::Render]
            }
            Err(e) => drop_malformed(&e),
        }
    }

    fn on_user_leave(&mut self, message: &Message) -> Vec<Effect> {
        let payload: UserLeavePayload = match message.decode_payload() {
            Ok(p) => p,
            Err(e) => return drop_malformed(&e),
        };
        self.roster.leave(payload.user_id);
        vec![Effect::Render]
    }

    fn on_active_users(&mut self, message: &Message) -> Vec<Effect> {
        let payload: ActiveUsersPayload = match message.decode_payload() {
            Ok(p) => p,
            Err(e) => return drop_malformed(&e),
        };
        self.roster.replace(payload.users);
        vec![Effect::Render]
    }

    fn on_error(&mut self, message: &Message) -> Vec<Effect> {
        let payload: ErrorPayload = match message.decode_payload() {
            Ok(p) => p,
            Err(e) => return drop_malformed(&e),
        };
        warn!(code = payload.code.as_deref(), "server error: {}", payload.message);
        vec![Effect::Notice(payload.message)]
    }

    // ── Selection and locks ─────────────────────────────────────

    /// Replace the selection with `ids` (primary first). Shapes locked by
    /// another live, unexpired session are excluded with a notice; locks
    /// are released for shapes leaving the selection and acquired for
    /// shapes entering it.
    pub fn select(&mut self, ids: &[ShapeId], now_ms: i64) -> Vec<Effect> {
        // A selection change invalidates any gesture in progress; close its
        // grace entries so they don't outlive the gesture.
        self.abandon_gesture(now_ms);
        let mut effects = Vec::new();
        let mut accepted = Vec::new();
        for id in ids {
            let Some(shape) = self.store.get(id) else {
                continue;
            };
            if shape.is_locked_by_other(self.user_id, now_ms) {
                let holder = self.roster.display_name(shape.locked_by);
                effects.push(Effect::Notice(format!("This shape is being edited by {holder}")));
                continue;
            }
            accepted.push(*id);
        }

        let leaving: Vec<ShapeId> = self
            .selection
            .iter()
            .copied()
            .filter(|id| !accepted.contains(id))
            .collect();
        let entering: Vec<ShapeId> = accepted
            .iter()
            .copied()
            .filter(|id| !self.selection.contains(id))
            .collect();

        for message in self.locks.release(&mut self.store, &leaving) {
            effects.push(self.outbound(message));
        }
        for message in self.locks.acquire(&mut self.store, &entering, now_ms) {
            effects.push(self.outbound(message));
        }

        self.selection = accepted;
        self.last_activity_ms = now_ms;
        effects.push(Effect::Render);
        effects
    }

    /// Clear the selection, releasing all held locks.
    pub fn clear_selection(&mut self, now_ms: i64) -> Vec<Effect> {
        self.select(&[], now_ms)
    }

    // ── Gestures ────────────────────────────────────────────────

    /// Start dragging the current selection. Rejected with a notice naming
    /// the lock holder when any selected shape is locked by another user.
    pub fn begin_drag(&mut self, now_ms: i64) -> Vec<Effect> {
        self.begin_gesture(now_ms, |store, selection, now| {
            DragGesture::begin(store, selection, now).map(ActiveGesture::Drag)
        })
    }

    /// Drive the drag: the primary shape follows the pointer, followers
    /// follow their cached offsets. Updates apply optimistically and flush
    /// to the network at most once per throttle tick.
    pub fn drag_move(&mut self, primary_x: f64, primary_y: f64, now_ms: i64) -> Vec<Effect> {
        let bounds = self.bounds;
        let ActiveGesture::Drag(ref mut gesture) = self.gesture else {
            return Vec::new();
        };
        let updates = gesture.update(primary_x, primary_y, bounds);
        let flush = gesture.should_flush(now_ms);
        self.apply_gesture_updates(&updates, flush, now_ms)
    }

    /// End the drag: send the final positions, record one batched history
    /// entry stamped at gesture start, and open the grace windows.
    pub fn end_drag(&mut self, now_ms: i64) -> Vec<Effect> {
        match std::mem::replace(&mut self.gesture, ActiveGesture::None) {
            ActiveGesture::Drag(gesture) => self.finish_gesture(gesture.finish(), now_ms),
            other => {
                self.gesture = other;
                Vec::new()
            }
        }
    }

    /// Start resizing the current selection.
    pub fn begin_resize(&mut self, now_ms: i64) -> Vec<Effect> {
        self.begin_gesture(now_ms, |store, selection, now| {
            ResizeGesture::begin(store, selection, now).map(ActiveGesture::Resize)
        })
    }

    /// Drive the resize from the primary's new size; every member scales by
    /// the same factors.
    pub fn resize_move(&mut self, primary_w: f64, primary_h: f64, now_ms: i64) -> Vec<Effect> {
        let bounds = self.bounds;
        let ActiveGesture::Resize(ref mut gesture) = self.gesture else {
            return Vec::new();
        };
        let updates = gesture.update(primary_w, primary_h, bounds);
        let flush = gesture.should_flush(now_ms);
        self.apply_gesture_updates(&updates, flush, now_ms)
    }

    /// End the resize.
    pub fn end_resize(&mut self, now_ms: i64) -> Vec<Effect> {
        match std::mem::replace(&mut self.gesture, ActiveGesture::None) {
            ActiveGesture::Resize(gesture) => self.finish_gesture(gesture.finish(), now_ms),
            other => {
                self.gesture = other;
                Vec::new()
            }
        }
    }

    /// Start rotating the current selection.
    pub fn begin_rotate(&mut self, now_ms: i64) -> Vec<Effect> {
        self.begin_gesture(now_ms, |store, selection, now| {
            RotateGesture::begin(store, selection, now).map(ActiveGesture::Rotate)
        })
    }

    /// Drive the rotation by a delta in degrees from gesture start.
    pub fn rotate_move(&mut self, delta_degrees: f64, now_ms: i64) -> Vec<Effect> {
        let ActiveGesture::Rotate(ref mut gesture) = self.gesture else {
            return Vec::new();
        };
        let updates = gesture.update(delta_degrees);
        let flush = gesture.should_flush(now_ms);
        self.apply_gesture_updates(&updates, flush, now_ms)
    }

    /// End the rotation.
    pub fn end_rotate(&mut self, now_ms: i64) -> Vec<Effect> {
        match std::mem::replace(&mut self.gesture, ActiveGesture::None) {
            ActiveGesture::Rotate(gesture) => self.finish_gesture(gesture.finish(), now_ms),
            other => {
                self.gesture = other;
                Vec::new()
            }
        }
    }

    /// Shared gesture-start path: reject on contention, refresh the locks,
    /// and install the gesture context. Any previous gesture is discarded
    /// so two writers never race on the same shapes.
    fn begin_gesture(
        &mut self,
        now_ms: i64,
        make: impl FnOnce(&ShapeStore, &[ShapeId], i64) -> Option<ActiveGesture>,
    ) -> Vec<Effect> {
        if self.selection.is_empty() {
            return Vec::new();
        }
        if let Err(denied) =
            self.locks.check_editable(&self.store, &self.selection, &self.roster, now_ms)
        {
            return vec![Effect::Notice(denied.notice())];
        }
        self.abandon_gesture(now_ms);

        let mut effects = Vec::new();
        let selection = self.selection.clone();
        for message in self.locks.acquire(&mut self.store, &selection, now_ms) {
            effects.push(self.outbound(message));
        }

        // Open live grace entries at the current values so an echo arriving
        // mid-gesture can never move the shapes backwards.
        for id in &selection {
            if let Some(shape) = self.store.get(id) {
                let fields = PartialShape::at(shape.x, shape.y);
                self.grace.record_live(*id, &fields);
            }
        }

        match make(&self.store, &selection, now_ms) {
            Some(gesture) => self.gesture = gesture,
            None => {
                // Nothing to drive; don't leave the live entries open.
                for id in &selection {
                    self.grace.end_gesture(*id, now_ms);
                }
                return Vec::new();
            }
        }
        self.last_activity_ms = now_ms;
        effects
    }

    /// Apply in-gesture updates optimistically and, on throttle ticks, send
    /// them as one batch message.
    fn apply_gesture_updates(
        &mut self,
        updates: &[(ShapeId, PartialShape)],
        flush: bool,
        now_ms: i64,
    ) -> Vec<Effect> {
        for (id, fields) in updates {
            self.grace.record_live(*id, fields);
            self.store.apply_partial(id, fields);
        }
        self.last_activity_ms = now_ms;

        let mut effects = Vec::new();
        if flush && !updates.is_empty() {
            let batch = updates
                .iter()
                .map(|(id, fields)| ShapeUpdatePayload { shape_id: *id, fields: fields.clone() })
                .collect();
            effects.push(self.outbound(Message::shapes_batch_update(batch)));
        }
        effects.push(Effect::Render);
        effects
    }

    /// Drop the in-progress gesture without sending anything, downgrading
    /// every member's live grace entry so it can expire normally.
    fn abandon_gesture(&mut self, now_ms: i64) {
        let ids = match std::mem::replace(&mut self.gesture, ActiveGesture::None) {
            ActiveGesture::None => return,
            ActiveGesture::Drag(g) => g.member_ids(),
            ActiveGesture::Resize(g) => g.member_ids(),
            ActiveGesture::Rotate(g) => g.member_ids(),
        };
        for id in ids {
            self.grace.end_gesture(id, now_ms);
        }
    }

    /// Shared gesture-end path: apply and send the final values (bypassing
    /// the throttle), push the batched history entry, and downgrade the
    /// grace entries to the timed window.
    fn finish_gesture(&mut self, outcome: GestureOutcome, now_ms: i64) -> Vec<Effect> {
        let mut effects = Vec::new();
        for (id, fields) in &outcome.updates {
            self.grace.record_live(*id, fields);
            self.store.apply_partial(id, fields);
        }
        if !outcome.updates.is_empty() {
            let batch = outcome
                .updates
                .iter()
                .map(|(id, fields)| ShapeUpdatePayload { shape_id: *id, fields: fields.clone() })
                .collect();
            effects.push(self.outbound(Message::shapes_batch_update(batch)));
            self.history.push(outcome.history);
        }
        // Downgrade every member, not just the updated ones: a motionless
        // gesture still opened live entries at begin.
        for id in &outcome.members {
            self.grace.end_gesture(*id, now_ms);
        }
        self.last_activity_ms = now_ms;
        effects.push(Effect::Render);
        effects
    }

    // ── Property edits ──────────────────────────────────────────

    /// Apply a one-shot property change (color, opacity, shadow, border,
    /// font size) to one shape: optimistic local apply, grace entry, an
    /// immediate update message, and a coalesced history record.
    pub fn property_change(
        &mut self,
        shape_id: ShapeId,
        fields: PartialShape,
        now_ms: i64,
    ) -> Vec<Effect> {
        let Some(shape) = self.store.get(&shape_id) else {
            return Vec::new();
        };
        if shape.is_locked_by_other(self.user_id, now_ms) {
            let holder = self.roster.display_name(shape.locked_by);
            return vec![Effect::Notice(format!("This shape is being edited by {holder}"))];
        }

        let before = fields.capture_before(shape);
        self.grace.record(shape_id, &fields, now_ms);
        self.store.apply_partial(&shape_id, &fields);
        self.coalescer.on_change(
            CoalesceKey::ShapeProperty(shape_id),
            vec![Operation::Update { shape_id, fields: before }],
            vec![Operation::Update { shape_id, fields: fields.clone() }],
            now_ms,
        );
        vec![self.outbound(Message::shape_update(shape_id, fields)), Effect::Render]
    }

    /// Apply a text edit to one shape, coalescing the burst with the text
    /// debounce window.
    pub fn text_change(&mut self, shape_id: ShapeId, text: String, now_ms: i64) -> Vec<Effect> {
        let Some(shape) = self.store.get(&shape_id) else {
            return Vec::new();
        };
        let fields = PartialShape { text: Some(text), ..PartialShape::default() };
        let before = fields.capture_before(shape);
        self.grace.record(shape_id, &fields, now_ms);
        self.store.apply_partial(&shape_id, &fields);
        self.coalescer.on_change(
            CoalesceKey::Text(shape_id),
            vec![Operation::Update { shape_id, fields: before }],
            vec![Operation::Update { shape_id, fields: fields.clone() }],
            now_ms,
        );
        vec![self.outbound(Message::shape_update(shape_id, fields)), Effect::Render]
    }

    /// Nudge the whole selection by `(dx, dy)` (arrow keys). Bursts of
    /// nudges coalesce into one history entry.
    pub fn nudge(&mut self, dx: f64, dy: f64, now_ms: i64) -> Vec<Effect> {
        if self.selection.is_empty() {
            return Vec::new();
        }
        if let Err(denied) =
            self.locks.check_editable(&self.store, &self.selection, &self.roster, now_ms)
        {
            return vec![Effect::Notice(denied.notice())];
        }

        let mut undo = Vec::new();
        let mut redo = Vec::new();
        let mut batch = Vec::new();
        for id in &self.selection.clone() {
            let Some(shape) = self.store.get(id) else {
                continue;
            };
            let (x, y) = self.bounds.clamp(
                shape.x + dx,
                shape.y + dy,
                shape.bounds_width(),
                shape.bounds_height(),
            );
            let fields = PartialShape::at(x, y);
            undo.push(Operation::Update { shape_id: *id, fields: fields.capture_before(shape) });
            redo.push(Operation::Update { shape_id: *id, fields: fields.clone() });
            self.grace.record(*id, &fields, now_ms);
            self.store.apply_partial(id, &fields);
            batch.push(ShapeUpdatePayload { shape_id: *id, fields });
        }
        if batch.is_empty() {
            return Vec::new();
        }
        self.coalescer.on_change(CoalesceKey::Nudge, undo, redo, now_ms);
        self.last_activity_ms = now_ms;
        vec![self.outbound(Message::shapes_batch_update(batch)), Effect::Render]
    }

    /// Change the canvas background color, coalescing rapid picker changes.
    pub fn set_background(&mut self, color: String, now_ms: i64) -> Vec<Effect> {
        let previous = self.meta.background_color.clone().unwrap_or_else(|| "#ffffff".to_owned());
        self.meta.background_color = Some(color.clone());
        self.coalescer.on_change(
            CoalesceKey::Background(self.canvas_id),
            vec![Operation::CanvasBackground { color: previous }],
            vec![Operation::CanvasBackground { color: color.clone() }],
            now_ms,
        );
        let update = CanvasMetaUpdate { background_color: Some(color), ..CanvasMetaUpdate::default() };
        vec![self.outbound(Message::canvas_update(&update)), Effect::Render]
    }

    // ── Create / delete ─────────────────────────────────────────

    /// Create a shape locally and broadcast it.
    pub fn create_shape(&mut self, shape: Shape, now_ms: i64) -> Vec<Effect> {
        let entry = HistoryEntry {
            undo: vec![Operation::Delete { shape_id: shape.id }],
            redo: vec![Operation::Create { shape: Box::new(shape.clone()) }],
            timestamp: now_ms,
            source: EntrySource::User,
        };
        let message = Message::shape_create(&shape);
        self.store.insert(shape);
        self.history.push(entry);
        vec![self.outbound(message), Effect::Render]
    }

    /// Delete shapes locally and broadcast one plural delete message.
    pub fn delete_shapes(&mut self, shape_ids: &[ShapeId], now_ms: i64) -> Vec<Effect> {
        if let Err(denied) = self.locks.check_editable(&self.store, shape_ids, &self.roster, now_ms)
        {
            return vec![Effect::Notice(denied.notice())];
        }

        let mut removed = Vec::new();
        for id in shape_ids {
            if let Some(shape) = self.store.remove(id) {
                self.grace.forget(*id);
                removed.push(shape);
            }
        }
        if removed.is_empty() {
            return Vec::new();
        }
        self.selection.retain(|id| !shape_ids.contains(id));

        let ids: Vec<ShapeId> = removed.iter().map(|s| s.id).collect();
        let entry = HistoryEntry {
            undo: removed
                .iter()
                .map(|s| Operation::Create { shape: Box::new(s.clone()) })
                .collect(),
            redo: ids.iter().map(|id| Operation::Delete { shape_id: *id }).collect(),
            timestamp: now_ms,
            source: EntrySource::User,
        };
        self.history.push(entry);
        vec![self.outbound(Message::shape_delete(ids)), Effect::Render]
    }

    /// Delete the current selection.
    pub fn delete_selection(&mut self, now_ms: i64) -> Vec<Effect> {
        let selection = self.selection.clone();
        self.delete_shapes(&selection, now_ms)
    }

    // ── Undo / redo ─────────────────────────────────────────────

    /// Undo the most recently *started* action (highest entry timestamp).
    pub fn undo(&mut self, now_ms: i64) -> Vec<Effect> {
        self.settle_bursts(now_ms);
        match self.history.perform_undo() {
            Some(ops) => self.apply_operations(&ops, now_ms),
            None => Vec::new(),
        }
    }

    /// Redo the most recently undone action.
    pub fn redo(&mut self, now_ms: i64) -> Vec<Effect> {
        match self.history.perform_redo() {
            Some(ops) => self.apply_operations(&ops, now_ms),
            None => Vec::new(),
        }
    }

    /// Apply undo/redo operations in listed order: mutate the store, open
    /// grace entries so our own echoes cannot revert the result, and emit
    /// the corresponding wire messages.
    fn apply_operations(&mut self, operations: &[Operation], now_ms: i64) -> Vec<Effect> {
        let mut effects = Vec::new();
        for op in operations {
            match op {
                Operation::Update { shape_id, fields } => {
                    self.grace.record(*shape_id, fields, now_ms);
                    self.store.apply_partial(shape_id, fields);
                    effects.push(self.outbound(Message::shape_update(*shape_id, fields.clone())));
                }
                Operation::Create { shape } => {
                    self.store.insert((**shape).clone());
                    effects.push(self.outbound(Message::shape_create(shape)));
                }
                Operation::Delete { shape_id } => {
                    self.store.remove(shape_id);
                    self.grace.forget(*shape_id);
                    self.selection.retain(|id| id != shape_id);
                    effects.push(self.outbound(Message::shape_delete(vec![*shape_id])));
                }
                Operation::CanvasBackground { color } => {
                    self.meta.background_color = Some(color.clone());
                    let update = CanvasMetaUpdate {
                        background_color: Some(color.clone()),
                        ..CanvasMetaUpdate::default()
                    };
                    effects.push(self.outbound(Message::canvas_update(&update)));
                }
            }
        }
        effects.push(Effect::Render);
        effects
    }

    /// Force every pending coalescing burst into the history immediately.
    /// Called before undo so a burst the user just finished is undoable,
    /// and at teardown.
    pub fn settle_bursts(&mut self, _now_ms: i64) {
        for entry in self.coalescer.flush_all() {
            self.history.push(entry);
        }
    }

    // ── Cursor and maintenance ──────────────────────────────────

    /// The local cursor moved: broadcast it and mark activity for the
    /// idle-deselect rule.
    pub fn cursor_moved(&mut self, x: f64, y: f64, now_ms: i64) -> Vec<Effect> {
        self.last_activity_ms = now_ms;
        vec![self.outbound(Message::cursor_move(x, y))]
    }

    /// Periodic timer tick (a few times per second): sweep expired grace
    /// entries, settle debounce windows into history, and auto-clear
    /// selected shapes whose lock expired while the cursor has been idle.
    pub fn maintain(&mut self, now_ms: i64) -> Vec<Effect> {
        self.grace.sweep(now_ms);
        for entry in self.coalescer.settle(now_ms) {
            self.history.push(entry);
        }

        let stale: Vec<ShapeId> = self
            .selection
            .iter()
            .copied()
            .filter(|id| {
                self.store
                    .get(id)
                    .is_some_and(|s| self.locks.should_autoclear(s, self.last_activity_ms, now_ms))
            })
            .collect();
        if stale.is_empty() {
            return Vec::new();
        }
        debug!(count = stale.len(), "auto-clearing selection with expired locks");
        self.selection.retain(|id| !stale.contains(id));
        vec![Effect::Render]
    }

    /// Tear down the session: settle pending bursts and release every held
    /// lock so other clients don't wait out the timeout.
    pub fn teardown(&mut self, now_ms: i64) -> Vec<Effect> {
        self.settle_bursts(now_ms);
        self.abandon_gesture(now_ms);
        let selection = std::mem::take(&mut self.selection);
        self.locks
            .release(&mut self.store, &selection)
            .into_iter()
            .map(|m| self.outbound(m))
            .collect()
    }
}

fn drop_malformed(error: &crate::protocol::ProtocolError) -> Vec<Effect> {
    warn!("dropping malformed message: {error}");
    Vec::new()
}
