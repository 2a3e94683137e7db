//! Wire message protocol for the canvas socket.
//!
//! Every communication with the server is a `Message`: a typed envelope with
//! a JSON payload, serialized as text over the WebSocket. The envelope keeps
//! the payload flexible (`serde_json::Value`) so the dispatch loop can route
//! on `type` without inspecting payload internals; typed payload structs in
//! this module decode the payloads that the sync core consumes.

#[cfg(test)]
#[path = "protocol_test.rs"]
mod protocol_test;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::presence::{ActiveUser, CursorPosition};
use crate::shape::{PartialShape, Shape, ShapeId, UserId};

/// Error returned when a message or payload cannot be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The raw text could not be parsed as a message envelope.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The payload did not match the shape expected for the message type.
    #[error("invalid {kind:?} payload: {source}")]
    InvalidPayload {
        /// The message type whose payload failed to decode.
        kind: MessageType,
        /// The underlying decode error.
        source: serde_json::Error,
    },
}

/// Milliseconds since the Unix epoch. Returns 0 if the system clock is
/// before the epoch.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The type of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Full snapshot sent on connect: shapes, active users, canvas metadata.
    CanvasSync,
    /// Canvas-level metadata change (background color, name).
    CanvasUpdate,
    /// A new shape.
    ShapeCreate,
    /// Sparse update to one shape.
    ShapeUpdate,
    /// Delete one or more shapes.
    ShapeDelete,
    /// Sparse updates to several shapes, applied atomically client-side.
    ShapesBatchUpdate,
    /// A user's cursor moved.
    CursorMove,
    /// A user joined the canvas.
    UserJoin,
    /// A user left the canvas.
    UserLeave,
    /// Full roster replacement.
    ActiveUsers,
    /// Heartbeat request.
    Ping,
    /// Heartbeat response.
    Pong,
    /// Ask the server to resend canvas state after a reconnect.
    ReconnectRequest,
    /// Server-reported error, non-fatal.
    Error,
}

/// A single message on the canvas wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message type; the dispatch loop routes on this alone.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Type-specific payload. `Null` for payload-less types like `PING`.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Sender's user id. Used for local echo suppression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Canvas this message belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canvas_id: Option<Uuid>,
    /// Milliseconds since the Unix epoch when the message was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Unique id for this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Message {
    /// Build a message with the given type and an already-serialized payload.
    #[must_use]
    pub fn new(kind: MessageType, payload: Value) -> Self {
        Self {
            kind,
            payload,
            user_id: None,
            canvas_id: None,
            timestamp: Some(now_ms()),
            message_id: Some(Uuid::new_v4().to_string()),
        }
    }

    /// Build a message from a typed payload.
    ///
    /// Serialization of the payload structs in this module cannot fail, so a
    /// serializer error degrades to a `Null` payload rather than panicking.
    #[must_use]
    pub fn with_payload<T: Serialize>(kind: MessageType, payload: &T) -> Self {
        Self::new(kind, serde_json::to_value(payload).unwrap_or(Value::Null))
    }

    /// Attach the sending user and canvas ids.
    #[must_use]
    pub fn from_user(mut self, user_id: UserId, canvas_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self.canvas_id = Some(canvas_id);
        self
    }

    /// Serialize to the JSON text sent over the socket.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if serialization fails, which
    /// cannot happen for messages built by this module.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a message envelope from socket text.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] for unparseable text or an
    /// unknown message type.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode the payload into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] when the payload does not
    /// match `T`.
    pub fn decode_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|source| ProtocolError::InvalidPayload { kind: self.kind, source })
    }

    /// A `PING` heartbeat message.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(MessageType::Ping, Value::Null)
    }

    /// A `RECONNECT_REQUEST` message.
    #[must_use]
    pub fn reconnect_request() -> Self {
        Self::new(MessageType::ReconnectRequest, Value::Null)
    }

    /// A `SHAPE_UPDATE` message for one shape.
    #[must_use]
    pub fn shape_update(shape_id: ShapeId, fields: PartialShape) -> Self {
        Self::with_payload(MessageType::ShapeUpdate, &ShapeUpdatePayload { shape_id, fields })
    }

    /// A `SHAPES_BATCH_UPDATE` message.
    #[must_use]
    pub fn shapes_batch_update(updates: Vec<ShapeUpdatePayload>) -> Self {
        Self::with_payload(MessageType::ShapesBatchUpdate, &ShapesBatchUpdatePayload { shapes: updates })
    }

    /// A `SHAPE_CREATE` message.
    #[must_use]
    pub fn shape_create(shape: &Shape) -> Self {
        Self::with_payload(MessageType::ShapeCreate, shape)
    }

    /// A `SHAPE_DELETE` message (always sends the plural form).
    #[must_use]
    pub fn shape_delete(shape_ids: Vec<ShapeId>) -> Self {
        Self::with_payload(MessageType::ShapeDelete, &ShapeDeletePayload { shape_ids })
    }

    /// A `CURSOR_MOVE` message.
    #[must_use]
    pub fn cursor_move(x: f64, y: f64) -> Self {
        Self::with_payload(MessageType::CursorMove, &CursorMovePayload { x, y })
    }

    /// A `CANVAS_UPDATE` message.
    #[must_use]
    pub fn canvas_update(meta: &CanvasMetaUpdate) -> Self {
        Self::with_payload(MessageType::CanvasUpdate, meta)
    }
}

/// Canvas-level metadata carried in `CANVAS_SYNC`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasMeta {
    /// Canvas display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Canvas background color as a CSS color string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
}

/// Sparse canvas metadata update carried in `CANVAS_UPDATE`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasMetaUpdate {
    /// New name, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New background color, if being updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
}

/// Payload of `CANVAS_SYNC`: the full snapshot sent on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSyncPayload {
    /// Every shape on the canvas.
    pub shapes: Vec<Shape>,
    /// Every user currently on the canvas.
    #[serde(default)]
    pub users: Vec<ActiveUser>,
    /// Canvas metadata.
    #[serde(default)]
    pub canvas: CanvasMeta,
}

/// Payload of `SHAPE_UPDATE`: one shape id plus the changed fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeUpdatePayload {
    /// The shape being updated.
    pub shape_id: ShapeId,
    /// The changed fields.
    #[serde(flatten)]
    pub fields: PartialShape,
}

/// Payload of `SHAPES_BATCH_UPDATE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapesBatchUpdatePayload {
    /// Per-shape updates, applied atomically client-side.
    pub shapes: Vec<ShapeUpdatePayload>,
}

/// Payload of `SHAPE_DELETE`.
///
/// The wire accepts both the plural `shapeIds` array and the legacy singular
/// `shapeId`; deserialization normalizes the singular form to a one-element
/// array. Serialization always writes the plural form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawShapeDelete")]
pub struct ShapeDeletePayload {
    /// Ids of the shapes to delete.
    pub shape_ids: Vec<ShapeId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawShapeDelete {
    #[serde(default)]
    shape_ids: Option<Vec<ShapeId>>,
    #[serde(default)]
    shape_id: Option<ShapeId>,
}

impl From<RawShapeDelete> for ShapeDeletePayload {
    fn from(raw: RawShapeDelete) -> Self {
        let shape_ids = match (raw.shape_ids, raw.shape_id) {
            (Some(ids), _) => ids,
            (None, Some(id)) => vec![id],
            (None, None) => Vec::new(),
        };
        Self { shape_ids }
    }
}

/// Payload of `CURSOR_MOVE`. The moving user is the envelope's `userId`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CursorMovePayload {
    /// Cursor x in canvas coordinates.
    pub x: f64,
    /// Cursor y in canvas coordinates.
    pub y: f64,
}

impl From<CursorMovePayload> for CursorPosition {
    fn from(p: CursorMovePayload) -> Self {
        Self { x: p.x, y: p.y }
    }
}

/// Payload of `USER_LEAVE`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeavePayload {
    /// The departing user's connection id.
    pub user_id: UserId,
}

/// Payload of `ACTIVE_USERS`: a full roster replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUsersPayload {
    /// All users currently on the canvas.
    pub users: Vec<ActiveUser>,
}

/// Payload of `ERROR`: a server-reported, non-fatal error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Human-readable description.
    pub message: String,
    /// Grepable error code, if the server assigned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
