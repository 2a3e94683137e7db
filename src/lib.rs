//! Client-side synchronization core for a multi-user collaborative canvas.
//!
//! Many clients edit a shared set of vector shapes over a persistent
//! WebSocket, see each other's cursors, and must never permanently diverge.
//! This crate implements the synchronization machinery between the
//! rendering layer and the wire:
//!
//! - [`protocol`] — the typed message envelope and payloads.
//! - [`connection`] / [`transport`] — socket lifecycle, heartbeat,
//!   reconnect backoff, and the offline operation queue.
//! - [`locks`] — soft, time-limited edit locks resolved client-side.
//! - [`reconcile`] — per-shape grace windows that keep server echoes from
//!   overwriting fields the local user is actively or recently editing.
//! - [`transform`] — consistent multi-shape drag/resize/rotate offsets.
//! - [`history`] — timestamp-ordered undo/redo with debounced coalescing.
//! - [`shape`] / [`presence`] — the local shape store and user roster.
//! - [`session`] — the dependency-injected composition root the host
//!   constructs at canvas-open and tears down at canvas-close.
//!
//! Conflict model: last-writer-wins per field with soft locks and
//! client-side grace windows. This is not a CRDT; concurrent edits to the
//! same field resolve to whichever write lands last, softened by the locks
//! and windows above.

pub mod connection;
pub mod consts;
pub mod history;
pub mod locks;
pub mod presence;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod shape;
pub mod transform;
pub mod transport;

pub use connection::{BackoffPolicy, ConnectionCore, ConnectionState, OperationQueue};
pub use history::{HistoryEntry, HistoryManager, Operation};
pub use presence::{ActiveUser, Roster};
pub use protocol::{Message, MessageType, ProtocolError};
pub use reconcile::GraceRegistry;
pub use session::{CanvasSession, Effect};
pub use shape::{PartialShape, Shape, ShapeId, ShapeKind, ShapeStore, UserId};
pub use transform::{CanvasBounds, DragGesture, ResizeGesture, RotateGesture};
pub use transport::{SocketConfig, TransportError, run_client};
