//! Shared timing and tuning constants for the sync core.

// ── Locks ───────────────────────────────────────────────────────

/// How long a soft lock is honored after `locked_at`, in milliseconds.
/// Expiry is computed client-side; there is no server-pushed release.
pub const LOCK_TIMEOUT_MS: i64 = 10_000;

/// Cursor-idle threshold before a selection holding an expired lock is
/// auto-cleared, in milliseconds. Both conditions must hold so that an
/// active edit straddling the lock timeout does not flicker.
pub const IDLE_DESELECT_MS: i64 = 5_000;

// ── Reconciliation ──────────────────────────────────────────────

/// Post-gesture grace window during which the last local value still wins
/// over inbound server echoes, in milliseconds.
pub const GRACE_WINDOW_MS: i64 = 1_200;

// ── Connection ──────────────────────────────────────────────────

/// Heartbeat interval for outbound `PING` frames, in milliseconds.
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// First reconnect delay for the exponential backoff policy, in milliseconds.
pub const RECONNECT_BASE_MS: u64 = 1_000;

/// Growth factor applied per failed reconnect attempt.
pub const RECONNECT_FACTOR: f64 = 1.5;

/// Upper bound on any single reconnect delay, in milliseconds.
pub const RECONNECT_CAP_MS: u64 = 30_000;

/// Reconnect attempts before the connection surfaces a terminal error state.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Delay between sending `RECONNECT_REQUEST` and flushing the operation
/// queue, in milliseconds, so the server-side sync lands first.
pub const RECONNECT_FLUSH_SETTLE_MS: u64 = 500;

// ── Gestures ────────────────────────────────────────────────────

/// Minimum interval between network flushes of an in-progress group
/// gesture, in milliseconds (~30 fps).
pub const GROUP_THROTTLE_MS: i64 = 33;

// ── History coalescing ──────────────────────────────────────────

/// Debounce window for slider-style property bursts (opacity, shadow
/// strength, border width, font size), in milliseconds.
pub const PROPERTY_DEBOUNCE_MS: i64 = 100;

/// Debounce window for arrow-key nudge bursts, in milliseconds.
pub const NUDGE_DEBOUNCE_MS: i64 = 250;

/// Debounce window for canvas background color changes, in milliseconds.
pub const BACKGROUND_DEBOUNCE_MS: i64 = 300;

/// Debounce window for text editing bursts, in milliseconds.
pub const TEXT_DEBOUNCE_MS: i64 = 400;
