//! Fixed protocol and drift-correction constants that should NOT be changed.
//!
//! These values are defined either by the SlimProto wire format (framing,
//! opcodes) or by the drift-correction algorithm below, and changing them
//! silently changes correction behavior.

// ─────────────────────────────────────────────────────────────────────────────
// SlimProto Wire Framing
// ─────────────────────────────────────────────────────────────────────────────

/// Default TCP port for the SlimProto socket server.
///
/// Hardware squeezebox players do not support a configurable port; only
/// change this when running alongside another slimproto-speaking server.
pub const DEFAULT_SLIMPROTO_PORT: u16 = 3483;

/// Length in bytes of the client→server operation tag (`HELO`, `STAT`, ...).
pub const CLIENT_OP_TAG_LEN: usize = 4;

/// Length in bytes of the server→client operation tag (`strm`, `audg`, ...).
pub const SERVER_OP_TAG_LEN: usize = 4;

/// Upper bound on a single frame's declared payload length.
///
/// No legitimate SlimProto frame approaches this; it exists to reject
/// corrupted length fields before allocating a receive buffer.
pub const MAX_FRAME_PAYLOAD_BYTES: u32 = 8192;

// ─────────────────────────────────────────────────────────────────────────────
// Session Timeouts
// ─────────────────────────────────────────────────────────────────────────────

/// Grace period for a session to send HELO after TCP accept.
pub const HELO_WAIT_TIMEOUT_SECS: u64 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Drift Correction
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum magnitude of average drift, in milliseconds, that triggers a
/// correction. Below this the follower is considered in sync (jitter band).
pub const MIN_DEVIATION_ADJUST_MS: i64 = 10;

/// Minimum number of playpoints required before a mean is evaluated.
pub const MIN_REQUIRED_PLAYPOINTS: usize = 4;

/// Playpoints older than this are considered stale and invalidate the ring.
pub const PLAYPOINT_MAX_AGE_SECS: u64 = 10;

/// Fixed backoff applied after a skip-ahead correction, in seconds.
pub const SKIP_AHEAD_BACKOFF_SECS: u64 = 2;

/// Fixed component of the backoff applied after a pause-for correction, in
/// seconds; the variable component is `|mean_ms| / 1000`.
pub const PAUSE_FOR_BACKOFF_BASE_SECS: f64 = 2.0;

/// Valid range for the per-player acoustic sync adjustment.
pub const SYNC_ADJUST_RANGE_MS: std::ops::RangeInclusive<i64> = 0..=1500;

// ─────────────────────────────────────────────────────────────────────────────
// Buffer-Coordinated Start
// ─────────────────────────────────────────────────────────────────────────────

/// Poll interval while waiting for all group members to reach BUFFER_READY.
pub const BUFFER_READY_POLL_MILLIS: u64 = 100;

/// Maximum time to wait for all group members before starting anyway.
pub const BUFFER_READY_TIMEOUT_MILLIS: u64 = 4000;

/// Offset, in client jiffies, added to the triggering client's current
/// jiffies to compute the unpause-at timestamp sent to every group member.
pub const UNPAUSE_AT_JIFFIES_OFFSET: u32 = 20;

/// Drift-controller backoff recorded immediately after a coordinated start,
/// so the first statistical sample does not fight the intentional offset.
pub const POST_START_BACKOFF_SECS: u64 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Player Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default volume (0-100) assigned to a newly-seen player with no cached
/// last-known state.
pub const DEFAULT_PLAYER_VOLUME: u8 = 20;

/// Preset slot counts grow through these tiers as earlier slots fill.
pub const PRESET_SLOT_TIERS: [u8; 4] = [5, 10, 15, 20];
