//! Event system for provider-level notification of session and group state.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`ProviderEvent`] covering the events the Client Session, Player
//!   Registry, and Sync Group Manager raise
//!
//! Transport (if any) of these events to an external consumer is outside
//! this crate's scope; [`EventEmitter`] is the seam.

mod emitter;

pub use emitter::{BroadcastEventEmitter, EventEmitter, LoggingEventEmitter, NoopEventEmitter};

/// Events emitted by a Client Session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// HELO received; session moved to `registered`.
    Connected { player_id: String },
    /// Socket closed, by either party or by server shutdown.
    Disconnected { player_id: String },
    /// STAT/STMd: decoder has capacity for the next track.
    DecoderReady { player_id: String },
    /// STAT/STMl: client has buffered enough to render.
    BufferReady { player_id: String },
    /// Any STAT carrying updated elapsed time and jiffies.
    Heartbeat {
        player_id: String,
        jiffies: u32,
        elapsed_milliseconds: u32,
    },
    /// STAT/STMo: client exhausted its audio buffer.
    OutputUnderrun { player_id: String },
}

/// Events emitted by the Player Registry and Sync Group Manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    /// A Player's `can_sync_with` set (or other attributes) changed.
    PlayerUpdated { player_id: String },
    /// `child_id` joined `leader_id`'s group.
    Synced { child_id: String, leader_id: String },
    /// `child_id` left its group.
    Unsynced { child_id: String },
}

/// All events this crate's components can raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Session(SessionEvent),
    Group(GroupEvent),
}

impl From<SessionEvent> for ProviderEvent {
    fn from(event: SessionEvent) -> Self {
        Self::Session(event)
    }
}

impl From<GroupEvent> for ProviderEvent {
    fn from(event: GroupEvent) -> Self {
        Self::Group(event)
    }
}
