//! slimproto-core — shared library for a SlimProto multi-room audio server.
//!
//! This crate implements the protocol- and synchronization-facing core of
//! a Squeezebox-compatible streaming server: per-client protocol state
//! machines, player bookkeeping, leader/follower sync groups, and the
//! statistical drift correction that keeps a group's speakers in step.
//! Music library management, the HTTP audio origin, and persistence are
//! deliberately out of scope — the core calls out to narrow collaborator
//! traits for those instead (see [`collaborators`]).
//!
//! # Architecture
//!
//! - [`frame`]: wire framing and payload codecs
//! - [`session`]: per-connection protocol state machine
//! - [`registry`]: the Player table and live session handles
//! - [`sync_group`]: leader/follower group lifecycle
//! - [`drift`]: drift correction and buffer-coordinated start
//! - [`orchestrator`]: the public command API and event dispatch
//! - [`collaborators`]: external-system traits (queue, cache, discovery)
//! - [`events`]: provider-level event system
//! - [`config`]: server and per-player configuration
//! - [`bootstrap`]: composition root wiring everything together
//! - [`error`]: centralized error types
//! - [`lifecycle`]: application restart/shutdown abstraction

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod collaborators;
pub mod config;
pub mod drift;
pub mod error;
pub mod events;
pub mod frame;
pub mod lifecycle;
pub mod orchestrator;
pub mod protocol_constants;
pub mod registry;
pub mod session;
pub mod sync_group;
pub mod utils;

pub use bootstrap::{bootstrap_services, run_tcp_server, BootstrappedServices};
pub use config::{OutputCodec, PlayerConfig, ServerConfig};
pub use error::{ErrorCode, FrameError, GroupError, SessionError, SetupError};
pub use events::{BroadcastEventEmitter, EventEmitter, GroupEvent, ProviderEvent, SessionEvent};
pub use orchestrator::CommandOrchestrator;
pub use registry::{Player, PlayerRegistry, TransportState};
pub use sync_group::SyncGroupManager;
