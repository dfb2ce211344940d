//! Centralized error types for the slimproto core library.
//!
//! Covers fatal session errors, transient command errors, programming
//! errors, out-of-buffer events, and setup errors.
//! Session-scoped errors never propagate past the session — they are
//! turned into events by the caller instead of bubbling up as `Result`s.

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for logs and diagnostics.
    fn code(&self) -> &'static str;
}

/// Errors raised while decoding or encoding SlimProto frames.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum FrameError {
    /// The declared payload length exceeds the protocol's sane maximum.
    #[error("frame length {0} exceeds maximum allowed payload size")]
    LengthOutOfRange(u32),

    /// An operation tag was not recognized while the session was still in
    /// HELO-wait; any other tag must be a HELO.
    #[error("unexpected operation tag {0:?} while awaiting HELO")]
    UnexpectedBeforeHelo(String),

    /// The HELO payload was shorter than the fixed fields require.
    #[error("truncated HELO payload: {0} bytes")]
    TruncatedHelo(usize),

    /// The STAT payload was shorter than the fixed fields require.
    #[error("truncated STAT payload: {0} bytes")]
    TruncatedStat(usize),
}

impl ErrorCode for FrameError {
    fn code(&self) -> &'static str {
        match self {
            Self::LengthOutOfRange(_) => "frame_length_out_of_range",
            Self::UnexpectedBeforeHelo(_) => "frame_unexpected_before_helo",
            Self::TruncatedHelo(_) => "frame_truncated_helo",
            Self::TruncatedStat(_) => "frame_truncated_stat",
        }
    }
}

/// Errors that terminate a Client Session.
///
/// Every variant here is fatal for the session: the caller disconnects the
/// socket and emits a DISCONNECTED event. The backing Player is marked
/// unavailable but not forgotten.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A malformed frame was received.
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    /// The session sat in HELO-wait past the grace timeout.
    #[error("HELO not received within {0:?}")]
    HeloTimeout(std::time::Duration),

    /// The underlying socket returned an I/O error.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for SessionError {
    fn code(&self) -> &'static str {
        match self {
            Self::Frame(_) => "session_frame_error",
            Self::HeloTimeout(_) => "session_helo_timeout",
            Self::Io(_) => "session_io_error",
        }
    }
}

/// Errors raised by the Sync Group Manager and Command Orchestrator.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum GroupError {
    /// The referenced player id is not currently registered.
    #[error("player {0} is not registered")]
    UnknownPlayer(String),

    /// `sync` was called with a leader that already has a leader of its
    /// own; transitive sync is forbidden by the data model.
    #[error("player {0} cannot become a leader: it is already synced to {1}")]
    TransitiveSyncRejected(String, String),

    /// A transport command was addressed directly to a follower. This is a
    /// programming error in the caller, not a runtime condition.
    #[error("command sent directly to follower {0}; commands must target the leader")]
    CommandSentToFollower(String),
}

impl ErrorCode for GroupError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownPlayer(_) => "group_unknown_player",
            Self::TransitiveSyncRejected(_, _) => "group_transitive_sync_rejected",
            Self::CommandSentToFollower(_) => "group_command_sent_to_follower",
        }
    }
}

/// Errors that prevent the server from starting at all.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The configured SlimProto port is already bound by another process.
    #[error("port {0} is already in use")]
    PortInUse(u16),

    /// The socket could not be created or bound for another reason.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

impl ErrorCode for SetupError {
    fn code(&self) -> &'static str {
        match self {
            Self::PortInUse(_) => "setup_port_in_use",
            Self::Bind(_) => "setup_bind_failed",
        }
    }
}

/// Convenient Result alias for session-scoped operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Convenient Result alias for group/orchestrator operations.
pub type GroupResult<T> = Result<T, GroupError>;

/// Convenient Result alias for server setup.
pub type SetupResult<T> = Result<T, SetupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_error_codes_are_distinct() {
        assert_eq!(
            FrameError::LengthOutOfRange(99999).code(),
            "frame_length_out_of_range"
        );
        assert_eq!(
            FrameError::TruncatedHelo(3).code(),
            "frame_truncated_helo"
        );
    }

    #[test]
    fn group_error_transitive_sync_message() {
        let err = GroupError::TransitiveSyncRejected("b".into(), "a".into());
        assert!(err.to_string().contains("already synced to a"));
        assert_eq!(err.code(), "group_transitive_sync_rejected");
    }

    #[test]
    fn setup_error_port_in_use_code() {
        let err = SetupError::PortInUse(3483);
        assert_eq!(err.code(), "setup_port_in_use");
        assert_eq!(err.to_string(), "port 3483 is already in use");
    }

    #[test]
    fn session_error_wraps_frame_error() {
        let err: SessionError = FrameError::TruncatedStat(2).into();
        assert_eq!(err.code(), "session_frame_error");
    }
}
