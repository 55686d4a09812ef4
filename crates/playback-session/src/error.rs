//! Error taxonomy for the playback session layer.

use std::path::PathBuf;

use playback_types::{ErrorKind, SessionId};

/// Failure reported by a single native engine call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("cannot open media {path:?}: {reason}")]
    Media { path: PathBuf, reason: String },
    #[error("{call} failed: {reason}")]
    Call { call: &'static str, reason: String },
    #[error("{0} already released")]
    Released(&'static str),
}

impl EngineError {
    pub fn call(call: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Call {
            call,
            reason: reason.into(),
        }
    }
}

/// Surface allocation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("raw surface {raw} is still leased (owner {owner:?})")]
    Busy { raw: u64, owner: Option<SessionId> },
}

/// Errors surfaced to facade callers.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("media not found: {0:?}")]
    MediaNotFound(PathBuf),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("initialization failed: {0}")]
    Initialization(EngineError),
    #[error("playback failed: {0}")]
    Runtime(EngineError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("cannot start session thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl PlaybackError {
    /// Host-facing error class, when the error belongs to one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            PlaybackError::Initialization(_) => Some(ErrorKind::Initialization),
            PlaybackError::Runtime(_) => Some(ErrorKind::Runtime),
            _ => None,
        }
    }
}
