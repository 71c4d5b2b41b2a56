use std::io;
use std::path::PathBuf;

use serde::Serialize;

/// A record claims more bytes than the raw file has left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("capture overflow at offset {offset}: record needs {needed} bytes, {remaining} remain")]
pub struct Overflow {
    pub offset: u64,
    pub needed: u64,
    pub remaining: u64,
}

/// Errors from demultiplexing one raw file.
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    /// Port timing cannot be mapped onto whole slots.
    #[error("invalid timing for rf port {port}: {reason}")]
    InvalidTiming { port: u32, reason: String },

    /// Filesystem error on a raw or output file.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DemuxError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| DemuxError::Io { path, source }
    }
}

/// Errors that end a capture.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The output directory failed pre-flight.
    #[error("{}: {reason}", path.display())]
    OutputDir { path: PathBuf, reason: String },

    /// Capture parameters are unusable.
    #[error("invalid capture request: {0}")]
    InvalidRequest(String),

    /// Session-level failure (connect, auth, timeout, server error).
    #[error(transparent)]
    Session(#[from] iqtap_session::SessionError),

    /// The session ended without a reply.
    #[error("request aborted: no reply to '{0}'")]
    Aborted(String),

    /// The capture reply is missing required fields.
    #[error("invalid capture response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Demux(#[from] DemuxError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A blocking demux task panicked or was cancelled.
    #[error("demux task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
