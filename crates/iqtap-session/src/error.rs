use std::time::Duration;

use crate::message::MessageId;

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] iqtap_transport::TransportError),

    /// Connection and authentication did not complete in time.
    #[error("connection timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// The server closed the connection before the session was ready.
    #[error("connection closed during authentication")]
    ConnectionClosed,

    /// The server asked for authentication and no password is configured.
    #[error("authentication required, no password configured")]
    AuthRequired,

    /// The server rejected the authentication attempt.
    #[error("authentication error: {0}")]
    AuthRejected(String),

    /// An outgoing message is not valid structured data.
    #[error("invalid outgoing message: {0}")]
    Protocol(String),

    /// The external templater rejected the message text.
    #[error("{program} failed ({status}): {stderr}")]
    Filter {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    /// A request got no reply within its budget.
    #[error("message timeout: '{message}' ({id}) got no reply within {budget:?}")]
    MessageTimeout {
        id: MessageId,
        message: String,
        budget: Duration,
    },

    /// A delivered reply carried an error.
    #[error("server error: {0}")]
    Server(String),

    /// Side-channel sink failure.
    #[error("frame error: {0}")]
    Frame(#[from] iqtap_frame::FrameError),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (external filter process).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
