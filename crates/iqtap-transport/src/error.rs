/// Errors that can occur in session transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The address could not be turned into a connection request.
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// TLS settings could not be loaded.
    #[error("tls setup failed: {0}")]
    Tls(String),

    /// The WebSocket layer reported an error on an open connection.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
