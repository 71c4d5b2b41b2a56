use std::future::Future;

use bytes::Bytes;

use crate::error::Result;

/// A unit of data received from the remote end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete text message (JSON control traffic).
    Text(String),
    /// A chunk of binary side-channel data. May hold a partial frame.
    Binary(Bytes),
}

/// A connected message transport.
///
/// The session engine is generic over this trait so it can run against a
/// real WebSocket or an in-memory peer. `recv` must be cancel-safe: the
/// engine polls it inside `tokio::select!` alongside its timers.
pub trait Transport: Send {
    /// Send one text message.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Receive the next inbound message. `Ok(None)` means the peer closed.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Inbound>>> + Send;

    /// Close the transport.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
