//! Message transport abstraction for iqtap sessions.
//!
//! Provides a unified interface over the ways a session can reach a server:
//! - WebSocket (`ws://` / `wss://`) via tokio-tungstenite
//! - In-memory pairs for tests and simulations
//!
//! This is the lowest layer of iqtap. The session engine builds on the
//! [`Transport`] trait provided here.

pub mod error;
pub mod memory;
pub mod tls;
pub mod traits;
pub mod websocket;

pub use error::{Result, TransportError};
pub use tls::{ClientIdentity, ServerVerification, TlsOptions};
pub use traits::{Inbound, Transport};
pub use websocket::{resolve_server, TransportOptions, WsTransport, SERVER_ALIASES};
