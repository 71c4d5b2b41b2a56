//! Session engine for the baseband simulator remote API.
//!
//! A [`Session`] authenticates against the server, runs a [`CommandQueue`]
//! of message batches, waits and listen directives, correlates replies by
//! `message_id`, and enforces per-request timeouts. Side-channel binary
//! events are reassembled and routed to [`iqtap_frame::EventSinks`].

pub mod auth;
pub mod command;
pub mod connector;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod message;
pub mod session;

pub use auth::{challenge_response, hmac_hex, AuthChallenge, AuthStep};
pub use command::{Command, CommandQueue, WaitCallback};
pub use connector::connect;
pub use error::{Result, SessionError};
pub use filter::{prepare_batch, DefineFilter, Defines, ExternalFilter, MessageFilter};
pub use hooks::{HookContext, SessionHooks};
pub use message::{
    encode_batch, parse_batch, ControlKind, IdGenerator, Message, MessageId, CONTROL_MESSAGES,
};
pub use session::{Session, SessionConfig, SessionState, SessionSummary, DEFAULT_TIMEOUT};
