use std::fmt;
use std::io;

use iqtap_capture::CaptureError;
use iqtap_session::SessionError;

// Exit codes shared with existing remote API tooling.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const CONNECT_TIMEOUT: i32 = 2;
pub const MESSAGE_TIMEOUT: i32 = 12;
pub const USAGE: i32 = 64;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(FAILURE, format!("{context}: {err}"))
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    let code = match err {
        SessionError::ConnectTimeout(_) => CONNECT_TIMEOUT,
        SessionError::MessageTimeout { .. } => MESSAGE_TIMEOUT,
        // The templater's own status is passed through.
        SessionError::Filter { status, .. } => match status.code() {
            Some(code) if code != SUCCESS => code,
            _ => FAILURE,
        },
        _ => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn capture_error(context: &str, err: CaptureError) -> CliError {
    match err {
        CaptureError::Session(err) => session_error(context, err),
        CaptureError::InvalidRequest(_) => CliError::usage(format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}
