//! Challenge/response authentication.
//!
//! The server opens with an `authenticate` message that is either
//! `{ready: true}`, `{error}`, or a challenge `{challenge, name, type,
//! version}`. The client answers a challenge with the hex HMAC-SHA256 of the
//! challenge string, keyed by `"<type>:<password>:<name>"`.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use crate::error::{Result, SessionError};
use crate::message::{Message, MSG_AUTHENTICATE};

type HmacSha256 = Hmac<Sha256>;

/// Challenge fields of an `authenticate` message.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AuthChallenge {
    pub challenge: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub component_type: String,
    #[serde(default)]
    pub version: String,
}

/// What to do after an `authenticate` message.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthStep {
    /// The server accepted us.
    Ready,
    /// Send this message and wait for the next `authenticate`.
    Reply(Message),
}

/// Hex-encoded HMAC-SHA256 of `message` under `key`.
pub fn hmac_hex(key: &[u8], message: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| SessionError::AuthRejected(format!("hmac key: {err}")))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Response digest for a challenge.
pub fn challenge_response(password: &str, challenge: &AuthChallenge) -> Result<String> {
    let key = format!(
        "{}:{}:{}",
        challenge.component_type, password, challenge.name
    );
    hmac_hex(key.as_bytes(), challenge.challenge.as_bytes())
}

/// Decide the next authentication step for an `authenticate` message.
pub fn respond(msg: &Message, password: Option<&str>) -> Result<AuthStep> {
    if msg.fields.get("ready").and_then(Value::as_bool) == Some(true) {
        return Ok(AuthStep::Ready);
    }
    if let Some(error) = msg.error_text() {
        return Err(SessionError::AuthRejected(error));
    }

    let fields = Value::Object(msg.fields.clone());
    let challenge: AuthChallenge = serde_json::from_value(fields).map_err(|err| {
        SessionError::AuthRejected(format!("unexpected authenticate message: {err}"))
    })?;
    let password = password.ok_or(SessionError::AuthRequired)?;

    tracing::debug!(
        name = %challenge.name,
        component = %challenge.component_type,
        version = %challenge.version,
        "answering authentication challenge"
    );
    Ok(AuthStep::Reply(
        Message::new(MSG_AUTHENTICATE).with("res", challenge_response(password, &challenge)?),
    ))
}
