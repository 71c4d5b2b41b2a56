use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SessionError};

/// Message name used for the authentication exchange.
pub const MSG_AUTHENTICATE: &str = "authenticate";
/// Greeting sent by servers that need no authentication.
pub const MSG_READY: &str = "ready";
/// Unsolicited server error notice.
pub const MSG_ERROR: &str = "error";
/// Event subscription request.
pub const MSG_REGISTER: &str = "register";

/// Server control messages handled by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Authenticate,
    Ready,
    Error,
}

/// Name → kind routing table for server control messages.
pub const CONTROL_MESSAGES: &[(&str, ControlKind)] = &[
    (MSG_AUTHENTICATE, ControlKind::Authenticate),
    (MSG_READY, ControlKind::Ready),
    (MSG_ERROR, ControlKind::Error),
];

impl ControlKind {
    /// Look up the control kind for a message name.
    pub fn lookup(name: &str) -> Option<Self> {
        CONTROL_MESSAGES
            .iter()
            .find(|(control, _)| *control == name)
            .map(|(_, kind)| *kind)
    }
}

/// Correlation id linking a request to its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    Text(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{n}"),
            MessageId::Text(s) => f.write_str(s),
        }
    }
}

/// Source of engine-assigned ids: `id#1`, `id#2`, ...
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    pub fn next_id(&mut self) -> MessageId {
        self.last += 1;
        MessageId::Text(format!("id#{}", self.last))
    }
}

/// A request or reply on the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Operation name.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub notification: bool,
    /// Seconds; extends the timeout budget together with `end_time`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Every other field, preserved as sent.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            message: name.into(),
            message_id: None,
            notification: false,
            start_time: None,
            end_time: None,
            error: None,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// `{message: "register", register: [event]}`.
    pub fn register(event: impl Into<String>) -> Self {
        Self::new(MSG_REGISTER).with("register", Value::Array(vec![Value::String(event.into())]))
    }

    /// A string field, if present.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// The error carried by this message, rendered as text.
    pub fn error_text(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Reply budget: `base` plus `end_time - start_time` when an end time is set.
    pub fn timeout_budget(&self, base: Duration) -> Duration {
        let extra = match self.end_time {
            Some(end) => end - self.start_time.unwrap_or(0.0),
            None => 0.0,
        };
        if extra.is_finite() && extra > 0.0 {
            base + Duration::from_secs_f64(extra)
        } else {
            base
        }
    }
}

/// Parse outgoing JSON text (an object or an array of objects) into a batch.
pub fn parse_batch(text: &str) -> Result<Vec<Message>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| SessionError::Protocol(format!("{err} in {}", preview(text))))?;
    let items = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(SessionError::Protocol(format!(
                "expected object or array, got {}",
                preview(&other.to_string())
            )))
        }
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|err| SessionError::Protocol(format!("{err} in {}", preview(text))))
        })
        .collect()
}

/// Wire text for a batch: a bare object for one message, an array otherwise.
pub fn encode_batch(batch: &[Message]) -> Result<String> {
    Ok(match batch {
        [single] => serde_json::to_string(single)?,
        many => serde_json::to_string(many)?,
    })
}

/// Parse inbound text. `None` for anything that is not a message object.
pub(crate) fn parse_inbound(text: &str) -> Option<Message> {
    serde_json::from_str(text).ok()
}

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let batch = parse_batch(r#"{"message":"config_get","cells":[1,2],"message_id":7}"#)
            .expect("valid message");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message_id, Some(MessageId::Number(7)));

        let value: Value = serde_json::from_str(&encode_batch(&batch).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"message": "config_get", "message_id": 7, "cells": [1, 2]})
        );
    }

    #[test]
    fn arrays_become_batches_in_order() {
        let batch = parse_batch(r#"[{"message":"a"},{"message":"b"}]"#).unwrap();
        let names: Vec<&str> = batch.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(encode_batch(&batch).unwrap().starts_with('['));
    }

    #[test]
    fn missing_operation_name_is_protocol_error() {
        let err = parse_batch(r#"{"duration": 10}"#).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));

        let err = parse_batch("{not json").unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));

        let err = parse_batch("42").unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    #[test]
    fn budget_extends_with_end_time() {
        let base = Duration::from_secs(10);
        let mut msg = Message::new("x");
        assert_eq!(msg.timeout_budget(base), base);

        msg.end_time = Some(5.0);
        assert_eq!(msg.timeout_budget(base), Duration::from_secs(15));

        msg.start_time = Some(2.0);
        assert_eq!(msg.timeout_budget(base), Duration::from_secs(13));

        msg.start_time = Some(9.0);
        assert_eq!(msg.timeout_budget(base), base);
    }

    #[test]
    fn error_text_renders_strings_and_values() {
        let mut msg = Message::new("x");
        assert_eq!(msg.error_text(), None);
        msg.error = Some(json!("boom"));
        assert_eq!(msg.error_text().as_deref(), Some("boom"));
        msg.error = Some(json!({"code": 3}));
        assert_eq!(msg.error_text().as_deref(), Some(r#"{"code":3}"#));
    }

    #[test]
    fn control_table_lookup() {
        assert_eq!(
            ControlKind::lookup("authenticate"),
            Some(ControlKind::Authenticate)
        );
        assert_eq!(ControlKind::lookup("ready"), Some(ControlKind::Ready));
        assert_eq!(ControlKind::lookup("config_get"), None);
    }

    #[test]
    fn ids_are_sequential() {
        let mut ids = IdGenerator::default();
        assert_eq!(ids.next_id(), MessageId::Text("id#1".into()));
        assert_eq!(ids.next_id(), MessageId::Text("id#2".into()));
    }

    #[test]
    fn register_message_shape() {
        let value = serde_json::to_value(Message::register("rx_iq")).unwrap();
        assert_eq!(value, json!({"message": "register", "register": ["rx_iq"]}));
    }
}
