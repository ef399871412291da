//! Classification of inbound frames.
//!
//! Every frame the monitor sends is either a command reply, a command error,
//! or an asynchronous event. Events are recognised first so that they are
//! always routed to the observer, even while a command is awaiting its reply.

use serde_json::{Map, Value};

use crate::QmpError;
use crate::event::Event;

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `{"return": ...}`: a command succeeded with this payload.
    Reply(Value),
    /// `{"error": ...}`: a command was rejected with this payload.
    Error(Value),
    /// `{"event": ...}`: an asynchronous notification.
    Event(Event),
}

impl Message {
    /// Short label used in logs and protocol violation messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Reply(_) => "reply",
            Self::Error(_) => "error",
            Self::Event(_) => "event",
        }
    }
}

/// Classifies one parsed frame.
///
/// # Errors
///
/// Returns [`QmpError::ProtocolViolation`] when the frame is not an object,
/// carries a non-string event name, or has none of the `event`, `return`, or
/// `error` keys.
pub fn classify(frame: Value) -> Result<Message, QmpError> {
    let Value::Object(mut object) = frame else {
        return Err(QmpError::ProtocolViolation(format!(
            "expected a JSON object, got {}",
            json_kind(&frame)
        )));
    };

    if object.contains_key("event") {
        return classify_event(object).map(Message::Event);
    }
    if let Some(payload) = object.remove("return") {
        return Ok(Message::Reply(payload));
    }
    if let Some(payload) = object.remove("error") {
        return Ok(Message::Error(payload));
    }

    let keys: Vec<&str> = object.keys().map(String::as_str).collect();
    Err(QmpError::ProtocolViolation(format!(
        "message has no 'return', 'error', or 'event' key (keys: [{}])",
        keys.join(", ")
    )))
}

fn classify_event(object: Map<String, Value>) -> Result<Event, QmpError> {
    if !object.get("event").is_some_and(Value::is_string) {
        return Err(QmpError::ProtocolViolation(String::from(
            "event name is not a string",
        )));
    }
    serde_json::from_value(Value::Object(object))
        .map_err(|error| QmpError::ProtocolViolation(format!("event is malformed: {error}")))
}

/// Names the JSON type of a value for diagnostics.
pub(crate) const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
