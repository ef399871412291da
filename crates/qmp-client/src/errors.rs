//! Error taxonomy surfaced by the client.

use std::fmt;
use std::io;

use serde_json::Value;
use thiserror::Error;

use crate::frame::FrameError;
use crate::session::ConnectionState;

/// Errors raised while dialing, negotiating, or exchanging commands.
#[derive(Debug, Error)]
pub enum QmpError {
    /// The transport could not reach the monitor socket.
    #[error("failed to connect to monitor at {endpoint}: {source}")]
    Dial {
        /// Endpoint that was dialed, rendered as a URL.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Unix sockets were requested on a platform without them.
    #[cfg(not(unix))]
    #[error("platform does not support Unix sockets: {0}")]
    UnsupportedUnixTransport(String),
    /// A line arrived that is not valid JSON.
    #[error("received a malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),
    /// Well-formed JSON that does not fit the protocol at this point.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// The monitor rejected the command.
    #[error("command '{command}' failed: {failure}")]
    Command {
        /// Name of the rejected command.
        command: String,
        /// Error payload supplied by the monitor.
        failure: CommandFailure,
    },
    /// Another command is still awaiting its reply on this client.
    #[error("another command is already awaiting its reply")]
    ConcurrentCommand,
    /// The greeting or capability negotiation failed; the client is back
    /// in the disconnected state.
    #[error("capability negotiation failed: {0}")]
    Handshake(#[source] Box<QmpError>),
    /// The stream failed or closed while a reply was outstanding. The
    /// connection is now closed.
    #[error("connection to the monitor was lost: {0}")]
    ConnectionLost(#[source] FrameError),
    /// The event observer panicked. Events and replies still buffered
    /// behind the event can no longer be matched, so the connection is
    /// closed.
    #[error("event observer panicked while handling '{event}'")]
    ObserverPanicked {
        /// Name of the event being handled.
        event: String,
    },
    /// The operation is not valid in the connection's current state.
    #[error("operation requires a {expected} connection but it is {actual}")]
    InvalidState {
        /// State the operation needs.
        expected: ConnectionState,
        /// State the connection is in.
        actual: ConnectionState,
    },
    /// Arguments do not match the declared shape of a known command.
    #[error("invalid arguments for '{command}': {reason}")]
    InvalidArguments {
        /// Name of the command.
        command: String,
        /// What was wrong with the arguments.
        reason: String,
    },
    /// A typed reply could not be decoded into the requested structure.
    #[error("failed to decode reply to '{command}': {source}")]
    DecodeReply {
        /// Name of the command whose reply failed to decode.
        command: String,
        /// Decoding error.
        #[source]
        source: serde_json::Error,
    },
}

impl QmpError {
    /// Returns the server-supplied failure when the monitor rejected a command.
    #[must_use]
    pub const fn command_failure(&self) -> Option<&CommandFailure> {
        match self {
            Self::Command { failure, .. } => Some(failure),
            _ => None,
        }
    }

    /// Whether the error left the client without a usable connection.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

impl From<FrameError> for QmpError {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::Malformed(source) => Self::MalformedMessage(source),
            FrameError::TooLarge { limit } => {
                Self::ProtocolViolation(format!("frame exceeds the {limit} byte limit"))
            }
            stream @ (FrameError::Closed | FrameError::Io(_)) => Self::ConnectionLost(stream),
        }
    }
}

/// Error payload attached to a rejected command.
///
/// Monitors normally send `{"class": ..., "desc": ...}`; the payload is kept
/// verbatim so callers can inspect anything else the server added.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFailure {
    payload: Value,
}

impl CommandFailure {
    /// Wraps a raw `"error"` payload.
    #[must_use]
    pub const fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// The payload exactly as the monitor sent it.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Consumes the failure, returning the raw payload.
    #[must_use]
    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Error class reported by the monitor, such as `GenericError`.
    #[must_use]
    pub fn class(&self) -> Option<&str> {
        self.payload.get("class").and_then(Value::as_str)
    }

    /// Human-readable description reported by the monitor.
    #[must_use]
    pub fn desc(&self) -> Option<&str> {
        self.payload.get("desc").and_then(Value::as_str)
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.class(), self.desc()) {
            (Some(class), Some(desc)) => write!(formatter, "{class}: {desc}"),
            (None, Some(desc)) => formatter.write_str(desc),
            _ => write!(formatter, "{}", self.payload),
        }
    }
}
