//! Command dispatch over an established stream.
//!
//! The [`Channel`] owns the buffered stream and performs the request/reply
//! exchange: it writes one command, then reads frames until the reply
//! arrives, handing every event it meets to the observer on the way. The
//! session decides what an exchange failure means for connection state.

use std::io::{self, BufReader};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use qmp_config::ReplyCheck;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::QmpError;
use crate::command::Command;
use crate::commands;
use crate::errors::CommandFailure;
use crate::event::{Event, EventHandler, NoopHandler, dispatch_event};
use crate::frame::{FrameError, FrameReader};
use crate::message::{Message, classify, json_kind};
use crate::transport::Connection;

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Successful reply payload.
///
/// Replies are usually empty objects, but queries and some commands return
/// data; the payload is handed over untouched for the caller to inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply(Value);

impl Reply {
    /// Wraps a `"return"` payload.
    #[must_use]
    pub const fn new(payload: Value) -> Self {
        Self(payload)
    }

    /// Borrows the payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.0
    }

    /// Consumes the reply, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> Value {
        self.0
    }

    /// Whether the payload is an empty object.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.as_object().is_some_and(serde_json::Map::is_empty)
    }

    /// Decodes the payload into a typed structure.
    ///
    /// # Errors
    ///
    /// Returns the decoding error when the payload does not match `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.0)
    }
}

/// Judges a `"return"` payload under the configured policy.
///
/// # Errors
///
/// Under [`ReplyCheck::Strict`], a payload whose shape differs from the
/// command table entry is a [`QmpError::ProtocolViolation`]. Under
/// [`ReplyCheck::Empty`], any payload other than `{}` is reported as a
/// [`QmpError::Command`] carrying that payload.
pub fn judge_reply(command: &str, payload: Value, check: ReplyCheck) -> Result<Reply, QmpError> {
    match check {
        ReplyCheck::Lenient => Ok(Reply(payload)),
        ReplyCheck::Strict => {
            let shape = commands::expected_return(command);
            if shape.accepts(&payload) {
                Ok(Reply(payload))
            } else {
                Err(QmpError::ProtocolViolation(format!(
                    "reply to '{command}' should be {} but is {}",
                    article(shape),
                    json_kind(&payload)
                )))
            }
        }
        ReplyCheck::Empty => {
            let reply = Reply(payload);
            if reply.is_empty() {
                Ok(reply)
            } else {
                Err(QmpError::Command {
                    command: command.to_owned(),
                    failure: CommandFailure::new(reply.into_payload()),
                })
            }
        }
    }
}

const fn article(shape: commands::ReturnShape) -> &'static str {
    match shape {
        commands::ReturnShape::Object => "an object",
        commands::ReturnShape::Array => "an array",
        commands::ReturnShape::Any => "any value",
    }
}

/// Marks a command as outstanding for the lifetime of the guard.
#[derive(Debug)]
pub(crate) struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlight<'a> {
    /// Claims the slot or reports that another command holds it.
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Result<Self, QmpError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self { flag })
            .map_err(|_| QmpError::ConcurrentCommand)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Replaceable observer slot.
///
/// The current handler is cloned out of the lock before it runs, so an
/// observer may install a replacement from inside a callback.
pub(crate) struct HandlerSlot {
    handler: Mutex<Arc<dyn EventHandler>>,
}

impl HandlerSlot {
    pub(crate) fn replace(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub(crate) fn current(&self) -> Arc<dyn EventHandler> {
        Arc::clone(&self.handler.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Runs the current handler for `event`.
    ///
    /// A panic inside the handler is caught and reported as
    /// [`QmpError::ObserverPanicked`].
    pub(crate) fn dispatch(&self, event: &Event) -> Result<(), QmpError> {
        let handler = self.current();
        panic::catch_unwind(AssertUnwindSafe(|| dispatch_event(handler.as_ref(), event)))
            .map_err(|_| {
                warn!(target: DISPATCH_TARGET, event = %event.name, "event observer panicked");
                QmpError::ObserverPanicked {
                    event: event.name.clone(),
                }
            })
    }
}

impl Default for HandlerSlot {
    fn default() -> Self {
        Self {
            handler: Mutex::new(Arc::new(NoopHandler)),
        }
    }
}

impl std::fmt::Debug for HandlerSlot {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("HandlerSlot").finish_non_exhaustive()
    }
}

/// Buffered duplex stream with the request/reply exchange on top.
///
/// Methods return `Result<Result<T, E>, QmpError>`: the outer error means
/// the stream can no longer be trusted and must be closed, the inner one is
/// a recoverable outcome of an otherwise healthy exchange.
#[derive(Debug)]
pub(crate) struct Channel {
    frames: FrameReader<BufReader<Connection>>,
}

impl Channel {
    pub(crate) fn new(connection: Connection) -> Self {
        Self {
            frames: FrameReader::new(BufReader::new(connection)),
        }
    }

    /// Reads one raw frame.
    pub(crate) fn read_frame(&mut self) -> Result<Value, FrameError> {
        let frame = self.frames.next_frame()?;
        trace!(target: DISPATCH_TARGET, %frame, "received frame");
        Ok(frame)
    }

    fn write_command(&mut self, command: &Command) -> Result<(), QmpError> {
        debug!(target: DISPATCH_TARGET, command = command.name(), "sending command");
        command
            .write_jsonl(self.frames.get_mut().get_mut())
            .map_err(|error| QmpError::ConnectionLost(FrameError::Io(error)))
    }

    /// Sends `command` and waits for its reply.
    ///
    /// Events that arrive first are dispatched through `handlers` in arrival
    /// order before this returns.
    pub(crate) fn round_trip(
        &mut self,
        command: &Command,
        handlers: &HandlerSlot,
    ) -> Result<Result<Value, CommandFailure>, QmpError> {
        self.write_command(command)?;
        loop {
            let frame = self.read_frame()?;
            let tagged_as_event = frame.get("event").is_some();
            let message = match classify(frame) {
                Ok(message) => message,
                Err(violation) if tagged_as_event => {
                    warn!(target: DISPATCH_TARGET, %violation, "dropping malformed event");
                    continue;
                }
                Err(violation) => return Err(violation),
            };
            match message {
                Message::Event(event) => handlers.dispatch(&event)?,
                Message::Reply(payload) => {
                    debug!(target: DISPATCH_TARGET, command = command.name(), "command succeeded");
                    return Ok(Ok(payload));
                }
                Message::Error(payload) => {
                    debug!(target: DISPATCH_TARGET, command = command.name(), "command rejected");
                    return Ok(Err(CommandFailure::new(payload)));
                }
            }
        }
    }

    /// Waits for the next event while no command is outstanding.
    ///
    /// Anything other than an event is a recoverable protocol violation:
    /// the frame has been consumed and the stream remains aligned.
    pub(crate) fn next_event(
        &mut self,
        handlers: &HandlerSlot,
    ) -> Result<Result<Event, QmpError>, QmpError> {
        let frame = self.read_frame()?;
        let message = match classify(frame) {
            Ok(message) => message,
            Err(violation) => return Ok(Err(violation)),
        };
        match message {
            Message::Event(event) => {
                handlers.dispatch(&event)?;
                Ok(Ok(event))
            }
            unsolicited => Ok(Err(QmpError::ProtocolViolation(format!(
                "received an unsolicited {} with no command outstanding",
                unsolicited.kind()
            )))),
        }
    }

    /// Duplicates the socket handle so another thread can shut it down.
    pub(crate) fn shutdown_handle(&self) -> io::Result<Connection> {
        self.frames.get_ref().get_ref().try_clone()
    }

    /// Closes both directions of the stream, ignoring errors from a peer
    /// that already left.
    pub(crate) fn shutdown(&self) {
        if let Err(error) = self.frames.get_ref().get_ref().shutdown() {
            trace!(target: DISPATCH_TARGET, %error, "shutdown on a dead stream");
        }
    }
}
