//! Connection lifecycle and the public client facade.
//!
//! A [`Client`] walks one connection through
//! `Disconnected → Negotiating → Ready → Closed`. Connecting dials the
//! monitor, reads the greeting and negotiates capabilities; only then are
//! commands accepted. Failures that leave the stream in an unknown position
//! close it, while rejected commands keep the session usable.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use qmp_config::{Config, ReplyCheck, SocketEndpoint};
use strum::Display;
use tracing::{debug, warn};

use crate::QmpError;
use crate::command::{Arguments, Command};
use crate::commands;
use crate::dispatch::{Channel, HandlerSlot, InFlight, Reply, judge_reply};
use crate::event::{Event, EventHandler};
use crate::greeting::Greeting;
use crate::transport::{self, CONNECTION_TIMEOUT, Connection};

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Lifecycle state of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    /// No stream; `connect` may be called.
    Disconnected,
    /// Greeting and capability negotiation are in progress.
    Negotiating,
    /// Commands may be issued.
    Ready,
    /// The stream was closed; `reset` returns the client to `Disconnected`.
    Closed,
}

/// Tunables applied when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Deadline for establishing the socket connection.
    pub connect_timeout: Duration,
    /// Read deadline applied to the socket; `None` blocks indefinitely.
    /// An expired deadline surfaces as [`QmpError::ConnectionLost`].
    pub read_timeout: Option<Duration>,
    /// How `"return"` payloads are judged.
    pub reply_check: ReplyCheck,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECTION_TIMEOUT,
            read_timeout: None,
            reply_check: ReplyCheck::default(),
        }
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            reply_check: config.reply_check(),
        }
    }
}

#[derive(Debug)]
struct Status {
    state: ConnectionState,
    greeting: Option<Greeting>,
}

/// Synchronous QMP client.
///
/// All methods take `&self`, so a client can be shared between threads.
/// Only one command may be outstanding at a time: a second caller receives
/// [`QmpError::ConcurrentCommand`] instead of queueing behind the first.
/// Events are read on whichever thread is waiting for a reply, or by
/// [`Client::next_event`] when no command is outstanding.
#[derive(Debug)]
pub struct Client {
    options: ClientOptions,
    in_flight: AtomicBool,
    channel: Mutex<Option<Channel>>,
    status: Mutex<Status>,
    interrupt: Mutex<Option<Connection>>,
    handlers: HandlerSlot,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Creates a disconnected client with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(ClientOptions::default())
    }

    /// Creates a disconnected client with explicit options.
    #[must_use]
    pub fn with_options(options: ClientOptions) -> Self {
        Self {
            options,
            in_flight: AtomicBool::new(false),
            channel: Mutex::new(None),
            status: Mutex::new(Status {
                state: ConnectionState::Disconnected,
                greeting: None,
            }),
            interrupt: Mutex::new(None),
            handlers: HandlerSlot::default(),
        }
    }

    /// Creates a disconnected client using the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::with_options(ClientOptions::from(config))
    }

    /// Options the client was built with.
    #[must_use]
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock_status().state
    }

    /// Whether commands may be issued.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Greeting received on the current connection.
    #[must_use]
    pub fn greeting(&self) -> Option<Greeting> {
        self.lock_status().greeting.clone()
    }

    /// Replaces the event observer.
    ///
    /// The new observer receives every event dispatched after this call.
    pub fn set_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.replace(handler);
    }

    /// Dials `endpoint` and negotiates capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`QmpError::InvalidState`] unless the client is
    /// disconnected, [`QmpError::ConcurrentCommand`] while another
    /// operation holds the connection, [`QmpError::Dial`] when the socket
    /// cannot be reached, and [`QmpError::Handshake`] when the greeting or
    /// negotiation fails. After any failure the client is disconnected.
    pub fn connect(&self, endpoint: &SocketEndpoint) -> Result<Greeting, QmpError> {
        self.establish(|| {
            debug!(target: SESSION_TARGET, %endpoint, "dialing monitor");
            transport::dial(endpoint, self.options.connect_timeout)
        })
    }

    /// Negotiates capabilities over an already connected stream.
    ///
    /// # Errors
    ///
    /// As for [`Client::connect`], minus dialing.
    pub fn attach(&self, connection: Connection) -> Result<Greeting, QmpError> {
        self.establish(|| Ok(connection))
    }

    fn establish<F>(&self, open: F) -> Result<Greeting, QmpError>
    where
        F: FnOnce() -> Result<Connection, QmpError>,
    {
        let _in_flight = InFlight::acquire(&self.in_flight)?;
        let mut channel_slot = self.lock_channel();
        self.expect_state(ConnectionState::Disconnected)?;

        let connection = open()?;
        if let Err(error) = connection.set_read_timeout(self.options.read_timeout) {
            warn!(target: SESSION_TARGET, %error, "failed to apply read timeout");
        }
        match connection.try_clone() {
            Ok(handle) => *self.lock_interrupt() = Some(handle),
            Err(error) => {
                warn!(target: SESSION_TARGET, %error, "close will not interrupt blocked reads");
            }
        }

        self.transition(ConnectionState::Negotiating);
        let mut channel = Channel::new(connection);
        match self.negotiate(&mut channel) {
            Ok(greeting) => {
                *channel_slot = Some(channel);
                let mut status = self.lock_status();
                status.state = ConnectionState::Ready;
                status.greeting = Some(greeting.clone());
                drop(status);
                debug!(target: SESSION_TARGET, "session ready");
                Ok(greeting)
            }
            Err(error) => {
                channel.shutdown();
                drop(channel);
                self.lock_interrupt().take();
                self.transition(ConnectionState::Disconnected);
                debug!(target: SESSION_TARGET, %error, "handshake failed; rolled back");
                Err(QmpError::Handshake(Box::new(error)))
            }
        }
    }

    fn negotiate(&self, channel: &mut Channel) -> Result<Greeting, QmpError> {
        let greeting = Greeting::from_frame(channel.read_frame()?)?;
        debug!(
            target: SESSION_TARGET,
            version = ?greeting.version(),
            "received greeting"
        );
        let command = Command::new("qmp_capabilities", None);
        match channel.round_trip(&command, &self.handlers)? {
            Ok(_) => Ok(greeting),
            Err(failure) => Err(QmpError::Command {
                command: command.name().to_owned(),
                failure,
            }),
        }
    }

    /// Sends a command and waits for its reply, without consulting the
    /// command table.
    ///
    /// Events received before the reply are dispatched to the observer
    /// first, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`QmpError::ConcurrentCommand`] when another command is
    /// outstanding and [`QmpError::InvalidState`] unless the client is
    /// ready. A rejection by the monitor is a [`QmpError::Command`] and
    /// leaves the session ready. Stream failures, malformed frames, and
    /// frames of no known kind close the connection and are returned as
    /// [`QmpError::ConnectionLost`], [`QmpError::MalformedMessage`], or
    /// [`QmpError::ProtocolViolation`]. A frame tagged as an event whose
    /// name is not a string is dropped with a warning. An observer that
    /// panics closes the connection with [`QmpError::ObserverPanicked`].
    pub fn send(&self, name: &str, arguments: Option<Arguments>) -> Result<Reply, QmpError> {
        let _in_flight = InFlight::acquire(&self.in_flight)?;
        let mut channel_slot = self.lock_channel();
        self.expect_state(ConnectionState::Ready)?;
        let Some(channel) = channel_slot.as_mut() else {
            return Err(self.not_ready());
        };

        let command = Command::new(name, arguments);
        match channel.round_trip(&command, &self.handlers) {
            Ok(Ok(payload)) => judge_reply(name, payload, self.options.reply_check),
            Ok(Err(failure)) => Err(QmpError::Command {
                command: name.to_owned(),
                failure,
            }),
            Err(error) => {
                self.abandon(&mut channel_slot, &error);
                Err(error)
            }
        }
    }

    /// Validates arguments against the command table, then sends.
    ///
    /// Commands missing from the table are sent unvalidated.
    ///
    /// # Errors
    ///
    /// Returns [`QmpError::InvalidArguments`] when the arguments do not fit
    /// the table entry, otherwise as for [`Client::send`].
    pub fn execute(&self, name: &str, arguments: Option<Arguments>) -> Result<Reply, QmpError> {
        commands::validate(name, arguments.as_ref())?;
        self.send(name, arguments)
    }

    /// Blocks until the next event arrives while no command is outstanding.
    ///
    /// The event is dispatched to the observer and also returned.
    ///
    /// # Errors
    ///
    /// Returns [`QmpError::ConcurrentCommand`] while a command is pending
    /// and [`QmpError::InvalidState`] unless the client is ready. A reply
    /// with no command outstanding is a [`QmpError::ProtocolViolation`] that
    /// leaves the session ready. Stream failures and a panicking observer
    /// close the connection.
    pub fn next_event(&self) -> Result<Event, QmpError> {
        let _in_flight = InFlight::acquire(&self.in_flight)?;
        let mut channel_slot = self.lock_channel();
        self.expect_state(ConnectionState::Ready)?;
        let Some(channel) = channel_slot.as_mut() else {
            return Err(self.not_ready());
        };

        match channel.next_event(&self.handlers) {
            Ok(outcome) => outcome,
            Err(error) => {
                self.abandon(&mut channel_slot, &error);
                Err(error)
            }
        }
    }

    /// Closes the connection.
    ///
    /// Closing never fails. A disconnected client stays disconnected and a
    /// closed client stays closed. A command blocked on another thread is
    /// woken and fails with [`QmpError::ConnectionLost`].
    pub fn close(&self) {
        if let Some(handle) = self.lock_interrupt().take()
            && let Err(error) = handle.shutdown()
        {
            debug!(target: SESSION_TARGET, %error, "stream already shut down");
        }

        let mut channel_slot = self.lock_channel();
        if let Some(channel) = channel_slot.take() {
            channel.shutdown();
        }
        let mut status = self.lock_status();
        if status.state != ConnectionState::Disconnected {
            if status.state != ConnectionState::Closed {
                debug!(target: SESSION_TARGET, from = %status.state, "closing session");
            }
            status.state = ConnectionState::Closed;
            status.greeting = None;
        }
    }

    /// Returns a closed client to the disconnected state so it can dial
    /// again.
    ///
    /// # Errors
    ///
    /// Returns [`QmpError::ConcurrentCommand`] while an operation is
    /// outstanding and [`QmpError::InvalidState`] when the client is ready.
    pub fn reset(&self) -> Result<(), QmpError> {
        let _in_flight = InFlight::acquire(&self.in_flight)?;
        let _channel_slot = self.lock_channel();
        let mut status = self.lock_status();
        match status.state {
            ConnectionState::Closed => {
                status.state = ConnectionState::Disconnected;
                debug!(target: SESSION_TARGET, "session reset");
                Ok(())
            }
            ConnectionState::Disconnected => Ok(()),
            actual => Err(QmpError::InvalidState {
                expected: ConnectionState::Closed,
                actual,
            }),
        }
    }

    fn abandon(&self, channel_slot: &mut Option<Channel>, error: &QmpError) {
        if let Some(channel) = channel_slot.take() {
            channel.shutdown();
        }
        self.lock_interrupt().take();
        let mut status = self.lock_status();
        status.state = ConnectionState::Closed;
        status.greeting = None;
        warn!(target: SESSION_TARGET, %error, "connection closed after fatal error");
    }

    fn expect_state(&self, expected: ConnectionState) -> Result<(), QmpError> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(QmpError::InvalidState { expected, actual })
        }
    }

    fn not_ready(&self) -> QmpError {
        QmpError::InvalidState {
            expected: ConnectionState::Ready,
            actual: self.state(),
        }
    }

    fn transition(&self, state: ConnectionState) {
        let mut status = self.lock_status();
        debug!(target: SESSION_TARGET, from = %status.state, to = %state, "state change");
        status.state = state;
        if state != ConnectionState::Ready {
            status.greeting = None;
        }
    }

    fn lock_channel(&self) -> MutexGuard<'_, Option<Channel>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_interrupt(&self) -> MutexGuard<'_, Option<Connection>> {
        self.interrupt.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
