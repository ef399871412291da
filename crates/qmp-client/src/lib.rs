//! Synchronous client for the QEMU Machine Protocol.
//!
//! QMP is newline-delimited JSON over a stream socket. After connecting, the
//! monitor sends a greeting, the client negotiates capabilities, and from
//! then on each command is answered by exactly one `return` or `error`
//! object. Asynchronous events can arrive at any point, including between a
//! command and its reply; they are routed to an [`EventHandler`] in arrival
//! order.
//!
//! ```no_run
//! use qmp_client::{Client, SocketEndpoint};
//!
//! let client = Client::new();
//! client.connect(&SocketEndpoint::tcp("127.0.0.1", 4444))?;
//! client.stop()?;
//! let status = client.query_status()?;
//! assert!(!status.running);
//! client.close();
//! # Ok::<(), qmp_client::QmpError>(())
//! ```
//!
//! The crate never spawns threads. Replies and events are read on the
//! thread waiting inside [`Client::send`]; while idle, an embedder surfaces
//! unsolicited events by driving [`Client::next_event`].

mod command;
pub mod commands;
mod dispatch;
mod errors;
pub mod event;
pub mod frame;
mod greeting;
mod message;
mod session;
pub mod transport;

pub use command::{Arguments, Command};
pub use dispatch::{Reply, judge_reply};
pub use errors::{CommandFailure, QmpError};
pub use event::{Event, EventHandler, EventKind, NoopHandler, dispatch_event};
pub use frame::{FrameError, FrameReader};
pub use greeting::Greeting;
pub use message::{Message, classify};
pub use qmp_config::{ReplyCheck, SocketEndpoint};
pub use session::{Client, ClientOptions, ConnectionState};
pub use transport::Connection;

#[cfg(test)]
mod tests;
