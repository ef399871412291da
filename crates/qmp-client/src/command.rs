//! Command modelling for the wire protocol.
//!
//! This module turns a command name and argument object into the JSONL
//! payload the monitor expects so the session code can remain focused on
//! IO orchestration.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::{Map, Value};

/// Argument object attached to a command.
pub type Arguments = Map<String, Value>;

/// A single `execute` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    execute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<Arguments>,
}

impl Command {
    /// Builds a command; an empty argument object is dropped from the wire.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Option<Arguments>) -> Self {
        Self {
            execute: name.into(),
            arguments: arguments.filter(|map| !map.is_empty()),
        }
    }

    /// Command name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.execute.as_str()
    }

    /// Argument object, when one will be sent.
    #[must_use]
    pub const fn arguments(&self) -> Option<&Arguments> {
        self.arguments.as_ref()
    }

    /// Writes the command as one newline-terminated JSON line and flushes.
    pub(crate) fn write_jsonl<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: Write,
    {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        writer.write_all(&line)?;
        writer.flush()
    }
}
