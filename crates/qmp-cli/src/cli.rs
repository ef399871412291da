//! CLI argument definitions for `qmpc`.

use clap::{Parser, Subcommand};

/// Command-line interface for talking to a QEMU monitor.
#[derive(Parser, Debug)]
#[command(name = "qmpc", disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Action to perform.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Structured subcommands for the CLI.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Executes one command and prints its reply.
    Exec {
        /// Command name, such as `query-status`.
        #[arg(value_name = "COMMAND")]
        name: String,
        /// Argument object as JSON, such as '{"id": "nic0"}'.
        #[arg(long, value_name = "JSON")]
        args: Option<String>,
        /// Sends the command without checking it against the command table.
        #[arg(long)]
        raw: bool,
    },
    /// Prints events as JSON lines until the monitor hangs up.
    Events {
        /// Stops after this many events.
        #[arg(long, value_name = "COUNT")]
        limit: Option<usize>,
    },
    /// Lists the commands the client can validate.
    Commands,
}
