//! Command-line runtime for `qmpc`.
//!
//! The runtime loads layered configuration, installs structured logging,
//! and drives a [`qmp_client::Client`] for one subcommand. IO streams and
//! configuration loading are injectable so tests can run the CLI in-process
//! against a scripted monitor.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::error::ErrorKind;
use qmp_client::commands::{self, CommandSpec};
use qmp_client::{Arguments, Client, Event, EventHandler};
use qmp_config::Config;
use serde_json::Value;
use tracing::info;

mod cli;
mod config;
mod errors;
mod telemetry;

use cli::{Cli, CliCommand};
use config::{ConfigArgumentSplit, split_config_arguments};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in step with the fields of `qmp_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--socket",
    "--log-filter",
    "--log-format",
    "--connect-timeout-secs",
    "--read-timeout-secs",
    "--reply-check",
];

const EVENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::events");

/// Bundles the IO streams provided to the CLI runtime.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

/// Logs lifecycle events as they are dispatched.
struct LoggingObserver;

impl EventHandler for LoggingObserver {
    fn on_shutdown(&self) {
        info!(target: EVENT_TARGET, "guest shut down");
    }

    fn on_reset(&self) {
        info!(target: EVENT_TARGET, "guest reset");
    }

    fn on_stop(&self) {
        info!(target: EVENT_TARGET, "guest paused");
    }

    fn on_resume(&self) {
        info!(target: EVENT_TARGET, "guest resumed");
    }

    fn on_device_deleted(&self, device: Option<&str>, path: &str) {
        info!(target: EVENT_TARGET, device, path, "device removed");
    }
}

struct CliRunner<'a, W: Write, E: Write, L: ConfigLoader> {
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
}

impl<'a, W, E, L> CliRunner<'a, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    fn new(io: &'a mut IoStreams<'a, W, E>, loader: &'a L) -> Self {
        Self { io, loader }
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&args);
        let cli_arguments = prepare_cli_arguments(&args, &split);

        let cli = match Cli::try_parse_from(cli_arguments) {
            Ok(cli) => cli,
            Err(error) if is_informational(&error) => {
                let _ = write!(self.io.stdout, "{error}");
                return ExitCode::SUCCESS;
            }
            Err(error) => return self.fail(&AppError::CliUsage(error)),
        };

        let result = self
            .loader
            .load(&split.config_arguments)
            .and_then(|config| {
                telemetry::initialise(&config)?;
                Ok(config)
            })
            .and_then(|config| self.dispatch(cli.command, &config));

        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => self.fail(&error),
        }
    }

    fn fail(&mut self, error: &AppError) -> ExitCode {
        let _ = writeln!(self.io.stderr, "{error}");
        ExitCode::FAILURE
    }

    fn dispatch(&mut self, command: CliCommand, config: &Config) -> Result<(), AppError> {
        match command {
            CliCommand::Commands => list_commands(self.io.stdout),
            CliCommand::Exec { name, args, raw } => {
                let arguments = parse_arguments(args.as_deref())?;
                let client = connect(config)?;
                let outcome = if raw {
                    client.send(&name, arguments)
                } else {
                    client.execute(&name, arguments)
                };
                client.close();
                let reply = outcome?;
                write_json_pretty(self.io.stdout, reply.payload())
            }
            CliCommand::Events { limit } => {
                let client = connect(config)?;
                let outcome = stream_events(&client, limit, self.io.stdout);
                client.close();
                outcome
            }
        }
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdout, stderr);
    run_with_loader(args, &mut io, &OrthoConfigLoader)
}

/// Runs the CLI with a custom configuration loader.
pub(crate) fn run_with_loader<'a, I, W, E, L>(
    args: I,
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner::new(io, loader).run(args)
}

fn is_informational(error: &clap::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
    )
}

fn prepare_cli_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    args.first()
        .into_iter()
        .chain(args.iter().skip(split.command_start))
        .cloned()
        .collect()
}

fn connect(config: &Config) -> Result<Client, AppError> {
    let client = Client::from_config(config);
    client.set_handler(Arc::new(LoggingObserver));
    client.connect(config.socket())?;
    Ok(client)
}

fn parse_arguments(raw: Option<&str>) -> Result<Option<Arguments>, AppError> {
    let Some(text) = raw else {
        return Ok(None);
    };
    match serde_json::from_str(text).map_err(AppError::ParseArguments)? {
        Value::Object(arguments) => Ok(Some(arguments)),
        _ => Err(AppError::ArgumentsNotObject),
    }
}

fn stream_events<W: Write>(
    client: &Client,
    limit: Option<usize>,
    stdout: &mut W,
) -> Result<(), AppError> {
    let mut seen = 0usize;
    while limit.is_none_or(|max| seen < max) {
        let event = match client.next_event() {
            Ok(event) => event,
            Err(error) if error.is_connection_lost() => return Ok(()),
            Err(error) => return Err(error.into()),
        };
        write_event(stdout, &event)?;
        seen += 1;
    }
    Ok(())
}

fn write_event<W: Write>(stdout: &mut W, event: &Event) -> Result<(), AppError> {
    let line = serde_json::to_string(event).map_err(AppError::SerialiseOutput)?;
    writeln!(stdout, "{line}").map_err(AppError::WriteOutput)?;
    stdout.flush().map_err(AppError::WriteOutput)
}

fn write_json_pretty<W: Write>(stdout: &mut W, payload: &Value) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(payload).map_err(AppError::SerialiseOutput)?;
    writeln!(stdout, "{text}").map_err(AppError::WriteOutput)
}

fn describe(spec: &CommandSpec) -> String {
    let mut line = String::from(spec.name);
    for arg in spec.args {
        let marker = if arg.required { "" } else { "?" };
        line.push_str(&format!(" {}{marker}:{}", arg.name, arg.kind));
    }
    if spec.open {
        line.push_str(" ...");
    }
    line.push_str(&format!(" -> {}", spec.returns));
    line
}

fn list_commands<W: Write>(stdout: &mut W) -> Result<(), AppError> {
    for spec in commands::COMMANDS {
        writeln!(stdout, "{}", describe(spec)).map_err(AppError::WriteOutput)?;
    }
    Ok(())
}
