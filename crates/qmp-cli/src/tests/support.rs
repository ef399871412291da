//! Test support for CLI coverage.
//!
//! Supplies a static configuration loader, a scripted monitor, and a world
//! that captures CLI output so step definitions and unit tests stay focused
//! on their assertions.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail, ensure};
use qmp_config::{Config, SocketEndpoint};
use serde_json::Value;

use crate::{AppError, ConfigLoader, IoStreams, run_with_loader};

const GREETING: &str =
    r#"{"QMP": {"version": {"qemu": {"micro": 0, "minor": 2, "major": 8}, "package": ""}, "capabilities": []}}"#;
const EMPTY_RETURN: &str = r#"{"return": {}}"#;

pub(super) struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub(super) fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

/// What the monitor does after negotiating capabilities.
pub(super) enum Exchange {
    /// Reads one command, then writes the line.
    Reply(String),
    /// Writes the line unprompted.
    Emit(String),
}

impl Exchange {
    pub(super) fn reply(line: &str) -> Self {
        Self::Reply(line.to_owned())
    }

    pub(super) fn emit(line: &str) -> Self {
        Self::Emit(line.to_owned())
    }
}

#[derive(Default)]
pub(super) struct TestWorld {
    pub config: Config,
    pub monitor: Option<ScriptedMonitor>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<ExitCode>,
    pub requests: Vec<Value>,
}

impl TestWorld {
    pub fn start_monitor(&mut self, exchanges: Vec<Exchange>) -> Result<()> {
        let monitor = ScriptedMonitor::spawn(exchanges)?;
        self.config.socket = SocketEndpoint::tcp("127.0.0.1", monitor.port);
        self.monitor = Some(monitor);
        Ok(())
    }

    pub fn run(&mut self, command: &str) -> Result<()> {
        let args = build_args(command.split_whitespace());
        self.run_args(args)
    }

    pub fn run_args(&mut self, args: Vec<OsString>) -> Result<()> {
        self.stdout.clear();
        self.stderr.clear();
        self.requests.clear();
        let loader = StaticConfigLoader::new(self.config.clone());
        let mut io = IoStreams::new(&mut self.stdout, &mut self.stderr);
        let exit = run_with_loader(args, &mut io, &loader);
        self.exit_code = Some(exit);
        if let Some(mut monitor) = self.monitor.take() {
            self.requests = monitor.finish()?;
        }
        Ok(())
    }

    pub fn stdout_text(&self) -> Result<String> {
        String::from_utf8(self.stdout.clone()).context("stdout utf8")
    }

    pub fn stderr_text(&self) -> Result<String> {
        String::from_utf8(self.stderr.clone()).context("stderr utf8")
    }

    pub fn assert_success(&self) -> Result<()> {
        let exit = self.exit_code.context("exit code recorded")?;
        ensure!(
            exit == ExitCode::SUCCESS,
            "expected success, got {exit:?}; stderr: {:?}",
            self.stderr_text()?
        );
        Ok(())
    }

    pub fn assert_failure(&self) -> Result<()> {
        let exit = self.exit_code.context("exit code recorded")?;
        ensure!(
            exit == ExitCode::FAILURE,
            "expected failure exit code, got {exit:?}"
        );
        Ok(())
    }

    /// Names of the commands sent after capability negotiation.
    pub fn executed_names(&self) -> Vec<String> {
        self.requests
            .iter()
            .skip(1)
            .filter_map(|request| request.get("execute").and_then(Value::as_str))
            .map(str::to_owned)
            .collect()
    }
}

pub(super) fn build_args<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Vec<OsString> {
    std::iter::once("qmpc")
        .chain(tokens)
        .map(OsString::from)
        .collect()
}

/// A monitor that serves one TCP client, then hangs up.
pub(super) struct ScriptedMonitor {
    port: u16,
    requests: Arc<Mutex<Vec<Value>>>,
    handle: Option<thread::JoinHandle<Result<()>>>,
}

impl ScriptedMonitor {
    pub fn spawn(exchanges: Vec<Exchange>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind scripted monitor")?;
        listener
            .set_nonblocking(true)
            .context("scripted monitor nonblocking")?;
        let port = listener.local_addr().context("local addr")?.port();
        let requests: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let requests_clone = Arc::clone(&requests);
        let handle = thread::spawn(move || serve(&listener, exchanges, &requests_clone));
        Ok(Self {
            port,
            requests,
            handle: Some(handle),
        })
    }

    /// Waits for the monitor to hang up and returns the recorded commands.
    pub fn finish(&mut self) -> Result<Vec<Value>> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("scripted monitor thread panicked"))?
                .context("scripted monitor failed")?;
        }
        let requests = self
            .requests
            .lock()
            .map_err(|error| anyhow!("lock requests: {error}"))?;
        Ok(requests.clone())
    }
}

fn serve(
    listener: &TcpListener,
    exchanges: Vec<Exchange>,
    requests: &Arc<Mutex<Vec<Value>>>,
) -> Result<()> {
    let stream = accept(listener)?;
    stream
        .set_nonblocking(false)
        .context("scripted monitor blocking stream")?;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .context("scripted monitor read timeout")?;
    let mut reader = BufReader::new(stream.try_clone().context("clone stream")?);
    let mut writer = stream;

    write_line(&mut writer, GREETING)?;
    record_request(&mut reader, requests)?;
    write_line(&mut writer, EMPTY_RETURN)?;

    for exchange in exchanges {
        match exchange {
            Exchange::Reply(line) => {
                record_request(&mut reader, requests)?;
                write_line(&mut writer, &line)?;
            }
            Exchange::Emit(line) => write_line(&mut writer, &line)?,
        }
    }
    Ok(())
}

fn accept(listener: &TcpListener) -> Result<TcpStream> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match listener.accept() {
            Ok((stream, _)) => return Ok(stream),
            Err(ref error)
                if error.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline =>
            {
                thread::sleep(Duration::from_millis(10));
            }
            Err(error) => return Err(error).context("accept connection"),
        }
    }
}

fn write_line(writer: &mut TcpStream, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).context("write line")?;
    writer.write_all(b"\n").context("write newline")?;
    writer.flush().context("flush line")
}

fn record_request(
    reader: &mut BufReader<TcpStream>,
    requests: &Arc<Mutex<Vec<Value>>>,
) -> Result<()> {
    let mut line = String::new();
    if reader.read_line(&mut line).context("read command")? == 0 {
        bail!("client closed before sending a command");
    }
    let request: Value = serde_json::from_str(line.trim_end()).context("parse command")?;
    requests
        .lock()
        .map_err(|error| anyhow!("lock requests: {error}"))?
        .push(request);
    Ok(())
}
