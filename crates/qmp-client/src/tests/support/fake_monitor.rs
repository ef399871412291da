//! Scripted monitor for session tests.
//!
//! The monitor accepts one TCP connection and walks through a list of
//! [`Step`]s, recording every command the client sends so tests can assert on
//! the wire traffic after the session ends.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;

use qmp_config::SocketEndpoint;

/// Greeting sent by the scripted monitor.
pub(in crate::tests) const GREETING: &str = concat!(
    r#"{"QMP": {"version": {"qemu": {"micro": 0, "minor": 2, "major": 8}, "#,
    r#""package": "v8.2.0"}, "capabilities": ["oob"]}}"#
);

/// Empty success reply.
pub(in crate::tests) const EMPTY_RETURN: &str = r#"{"return": {}}"#;

/// One action taken by the monitor.
pub(in crate::tests) enum Step {
    /// Writes the line followed by a newline.
    Emit(String),
    /// Writes the bytes exactly as given.
    Raw(Vec<u8>),
    /// Reads and records one command line.
    Receive,
    /// Signals the test.
    Notify(Sender<()>),
    /// Waits for the test; a dropped sender also releases the monitor.
    Await(Receiver<()>),
    /// Sleeps before the next step.
    Pause(Duration),
}

impl Step {
    pub(in crate::tests) fn emit(line: &str) -> Self {
        Self::Emit(line.to_owned())
    }
}

/// Greeting plus a successful capability negotiation.
pub(in crate::tests) fn handshake() -> Vec<Step> {
    vec![Step::emit(GREETING), Step::Receive, Step::emit(EMPTY_RETURN)]
}

/// Handshake followed by `steps`.
pub(in crate::tests) fn after_handshake(steps: Vec<Step>) -> Vec<Step> {
    let mut script = handshake();
    script.extend(steps);
    script
}

/// A monitor serving one scripted connection on an ephemeral TCP port.
pub(in crate::tests) struct FakeMonitor {
    port: u16,
    requests: Arc<Mutex<Vec<Value>>>,
    result: Arc<Mutex<Option<Result<()>>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FakeMonitor {
    /// Spawns a monitor that runs `script` against the first client.
    pub fn spawn(script: Vec<Step>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind fake monitor")?;
        listener
            .set_nonblocking(true)
            .context("fake monitor nonblocking")?;
        let port = listener.local_addr().context("local addr")?.port();
        let requests: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let result: Arc<Mutex<Option<Result<()>>>> = Arc::new(Mutex::new(None));
        let requests_clone = Arc::clone(&requests);
        let result_clone = Arc::clone(&result);
        let handle = thread::spawn(move || {
            let outcome = Self::serve_client(&listener, script, &requests_clone);
            if let Ok(mut guard) = result_clone.lock() {
                *guard = Some(outcome);
            }
        });
        Ok(Self {
            port,
            requests,
            result,
            handle: Some(handle),
        })
    }

    pub fn endpoint(&self) -> SocketEndpoint {
        SocketEndpoint::tcp("127.0.0.1", self.port)
    }

    /// Waits for the script to finish and returns the recorded commands.
    pub fn finish(&mut self) -> Result<Vec<Value>> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("fake monitor thread panicked"))?;
        }
        if let Some(outcome) = self
            .result
            .lock()
            .map_err(|error| anyhow!("lock fake monitor result: {error}"))?
            .take()
        {
            outcome.context("fake monitor failed")?;
        }
        let requests = self
            .requests
            .lock()
            .map_err(|error| anyhow!("lock requests: {error}"))?;
        Ok(requests.clone())
    }

    /// Commands received so far, without waiting for the script.
    pub fn requests(&self) -> Result<Vec<Value>> {
        let requests = self
            .requests
            .lock()
            .map_err(|error| anyhow!("lock requests: {error}"))?;
        Ok(requests.clone())
    }

    fn serve_client(
        listener: &TcpListener,
        script: Vec<Step>,
        requests: &Arc<Mutex<Vec<Value>>>,
    ) -> Result<()> {
        let stream = Self::accept(listener)?;
        stream
            .set_nonblocking(false)
            .context("fake monitor blocking stream")?;
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .context("fake monitor read timeout")?;
        let mut reader = BufReader::new(stream.try_clone().context("clone stream")?);
        let mut writer = stream;
        for step in script {
            match step {
                Step::Emit(line) => {
                    writer.write_all(line.as_bytes()).context("write line")?;
                    writer.write_all(b"\n").context("write newline")?;
                    writer.flush().context("flush line")?;
                }
                Step::Raw(bytes) => {
                    writer.write_all(&bytes).context("write raw bytes")?;
                    writer.flush().context("flush raw bytes")?;
                }
                Step::Receive => Self::record_request(&mut reader, requests)?,
                Step::Notify(sender) => {
                    // A test that already gave up is not a monitor failure.
                    let _ = sender.send(());
                }
                Step::Await(receiver) => {
                    let _ = receiver.recv_timeout(Duration::from_secs(5));
                }
                Step::Pause(duration) => thread::sleep(duration),
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
}

/// Spawns a monitor, panicking when the listener cannot be bound.
pub(in crate::tests) fn monitor(script: Vec<Step>) -> FakeMonitor {
    match FakeMonitor::spawn(script) {
        Ok(monitor) => monitor,
        Err(error) => panic!("failed to start fake monitor: {error:#}"),
    }
}
