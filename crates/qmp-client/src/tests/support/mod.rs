//! Test support for session and behavioural coverage.
//!
//! Supplies a scripted monitor and a recording observer so tests can focus
//! on what crossed the wire and which callbacks fired.

mod fake_monitor;

use std::sync::{Mutex, PoisonError};

use serde_json::Value;

pub(super) use fake_monitor::{
    EMPTY_RETURN, FakeMonitor, GREETING, Step, after_handshake, handshake, monitor,
};

use crate::EventHandler;

/// Observer that records each callback as a short label.
#[derive(Default)]
pub(super) struct RecordingHandler {
    calls: Mutex<Vec<String>>,
}

impl RecordingHandler {
    fn push(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.into());
    }

    pub(super) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventHandler for RecordingHandler {
    fn on_powerdown(&self) {
        self.push("powerdown");
    }

    fn on_shutdown(&self) {
        self.push("shutdown");
    }

    fn on_reset(&self) {
        self.push("reset");
    }

    fn on_suspend(&self) {
        self.push("suspend");
    }

    fn on_suspend_disk(&self) {
        self.push("suspend_disk");
    }

    fn on_wakeup(&self) {
        self.push("wakeup");
    }

    fn on_stop(&self) {
        self.push("stop");
    }

    fn on_resume(&self) {
        self.push("resume");
    }

    fn on_balloon_change(&self, actual: i64) {
        self.push(format!("balloon_change {actual}"));
    }

    fn on_device_deleted(&self, device: Option<&str>, path: &str) {
        self.push(format!("device_deleted {} {path}", device.unwrap_or("-")));
    }

    fn on_device_tray_moved(&self, device: &str, tray_open: bool) {
        self.push(format!("device_tray_moved {device} {tray_open}"));
    }
}

/// The command name of a recorded request.
pub(super) fn executed(request: &Value) -> &str {
    request
        .get("execute")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// The command names of recorded requests, in order.
pub(super) fn executed_names(requests: &[Value]) -> Vec<&str> {
    requests.iter().map(executed).collect()
}
