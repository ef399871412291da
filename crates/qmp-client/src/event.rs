//! Asynchronous events and the observer they are dispatched to.
//!
//! Events share the connection with command replies. Each one is routed to
//! the registered [`EventHandler`] in arrival order, including events that
//! arrive while a command is waiting for its reply.
//!
//! Observers run on whichever thread is reading the connection. A handler
//! that blocks stalls every pending command, and a handler must not call
//! [`Client::close`](crate::Client::close) since the reading thread already
//! holds the session. A handler that panics is caught by the client, which
//! then closes the connection.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{trace, warn};

const EVENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::event");

/// An event as delivered on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, such as `STOP` or `DEVICE_DELETED`.
    #[serde(rename = "event")]
    pub name: String,
    /// Event payload; an empty object when the monitor sent none.
    #[serde(default = "empty_object")]
    pub data: Value,
    /// Server timestamp, passed through uninterpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Event {
    /// Builds an event with the given name and payload.
    #[must_use]
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
            timestamp: None,
        }
    }
}

/// Events the client knows how to destructure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `POWERDOWN`: the guest was asked to power down.
    Powerdown,
    /// `SHUTDOWN`: the guest has shut down.
    Shutdown,
    /// `RESET`: the guest was reset.
    Reset,
    /// `SUSPEND`: the guest entered a suspended state.
    Suspend,
    /// `SUSPEND_DISK`: the guest suspended to disk.
    SuspendDisk,
    /// `WAKEUP`: the guest woke from suspension.
    Wakeup,
    /// `STOP`: the virtual machine paused.
    Stop,
    /// `RESUME`: the virtual machine resumed.
    Resume,
    /// `BALLOON_CHANGE`: the memory balloon changed size.
    BalloonChange {
        /// Current guest memory in bytes.
        actual: i64,
    },
    /// `DEVICE_DELETED`: a device finished hot-unplugging.
    DeviceDeleted {
        /// Device identifier, absent for devices created without one.
        device: Option<String>,
        /// QOM path of the removed device.
        path: String,
    },
    /// `DEVICE_TRAY_MOVED`: a removable-media tray opened or closed.
    DeviceTrayMoved {
        /// Block device name.
        device: String,
        /// Whether the tray is now open.
        tray_open: bool,
    },
}

#[derive(Deserialize)]
struct BalloonChangeData {
    actual: i64,
}

#[derive(Deserialize)]
struct DeviceDeletedData {
    #[serde(default)]
    device: Option<String>,
    path: String,
}

#[derive(Deserialize)]
struct DeviceTrayMovedData {
    device: String,
    #[serde(rename = "tray-open")]
    tray_open: bool,
}

fn decode<T: DeserializeOwned>(data: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(data)
}

impl EventKind {
    /// Maps an event onto a known kind.
    ///
    /// Returns `Ok(None)` for event names the client does not model.
    ///
    /// # Errors
    ///
    /// Returns the decoding error when a known event carries data of the
    /// wrong shape.
    pub fn parse(event: &Event) -> Result<Option<Self>, serde_json::Error> {
        let kind = match event.name.as_str() {
            "POWERDOWN" => Self::Powerdown,
            "SHUTDOWN" => Self::Shutdown,
            "RESET" => Self::Reset,
            "SUSPEND" => Self::Suspend,
            "SUSPEND_DISK" => Self::SuspendDisk,
            "WAKEUP" => Self::Wakeup,
            "STOP" => Self::Stop,
            "RESUME" => Self::Resume,
            "BALLOON_CHANGE" => {
                let data: BalloonChangeData = decode(&event.data)?;
                Self::BalloonChange {
                    actual: data.actual,
                }
            }
            "DEVICE_DELETED" => {
                let data: DeviceDeletedData = decode(&event.data)?;
                Self::DeviceDeleted {
                    device: data.device,
                    path: data.path,
                }
            }
            "DEVICE_TRAY_MOVED" => {
                let data: DeviceTrayMovedData = decode(&event.data)?;
                Self::DeviceTrayMoved {
                    device: data.device,
                    tray_open: data.tray_open,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(kind))
    }

    /// Invokes the handler method matching this kind.
    pub fn notify(&self, handler: &dyn EventHandler) {
        match self {
            Self::Powerdown => handler.on_powerdown(),
            Self::Shutdown => handler.on_shutdown(),
            Self::Reset => handler.on_reset(),
            Self::Suspend => handler.on_suspend(),
            Self::SuspendDisk => handler.on_suspend_disk(),
            Self::Wakeup => handler.on_wakeup(),
            Self::Stop => handler.on_stop(),
            Self::Resume => handler.on_resume(),
            Self::BalloonChange { actual } => handler.on_balloon_change(*actual),
            Self::DeviceDeleted { device, path } => {
                handler.on_device_deleted(device.as_deref(), path);
            }
            Self::DeviceTrayMoved { device, tray_open } => {
                handler.on_device_tray_moved(device, *tray_open);
            }
        }
    }
}

/// Observer notified of known events.
///
/// Every method defaults to doing nothing, so implementations override only
/// the events they care about. Methods take `&self`; observers that
/// accumulate state use interior mutability.
pub trait EventHandler: Send + Sync {
    /// The guest was asked to power down.
    fn on_powerdown(&self) {}

    /// The guest has shut down.
    fn on_shutdown(&self) {}

    /// The guest was reset.
    fn on_reset(&self) {}

    /// The guest entered a suspended state.
    fn on_suspend(&self) {}

    /// The guest suspended to disk.
    fn on_suspend_disk(&self) {}

    /// The guest woke from suspension.
    fn on_wakeup(&self) {}

    /// The virtual machine paused.
    fn on_stop(&self) {}

    /// The virtual machine resumed.
    fn on_resume(&self) {}

    /// The memory balloon now reports `actual` bytes.
    fn on_balloon_change(&self, _actual: i64) {}

    /// A device finished hot-unplugging.
    fn on_device_deleted(&self, _device: Option<&str>, _path: &str) {}

    /// A removable-media tray moved.
    fn on_device_tray_moved(&self, _device: &str, _tray_open: bool) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {}

/// Routes one event to the handler.
///
/// Unknown event names are dropped silently; a known event whose payload
/// cannot be destructured is dropped with a warning.
pub fn dispatch_event(handler: &dyn EventHandler, event: &Event) {
    match EventKind::parse(event) {
        Ok(Some(kind)) => {
            trace!(target: EVENT_TARGET, event = %event.name, "dispatching event");
            kind.notify(handler);
        }
        Ok(None) => {
            trace!(target: EVENT_TARGET, event = %event.name, "ignoring unknown event");
        }
        Err(error) => {
            warn!(
                target: EVENT_TARGET,
                event = %event.name,
                error = %error,
                "dropping event with unexpected payload"
            );
        }
    }
}
