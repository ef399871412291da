//! Typed wrappers for frequently used commands.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::command::Arguments;
use crate::dispatch::Reply;
use crate::{Client, QmpError};

/// Reply to `query-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Whether the guest CPUs are running.
    pub running: bool,
    /// Run state, such as `running`, `paused`, or `shutdown`.
    pub status: String,
    /// Whether single-step mode is enabled, on monitors that report it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singlestep: Option<bool>,
}

/// Release triple inside a version reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QemuVersion {
    /// Major release number.
    pub major: u32,
    /// Minor release number.
    pub minor: u32,
    /// Micro release number.
    pub micro: u32,
}

/// Reply to `query-version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Upstream release.
    pub qemu: QemuVersion,
    /// Distribution package string, often empty.
    #[serde(default)]
    pub package: String,
}

/// Reply to `query-balloon`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalloonInfo {
    /// Current guest memory in bytes.
    pub actual: i64,
}

#[derive(Deserialize)]
struct NameInfo {
    #[serde(default)]
    name: Option<String>,
}

fn object(value: Value) -> Option<Arguments> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn id_argument(id: &str) -> Option<Arguments> {
    object(json!({ "id": id }))
}

fn decode<T: DeserializeOwned>(command: &str, reply: &Reply) -> Result<T, QmpError> {
    reply.deserialize().map_err(|source| QmpError::DecodeReply {
        command: command.to_owned(),
        source,
    })
}

impl Client {
    fn run(&self, name: &str, arguments: Option<Arguments>) -> Result<(), QmpError> {
        self.execute(name, arguments).map(drop)
    }

    /// Asks the monitor to exit.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn quit(&self) -> Result<(), QmpError> {
        self.run("quit", None)
    }

    /// Pauses guest execution.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn stop(&self) -> Result<(), QmpError> {
        self.run("stop", None)
    }

    /// Resumes guest execution.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn cont(&self) -> Result<(), QmpError> {
        self.run("cont", None)
    }

    /// Sends an ACPI power-button press to the guest.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn system_powerdown(&self) -> Result<(), QmpError> {
        self.run("system_powerdown", None)
    }

    /// Resets the guest.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn system_reset(&self) -> Result<(), QmpError> {
        self.run("system_reset", None)
    }

    /// Wakes a suspended guest.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn system_wakeup(&self) -> Result<(), QmpError> {
        self.run("system_wakeup", None)
    }

    /// Injects a non-maskable interrupt into the guest.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn inject_nmi(&self) -> Result<(), QmpError> {
        self.run("inject-nmi", None)
    }

    /// Creates a QOM object; `properties` are merged into the arguments.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn object_add(
        &self,
        qom_type: &str,
        id: &str,
        properties: Option<Arguments>,
    ) -> Result<(), QmpError> {
        let mut arguments = properties.unwrap_or_default();
        arguments.insert(String::from("qom-type"), Value::from(qom_type));
        arguments.insert(String::from("id"), Value::from(id));
        self.run("object-add", Some(arguments))
    }

    /// Removes a QOM object.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn object_del(&self, id: &str) -> Result<(), QmpError> {
        self.run("object-del", id_argument(id))
    }

    /// Requests hot-unplug of a device; completion is signalled by a
    /// `DEVICE_DELETED` event.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn device_del(&self, id: &str) -> Result<(), QmpError> {
        self.run("device_del", id_argument(id))
    }

    /// Removes a character device backend.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn chardev_remove(&self, id: &str) -> Result<(), QmpError> {
        self.run("chardev-remove", id_argument(id))
    }

    /// Removes a network backend.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn netdev_del(&self, id: &str) -> Result<(), QmpError> {
        self.run("netdev_del", id_argument(id))
    }

    /// Sets the link state of a network device.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn set_link(&self, name: &str, up: bool) -> Result<(), QmpError> {
        self.run("set_link", object(json!({ "name": name, "up": up })))
    }

    /// Asks the balloon driver to resize guest memory to `bytes`.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn balloon(&self, bytes: i64) -> Result<(), QmpError> {
        self.run("balloon", object(json!({ "value": bytes })))
    }

    /// Ejects removable media from a block device.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn eject(&self, device: &str, force: bool) -> Result<(), QmpError> {
        self.run("eject", object(json!({ "device": device, "force": force })))
    }

    /// Writes the primary display to `filename` on the monitor host.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`].
    pub fn screendump(&self, filename: &str) -> Result<(), QmpError> {
        self.run("screendump", object(json!({ "filename": filename })))
    }

    /// Reports the run state of the guest.
    ///
    /// # Errors
    ///
    /// As for [`Client::execute`], plus [`QmpError::DecodeReply`] when the
    /// reply does not have the expected fields.
    pub fn query_status(&self) -> Result<StatusInfo, QmpError> {
        let reply = self.execute("query-status", None)?;
        decode("query-status", &reply)
    }

    /// Reports the monitor version.
    ///
    /// # Errors
    ///
    /// As for [`Client::query_status`].
    pub fn query_version(&self) -> Result<VersionInfo, QmpError> {
        let reply = self.execute("query-version", None)?;
        decode("query-version", &reply)
    }

    /// Reports the guest name, when one was configured.
    ///
    /// # Errors
    ///
    /// As for [`Client::query_status`].
    pub fn query_name(&self) -> Result<Option<String>, QmpError> {
        let reply = self.execute("query-name", None)?;
        decode::<NameInfo>("query-name", &reply).map(|info| info.name)
    }

    /// Reports the current balloon size.
    ///
    /// # Errors
    ///
    /// As for [`Client::query_status`].
    pub fn query_balloon(&self) -> Result<BalloonInfo, QmpError> {
        let reply = self.execute("query-balloon", None)?;
        decode("query-balloon", &reply)
    }
}
