//! The server greeting read at the start of every session.

use serde_json::{Map, Value};

use crate::QmpError;
use crate::message::json_kind;

/// Capability announcement sent by the monitor before negotiation.
///
/// The greeting is kept verbatim; accessors only read well-known fields when
/// they are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    raw: Map<String, Value>,
}

impl Greeting {
    /// Accepts a greeting frame, which must be a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`QmpError::ProtocolViolation`] for any other JSON value.
    pub fn from_frame(frame: Value) -> Result<Self, QmpError> {
        match frame {
            Value::Object(raw) => Ok(Self { raw }),
            other => Err(QmpError::ProtocolViolation(format!(
                "greeting must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// The greeting exactly as received.
    #[must_use]
    pub const fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// The `QMP.version.qemu` triple, when announced.
    #[must_use]
    pub fn version(&self) -> Option<&Value> {
        self.raw.get("QMP")?.pointer("/version/qemu")
    }

    /// Capabilities the server offered, empty when none were listed.
    #[must_use]
    pub fn capabilities(&self) -> Vec<&str> {
        self.raw
            .get("QMP")
            .and_then(|qmp| qmp.get("capabilities"))
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}
