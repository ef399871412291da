//! Declarative table of monitor commands.
//!
//! Each entry names a command, the arguments it accepts, and the shape of a
//! successful reply. [`Client::execute`](crate::Client::execute) validates
//! caller arguments against the table before anything reaches the wire, and
//! the reply check consults it to judge `"return"` payloads. Supporting a new
//! command means adding a table entry; no dispatch code changes.

mod helpers;

use serde_json::Value;
use strum::Display;

pub use self::helpers::{BalloonInfo, QemuVersion, StatusInfo, VersionInfo};
use self::ArgKind::{Any, Array, Bool, Integer, Object, String as Str};
use self::ReturnShape::{Any as AnyReturn, Array as List, Object as Record};
use crate::QmpError;
use crate::command::Arguments;

/// JSON type an argument must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ArgKind {
    /// A JSON string.
    String,
    /// A JSON boolean.
    Bool,
    /// A JSON number without a fractional part.
    Integer,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
    /// Any JSON value.
    Any,
}

impl ArgKind {
    /// Whether `value` has this kind.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

/// JSON type a successful reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReturnShape {
    /// A JSON object, possibly empty.
    Object,
    /// A JSON array.
    Array,
    /// Anything, for commands such as `human-monitor-command`.
    Any,
}

impl ReturnShape {
    /// Whether `payload` has this shape.
    #[must_use]
    pub fn accepts(self, payload: &Value) -> bool {
        match self {
            Self::Object => payload.is_object(),
            Self::Array => payload.is_array(),
            Self::Any => true,
        }
    }
}

/// One argument accepted by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    /// Key in the argument object.
    pub name: &'static str,
    /// Expected JSON type.
    pub kind: ArgKind,
    /// Whether the key must be present.
    pub required: bool,
}

const fn required(name: &'static str, kind: ArgKind) -> ArgSpec {
    ArgSpec {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: ArgKind) -> ArgSpec {
    ArgSpec {
        name,
        kind,
        required: false,
    }
}

/// Table entry describing one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Wire name of the command.
    pub name: &'static str,
    /// Declared arguments.
    pub args: &'static [ArgSpec],
    /// Whether keys beyond `args` are allowed, as for property bags.
    pub open: bool,
    /// Shape of a successful reply.
    pub returns: ReturnShape,
}

const fn action(name: &'static str, args: &'static [ArgSpec]) -> CommandSpec {
    CommandSpec {
        name,
        args,
        open: false,
        returns: ReturnShape::Object,
    }
}

const fn property_bag(name: &'static str, args: &'static [ArgSpec]) -> CommandSpec {
    CommandSpec {
        name,
        args,
        open: true,
        returns: ReturnShape::Object,
    }
}

const fn query(name: &'static str, args: &'static [ArgSpec], returns: ReturnShape) -> CommandSpec {
    CommandSpec {
        name,
        args,
        open: false,
        returns,
    }
}

/// Every command the client knows about.
pub static COMMANDS: &[CommandSpec] = &[
    action("qmp_capabilities", &[optional("enable", Array)]),
    action("quit", &[]),
    action("stop", &[]),
    action("cont", &[]),
    action("system_powerdown", &[]),
    action("system_reset", &[]),
    action("system_wakeup", &[]),
    action("inject-nmi", &[]),
    property_bag(
        "object-add",
        &[required("qom-type", Str), required("id", Str)],
    ),
    action("object-del", &[required("id", Str)]),
    property_bag(
        "device_add",
        &[required("driver", Str), optional("id", Str)],
    ),
    action("device_del", &[required("id", Str)]),
    action(
        "chardev-add",
        &[required("id", Str), required("backend", Object)],
    ),
    action("chardev-remove", &[required("id", Str)]),
    property_bag("netdev_add", &[required("type", Str), required("id", Str)]),
    action("netdev_del", &[required("id", Str)]),
    action("set_link", &[required("name", Str), required("up", Bool)]),
    action("balloon", &[required("value", Integer)]),
    action(
        "eject",
        &[
            optional("device", Str),
            optional("id", Str),
            optional("force", Bool),
        ],
    ),
    action(
        "screendump",
        &[
            required("filename", Str),
            optional("device", Str),
            optional("head", Integer),
            optional("format", Str),
        ],
    ),
    action(
        "send-key",
        &[required("keys", Array), optional("hold-time", Integer)],
    ),
    action(
        "memsave",
        &[
            required("val", Integer),
            required("size", Integer),
            required("filename", Str),
            optional("cpu-index", Integer),
        ],
    ),
    action(
        "pmemsave",
        &[
            required("val", Integer),
            required("size", Integer),
            required("filename", Str),
        ],
    ),
    action(
        "ringbuf-write",
        &[
            required("device", Str),
            required("data", Str),
            optional("format", Str),
        ],
    ),
    query(
        "ringbuf-read",
        &[
            required("device", Str),
            required("size", Integer),
            optional("format", Str),
        ],
        AnyReturn,
    ),
    query(
        "human-monitor-command",
        &[required("command-line", Str), optional("cpu-index", Integer)],
        AnyReturn,
    ),
    query("query-status", &[], Record),
    query("query-version", &[], Record),
    query("query-name", &[], Record),
    query("query-uuid", &[], Record),
    query("query-balloon", &[], Record),
    query("query-kvm", &[], Record),
    query("query-vnc", &[], Record),
    query("query-spice", &[], Record),
    query("query-commands", &[], List),
    query(
        "query-command-line-options",
        &[optional("option", Str)],
        List,
    ),
    query("query-events", &[], List),
    query("query-chardev", &[], List),
    query("query-chardev-backends", &[], List),
    query("query-block", &[], List),
    query("query-blockstats", &[optional("query-nodes", Bool)], List),
    query("query-cpus-fast", &[], List),
    query("query-iothreads", &[], List),
    query("query-pci", &[], List),
    query("query-mice", &[], List),
    query("qom-get", &[required("path", Str), required("property", Str)], AnyReturn),
    action(
        "qom-set",
        &[
            required("path", Str),
            required("property", Str),
            required("value", Any),
        ],
    ),
];

/// Finds the table entry for `name`.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Validates arguments for `name`; commands missing from the table pass.
///
/// # Errors
///
/// Returns [`QmpError::InvalidArguments`] when the command is known and the
/// arguments do not satisfy its entry.
pub fn validate(name: &str, arguments: Option<&Arguments>) -> Result<(), QmpError> {
    lookup(name).map_or(Ok(()), |spec| spec.validate(arguments))
}

/// Shape a successful reply to `name` must have under the strict check.
///
/// Commands missing from the table are expected to return an object, which
/// is what the protocol specifies for a bare `"return"`.
#[must_use]
pub fn expected_return(name: &str) -> ReturnShape {
    lookup(name).map_or(ReturnShape::Object, |spec| spec.returns)
}

impl CommandSpec {
    /// Checks `arguments` against this entry.
    ///
    /// # Errors
    ///
    /// Returns [`QmpError::InvalidArguments`] for a missing required key, a
    /// value of the wrong kind, or an undeclared key on a closed entry.
    pub fn validate(&self, arguments: Option<&Arguments>) -> Result<(), QmpError> {
        let invalid = |reason: String| QmpError::InvalidArguments {
            command: self.name.to_owned(),
            reason,
        };
        let empty = Arguments::new();
        let supplied = arguments.unwrap_or(&empty);

        for spec in self.args {
            match supplied.get(spec.name) {
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(invalid(format!(
                        "'{}' must be of type {}",
                        spec.name, spec.kind
                    )));
                }
                None if spec.required => {
                    return Err(invalid(format!("missing required argument '{}'", spec.name)));
                }
                _ => {}
            }
        }

        if !self.open
            && let Some(unknown) = supplied
                .keys()
                .find(|key| !self.args.iter().any(|spec| spec.name == key.as_str()))
        {
            return Err(invalid(format!("unexpected argument '{unknown}'")));
        }
        Ok(())
    }
}
