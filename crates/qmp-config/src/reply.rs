use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How the client judges the payload of a `"return"` reply.
///
/// Servers answer most commands with `{"return": {}}`, but queries carry
/// objects or arrays. The check decides which payloads count as success.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReplyCheck {
    /// The payload must have the shape declared for the command; commands
    /// without a declaration must return an object.
    #[default]
    Strict,
    /// Any payload is accepted as success.
    Lenient,
    /// Only an empty object is success. Any other payload is reported as a
    /// command error carrying the payload.
    Empty,
}

/// Errors encountered while parsing a [`ReplyCheck`] from text.
pub type ReplyCheckParseError = strum::ParseError;
