//! Line protocol spoken with the supervising process.
//!
//! Every event is a single JSON object on its own line. The `type` key holds
//! an integer tag and always comes first.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod emitter;

pub use emitter::{EmitError, EventEmitter, Terminated};

/// Integer tag carried in the `type` field of every record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EventKind {
    Progress = 1,
    Done = 2,
    Failed = 3,
}

impl EventKind {
    pub fn is_terminal(self) -> bool {
        !matches!(self, EventKind::Progress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::Done => "done",
            EventKind::Failed => "failed",
        }
    }
}

impl From<EventKind> for u8 {
    fn from(kind: EventKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for EventKind {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(EventKind::Progress),
            2 => Ok(EventKind::Done),
            3 => Ok(EventKind::Failed),
            other => Err(ProtocolError::UnknownType(u64::from(other))),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record of the protocol
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Transfer progress in percent of the total size
    Progress { percentage: f64 },

    /// Path of the final transcoded file
    Done { filename: String },

    /// Normalized failure reason
    Failed { msg: String },
}

#[derive(Serialize)]
#[serde(untagged)]
enum Payload<'a> {
    Progress { percentage: f64 },
    Done { filename: &'a str },
    Failed { msg: &'a str },
}

#[derive(Serialize)]
struct Record<'a> {
    #[serde(rename = "type")]
    kind: EventKind,
    #[serde(flatten)]
    payload: Payload<'a>,
}

/// Errors raised while decoding a record line
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("failed to unmarshal record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record does not contain a \"type\" field")]
    MissingType,

    #[error("no handler for record type: {0}")]
    UnknownType(u64),

    #[error("{kind} record does not contain a \"{field}\" field")]
    MissingField {
        kind: EventKind,
        field: &'static str,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Progress { .. } => EventKind::Progress,
            Event::Done { .. } => EventKind::Done,
            Event::Failed { .. } => EventKind::Failed,
        }
    }

    /// Encode as a single JSON line, without the trailing newline
    pub fn to_line(&self) -> serde_json::Result<String> {
        let payload = match self {
            Event::Progress { percentage } => Payload::Progress {
                percentage: *percentage,
            },
            Event::Done { filename } => Payload::Done { filename },
            Event::Failed { msg } => Payload::Failed { msg },
        };

        serde_json::to_string(&Record {
            kind: self.kind(),
            payload,
        })
    }

    /// Decode a line produced by [`Event::to_line`].
    ///
    /// Mirrors the checks the supervising process applies: the record must be
    /// an object with a known `type` and the field that type requires.
    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(line.trim())?;
        let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

        let tag = object
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingType)?;
        let kind = u8::try_from(tag)
            .map_err(|_| ProtocolError::UnknownType(tag))
            .and_then(EventKind::try_from)?;

        let missing = |field| ProtocolError::MissingField { kind, field };

        match kind {
            EventKind::Progress => {
                let percentage = object
                    .get("percentage")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| missing("percentage"))?;
                Ok(Event::Progress { percentage })
            }
            EventKind::Done => {
                let filename = object
                    .get("filename")
                    .and_then(Value::as_str)
                    .ok_or_else(|| missing("filename"))?;
                Ok(Event::Done {
                    filename: filename.to_string(),
                })
            }
            EventKind::Failed => {
                let msg = object
                    .get("msg")
                    .and_then(Value::as_str)
                    .ok_or_else(|| missing("msg"))?;
                Ok(Event::Failed {
                    msg: msg.to_string(),
                })
            }
        }
    }
}
