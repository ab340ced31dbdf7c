//! Registry data model: typed values, process identities, and the
//! signal/slot records the control plane hands out.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload type of a signal or slot.
///
/// A closed set: it drives both registry type-checking and data-plane
/// framing, and every place that handles a value matches on it
/// exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int64,
    UInt64,
    Double,
    String,
    Json,
}

impl ValueType {
    /// Wire tag used in framed values. Tag 0 is reserved.
    pub const fn tag(self) -> u8 {
        match self {
            ValueType::Bool => 1,
            ValueType::Int64 => 2,
            ValueType::UInt64 => 3,
            ValueType::Double => 4,
            ValueType::String => 5,
            ValueType::Json => 6,
        }
    }

    /// Inverse of [`ValueType::tag`].
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ValueType::Bool),
            2 => Some(ValueType::Int64),
            3 => Some(ValueType::UInt64),
            4 => Some(ValueType::Double),
            5 => Some(ValueType::String),
            6 => Some(ValueType::Json),
            _ => None,
        }
    }

    /// Textual name, as used in configuration and on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int64 => "int64",
            ValueType::UInt64 => "uint64",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Json => "json",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // pad() so callers can column-align type names
        f.pad(self.as_str())
    }
}

/// Error returned when parsing an unrecognized type name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown value type: {0}")]
pub struct UnknownValueType(pub String);

impl FromStr for ValueType {
    type Err = UnknownValueType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(ValueType::Bool),
            "int64" => Ok(ValueType::Int64),
            "uint64" => Ok(ValueType::UInt64),
            "double" => Ok(ValueType::Double),
            "string" => Ok(ValueType::String),
            "json" => Ok(ValueType::Json),
            other => Err(UnknownValueType(other.to_string())),
        }
    }
}

/// A single typed occurrence carried over the data plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    Json(serde_json::Value),
}

impl Value {
    /// Type of this occurrence.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int64(_) => ValueType::Int64,
            Value::UInt64(_) => ValueType::UInt64,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Json(_) => ValueType::Json,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Identity of a process on the fabric: executable name plus a
/// per-process id.
///
/// Rendered as `<executable>.<process>`. The executable part may not
/// contain a dot; the process part may.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub executable: String,
    pub process: String,
}

impl Identity {
    pub fn new(executable: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            process: process.into(),
        }
    }

    /// Identity of the running process: executable stem plus the default
    /// process id `def`.
    pub fn current() -> Self {
        let executable = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_string());
        Self::new(executable, "def")
    }

    /// Parse the `<executable>.<process>` rendering.
    pub fn parse(s: &str) -> Option<Self> {
        let (executable, process) = s.split_once('.')?;
        if executable.is_empty() || process.is_empty() {
            return None;
        }
        Some(Self::new(executable, process))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.executable, self.process)
    }
}

/// A registered producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Identity of the registering process, rendered `exe.proc`. Consumers
    /// derive the producer's channel address from it.
    pub created_by: String,
    /// Set on first registration, never updated.
    pub created_at: DateTime<Utc>,
    /// Refreshed on every registration call; acts as a liveness heartbeat.
    pub last_registered: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
}

/// A registered consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_registered: DateTime<Utc>,
    /// Updated whenever `connected_to` changes.
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub modified_by: String,
    /// Name of the signal this slot is wired to. A lookup key, never a
    /// handle: the signal may be re-registered or temporarily absent
    /// without invalidating this reference.
    #[serde(default)]
    pub connected_to: Option<String>,
    #[serde(default)]
    pub description: String,
}
