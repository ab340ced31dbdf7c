//! Control-plane wire protocol.
//!
//! Every message is one length-prefixed JSON frame: a `u32` big-endian
//! payload length followed by the payload bytes. Requests carry a
//! correlation id and the caller's identity; the response echoes the id
//! and holds either the result or an error from the shared taxonomy.
//! A connection that issued `WatchConnections` receives its ack and then
//! a stream of event frames.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::model::{Signal, Slot, ValueType};

/// Frame size cap; anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Error taxonomy shared by every control-plane operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Registration reused a name with a different type.
    TypeConflict,
    /// Connect across incompatible types, or a data frame whose tag
    /// disagrees with the slot's type.
    TypeMismatch,
    /// Operation referenced an unknown name.
    NotFound,
    /// Transient: target channel not reachable yet.
    NotAvailable,
    /// Durable store write failed; the in-memory mutation stands.
    PersistenceFailed,
    /// Server-side fault outside the taxonomy above.
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TypeConflict => "type_conflict",
            ErrorKind::TypeMismatch => "type_mismatch",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotAvailable => "not_available",
            ErrorKind::PersistenceFailed => "persistence_failed",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload carried in a response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Request bodies, tagged by operation name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "body", rename_all = "snake_case")]
pub enum Request {
    RegisterSignal {
        name: String,
        #[serde(rename = "type")]
        value_type: ValueType,
        description: String,
    },
    RegisterSlot {
        name: String,
        #[serde(rename = "type")]
        value_type: ValueType,
        description: String,
    },
    Connect {
        slot_name: String,
        signal_name: String,
    },
    Disconnect {
        slot_name: String,
    },
    ListSignals,
    ListSlots,
    ListConnections,
    WatchConnections,
}

/// One signal's current fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub signal: String,
    pub slots: Vec<String>,
}

/// Successful reply bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Reply {
    Signal(Signal),
    Slot(Slot),
    Signals(Vec<Signal>),
    Slots(Vec<Slot>),
    Connections(Vec<Connection>),
    Watching,
}

/// Notification pushed to watch connections after their ack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ConnectionChange {
        slot_name: String,
        connected_to: Option<String>,
    },
}

/// A request frame: correlation id, caller identity, operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: Uuid,
    /// Caller identity rendered `exe.proc`; recorded as `created_by` /
    /// `modified_by` on mutations.
    pub from: String,
    #[serde(flatten)]
    pub request: Request,
}

/// A response frame, echoing the request's correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: Uuid,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Result half of a response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "ok")]
    Ok(Reply),
    #[serde(rename = "err")]
    Err(WireError),
}

impl ResponseEnvelope {
    pub fn ok(id: Uuid, reply: Reply) -> Self {
        Self {
            id,
            outcome: Outcome::Ok(reply),
        }
    }

    pub fn err(id: Uuid, error: WireError) -> Self {
        Self {
            id,
            outcome: Outcome::Err(error),
        }
    }
}

/// Frame-level failures, distinct from registry errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte cap")]
    TooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W, T>(io: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }
    io.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    io.write_all(&payload).await?;
    io.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` on clean EOF at a frame boundary.
pub async fn read_frame<R, T>(io: &mut R) -> Result<Option<T>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match io.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(Some(serde_json::from_slice(&buf)?))
}

/// Byte stream carrying control-plane frames.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// Open a stream to `endpoint`: a Unix domain socket when the address
/// starts with `/` or `./` (or carries a `unix://` prefix), TCP otherwise.
pub async fn connect(endpoint: &str) -> std::io::Result<Box<dyn Stream>> {
    let uds_path = if endpoint.starts_with('/') || endpoint.starts_with("./") {
        Some(endpoint)
    } else {
        endpoint.strip_prefix("unix://")
    };
    match uds_path {
        Some(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
        None => Ok(Box::new(tokio::net::TcpStream::connect(endpoint).await?)),
    }
}
