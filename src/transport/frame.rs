//! Value framing for the data plane.
//!
//! One occurrence on the wire is `type_tag (1 byte) | timestamp (i64 BE,
//! epoch milliseconds) | payload`. Bool is one byte, the numeric types are
//! eight bytes big-endian, String and Json are length-prefixed with a u32.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::client::wire::MAX_FRAME_LEN;
use crate::client::{ClientError, Value, ValueType};

/// Errors on the data plane.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("frame carries {actual}, slot expects {expected}")]
    TypeMismatch {
        expected: ValueType,
        actual: ValueType,
    },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error(transparent)]
    Registry(#[from] ClientError),
}

/// Append one framed occurrence to `buf`.
pub fn encode_value(
    buf: &mut BytesMut,
    value: &Value,
    timestamp: DateTime<Utc>,
) -> Result<(), TransportError> {
    buf.put_u8(value.value_type().tag());
    buf.put_i64(timestamp.timestamp_millis());
    match value {
        Value::Bool(v) => buf.put_u8(*v as u8),
        Value::Int64(v) => buf.put_i64(*v),
        Value::UInt64(v) => buf.put_u64(*v),
        Value::Double(v) => buf.put_f64(*v),
        Value::String(v) => {
            put_bytes(buf, v.as_bytes())?;
        }
        Value::Json(v) => {
            let bytes =
                serde_json::to_vec(v).map_err(|e| TransportError::Malformed(e.to_string()))?;
            put_bytes(buf, &bytes)?;
        }
    }
    Ok(())
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), TransportError> {
    if bytes.len() > MAX_FRAME_LEN {
        return Err(TransportError::Malformed(format!(
            "payload of {} bytes exceeds the {} byte cap",
            bytes.len(),
            MAX_FRAME_LEN
        )));
    }
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
    Ok(())
}

/// Read one occurrence, checking its tag against the slot's type.
///
/// Returns `Ok(None)` on a clean close at a frame boundary. EOF inside a
/// frame is an error, and no partial value is ever produced.
pub async fn read_value<R>(
    io: &mut R,
    expected: ValueType,
) -> Result<Option<(Value, DateTime<Utc>)>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    match io.read_exact(&mut tag).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let actual = ValueType::from_tag(tag[0])
        .ok_or_else(|| TransportError::Malformed(format!("unknown type tag {}", tag[0])))?;
    if actual != expected {
        return Err(TransportError::TypeMismatch { expected, actual });
    }

    let mut millis = [0u8; 8];
    io.read_exact(&mut millis).await?;
    let timestamp = Utc
        .timestamp_millis_opt(i64::from_be_bytes(millis))
        .single()
        .ok_or_else(|| TransportError::Malformed("timestamp out of range".to_string()))?;

    let value = match actual {
        ValueType::Bool => {
            let mut b = [0u8; 1];
            io.read_exact(&mut b).await?;
            Value::Bool(b[0] != 0)
        }
        ValueType::Int64 => {
            let mut b = [0u8; 8];
            io.read_exact(&mut b).await?;
            Value::Int64(i64::from_be_bytes(b))
        }
        ValueType::UInt64 => {
            let mut b = [0u8; 8];
            io.read_exact(&mut b).await?;
            Value::UInt64(u64::from_be_bytes(b))
        }
        ValueType::Double => {
            let mut b = [0u8; 8];
            io.read_exact(&mut b).await?;
            Value::Double(f64::from_bits(u64::from_be_bytes(b)))
        }
        ValueType::String => {
            let bytes = read_prefixed(io).await?;
            let s = String::from_utf8(bytes)
                .map_err(|e| TransportError::Malformed(format!("string payload: {e}")))?;
            Value::String(s)
        }
        ValueType::Json => {
            let bytes = read_prefixed(io).await?;
            let v = serde_json::from_slice(&bytes)
                .map_err(|e| TransportError::Malformed(format!("json payload: {e}")))?;
            Value::Json(v)
        }
    };
    Ok(Some((value, timestamp)))
}

async fn read_prefixed<R>(io: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    io.read_exact(&mut len).await?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::Malformed(format!(
            "payload of {len} bytes exceeds the {MAX_FRAME_LEN} byte cap"
        )));
    }
    let mut bytes = vec![0u8; len];
    io.read_exact(&mut bytes).await?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn round_trip(value: Value) -> (Value, DateTime<Utc>) {
        let sent_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let mut buf = BytesMut::new();
        encode_value(&mut buf, &value, sent_at).unwrap();

        let mut bytes = &buf[..];
        read_value(&mut bytes, value.value_type())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_all_types() {
        let sent_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        for value in [
            Value::Bool(true),
            Value::Int64(-42),
            Value::UInt64(u64::MAX),
            Value::Double(23.5),
            Value::String("running".to_string()),
            Value::Json(json!({"rpm": 1450, "ok": true})),
        ] {
            let (decoded, timestamp) = round_trip(value.clone()).await;
            assert_eq!(decoded, value);
            assert_eq!(timestamp, sent_at);
        }
    }

    #[tokio::test]
    async fn test_eof_at_frame_boundary_is_clean() {
        let mut bytes: &[u8] = &[];
        let frame = read_value(&mut bytes, ValueType::Double).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_an_error() {
        let mut buf = BytesMut::new();
        encode_value(&mut buf, &Value::Double(23.5), Utc::now()).unwrap();
        let mut truncated = &buf[..buf.len() - 4];
        assert!(read_value(&mut truncated, ValueType::Double).await.is_err());
    }

    #[tokio::test]
    async fn test_tag_mismatch_is_rejected() {
        let mut buf = BytesMut::new();
        encode_value(&mut buf, &Value::Bool(true), Utc::now()).unwrap();

        let mut bytes = &buf[..];
        let err = read_value(&mut bytes, ValueType::Double).await.unwrap_err();
        match err {
            TransportError::TypeMismatch { expected, actual } => {
                assert_eq!(expected, ValueType::Double);
                assert_eq!(actual, ValueType::Bool);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tag_is_malformed() {
        let mut bytes: &[u8] = &[0x7f];
        let err = read_value(&mut bytes, ValueType::Double).await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(ValueType::String.tag());
        buf.put_i64(0);
        buf.put_u32(u32::MAX);

        let mut bytes = &buf[..];
        let err = read_value(&mut bytes, ValueType::String).await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
    }
}
