//! Wire frame types, reserved frame kinds, and JSON / MessagePack codecs.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::transport::RawFrame;
use crate::types::{MessageId, OutboundMessage};

// ---------------------------------------------------------------------------
// Reserved frame kinds
// ---------------------------------------------------------------------------

pub mod kind {
    /// Server → client: handshake complete.
    pub const READY: &str = "ready";
    /// Server → client: error with code, message and retryable flag.
    pub const ERROR: &str = "error";
    /// Server → client: server going away, optionally with `reconnectAfter`.
    pub const SHUTDOWN: &str = "shutdown";
    /// Both directions: liveness probe, answered with an ack.
    pub const PING: &str = "ping";
    /// Client → server: join a channel.
    pub const JOIN: &str = "join";
    /// Client → server: leave a channel.
    pub const LEAVE: &str = "leave";
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

// Absent fields are skipped when encoding. MessagePack frames are decoded
// through rmpv rather than rmp_serde's struct deserializer, so skipped
// Options do not trip https://github.com/3Hren/msgpack-rust/issues/86.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Frame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Identifier of the outbound frame this frame acknowledges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Milliseconds the server asks the client to wait before reconnecting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_after: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorInfo {
    /// Errors without an explicit flag are treated as retryable.
    pub fn is_retryable(&self) -> bool {
        self.retryable.unwrap_or(true)
    }
}

impl Frame {
    /// Build the frame for a caller's outbound message.
    pub fn message(msg: &OutboundMessage) -> Self {
        let timestamp = msg
            .created_at
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .ok();
        Frame {
            id: Some(msg.id.to_string()),
            kind: Some(msg.kind.clone()),
            payload: Some(msg.payload.clone()),
            timestamp,
            ..Default::default()
        }
    }

    pub fn ping(id: &MessageId) -> Self {
        Frame {
            id: Some(id.to_string()),
            kind: Some(kind::PING.to_string()),
            ..Default::default()
        }
    }

    pub fn join(id: &MessageId, channel: &str) -> Self {
        Frame {
            id: Some(id.to_string()),
            kind: Some(kind::JOIN.to_string()),
            channel: Some(channel.to_string()),
            ..Default::default()
        }
    }

    pub fn leave(id: &MessageId, channel: &str) -> Self {
        Frame {
            id: Some(id.to_string()),
            kind: Some(kind::LEAVE.to_string()),
            channel: Some(channel.to_string()),
            ..Default::default()
        }
    }

    /// Acknowledge an inbound frame.
    pub fn ack(id: &str) -> Self {
        Frame {
            ack: Some(id.to_string()),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Wire encoding for outbound frames. Inbound frames are decoded according
/// to their transport frame type regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// JSON in text frames.
    #[default]
    Json,
    /// MessagePack in binary frames.
    MessagePack,
}

impl Codec {
    /// Value of the `format` query parameter announced to the server.
    pub fn format_name(self) -> &'static str {
        match self {
            Codec::Json => "json",
            Codec::MessagePack => "msgpack",
        }
    }

    pub fn encode(self, frame: &Frame) -> Result<RawFrame, Error> {
        match self {
            Codec::Json => Ok(RawFrame::Text(serde_json::to_string(frame)?)),
            Codec::MessagePack => Ok(RawFrame::Binary(rmp_serde::to_vec_named(frame)?)),
        }
    }

    pub fn decode(raw: &RawFrame) -> Result<Frame, Error> {
        match raw {
            RawFrame::Text(text) => serde_json::from_str(text)
                .map_err(|e| Error::Protocol(format!("frame decode error: {e}"))),
            RawFrame::Binary(data) => decode_msgpack(data),
        }
    }
}

fn decode_msgpack(data: &[u8]) -> Result<Frame, Error> {
    // msgpack → rmpv::Value → serde_json::Value → Frame. rmpv accepts binary
    // blobs that serde_json::Value cannot represent, and the JSON step
    // deduplicates repeated map keys.
    let mut cursor = std::io::Cursor::new(data);
    let value = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| Error::Protocol(format!("msgpack decode error: {e}")))?;
    serde_json::from_value(rmpv_to_json(value))
        .map_err(|e| Error::Protocol(format!("frame decode error: {e}")))
}

/// Convert an rmpv::Value to serde_json::Value, encoding binary data as base64 strings.
fn rmpv_to_json(value: rmpv::Value) -> serde_json::Value {
    match value {
        rmpv::Value::Nil => serde_json::Value::Null,
        rmpv::Value::Boolean(b) => serde_json::Value::Bool(b),
        rmpv::Value::Integer(i) => {
            if let Some(n) = i.as_i64() {
                serde_json::Value::Number(n.into())
            } else if let Some(n) = i.as_u64() {
                serde_json::Value::Number(n.into())
            } else {
                serde_json::Value::Null
            }
        }
        rmpv::Value::F32(f) => serde_json::Number::from_f64(f64::from(f))
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        rmpv::Value::F64(f) => serde_json::Number::from_f64(f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        rmpv::Value::String(s) => serde_json::Value::String(utf8_or_empty(s)),
        rmpv::Value::Binary(bytes) | rmpv::Value::Ext(_, bytes) => {
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(&bytes))
        }
        rmpv::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(rmpv_to_json).collect())
        }
        rmpv::Value::Map(map) => {
            let obj = map
                .into_iter()
                .map(|(k, v)| {
                    let key = match k {
                        rmpv::Value::String(s) => utf8_or_empty(s),
                        other => format!("{other}"),
                    };
                    (key, rmpv_to_json(v))
                })
                .collect();
            serde_json::Value::Object(obj)
        }
    }
}

fn utf8_or_empty(s: rmpv::Utf8String) -> String {
    if s.is_str() {
        s.into_str().unwrap_or_default()
    } else {
        tracing::warn!("msgpack string contains invalid UTF-8, substituting empty string");
        String::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_message_frame_shape() {
        let msg = OutboundMessage {
            id: MessageId::from("7"),
            kind: "chat".to_string(),
            payload: serde_json::json!({"text": "hi"}),
            created_at: std::time::UNIX_EPOCH + std::time::Duration::from_millis(1_700_000_000_000),
        };
        let raw = Codec::Json.encode(&Frame::message(&msg)).unwrap();
        let RawFrame::Text(text) = raw else {
            panic!("expected text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], "7");
        assert_eq!(value["type"], "chat");
        assert_eq!(value["payload"]["text"], "hi");
        assert_eq!(value["timestamp"], 1_700_000_000_000_i64);
        // Absent fields are omitted entirely
        assert!(value.get("ack").is_none());
        assert!(value.get("reconnectAfter").is_none());
    }

    #[test]
    fn decode_ack_with_error() {
        let raw = RawFrame::Text(
            r#"{"ack":"12","error":{"code":"forbidden","message":"nope","retryable":false}}"#
                .to_string(),
        );
        let frame = Codec::decode(&raw).unwrap();
        assert_eq!(frame.ack.as_deref(), Some("12"));
        let err = frame.error.unwrap();
        assert_eq!(err.code, "forbidden");
        assert!(!err.is_retryable());
    }

    #[test]
    fn decode_shutdown_with_reconnect_after() {
        let raw = RawFrame::Text(r#"{"type":"shutdown","reconnectAfter":2500}"#.to_string());
        let frame = Codec::decode(&raw).unwrap();
        assert_eq!(frame.kind.as_deref(), Some(kind::SHUTDOWN));
        assert_eq!(frame.reconnect_after, Some(2500));
    }

    #[test]
    fn error_without_flag_is_retryable() {
        let info = ErrorInfo {
            code: "overloaded".to_string(),
            message: String::new(),
            retryable: None,
        };
        assert!(info.is_retryable());
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        let raw = RawFrame::Text("{not json".to_string());
        assert!(matches!(Codec::decode(&raw), Err(Error::Protocol(_))));
    }

    #[test]
    fn msgpack_join_frame_decodes() {
        let frame = Frame::join(&MessageId::from("3"), "room1");
        let raw = Codec::MessagePack.encode(&frame).unwrap();
        assert!(matches!(raw, RawFrame::Binary(_)));
        let decoded = Codec::decode(&raw).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn msgpack_binary_payload_becomes_base64() {
        let value = rmpv::Value::Map(vec![
            (
                rmpv::Value::String("type".into()),
                rmpv::Value::String("blob".into()),
            ),
            (
                rmpv::Value::String("payload".into()),
                rmpv::Value::Binary(b"hello".to_vec()),
            ),
        ]);
        let mut data = Vec::new();
        rmpv::encode::write_value(&mut data, &value).unwrap();
        let frame = Codec::decode(&RawFrame::Binary(data)).unwrap();
        assert_eq!(frame.kind.as_deref(), Some("blob"));
        assert_eq!(frame.payload, Some(serde_json::json!("aGVsbG8=")));
    }

    #[test]
    fn garbage_msgpack_is_protocol_error() {
        let raw = RawFrame::Binary(vec![0xc1]);
        assert!(matches!(Codec::decode(&raw), Err(Error::Protocol(_))));
    }

    #[test]
    fn format_names() {
        assert_eq!(Codec::Json.format_name(), "json");
        assert_eq!(Codec::MessagePack.format_name(), "msgpack");
    }
}
