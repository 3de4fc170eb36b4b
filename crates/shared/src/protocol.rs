//! Live channel feed protocol.
//!
//! Every WebSocket text frame carries one JSON object tagged by `type`:
//!
//! ```text
//! { "type": "ping" | "pong" | "get_channels" | "channel_update" | "error",
//!   "channels"?: [ {..channel record..}, ... ],
//!   "message"?: "...",
//!   "timestamp"?: "..." }
//! ```
//!
//! `ping` and `get_channels` are sent by the client, the rest by the server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Path of the live feed endpoint, relative to the WebSocket base URL.
pub const WS_PATH: &str = "/ws";

/// Close code the server uses when the bearer token is missing or invalid.
pub const AUTH_REJECTED_CLOSE_CODE: u16 = 1008;

/// Close code the client uses when it abandons a connection itself.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Close reason attached when the heartbeat watchdog gives up on a socket.
pub const HEARTBEAT_TIMEOUT_REASON: &str = "Heartbeat timeout";

/// A single channel record. Fields are owned by the backend and never
/// interpreted here beyond [`CHANNEL_NAME_KEY`].
pub type ChannelRecord = Map<String, Value>;

/// Key that identifies a channel record.
pub const CHANNEL_NAME_KEY: &str = "channel_name";

/// A complete replacement set of channel records.
///
/// Deserialization only succeeds when the payload is an array whose every
/// element is a JSON object, so a snapshot is either fully valid or rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>")]
pub struct ChannelSnapshot(Vec<ChannelRecord>);

impl ChannelSnapshot {
    pub fn new(records: Vec<ChannelRecord>) -> Self {
        Self(records)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn records(&self) -> &[ChannelRecord] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelRecord> {
        self.0.iter()
    }

    /// Names of all records that carry one, in snapshot order.
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().filter_map(record_name).collect()
    }
}

impl TryFrom<Vec<Value>> for ChannelSnapshot {
    type Error = String;

    fn try_from(values: Vec<Value>) -> Result<Self, Self::Error> {
        let mut records = Vec::with_capacity(values.len());
        for (idx, value) in values.into_iter().enumerate() {
            match value {
                Value::Object(record) => records.push(record),
                other => {
                    return Err(format!(
                        "channel record {} is {}, expected an object",
                        idx,
                        json_kind(&other)
                    ))
                }
            }
        }
        Ok(Self(records))
    }
}

/// The `channel_name` of a record, if present and a string.
pub fn record_name(record: &ChannelRecord) -> Option<&str> {
    record.get(CHANNEL_NAME_KEY).and_then(Value::as_str)
}

/// Discriminant of a [`MessageEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Ping,
    Pong,
    GetChannels,
    ChannelUpdate,
    Error,
}

impl MessageType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "get_channels" => Some(Self::GetChannels),
            "channel_update" => Some(Self::ChannelUpdate),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::GetChannels => "get_channels",
            Self::ChannelUpdate => "channel_update",
            Self::Error => "error",
        }
    }
}

/// One frame on the live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEnvelope {
    Ping,
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    GetChannels,
    ChannelUpdate {
        channels: ChannelSnapshot,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Why an inbound frame could not be turned into a [`MessageEnvelope`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("invalid `{kind}` payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

impl MessageEnvelope {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Ping => MessageType::Ping,
            Self::Pong { .. } => MessageType::Pong,
            Self::GetChannels => MessageType::GetChannels,
            Self::ChannelUpdate { .. } => MessageType::ChannelUpdate,
            Self::Error { .. } => MessageType::Error,
        }
    }

    /// Decode a text frame.
    ///
    /// Unknown `type` tags are reported separately from malformed frames so
    /// callers can ignore newer message kinds quietly.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?;
        let kind = MessageType::parse(tag).ok_or_else(|| DecodeError::UnknownType(tag.to_string()))?;

        serde_json::from_value(value).map_err(|e| DecodeError::InvalidPayload {
            kind: kind.as_str(),
            reason: e.to_string(),
        })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_encode_with_type_tag() {
        assert_eq!(MessageEnvelope::Ping.encode().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(
            MessageEnvelope::GetChannels.encode().unwrap(),
            r#"{"type":"get_channels"}"#
        );
    }

    #[test]
    fn decodes_channel_update() {
        let text = r#"{"type":"channel_update","channels":[{"channel_name":"cam1","status":"running"},{"channel_name":"cam2"}],"timestamp":"2024-01-01T00:00:00"}"#;
        let MessageEnvelope::ChannelUpdate { channels, timestamp } =
            MessageEnvelope::decode(text).unwrap()
        else {
            panic!("expected channel_update");
        };
        assert_eq!(channels.names(), vec!["cam1", "cam2"]);
        assert_eq!(timestamp.as_deref(), Some("2024-01-01T00:00:00"));
    }

    #[test]
    fn channel_update_without_channels_is_invalid() {
        let err = MessageEnvelope::decode(r#"{"type":"channel_update"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { kind: "channel_update", .. }));
    }

    #[test]
    fn channel_update_with_non_object_record_is_invalid() {
        let err =
            MessageEnvelope::decode(r#"{"type":"channel_update","channels":[{"channel_name":"a"},42]}"#)
                .unwrap_err();
        match err {
            DecodeError::InvalidPayload { reason, .. } => assert!(reason.contains("record 1")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn channel_update_with_object_payload_is_invalid() {
        let err = MessageEnvelope::decode(r#"{"type":"channel_update","channels":{"a":1}}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { .. }));
    }

    #[test]
    fn unknown_type_is_distinguished() {
        let err = MessageEnvelope::decode(r#"{"type":"stats_push","data":1}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(t) if t == "stats_push"));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            MessageEnvelope::decode("not json").unwrap_err(),
            DecodeError::Malformed(_)
        ));
        assert!(matches!(
            MessageEnvelope::decode(r#"{"channels":[]}"#).unwrap_err(),
            DecodeError::MissingType
        ));
    }

    #[test]
    fn error_message_is_optional() {
        assert_eq!(
            MessageEnvelope::decode(r#"{"type":"error"}"#).unwrap(),
            MessageEnvelope::Error { message: None }
        );
        assert_eq!(
            MessageEnvelope::decode(r#"{"type":"error","message":"Channel not found"}"#).unwrap(),
            MessageEnvelope::Error {
                message: Some("Channel not found".to_string())
            }
        );
    }

    #[test]
    fn record_name_ignores_non_string_names() {
        let snapshot: ChannelSnapshot =
            serde_json::from_str(r#"[{"channel_name":7},{"channel_name":"ok"},{}]"#).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.names(), vec!["ok"]);
    }
}
