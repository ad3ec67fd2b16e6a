//! Socket.IO v5 over Engine.IO v4 text framing, plus the event names and
//! control messages the dashboard backend uses.
//!
//! Only the default namespace and text packets are supported.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Registry key that receives every pushed event.
pub const WILDCARD: &str = "*";

pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_DISCONNECT: &str = "disconnect";
pub const EVENT_CONNECT_ERROR: &str = "connect_error";
/// Greeting the server emits right after a connection is accepted.
pub const EVENT_SERVER_GREETING: &str = "connected";
pub const EVENT_DEVICE_STATUS: &str = "device-status";
pub const EVENT_SENSOR_DATA: &str = "sensor-data";
/// Acknowledgement of a `subscribe-device` request.
pub const EVENT_SUBSCRIBED: &str = "subscribed";

pub const SUBSCRIBE_DEVICE: &str = "subscribe-device";
pub const UNSUBSCRIBE_DEVICE: &str = "unsubscribe-device";

/// Payload of `subscribe-device` / `unsubscribe-device`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSubscriptionMsg {
    pub device_id: String,
}

/// Any pushed event scoped to one device (`sensor-data`, `device-status`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEventMsg {
    pub device_id: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

/// Engine.IO `open` packet body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenMsg {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Server heartbeat period in milliseconds.
    pub ping_interval: u64,
    /// Grace period after a missed heartbeat in milliseconds.
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// `0{...}`
    Open(OpenMsg),
    /// `1`
    Close,
    /// `2`
    Ping,
    /// `3`
    Pong,
    /// `6`
    Noop,
    /// `40` / `40{...}`
    Connect(Option<Value>),
    /// `41`
    Disconnect,
    /// `42["name", payload]`
    Event { name: String, payload: Value },
    /// `44{...}`
    ConnectError(Value),
}

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type {0:?}")]
    UnknownType(char),

    #[error("unsupported packet: {0}")]
    Unsupported(String),

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Packet {
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self::Event {
            name: name.into(),
            payload,
        }
    }

    pub fn from_text(text: &str) -> Result<Self, PacketError> {
        let (kind, rest) = split_kind(text)?;
        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => decode_socket_packet(rest),
            '5' => Err(PacketError::Unsupported("transport upgrade".to_string())),
            '6' => Ok(Self::Noop),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        Ok(match self {
            Self::Open(open) => format!("0{}", serde_json::to_string(open)?),
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Noop => "6".to_string(),
            Self::Connect(None) => "40".to_string(),
            Self::Connect(Some(auth)) => format!("40{}", serde_json::to_string(auth)?),
            Self::Disconnect => "41".to_string(),
            Self::Event { name, payload } => {
                format!("42{}", serde_json::to_string(&(name, payload))?)
            }
            Self::ConnectError(detail) => format!("44{}", serde_json::to_string(detail)?),
        })
    }
}

fn split_kind(text: &str) -> Result<(char, &str), PacketError> {
    let kind = text.chars().next().ok_or(PacketError::Empty)?;
    Ok((kind, &text[kind.len_utf8()..]))
}

fn decode_socket_packet(text: &str) -> Result<Packet, PacketError> {
    let (kind, rest) = split_kind(text)?;
    let rest = strip_default_namespace(rest)?;

    match kind {
        '0' => Ok(Packet::Connect(parse_optional_json(rest)?)),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(skip_ack_id(rest)),
        '3' => Err(PacketError::Unsupported("ack".to_string())),
        '4' => Ok(Packet::ConnectError(
            parse_optional_json(rest)?.unwrap_or(Value::Null),
        )),
        '5' | '6' => Err(PacketError::Unsupported("binary payload".to_string())),
        other => Err(PacketError::UnknownType(other)),
    }
}

fn strip_default_namespace(text: &str) -> Result<&str, PacketError> {
    if !text.starts_with('/') {
        return Ok(text);
    }
    let (namespace, rest) = match text.split_once(',') {
        Some(parts) => parts,
        None => (text, ""),
    };
    if namespace == "/" {
        Ok(rest)
    } else {
        Err(PacketError::Unsupported(format!("namespace {namespace}")))
    }
}

fn skip_ack_id(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_optional_json(text: &str) -> Result<Option<Value>, PacketError> {
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(text)?))
}

fn decode_event(text: &str) -> Result<Packet, PacketError> {
    let args: Vec<Value> = serde_json::from_str(text)?;
    let mut args = args.into_iter();
    let name = match args.next() {
        Some(Value::String(name)) => name,
        _ => {
            return Err(PacketError::Malformed(
                "event packet must start with an event name".to_string(),
            ))
        }
    };
    Ok(Packet::Event {
        name,
        payload: args.next().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_engine_open_handshake() {
        let packet = Packet::from_text(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .expect("decode open");
        assert_eq!(
            packet,
            Packet::Open(OpenMsg {
                sid: "abc".to_string(),
                upgrades: Vec::new(),
                ping_interval: 25_000,
                ping_timeout: 20_000,
                max_payload: Some(1_000_000),
            })
        );
    }

    #[test]
    fn decodes_heartbeat_packets() {
        assert_eq!(Packet::from_text("2").expect("ping"), Packet::Ping);
        assert_eq!(Packet::from_text("3").expect("pong"), Packet::Pong);
        assert_eq!(Packet::from_text("1").expect("close"), Packet::Close);
    }

    #[test]
    fn decodes_namespace_connect_ack() {
        let packet = Packet::from_text(r#"40{"sid":"xyz"}"#).expect("connect ack");
        assert_eq!(packet, Packet::Connect(Some(json!({"sid": "xyz"}))));
        assert_eq!(Packet::from_text("40").expect("bare"), Packet::Connect(None));
    }

    #[test]
    fn decodes_event_with_payload() {
        let packet =
            Packet::from_text(r#"42["sensor-data",{"deviceId":"esp32-01","temperature":21.5}]"#)
                .expect("event");
        assert_eq!(
            packet,
            Packet::event(
                EVENT_SENSOR_DATA,
                json!({"deviceId": "esp32-01", "temperature": 21.5})
            )
        );
    }

    #[test]
    fn event_without_payload_carries_null() {
        let packet = Packet::from_text(r#"42["connected"]"#).expect("event");
        assert_eq!(packet, Packet::event(EVENT_SERVER_GREETING, serde_json::Value::Null));
    }

    #[test]
    fn event_ack_id_and_default_namespace_are_tolerated() {
        let packet = Packet::from_text(r#"42/,12["subscribed",{"deviceId":"d"}]"#).expect("event");
        assert_eq!(packet, Packet::event(EVENT_SUBSCRIBED, json!({"deviceId": "d"})));
    }

    #[test]
    fn rejects_other_namespaces_and_binary() {
        assert!(matches!(
            Packet::from_text(r#"42/admin,["x",1]"#),
            Err(PacketError::Unsupported(_))
        ));
        assert!(matches!(
            Packet::from_text(r#"451-["x",{"_placeholder":true,"num":0}]"#),
            Err(PacketError::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_event_without_name() {
        assert!(matches!(
            Packet::from_text("42[1,2]"),
            Err(PacketError::Malformed(_))
        ));
        assert!(matches!(Packet::from_text(""), Err(PacketError::Empty)));
        assert!(matches!(
            Packet::from_text("9"),
            Err(PacketError::UnknownType('9'))
        ));
    }

    #[test]
    fn encodes_device_subscription_event() {
        let payload = serde_json::to_value(DeviceSubscriptionMsg {
            device_id: "esp32-01".to_string(),
        })
        .expect("encode payload");
        let text = Packet::event(SUBSCRIBE_DEVICE, payload)
            .to_text()
            .expect("encode packet");
        assert_eq!(text, r#"42["subscribe-device",{"deviceId":"esp32-01"}]"#);
    }

    #[test]
    fn encodes_control_packets() {
        assert_eq!(Packet::Connect(None).to_text().expect("connect"), "40");
        assert_eq!(Packet::Pong.to_text().expect("pong"), "3");
        assert_eq!(Packet::Disconnect.to_text().expect("disconnect"), "41");
    }

    #[test]
    fn device_event_keeps_extra_fields() {
        let event: DeviceEventMsg = serde_json::from_value(json!({
            "deviceId": "esp32-01",
            "isOnline": false
        }))
        .expect("decode device event");
        assert_eq!(event.device_id, "esp32-01");
        assert_eq!(event.fields.get("isOnline"), Some(&json!(false)));
    }
}
