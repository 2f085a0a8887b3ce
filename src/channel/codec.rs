//! Engine.IO v4 / Socket.IO v4 text packet codec
//!
//! Every WebSocket text frame is one Engine.IO packet: a single type digit
//! followed by its data. Socket.IO packets travel inside Engine.IO MESSAGE
//! packets as `<type>[/<namespace>,][<ack id>][<json>]`.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::ScanAlertError;

pub const DEFAULT_NAMESPACE: &str = "/";

/// Handshake data of the Engine.IO OPEN packet
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    /// Milliseconds between server pings
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacketType {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        args: Vec<Value>,
        ack: Option<u64>,
    },
    Ack,
    ConnectError(String),
    Binary,
}

/// Decoded Socket.IO packet with its namespace
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub namespace: String,
    pub packet_type: SocketPacketType,
}

impl EnginePacket {
    /// Decode one text frame
    pub fn decode(frame: &str) -> Result<Self, ScanAlertError> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ScanAlertError::Protocol("empty engine packet".to_string()))?;
        let data = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(data)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(data.to_string())),
            '3' => Ok(EnginePacket::Pong(data.to_string())),
            '4' => Ok(EnginePacket::Message(data.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(ScanAlertError::Protocol(format!(
                "unknown engine packet type {:?}",
                other
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

impl SocketPacket {
    /// Decode the payload of an Engine.IO MESSAGE packet
    pub fn decode(payload: &str) -> Result<Self, ScanAlertError> {
        let kind = payload
            .chars()
            .next()
            .ok_or_else(|| ScanAlertError::Protocol("empty socket packet".to_string()))?;
        let mut rest = &payload[kind.len_utf8()..];

        let namespace = if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let namespace = &rest[..end];
            rest = rest.get(end + 1..).unwrap_or("");
            namespace.to_string()
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|e| ScanAlertError::Protocol(format!("invalid ack id: {}", e)))?,
            )
        } else {
            None
        };
        let data = &rest[digits..];

        let packet_type = match kind {
            '0' => SocketPacketType::Connect(if data.is_empty() {
                None
            } else {
                Some(serde_json::from_str(data)?)
            }),
            '1' => SocketPacketType::Disconnect,
            '2' => {
                let mut args: Vec<Value> = serde_json::from_str(data)?;
                if args.is_empty() {
                    return Err(ScanAlertError::Protocol("event without name".to_string()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ScanAlertError::Protocol(format!(
                            "event name is not a string: {}",
                            other
                        )))
                    }
                };
                SocketPacketType::Event { name, args, ack }
            }
            '3' => SocketPacketType::Ack,
            '4' => SocketPacketType::ConnectError(connect_error_message(data)),
            '5' | '6' => SocketPacketType::Binary,
            other => {
                return Err(ScanAlertError::Protocol(format!(
                    "unknown socket packet type {:?}",
                    other
                )))
            }
        };

        Ok(Self {
            namespace,
            packet_type,
        })
    }

    pub fn is_default_namespace(&self) -> bool {
        self.namespace == DEFAULT_NAMESPACE
    }
}

/// CONNECT to the default namespace with an auth payload, as a full frame
pub fn encode_connect(auth: &Value) -> String {
    EnginePacket::Message(format!("0{}", auth)).encode()
}

/// CONNECT_ERROR carries `{"message": ...}` in v4 and a bare string before
fn connect_error_message(data: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => map
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("connection refused")
            .to_string(),
        Ok(Value::String(message)) => message,
        _ => "connection refused".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_open() {
        let frame = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        let packet = EnginePacket::decode(frame).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Open(OpenInfo {
                sid: "lv_VI97HAXpY6yYWAAAC".to_string(),
                ping_interval: 25000,
                ping_timeout: 20000,
                max_payload: Some(1000000),
            })
        );
    }

    #[test]
    fn ping_answered_with_same_data() {
        let packet = EnginePacket::decode("2probe").unwrap();
        assert_eq!(packet, EnginePacket::Ping("probe".to_string()));
        assert_eq!(EnginePacket::Pong("probe".to_string()).encode(), "3probe");
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
    }

    #[test]
    fn decode_unknown_engine_type() {
        assert!(EnginePacket::decode("9").is_err());
        assert!(EnginePacket::decode("").is_err());
    }

    #[test]
    fn encode_connect_with_token() {
        let frame = encode_connect(&json!({"token": "abc"}));
        assert_eq!(frame, r#"40{"token":"abc"}"#);
    }

    #[test]
    fn decode_connect_ack() {
        let packet = SocketPacket::decode(r#"0{"sid":"wZX3oN0bSVIhsaknAAAI"}"#).unwrap();
        assert!(packet.is_default_namespace());
        assert_eq!(
            packet.packet_type,
            SocketPacketType::Connect(Some(json!({"sid": "wZX3oN0bSVIhsaknAAAI"})))
        );
    }

    #[test]
    fn decode_connect_error() {
        let packet = SocketPacket::decode(r#"4{"message":"Invalid token"}"#).unwrap();
        assert_eq!(
            packet.packet_type,
            SocketPacketType::ConnectError("Invalid token".to_string())
        );

        let packet = SocketPacket::decode(r#"4"Not authorized""#).unwrap();
        assert_eq!(
            packet.packet_type,
            SocketPacketType::ConnectError("Not authorized".to_string())
        );
    }

    #[test]
    fn decode_event() {
        let packet = SocketPacket::decode(r#"2["scan",{"childId":"c1"}]"#).unwrap();
        assert_eq!(
            packet.packet_type,
            SocketPacketType::Event {
                name: "scan".to_string(),
                args: vec![json!({"childId": "c1"})],
                ack: None,
            }
        );
    }

    #[test]
    fn decode_event_with_namespace_and_ack() {
        let packet = SocketPacket::decode(r#"2/admin,13["scan",1]"#).unwrap();
        assert_eq!(packet.namespace, "/admin");
        assert!(!packet.is_default_namespace());
        assert_eq!(
            packet.packet_type,
            SocketPacketType::Event {
                name: "scan".to_string(),
                args: vec![json!(1)],
                ack: Some(13),
            }
        );
    }

    #[test]
    fn decode_disconnect() {
        let packet = SocketPacket::decode("1").unwrap();
        assert_eq!(packet.packet_type, SocketPacketType::Disconnect);
    }

    #[test]
    fn decode_malformed_event() {
        assert!(SocketPacket::decode("2[]").is_err());
        assert!(SocketPacket::decode("2[42]").is_err());
        assert!(SocketPacket::decode("2{not json").is_err());
    }
}
