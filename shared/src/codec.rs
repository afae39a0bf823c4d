//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! Every WebSocket text frame carries exactly one Engine.IO packet:
//! ```text
//! [ 1 char: engine type ][ engine data ]
//! ```
//! Engine.IO MESSAGE packets (`4`) wrap a Socket.IO packet:
//! ```text
//! [ 1 char: socket type ][ "/nsp," (optional) ][ ack id (optional) ][ JSON ]
//! ```
//!
//! Only the default namespace and text packets are supported. Packets for
//! other namespaces and binary packets decode to [`SocketPacket::Unsupported`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::EventFrame;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Empty packet")]
    Empty,

    #[error("Unknown engine packet type: {0:?}")]
    UnknownEngineType(char),

    #[error("Unknown socket packet type: {0:?}")]
    UnknownSocketType(char),

    #[error("Invalid event packet: {0}")]
    InvalidEvent(&'static str),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handshake data sent by the server in the Engine.IO OPEN packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO packet on the default namespace
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// CONNECT, carrying auth data (client) or `{"sid": ..}` (server)
    Connect(Option<Value>),
    Disconnect,
    Event(EventFrame),
    /// CONNECT_ERROR, usually `{"message": ..}`
    ConnectError(Value),
    /// Recognized but not handled (binary, acks, foreign namespace)
    Unsupported(char),
}

impl SocketPacket {
    /// Client CONNECT carrying the credential as handshake auth data
    pub fn connect_with_token(token: &str) -> Self {
        SocketPacket::Connect(Some(serde_json::json!({ "token": token })))
    }
}

/// Encode an Engine.IO packet into the text of a WebSocket frame
pub fn encode(packet: &EnginePacket) -> Result<String, CodecError> {
    let text = match packet {
        EnginePacket::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
        EnginePacket::Close => "1".to_string(),
        EnginePacket::Ping => "2".to_string(),
        EnginePacket::Pong => "3".to_string(),
        EnginePacket::Message(socket) => format!("4{}", encode_socket(socket)?),
        EnginePacket::Upgrade => "5".to_string(),
        EnginePacket::Noop => "6".to_string(),
    };
    Ok(text)
}

fn encode_socket(packet: &SocketPacket) -> Result<String, CodecError> {
    let text = match packet {
        SocketPacket::Connect(None) => "0".to_string(),
        SocketPacket::Connect(Some(data)) => format!("0{}", serde_json::to_string(data)?),
        SocketPacket::Disconnect => "1".to_string(),
        SocketPacket::Event(frame) => {
            let args = Value::Array(vec![Value::String(frame.name.clone()), frame.payload.clone()]);
            format!("2{}", serde_json::to_string(&args)?)
        }
        SocketPacket::ConnectError(data) => format!("4{}", serde_json::to_string(data)?),
        SocketPacket::Unsupported(kind) => kind.to_string(),
    };
    Ok(text)
}

/// Decode the text of a WebSocket frame into an Engine.IO packet
pub fn decode(text: &str) -> Result<EnginePacket, CodecError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let rest = chars.as_str();

    let packet = match kind {
        '0' => EnginePacket::Open(serde_json::from_str(rest)?),
        '1' => EnginePacket::Close,
        // Probe payloads ("2probe") only matter for transport upgrades
        '2' => EnginePacket::Ping,
        '3' => EnginePacket::Pong,
        '4' => EnginePacket::Message(decode_socket(rest)?),
        '5' => EnginePacket::Upgrade,
        '6' => EnginePacket::Noop,
        other => return Err(CodecError::UnknownEngineType(other)),
    };
    Ok(packet)
}

fn decode_socket(text: &str) -> Result<SocketPacket, CodecError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let mut rest = chars.as_str();

    if !matches!(kind, '0'..='6') {
        return Err(CodecError::UnknownSocketType(kind));
    }

    if rest.starts_with('/') {
        let (nsp, tail) = rest.split_once(',').unwrap_or((rest, ""));
        if nsp != "/" {
            return Ok(SocketPacket::Unsupported(kind));
        }
        rest = tail;
    }

    // Ack ids are accepted but not tracked
    let has_ack = rest.starts_with(|c: char| c.is_ascii_digit());
    rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    let packet = match kind {
        '0' if rest.is_empty() => SocketPacket::Connect(None),
        '0' => SocketPacket::Connect(Some(serde_json::from_str(rest)?)),
        '1' => SocketPacket::Disconnect,
        '2' if !has_ack => SocketPacket::Event(decode_event(rest)?),
        '4' if rest.is_empty() => SocketPacket::ConnectError(Value::Null),
        '4' => SocketPacket::ConnectError(serde_json::from_str(rest)?),
        other => SocketPacket::Unsupported(other),
    };
    Ok(packet)
}

fn decode_event(text: &str) -> Result<EventFrame, CodecError> {
    let args: Vec<Value> = serde_json::from_str(text)?;
    let mut args = args.into_iter();

    let name = match args.next() {
        Some(Value::String(name)) => name,
        Some(_) => return Err(CodecError::InvalidEvent("event name is not a string")),
        None => return Err(CodecError::InvalidEvent("missing event name")),
    };
    // Extra arguments are not part of the contract
    let payload = args.next().unwrap_or(Value::Null);

    Ok(EventFrame { name, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open_handshake() {
        let text = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        match decode(text).expect("decode failed") {
            EnginePacket::Open(hs) => {
                assert_eq!(hs.sid, "lv_VI97HAXpY6yYWAAAC");
                assert_eq!(hs.ping_interval, 25000);
                assert_eq!(hs.ping_timeout, 20000);
                assert_eq!(hs.max_payload, Some(1_000_000));
            }
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_connect_with_auth() {
        let packet = EnginePacket::Message(SocketPacket::connect_with_token("abc"));
        assert_eq!(encode(&packet).unwrap(), r#"40{"token":"abc"}"#);
    }

    #[test]
    fn test_decode_connect_ack_and_error() {
        assert_eq!(
            decode(r#"40{"sid":"wZX3oN0bSVIhsaknAAAI"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::Connect(Some(json!({ "sid": "wZX3oN0bSVIhsaknAAAI" }))))
        );
        assert_eq!(
            decode(r#"44{"message":"Not authorized"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::ConnectError(json!({ "message": "Not authorized" })))
        );
    }

    #[test]
    fn test_event_encoding() {
        let frame = EventFrame::new("sendMessage", json!({ "toUserId": "u1", "message": "hi" }));
        let text = encode(&EnginePacket::Message(SocketPacket::Event(frame.clone()))).unwrap();
        assert_eq!(text, r#"42["sendMessage",{"toUserId":"u1","message":"hi"}]"#);
        assert_eq!(decode(&text).unwrap(), EnginePacket::Message(SocketPacket::Event(frame)));
    }

    #[test]
    fn test_control_packets() {
        assert_eq!(decode("2").unwrap(), EnginePacket::Ping);
        assert_eq!(decode("2probe").unwrap(), EnginePacket::Ping);
        assert_eq!(decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(decode("41").unwrap(), EnginePacket::Message(SocketPacket::Disconnect));
        assert_eq!(encode(&EnginePacket::Pong).unwrap(), "3");
    }

    #[test]
    fn test_foreign_namespace_and_binary_are_unsupported() {
        assert_eq!(
            decode(r#"42/admin,["adminMessage",{}]"#).unwrap(),
            EnginePacket::Message(SocketPacket::Unsupported('2'))
        );
        assert_eq!(
            decode(r#"451-["upload",{"_placeholder":true,"num":0}]"#).unwrap(),
            EnginePacket::Message(SocketPacket::Unsupported('5'))
        );
        // Explicit default namespace is accepted
        assert!(matches!(
            decode(r#"42/,["sellerMessage",{}]"#).unwrap(),
            EnginePacket::Message(SocketPacket::Event(_))
        ));
    }

    #[test]
    fn test_invalid_packets() {
        assert!(matches!(decode(""), Err(CodecError::Empty)));
        assert!(matches!(decode("9"), Err(CodecError::UnknownEngineType('9'))));
        assert!(matches!(decode("4"), Err(CodecError::Empty)));
        assert!(matches!(decode("42[1,{}]"), Err(CodecError::InvalidEvent(_))));
        assert!(matches!(decode("42[]"), Err(CodecError::InvalidEvent(_))));
        assert!(matches!(decode("42{oops"), Err(CodecError::Json(_))));
    }
}
