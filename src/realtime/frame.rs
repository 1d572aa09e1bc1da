//! Engine.IO v4 / Socket.IO v5 packet framing
//!
//! Text frames look like `<engine type>[<socket type>][<namespace>,][<ack id>]<json>`:
//! `0{...}` open, `2` ping, `3` pong, `40/direct,` namespace connect,
//! `42["event",{...}]` event on the default namespace.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_NAMESPACE: &str = "/";
pub const DIRECT_NAMESPACE: &str = "/direct";

/// Engine.IO pong reply to a server ping.
pub const PONG: &str = "3";

/// Handshake data from the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Noop,
    Connect { namespace: String },
    Disconnect { namespace: String },
    Event { namespace: String, name: String, data: Value },
    Ack { namespace: String, id: u64 },
    ConnectError { namespace: String, message: String },
}

/// Parse one text frame.
pub fn decode(frame: &str) -> Result<Packet> {
    let mut chars = frame.chars();
    let engine = chars.next().context("Empty frame")?;
    let rest = chars.as_str();

    match engine {
        '0' => {
            let info = serde_json::from_str(rest).context("Malformed open packet")?;
            Ok(Packet::Open(info))
        }
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket(rest),
        '6' => Ok(Packet::Noop),
        other => bail!("Unknown engine packet type {:?}", other),
    }
}

fn decode_socket(packet: &str) -> Result<Packet> {
    let mut chars = packet.chars();
    let kind = chars.next().context("Empty socket packet")?;
    let mut rest = chars.as_str();

    let mut namespace = DEFAULT_NAMESPACE.to_string();
    if rest.starts_with('/') {
        let end = rest.find(',').unwrap_or(rest.len());
        namespace = rest[..end].to_string();
        rest = rest.get(end + 1..).unwrap_or_default();
    }

    let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    let ack_id = if digits > 0 {
        rest[..digits].parse::<u64>().ok()
    } else {
        None
    };
    let payload = &rest[digits..];

    match kind {
        '0' => Ok(Packet::Connect { namespace }),
        '1' => Ok(Packet::Disconnect { namespace }),
        '2' => {
            let value: Value = serde_json::from_str(payload).context("Malformed event payload")?;
            let mut items = match value {
                Value::Array(items) => items.into_iter(),
                _ => bail!("Event payload is not an array"),
            };
            let name = match items.next() {
                Some(Value::String(name)) => name,
                _ => bail!("Event payload has no name"),
            };
            let data = items.next().unwrap_or(Value::Null);
            Ok(Packet::Event { namespace, name, data })
        }
        '3' => Ok(Packet::Ack {
            namespace,
            id: ack_id.context("Ack packet without id")?,
        }),
        '4' => {
            let message = serde_json::from_str::<Value>(payload)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| payload.to_string());
            Ok(Packet::ConnectError { namespace, message })
        }
        other => bail!("Unknown socket packet type {:?}", other),
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        String::new()
    } else {
        format!("{},", namespace)
    }
}

/// Namespace connect packet.
pub fn encode_connect(namespace: &str) -> String {
    format!("40{}", namespace_prefix(namespace))
}

/// Event packet for `namespace`.
pub fn encode_event(namespace: &str, name: &str, data: &Value) -> String {
    let payload = Value::Array(vec![Value::String(name.to_string()), data.clone()]);
    format!("42{}{}", namespace_prefix(namespace), payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let packet =
            decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":5000}"#)
                .unwrap();
        assert_eq!(
            packet,
            Packet::Open(OpenInfo {
                sid: "abc".into(),
                ping_interval: 25000,
                ping_timeout: 5000,
            })
        );
    }

    #[test]
    fn test_decode_ping_and_connect() {
        assert_eq!(decode("2").unwrap(), Packet::Ping);
        assert_eq!(
            decode(r#"40{"sid":"x"}"#).unwrap(),
            Packet::Connect {
                namespace: "/".into()
            }
        );
        assert_eq!(
            decode(r#"40/direct,{"sid":"y"}"#).unwrap(),
            Packet::Connect {
                namespace: "/direct".into()
            }
        );
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack() {
        let packet = decode(r#"42/direct,7["receive_private_message",{"message_ID":1}]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                namespace: "/direct".into(),
                name: "receive_private_message".into(),
                data: json!({"message_ID": 1}),
            }
        );
    }

    #[test]
    fn test_decode_connect_error() {
        let packet = decode(r#"44{"message":"not authorized"}"#).unwrap();
        assert_eq!(
            packet,
            Packet::ConnectError {
                namespace: "/".into(),
                message: "not authorized".into()
            }
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("").is_err());
        assert!(decode("9").is_err());
        assert!(decode("42{\"not\":\"array\"}").is_err());
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode_connect("/"), "40");
        assert_eq!(encode_connect("/direct"), "40/direct,");
        assert_eq!(
            encode_event("/", "set_status", &json!({"status": "dnd"})),
            r#"42["set_status",{"status":"dnd"}]"#
        );
        assert_eq!(
            encode_event("/direct", "send_private_message", &json!(1)),
            r#"42/direct,["send_private_message",1]"#
        );
    }
}
