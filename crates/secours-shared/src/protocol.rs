//! Wire protocol types.
//!
//! Two formats share these definitions: the UDP discovery heartbeat and
//! the framed TCP gossip packet. Both are JSON; the gossip packet wraps a
//! typed payload in a generic `{type, payload}` envelope so handlers can
//! dispatch before committing to a payload shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Gossip packet types.
pub const TYPE_SYNC: &str = "SYNC";
pub const TYPE_REQ: &str = "REQ";
pub const TYPE_MSG: &str = "MSG";

/// Generic envelope for all gossip traffic on a TCP connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "type")]
    pub packet_type: String,
    pub payload: serde_json::Value,
}

impl Packet {
    pub fn new(packet_type: &str, payload: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            packet_type: packet_type.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Decode the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Digest of recent message ids a node holds (SYNC), or the subset it is
/// missing (REQ).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdListPayload {
    pub message_ids: Vec<String>,
}

/// UDP discovery heartbeat, broadcast once per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPacket {
    #[serde(rename = "type")]
    pub packet_type: String,
    pub id: String,
    pub nick: String,
    pub port: u16,
    pub ts: i64,
    pub pub_key: String,
}

/// A peer observation produced by the UDP listener.
///
/// `addr` is the remote's advertised TCP listener (`sender_ip:packet.port`),
/// not the ephemeral UDP source address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: String,
    pub nick: String,
    pub addr: String,
    pub pub_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_roundtrip() {
        let packet = Packet::new(
            TYPE_SYNC,
            IdListPayload {
                message_ids: vec!["a".into(), "b".into()],
            },
        )
        .unwrap();

        let bytes = packet.to_bytes().unwrap();
        let restored = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(restored.packet_type, TYPE_SYNC);

        let payload: IdListPayload = restored.payload_as().unwrap();
        assert_eq!(payload.message_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_packet_type_field_name() {
        let packet = Packet::new(TYPE_REQ, IdListPayload::default()).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&packet.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "REQ");
        assert!(json["payload"]["message_ids"].is_array());
    }

    #[test]
    fn test_unknown_packet_type_still_parses() {
        // Dispatch happens on the type string; an unknown type must not be
        // a decode error, so the handler can log and skip it.
        let packet = Packet::from_bytes(br#"{"type":"NOPE","payload":{}}"#).unwrap();
        assert_eq!(packet.packet_type, "NOPE");
    }

    #[test]
    fn test_heartbeat_wire_fields() {
        let beat = HeartbeatPacket {
            packet_type: crate::constants::HEARTBEAT_TYPE.to_string(),
            id: "node-1".into(),
            nick: "Alice".into(),
            port: 9000,
            ts: 1700000000,
            pub_key: "ab".repeat(32),
        };

        let json: serde_json::Value =
            serde_json::from_slice(&serde_json::to_vec(&beat).unwrap()).unwrap();
        assert_eq!(json["type"], "beat");
        assert_eq!(json["port"], 9000);
        assert!(json["pub_key"].is_string());
    }
}
