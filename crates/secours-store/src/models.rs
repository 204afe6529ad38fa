use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A node observed on the LAN via discovery heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub id: String,
    pub nick: String,
    pub addr: String,
    pub pub_key: String,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
}

/// A gossiped message. This struct doubles as the MSG wire record, so its
/// serde field names are part of the protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// 64-hex SHA-256 of `sender_id:content:timestamp` at origin.
    pub id: String,
    pub sender_id: String,
    /// `"BROADCAST"` or a specific node id.
    pub recipient_id: String,
    /// Plaintext locally; hex ciphertext on the wire when `is_encrypted`.
    pub content: String,
    /// 0 normal, 2 alert.
    pub priority: i32,
    pub author: String,
    pub lat: f64,
    pub long: f64,
    /// Seconds since epoch at origin.
    pub timestamp: i64,
    pub ttl: i32,
    pub hop_count: i32,
    /// Origin-local delivery state (`sent`, `pending`, ...).
    pub status: String,
    pub is_encrypted: bool,
}
