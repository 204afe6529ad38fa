/// Application name
pub const APP_NAME: &str = "Secours";

/// Default TCP gossip port
pub const DEFAULT_GOSSIP_PORT: u16 = 9000;

/// Contiguous port range probed by discovery heartbeats (inclusive)
pub const DISCOVERY_PORT_MIN: u16 = 9000;
pub const DISCOVERY_PORT_MAX: u16 = 9005;

/// UDP heartbeat interval in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 1;

/// Heartbeat packet discriminator
pub const HEARTBEAT_TYPE: &str = "beat";

/// Anti-entropy sync interval in seconds
pub const SYNC_INTERVAL_SECS: u64 = 5;

/// Peer reaper tick interval in seconds
pub const REAPER_INTERVAL_SECS: u64 = 2;

/// A peer is considered inactive after this many seconds without a heartbeat
pub const PEER_EXPIRY_SECS: i64 = 5;

/// Maximum TCP frame size in bytes (10 MiB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Number of newest message ids advertised in a SYNC digest
pub const SYNC_DIGEST_LIMIT: u32 = 50;

/// Number of newest local message ids a SYNC digest is compared against
pub const SYNC_COMPARE_LIMIT: u32 = 100;

/// Curve25519 key size in bytes
pub const KEY_SIZE: usize = 32;

/// UDP receive buffer size for heartbeat datagrams
pub const UDP_RECV_BUF: usize = 4096;

/// Recipient id marking a message for every node
pub const BROADCAST_RECIPIENT: &str = "BROADCAST";

/// Initial hop budget for new messages
pub const DEFAULT_TTL: i32 = 10;

/// Capacity of the discovery-to-engine peer channel (overflow blocks the
/// UDP listener; peers re-announce every second)
pub const PEER_CHANNEL_CAPACITY: usize = 10;

/// Capacity of the per-subscriber message update stream
pub const MSG_STREAM_CAPACITY: usize = 100;

/// Capacity of the per-subscriber peer snapshot stream
pub const PEER_STREAM_CAPACITY: usize = 10;
