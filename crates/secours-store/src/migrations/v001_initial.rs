//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `peers` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Peers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS peers (
    id        TEXT PRIMARY KEY NOT NULL,   -- remote node UUID
    nick      TEXT NOT NULL,
    addr      TEXT NOT NULL,               -- "ip:port" of the remote TCP listener
    pub_key   TEXT NOT NULL,               -- hex-encoded 32-byte Curve25519 pubkey
    last_seen TEXT NOT NULL,               -- ISO-8601 / RFC-3339
    is_active INTEGER NOT NULL DEFAULT 1   -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_peers_active ON peers(is_active);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY NOT NULL,  -- 64-hex SHA-256 origin digest
    sender_id    TEXT NOT NULL,
    recipient_id TEXT NOT NULL,              -- 'BROADCAST' or a node UUID
    content      TEXT NOT NULL,
    priority     INTEGER NOT NULL DEFAULT 0,
    author       TEXT NOT NULL DEFAULT '',
    lat          REAL NOT NULL DEFAULT 0,
    long         REAL NOT NULL DEFAULT 0,
    timestamp    INTEGER NOT NULL,           -- unix seconds at origin
    ttl          INTEGER NOT NULL DEFAULT 10,
    hop_count    INTEGER NOT NULL DEFAULT 0,
    status       TEXT NOT NULL DEFAULT '',
    is_encrypted INTEGER NOT NULL DEFAULT 0  -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages(timestamp DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
