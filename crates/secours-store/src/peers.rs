use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Peer;

impl Database {
    /// Insert or replace a peer. The `id` is preserved; every other
    /// column is overwritten by the new observation.
    pub fn upsert_peer(&self, peer: &Peer) -> Result<()> {
        self.conn().execute(
            "INSERT INTO peers (id, nick, addr, pub_key, last_seen, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 nick = excluded.nick,
                 addr = excluded.addr,
                 pub_key = excluded.pub_key,
                 last_seen = excluded.last_seen,
                 is_active = excluded.is_active",
            params![
                peer.id,
                peer.nick,
                peer.addr,
                peer.pub_key,
                peer.last_seen.to_rfc3339(),
                peer.is_active,
            ],
        )?;
        Ok(())
    }

    pub fn get_active_peers(&self) -> Result<Vec<Peer>> {
        self.query_peers("SELECT id, nick, addr, pub_key, last_seen, is_active
                          FROM peers WHERE is_active = 1")
    }

    pub fn get_all_peers(&self) -> Result<Vec<Peer>> {
        self.query_peers("SELECT id, nick, addr, pub_key, last_seen, is_active FROM peers")
    }

    /// Look a peer up by display name (DM target resolution).
    pub fn get_peer_by_nick(&self, nick: &str) -> Result<Peer> {
        self.conn()
            .query_row(
                "SELECT id, nick, addr, pub_key, last_seen, is_active
                 FROM peers WHERE nick = ?1",
                params![nick],
                row_to_peer,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Mark peers unseen since `cutoff` as inactive. Rows are never
    /// deleted; the next heartbeat revives them. Returns the number of
    /// peers expired.
    pub fn expire_peers(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE peers SET is_active = 0
             WHERE is_active = 1 AND last_seen < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(affected)
    }

    fn query_peers(&self, sql: &str) -> Result<Vec<Peer>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_peer)?;

        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?);
        }
        Ok(peers)
    }
}

fn row_to_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Peer> {
    let ts_str: String = row.get(4)?;
    let last_seen: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Peer {
        id: row.get(0)?,
        nick: row.get(1)?,
        addr: row.get(2)?,
        pub_key: row.get(3)?,
        last_seen,
        is_active: row.get(5)?,
    })
}
