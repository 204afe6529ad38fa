use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;

impl Database {
    /// Insert a message.
    ///
    /// A colliding `id` returns [`StoreError::Duplicate`], the dedup
    /// signal for the gossip layer, which treats it as a silent no-op.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO messages
                 (id, sender_id, recipient_id, content, priority, author,
                  lat, long, timestamp, ttl, hop_count, status, is_encrypted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                message.id,
                message.sender_id,
                message.recipient_id,
                message.content,
                message.priority,
                message.author,
                message.lat,
                message.long,
                message.timestamp,
                message.ttl,
                message.hop_count,
                message.status,
                message.is_encrypted,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate)
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Most recent messages by origin timestamp, newest first.
    pub fn get_messages(&self, limit: u32) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, sender_id, recipient_id, content, priority, author,
                    lat, long, timestamp, ttl, hop_count, status, is_encrypted
             FROM messages
             ORDER BY timestamp DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: &str) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, sender_id, recipient_id, content, priority, author,
                        lat, long, timestamp, ttl, hop_count, status, is_encrypted
                 FROM messages WHERE id = ?1",
                params![id],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        content: row.get(3)?,
        priority: row.get(4)?,
        author: row.get(5)?,
        lat: row.get(6)?,
        long: row.get(7)?,
        timestamp: row.get(8)?,
        ttl: row.get(9)?,
        hop_count: row.get(10)?,
        status: row.get(11)?,
        is_encrypted: row.get(12)?,
    })
}
