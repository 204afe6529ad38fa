//! Per-connection protocol handlers.
//!
//! Each live socket runs [`GossipEngine::handle_connection`]: an initial
//! SYNC digest, then a read loop dispatching on the packet type. The
//! three-phase exchange is causal per socket (SYNC -> REQ -> MSG); there
//! is no cross-socket ordering, and dedup by message id is the only
//! correctness mechanism.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use secours_net::Connection;
use secours_shared::constants::{SYNC_COMPARE_LIMIT, SYNC_DIGEST_LIMIT};
use secours_shared::crypto;
use secours_shared::protocol::{IdListPayload, Packet, TYPE_MSG, TYPE_REQ, TYPE_SYNC};
use secours_store::{Message, StoreError};

use crate::engine::GossipEngine;

/// MSG packet payload: one full message record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MsgPayload {
    pub message: Message,
}

impl GossipEngine {
    /// Drive one gossip connection until it fails or closes.
    ///
    /// Frame-level errors end the loop (the caller unregisters the
    /// socket); packet-level decode errors are logged and skipped, so one
    /// malformed packet cannot take down an otherwise healthy peer.
    pub(crate) async fn handle_connection(self: Arc<Self>, mut conn: Connection) {
        let addr = conn.addr().to_string();

        self.send_initial_sync(&addr).await;

        loop {
            match conn.read_frame().await {
                Ok(data) => self.handle_packet(&addr, &data).await,
                Err(e) => {
                    debug!(addr = %addr, error = %e, "connection closed");
                    return;
                }
            }
        }
    }

    /// Offer our newest message ids to a freshly established peer so both
    /// sides reconcile without waiting for a sync tick.
    async fn send_initial_sync(&self, addr: &str) {
        let ids: Vec<String> = match self.db.get_messages(SYNC_DIGEST_LIMIT) {
            Ok(msgs) => msgs.into_iter().map(|m| m.id).collect(),
            Err(e) => {
                warn!(error = %e, "failed to load digest for initial sync");
                return;
            }
        };
        if ids.is_empty() {
            return;
        }

        info!(count = ids.len(), remote = %addr, "sending initial sync");
        if let Err(e) = self
            .send_packet(addr, TYPE_SYNC, IdListPayload { message_ids: ids })
            .await
        {
            debug!(addr = %addr, error = %e, "initial sync failed");
        }
    }

    async fn handle_packet(&self, addr: &str, data: &[u8]) {
        let packet = match Packet::from_bytes(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(addr = %addr, error = %e, "failed to decode packet");
                return;
            }
        };

        match packet.packet_type.as_str() {
            TYPE_SYNC => match packet.payload_as::<IdListPayload>() {
                Ok(payload) => self.handle_sync(addr, payload).await,
                Err(e) => warn!(addr = %addr, error = %e, "failed to decode SYNC payload"),
            },
            TYPE_REQ => match packet.payload_as::<IdListPayload>() {
                Ok(payload) => self.handle_req(addr, payload).await,
                Err(e) => warn!(addr = %addr, error = %e, "failed to decode REQ payload"),
            },
            TYPE_MSG => match packet.payload_as::<MsgPayload>() {
                Ok(payload) => self.handle_msg(payload.message).await,
                Err(e) => warn!(addr = %addr, error = %e, "failed to decode MSG payload"),
            },
            other => warn!(addr = %addr, packet_type = %other, "unknown packet type"),
        }
    }

    /// The remote offered a digest; request whatever we are missing.
    async fn handle_sync(&self, addr: &str, payload: IdListPayload) {
        debug!(count = payload.message_ids.len(), remote = %addr, "received sync digest");

        let local: HashSet<String> = match self.db.get_messages(SYNC_COMPARE_LIMIT) {
            Ok(msgs) => msgs.into_iter().map(|m| m.id).collect(),
            Err(e) => {
                warn!(error = %e, "failed to load local digest");
                return;
            }
        };

        let missing: Vec<String> = payload
            .message_ids
            .into_iter()
            .filter(|id| !local.contains(id))
            .collect();
        if missing.is_empty() {
            return;
        }

        debug!(count = missing.len(), remote = %addr, "requesting missing messages");
        if let Err(e) = self
            .send_packet(addr, TYPE_REQ, IdListPayload { message_ids: missing })
            .await
        {
            debug!(addr = %addr, error = %e, "failed to send request");
        }
    }

    /// The remote asked for specific messages; serve each one we hold.
    ///
    /// The served wire copy carries `hop_count + 1`, and a message whose
    /// hop count has exhausted its ttl is no longer forwarded.
    async fn handle_req(&self, addr: &str, payload: IdListPayload) {
        for id in &payload.message_ids {
            let msg = match self.db.get_message_by_id(id) {
                Ok(msg) => msg,
                Err(StoreError::NotFound) => continue,
                Err(e) => {
                    warn!(error = %e, "failed to look up requested message");
                    continue;
                }
            };

            if msg.hop_count >= msg.ttl {
                debug!(id = %msg.id, hops = msg.hop_count, "ttl exhausted, not serving");
                continue;
            }

            let mut wire = msg;
            wire.hop_count += 1;

            if let Err(e) = self.send_packet(addr, TYPE_MSG, MsgPayload { message: wire }).await {
                debug!(addr = %addr, error = %e, "failed to serve message");
            }
        }
    }

    /// An inbound message: decrypt if it is ours, persist, publish.
    pub(crate) async fn handle_msg(&self, mut msg: Message) {
        if msg.is_encrypted && msg.recipient_id == self.identity.node_id {
            match self.open_dm(&msg.content) {
                Some(plain) => {
                    msg.content = plain;
                    msg.is_encrypted = false;
                }
                None => {
                    warn!(id = %msg.id, "failed to decrypt message addressed to us, dropping");
                    return;
                }
            }
        }
        // A sealed message for another node is persisted as-is; the
        // ciphertext record keeps circulating until its recipient sees it.

        match self.db.insert_message(&msg) {
            Ok(()) => {}
            Err(StoreError::Duplicate) => return,
            Err(e) => {
                warn!(id = %msg.id, error = %e, "failed to persist message");
                return;
            }
        }

        info!(id = %msg.id, sender = %msg.sender_id, "new message received");
        self.publish_update(&msg);
    }

    fn open_dm(&self, content_hex: &str) -> Option<String> {
        let ciphertext = match hex::decode(content_hex) {
            Ok(ct) => ct,
            Err(e) => {
                warn!(error = %e, "dm content is not valid hex");
                return None;
            }
        };
        let plain = match crypto::open(&self.identity.priv_key, &ciphertext) {
            Ok(plain) => plain,
            Err(e) => {
                warn!(error = %e, "sealed box open failed");
                return None;
            }
        };
        match String::from_utf8(plain) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "decrypted dm is not utf-8");
                None
            }
        }
    }

    async fn send_packet(
        &self,
        addr: &str,
        packet_type: &str,
        payload: impl serde::Serialize,
    ) -> Result<(), crate::error::EngineError> {
        let packet = Packet::new(packet_type, payload)?;
        self.transport.send(addr, &packet.to_bytes()?).await?;
        Ok(())
    }
}
