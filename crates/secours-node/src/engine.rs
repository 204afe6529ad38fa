//! Anti-entropy gossip engine.
//!
//! The engine owns the store, the connection manager, and the node
//! identity, and runs every background task: discovery, the TCP acceptor,
//! the peer reaper, the periodic syncer, and the discovery consumer.
//! Observers (dashboards, uplinks) attach through broadcast subscriptions
//! and drive the node through three calls: [`GossipEngine::publish_text`],
//! [`GossipEngine::broadcast_safe`], and [`GossipEngine::manual_connect`].

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use secours_net::{discovery, Connection, ConnectionManager};
use secours_shared::constants::{
    BROADCAST_RECIPIENT, DEFAULT_TTL, MSG_STREAM_CAPACITY, PEER_CHANNEL_CAPACITY,
    PEER_STREAM_CAPACITY, SYNC_DIGEST_LIMIT,
};
use secours_shared::protocol::{IdListPayload, Packet, PeerInfo, TYPE_MSG, TYPE_SYNC};
use secours_shared::{crypto, message_id, Identity};
use secours_store::{Database, Message, Peer, StoreError};

use crate::config::NodeConfig;
use crate::error::EngineError;
use crate::handlers::MsgPayload;

pub struct GossipEngine {
    pub(crate) db: Arc<Database>,
    pub(crate) transport: Arc<ConnectionManager>,
    pub(crate) identity: Identity,
    pub(crate) config: NodeConfig,
    pub(crate) msg_updates: broadcast::Sender<Message>,
    pub(crate) peer_updates: broadcast::Sender<Vec<Peer>>,
    pub(crate) uplink: Option<mpsc::Sender<Message>>,
}

impl GossipEngine {
    pub fn new(
        db: Arc<Database>,
        transport: Arc<ConnectionManager>,
        identity: Identity,
        config: NodeConfig,
    ) -> Self {
        let (msg_updates, _) = broadcast::channel(MSG_STREAM_CAPACITY);
        let (peer_updates, _) = broadcast::channel(PEER_STREAM_CAPACITY);

        Self {
            db,
            transport,
            identity,
            config,
            msg_updates,
            peer_updates,
            uplink: None,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.identity.node_id
    }

    /// Subscribe to newly committed messages. Each subscriber is bounded
    /// independently; a lagging consumer loses only its own backlog.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
        self.msg_updates.subscribe()
    }

    /// Subscribe to full peer-table snapshots, emitted after every
    /// discovery observation.
    pub fn subscribe_peers(&self) -> broadcast::Receiver<Vec<Peer>> {
        self.peer_updates.subscribe()
    }

    /// Attach the external uplink channel. Must be called before the
    /// engine is started and shared.
    pub fn set_uplink(&mut self, tx: mpsc::Sender<Message>) {
        self.uplink = Some(tx);
    }

    /// Launch every background task. Returns the bound gossip address
    /// once the TCP listener is up; a bind failure here aborts startup.
    pub async fn start(
        self: Arc<Self>,
        token: CancellationToken,
    ) -> Result<SocketAddr, EngineError> {
        let addr = Arc::clone(&self).start_mesh(token.clone()).await?;
        self.start_discovery(token).await?;
        Ok(addr)
    }

    /// TCP listener plus periodic syncer, the gossip half of startup.
    async fn start_mesh(
        self: Arc<Self>,
        token: CancellationToken,
    ) -> Result<SocketAddr, EngineError> {
        let engine = Arc::clone(&self);
        let addr = Arc::clone(&self.transport)
            .listen(self.config.port, token.clone(), move |conn| {
                let engine = Arc::clone(&engine);
                async move { engine.handle_connection(conn).await }
            })
            .await?;

        tokio::spawn(self.run_syncer(token));

        Ok(addr)
    }

    /// Heartbeat emitter, UDP listener, reaper, and discovery consumer.
    async fn start_discovery(
        self: Arc<Self>,
        token: CancellationToken,
    ) -> Result<(), EngineError> {
        let udp = discovery::bind_listener(self.config.port).await?;

        let heartbeat_token = token.clone();
        let (port, node_id, nick, pub_key) = (
            self.config.port,
            self.identity.node_id.clone(),
            self.config.nick.clone(),
            self.identity.pub_key.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) =
                discovery::run_heartbeat(heartbeat_token, port, node_id, nick, pub_key).await
            {
                error!(error = %e, "heartbeat failed");
            }
        });

        let (peer_tx, peer_rx) = mpsc::channel(PEER_CHANNEL_CAPACITY);
        tokio::spawn(discovery::run_listener(
            token.clone(),
            udp,
            self.identity.node_id.clone(),
            peer_tx,
        ));

        tokio::spawn(discovery::run_reaper(token.clone(), Arc::clone(&self.db)));

        tokio::spawn(self.run_peer_consumer(token, peer_rx));

        Ok(())
    }

    /// Every sync tick, push a digest of our newest message ids to one
    /// uniformly random active peer. Pull-gossip by digest: the receiver
    /// requests what it is missing over the same socket.
    async fn run_syncer(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sync_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(e) = self.sync_once().await {
                        debug!(error = %e, "sync tick failed");
                    }
                }
            }
        }
    }

    async fn sync_once(&self) -> Result<(), EngineError> {
        let peers = self.db.get_active_peers()?;
        if peers.is_empty() {
            return Ok(());
        }
        let target = &peers[rand::thread_rng().gen_range(0..peers.len())];

        let ids: Vec<String> = self
            .db
            .get_messages(SYNC_DIGEST_LIMIT)?
            .into_iter()
            .map(|m| m.id)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let packet = Packet::new(TYPE_SYNC, IdListPayload { message_ids: ids })?;
        let addr = self
            .transport
            .addr_for_node(&target.id)
            .await
            .unwrap_or_else(|| target.addr.clone());

        if let Err(e) = self.transport.send(&addr, &packet.to_bytes()?).await {
            debug!(peer = %addr, error = %e, "failed to gossip sync digest");
        }
        Ok(())
    }

    async fn run_peer_consumer(
        self: Arc<Self>,
        token: CancellationToken,
        mut peer_rx: mpsc::Receiver<PeerInfo>,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                info = peer_rx.recv() => match info {
                    Some(info) => Arc::clone(&self).handle_peer_discovery(info).await,
                    None => return,
                },
            }
        }
    }

    /// Record a discovery observation and make sure we hold a connection
    /// to the peer. Dial failures are swallowed; the peer re-announces
    /// every second.
    pub(crate) async fn handle_peer_discovery(self: Arc<Self>, info: PeerInfo) {
        if self
            .config
            .deny_peers
            .iter()
            .any(|d| *d == info.id || info.addr.contains(d.as_str()))
        {
            debug!(peer = %info.id, addr = %info.addr, "peer denied by config");
            return;
        }

        let peer = Peer {
            id: info.id.clone(),
            nick: info.nick,
            addr: info.addr.clone(),
            pub_key: info.pub_key,
            last_seen: Utc::now(),
            is_active: true,
        };
        if let Err(e) = self.db.upsert_peer(&peer) {
            error!(error = %e, "failed to upsert peer");
        }

        match self.db.get_all_peers() {
            Ok(peers) => {
                let _ = self.peer_updates.send(peers);
            }
            Err(e) => error!(error = %e, "failed to snapshot peers"),
        }

        // Identity first: a reconnect from a new ephemeral port must not
        // look like a missing connection.
        if self.transport.has_node(&info.id).await {
            return;
        }
        if self.transport.has_connection(&info.addr).await {
            self.transport.bind_node(&info.id, &info.addr).await;
            return;
        }

        info!(addr = %info.addr, "dialing peer");
        match self.transport.dial(&info.addr).await {
            Ok(conn) => {
                self.transport
                    .bind_node(&info.id, &conn.addr().to_string())
                    .await;
                self.spawn_handler(conn);
            }
            Err(e) => {
                warn!(addr = %info.addr, error = %e, "failed to dial peer");
            }
        }
    }

    /// Run a connection handler to completion, then drop the socket from
    /// the registry.
    pub(crate) fn spawn_handler(self: Arc<Self>, conn: Connection) {
        let engine = self;
        tokio::spawn(async move {
            let addr = conn.addr().to_string();
            Arc::clone(&engine).handle_connection(conn).await;
            engine.transport.unregister(&addr).await;
        });
    }

    /// Publish a text message from this node.
    ///
    /// `SOS` (any case) upgrades to a canonical priority-2 alert. A
    /// `/dm <nick> <text>` to a known peer with a public key is sealed to
    /// that peer on the wire but stored in plaintext locally; an unknown
    /// nick falls through to a plaintext broadcast.
    pub async fn publish_text(
        &self,
        content: &str,
        author: Option<&str>,
        lat: f64,
        long: f64,
    ) -> Result<(), EngineError> {
        let mut recipient_id = BROADCAST_RECIPIENT.to_string();
        let mut is_encrypted = false;
        let mut priority = 0;

        let author = match author {
            Some(a) if !a.trim().is_empty() => a.to_string(),
            _ => self.config.nick.clone(),
        };

        let mut plain_text = content.to_string();
        let upper = content.trim().to_uppercase();
        if upper == "SOS" || upper == "PRIORITY ALERT: SOS" {
            priority = 2;
            plain_text = "PRIORITY ALERT: SOS".to_string();
        }

        let mut cipher_text = plain_text.clone();

        if let Some(rest) = content.strip_prefix("/dm ") {
            if let Some((nick, text)) = rest.split_once(' ') {
                match self.db.get_peer_by_nick(nick) {
                    Ok(peer) => {
                        recipient_id = peer.id;
                        plain_text = text.to_string();
                        cipher_text = text.to_string();

                        if !peer.pub_key.is_empty() {
                            match crypto::seal(&peer.pub_key, text.as_bytes()) {
                                Ok(sealed) => {
                                    cipher_text = hex::encode(sealed);
                                    is_encrypted = true;
                                }
                                Err(e) => {
                                    warn!(nick = %nick, error = %e, "failed to seal dm, sending plaintext");
                                }
                            }
                        }
                    }
                    Err(StoreError::NotFound) => {
                        debug!(nick = %nick, "dm target unknown, broadcasting plaintext");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let ts = Utc::now().timestamp();
        let msg = Message {
            id: message_id(&self.identity.node_id, &plain_text, ts),
            sender_id: self.identity.node_id.clone(),
            recipient_id,
            content: plain_text,
            priority,
            author,
            lat,
            long,
            timestamp: ts,
            ttl: DEFAULT_TTL,
            hop_count: 0,
            status: "sent".to_string(),
            // Stored as plaintext locally so we can read our own messages.
            is_encrypted: false,
        };

        match self.db.insert_message(&msg) {
            Ok(()) => {}
            Err(StoreError::Duplicate) => {
                debug!(id = %msg.id, "message already published");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        self.publish_update(&msg);

        let mut wire = msg;
        wire.content = cipher_text;
        wire.is_encrypted = is_encrypted;

        let packet = Packet::new(TYPE_MSG, MsgPayload { message: wire })?;
        self.transport.broadcast(&packet.to_bytes()?).await;
        Ok(())
    }

    /// Broadcast the canonical "I am safe" alert.
    pub async fn broadcast_safe(&self) -> Result<(), EngineError> {
        let ts = Utc::now().timestamp();
        let content = "SAFE ALERT: I am safe!";
        let msg = Message {
            id: message_id(&self.identity.node_id, content, ts),
            sender_id: self.identity.node_id.clone(),
            recipient_id: BROADCAST_RECIPIENT.to_string(),
            content: content.to_string(),
            priority: 2,
            author: self.config.nick.clone(),
            lat: 0.0,
            long: 0.0,
            timestamp: ts,
            ttl: DEFAULT_TTL,
            hop_count: 0,
            status: "sent".to_string(),
            is_encrypted: false,
        };

        match self.db.insert_message(&msg) {
            Ok(()) => {}
            Err(StoreError::Duplicate) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.publish_update(&msg);

        let packet = Packet::new(TYPE_MSG, MsgPayload { message: msg })?;
        self.transport.broadcast(&packet.to_bytes()?).await;
        Ok(())
    }

    /// Dial an address by hand and start gossiping with it. Unlike
    /// discovery dials, failures surface to the caller.
    pub async fn manual_connect(self: Arc<Self>, addr: &str) -> Result<(), EngineError> {
        info!(addr = %addr, "manual connect");
        let conn = self.transport.dial(addr).await?;
        self.spawn_handler(conn);
        Ok(())
    }

    /// Push a committed message to observers and the uplink. Sends never
    /// block; slow consumers drop updates and reconcile from the store.
    pub(crate) fn publish_update(&self, msg: &Message) {
        let _ = self.msg_updates.send(msg.clone());
        if let Some(uplink) = &self.uplink {
            let _ = uplink.try_send(msg.clone());
        }
    }
}
