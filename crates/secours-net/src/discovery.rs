//! LAN peer discovery.
//!
//! Three cooperating tasks, all stopped by the shared cancellation token:
//!
//! - the heartbeat emitter announces this node once per second over UDP
//!   to the broadcast address and localhost, across the whole default
//!   port range (peers may sit on any of the contiguous ports, and the
//!   broadcast address is not reliably routable on every platform);
//! - the listener turns incoming heartbeats into [`PeerInfo`]
//!   observations for the gossip engine;
//! - the reaper expires peers that have gone quiet.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use secours_shared::constants::{
    DISCOVERY_PORT_MAX, DISCOVERY_PORT_MIN, HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TYPE,
    PEER_EXPIRY_SECS, REAPER_INTERVAL_SECS, UDP_RECV_BUF,
};
use secours_shared::protocol::{HeartbeatPacket, PeerInfo};
use secours_store::Database;

use crate::error::NetError;

/// Every `host:port` pair a heartbeat is sent to.
fn heartbeat_targets() -> Vec<SocketAddr> {
    let mut targets = Vec::new();
    for host in ["255.255.255.255", "127.0.0.1"] {
        for port in DISCOVERY_PORT_MIN..=DISCOVERY_PORT_MAX {
            if let Ok(addr) = format!("{host}:{port}").parse() {
                targets.push(addr);
            }
        }
    }
    targets
}

/// Broadcast a heartbeat for this node at 1 Hz until cancelled.
///
/// Per-target send failures are ignored; only failing to set up the
/// socket at startup is fatal.
pub async fn run_heartbeat(
    token: CancellationToken,
    service_port: u16,
    node_id: String,
    nick: String,
    pub_key: String,
) -> Result<(), NetError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;

    let targets = heartbeat_targets();
    info!(targets = targets.len(), node_id = %node_id, "heartbeat started");

    let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = interval.tick() => {
                let beat = HeartbeatPacket {
                    packet_type: HEARTBEAT_TYPE.to_string(),
                    id: node_id.clone(),
                    nick: nick.clone(),
                    port: service_port,
                    ts: Utc::now().timestamp(),
                    pub_key: pub_key.clone(),
                };
                let data = match serde_json::to_vec(&beat) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(error = %e, "failed to encode heartbeat");
                        continue;
                    }
                };
                for target in &targets {
                    let _ = socket.send_to(&data, target).await;
                }
            }
        }
    }
}

/// Bind the discovery listener socket. Separate from [`run_listener`] so
/// a bind failure surfaces at startup.
pub async fn bind_listener(port: u16) -> Result<UdpSocket, NetError> {
    Ok(UdpSocket::bind(("0.0.0.0", port)).await?)
}

/// Receive heartbeats and forward peer observations until cancelled.
///
/// Drops datagrams that fail to parse, carry a foreign type, or echo our
/// own node id. The peer's gossip address is synthesized from the sender
/// ip and the *advertised* port; the UDP source port is ephemeral.
/// A full channel blocks the listener; peers re-announce every second.
pub async fn run_listener(
    token: CancellationToken,
    socket: UdpSocket,
    node_id: String,
    peer_tx: mpsc::Sender<PeerInfo>,
) {
    let mut buf = [0u8; UDP_RECV_BUF];
    loop {
        let (len, remote) = tokio::select! {
            _ = token.cancelled() => return,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "udp read failed");
                    return;
                }
            },
        };

        let beat: HeartbeatPacket = match serde_json::from_slice(&buf[..len]) {
            Ok(beat) => beat,
            Err(e) => {
                debug!(from = %remote, error = %e, "dropping malformed heartbeat");
                continue;
            }
        };
        if beat.packet_type != HEARTBEAT_TYPE || beat.id == node_id {
            continue;
        }

        let info = PeerInfo {
            id: beat.id,
            nick: beat.nick,
            addr: format!("{}:{}", remote.ip(), beat.port),
            pub_key: beat.pub_key,
        };
        debug!(from = %info.nick, addr = %info.addr, "received heartbeat");

        tokio::select! {
            _ = token.cancelled() => return,
            result = peer_tx.send(info) => {
                if result.is_err() {
                    return;
                }
            }
        }
    }
}

/// Expire peers that have missed heartbeats. Runs every 2 s and marks
/// anything unseen for 5 s inactive; rows are never deleted.
pub async fn run_reaper(token: CancellationToken, db: Arc<Database>) {
    let mut interval = tokio::time::interval(Duration::from_secs(REAPER_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = interval.tick() => {
                let cutoff = Utc::now() - chrono::Duration::seconds(PEER_EXPIRY_SECS);
                match db.expire_peers(cutoff) {
                    Ok(0) => {}
                    Ok(n) => debug!(expired = n, "marked stale peers inactive"),
                    Err(e) => warn!(error = %e, "reaper update failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use secours_store::Peer;

    fn beat_json(id: &str, port: u16) -> Vec<u8> {
        serde_json::to_vec(&HeartbeatPacket {
            packet_type: HEARTBEAT_TYPE.to_string(),
            id: id.to_string(),
            nick: "Tester".into(),
            port,
            ts: Utc::now().timestamp(),
            pub_key: "ab".repeat(32),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_listener_filters_and_forwards() {
        let token = CancellationToken::new();
        let socket = bind_listener(0).await.unwrap();
        let listen_addr = format!("127.0.0.1:{}", socket.local_addr().unwrap().port());

        let (tx, mut rx) = mpsc::channel(10);
        let handle = tokio::spawn(run_listener(
            token.clone(),
            socket,
            "self-node".into(),
            tx,
        ));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Garbage, foreign type, and our own id must all be dropped.
        sender.send_to(b"{not json", listen_addr.as_str()).await.unwrap();
        sender
            .send_to(br#"{"type":"hello","id":"x","nick":"n","port":1,"ts":0,"pub_key":""}"#, listen_addr.as_str())
            .await
            .unwrap();
        sender
            .send_to(&beat_json("self-node", 9000), listen_addr.as_str())
            .await
            .unwrap();

        // A valid beat after the bad ones still gets through.
        sender
            .send_to(&beat_json("peer-1", 9004), listen_addr.as_str())
            .await
            .unwrap();

        let info = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.id, "peer-1");
        // Advertised port, not the sender's ephemeral source port.
        assert!(info.addr.ends_with(":9004"));
        assert!(rx.try_recv().is_err());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_reaches_default_ports() {
        // Grab whichever default discovery port is free; if the whole
        // range is occupied the environment is already running nodes and
        // this test cannot assert anything meaningful.
        let mut receiver = None;
        for port in DISCOVERY_PORT_MIN..=DISCOVERY_PORT_MAX {
            if let Ok(socket) = UdpSocket::bind(("127.0.0.1", port)).await {
                receiver = Some(socket);
                break;
            }
        }
        let Some(receiver) = receiver else { return };

        let token = CancellationToken::new();
        let emitter = tokio::spawn(run_heartbeat(
            token.clone(),
            9000,
            "beat-node".into(),
            "Alice".into(),
            "cd".repeat(32),
        ));

        let mut buf = [0u8; UDP_RECV_BUF];
        let (len, _) = tokio::time::timeout(Duration::from_secs(3), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        let beat: HeartbeatPacket = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(beat.packet_type, HEARTBEAT_TYPE);
        assert_eq!(beat.id, "beat-node");
        assert_eq!(beat.port, 9000);

        token.cancel();
        emitter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reaper_expires_silent_peers() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_at(&dir.path().join("reaper.db")).unwrap());

        db.upsert_peer(&Peer {
            id: "peer-1".into(),
            nick: "Quiet".into(),
            addr: "127.0.0.1:9001".into(),
            pub_key: String::new(),
            last_seen: Utc::now() - ChronoDuration::seconds(30),
            is_active: true,
        })
        .unwrap();

        let token = CancellationToken::new();
        let reaper = tokio::spawn(run_reaper(token.clone(), Arc::clone(&db)));

        // The first reaper tick fires immediately.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let peers = db.get_all_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert!(!peers[0].is_active);

        token.cancel();
        reaper.await.unwrap();
    }
}
