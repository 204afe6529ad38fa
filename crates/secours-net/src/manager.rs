//! Live TCP connection registry.
//!
//! The manager owns every established gossip socket, keyed by the remote
//! address string. A secondary `node_id -> addr` index lets callers reach
//! a peer by identity even after it reconnects from a new ephemeral port;
//! the address is only a hint, refreshed on every discovery observation.
//!
//! Sockets are split: the write half lives in the registry behind a mutex
//! (broadcasts and unicast replies may race), the read half is handed to
//! the per-connection handler task and dies with it.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::framing::{read_frame, write_frame};

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// The read side of a registered socket, owned by its handler task.
pub struct Connection {
    addr: SocketAddr,
    reader: OwnedReadHalf,
}

impl Connection {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Read the next frame from this connection.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, NetError> {
        read_frame(&mut self.reader).await
    }
}

#[derive(Default)]
pub struct ConnectionManager {
    conns: RwLock<HashMap<String, SharedWriter>>,
    nodes: RwLock<HashMap<String, String>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the gossip TCP listener and spawn the accept loop.
    ///
    /// Each accepted socket is registered, handed to `handler`, and
    /// unregistered when the handler returns. Accept errors are logged
    /// and the loop continues; only the initial bind can fail.
    pub async fn listen<F, Fut>(
        self: Arc<Self>,
        port: u16,
        token: CancellationToken,
        handler: F,
    ) -> Result<SocketAddr, NetError>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;

        let manager = self;
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };

                match accepted {
                    Ok((stream, addr)) => {
                        let conn = manager.register(stream, addr).await;
                        let manager = Arc::clone(&manager);
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            (*handler)(conn).await;
                            manager.unregister(&addr.to_string()).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
            debug!("accept loop stopped");
        });

        Ok(local_addr)
    }

    /// Dial a remote listener and register the socket. The caller spawns
    /// a handler task for the returned read side and must `unregister`
    /// when it completes (the gossip engine does both).
    pub async fn dial(&self, addr: &str) -> Result<Connection, NetError> {
        let stream = TcpStream::connect(addr).await?;
        let remote = stream.peer_addr()?;
        Ok(self.register(stream, remote).await)
    }

    async fn register(&self, stream: TcpStream, addr: SocketAddr) -> Connection {
        let (reader, writer) = stream.into_split();
        self.conns
            .write()
            .await
            .insert(addr.to_string(), Arc::new(Mutex::new(writer)));
        debug!(addr = %addr, "registered connection");
        Connection { addr, reader }
    }

    /// Drop a connection and any node bindings that point at it.
    pub async fn unregister(&self, addr: &str) {
        if self.conns.write().await.remove(addr).is_some() {
            debug!(addr = %addr, "unregistered connection");
        }
        self.nodes.write().await.retain(|_, a| a != addr);
    }

    /// Record that the socket registered under `addr` belongs to `node_id`.
    pub async fn bind_node(&self, node_id: &str, addr: &str) {
        self.nodes
            .write()
            .await
            .insert(node_id.to_string(), addr.to_string());
    }

    /// The address hint for a node, if one of its sockets is registered.
    pub async fn addr_for_node(&self, node_id: &str) -> Option<String> {
        self.nodes.read().await.get(node_id).cloned()
    }

    pub async fn has_connection(&self, addr: &str) -> bool {
        self.conns.read().await.contains_key(addr)
    }

    pub async fn has_node(&self, node_id: &str) -> bool {
        match self.addr_for_node(node_id).await {
            Some(addr) => self.has_connection(&addr).await,
            None => false,
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.conns.read().await.len()
    }

    /// Write a frame to every live connection. Per-peer write failures
    /// are swallowed; the peer's read side notices the closed socket and
    /// unregisters it.
    pub async fn broadcast(&self, data: &[u8]) {
        let snapshot: Vec<(String, SharedWriter)> = self
            .conns
            .read()
            .await
            .iter()
            .map(|(addr, writer)| (addr.clone(), Arc::clone(writer)))
            .collect();

        for (addr, writer) in snapshot {
            if let Err(e) = write_frame(&mut *writer.lock().await, data).await {
                debug!(addr = %addr, error = %e, "broadcast write failed");
            }
        }
    }

    /// Unicast a frame to the connection registered under `addr`.
    pub async fn send(&self, addr: &str, data: &[u8]) -> Result<(), NetError> {
        let writer = self
            .conns
            .read()
            .await
            .get(addr)
            .cloned()
            .ok_or_else(|| NetError::NoConnection(addr.to_string()))?;

        let result = write_frame(&mut *writer.lock().await, data).await;
        result
    }

    /// Shut down every registered socket and clear the registry.
    pub async fn close_all(&self) {
        let writers: Vec<SharedWriter> = self.conns.write().await.drain().map(|(_, w)| w).collect();
        self.nodes.write().await.clear();

        for writer in writers {
            use tokio::io::AsyncWriteExt;
            let _ = writer.lock().await.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Listener that forwards every received frame to an mpsc channel.
    async fn echo_sink(
        manager: &Arc<ConnectionManager>,
        token: &CancellationToken,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr = Arc::clone(manager)
            .listen(0, token.clone(), move |mut conn| {
                let tx = tx.clone();
                async move {
                    while let Ok(frame) = conn.read_frame().await {
                        let _ = tx.send(frame);
                    }
                }
            })
            .await
            .unwrap();
        (addr, rx)
    }

    fn local(addr: SocketAddr) -> String {
        format!("127.0.0.1:{}", addr.port())
    }

    #[tokio::test]
    async fn test_dial_send_receive() {
        let token = CancellationToken::new();
        let server = Arc::new(ConnectionManager::new());
        let client = Arc::new(ConnectionManager::new());

        let (addr, mut rx) = echo_sink(&server, &token).await;
        let target = local(addr);

        let _conn = client.dial(&target).await.unwrap();
        assert!(client.has_connection(&target).await);

        client.send(&target, b"ping").await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, b"ping");

        token.cancel();
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let manager = ConnectionManager::new();
        assert!(matches!(
            manager.send("127.0.0.1:1", b"x").await,
            Err(NetError::NoConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_peers() {
        let token = CancellationToken::new();
        let client = Arc::new(ConnectionManager::new());

        let server_a = Arc::new(ConnectionManager::new());
        let server_b = Arc::new(ConnectionManager::new());
        let (addr_a, mut rx_a) = echo_sink(&server_a, &token).await;
        let (addr_b, mut rx_b) = echo_sink(&server_b, &token).await;

        client.dial(&local(addr_a)).await.unwrap();
        client.dial(&local(addr_b)).await.unwrap();
        assert_eq!(client.connection_count().await, 2);

        client.broadcast(b"everyone").await;

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(frame, b"everyone");
        }

        token.cancel();
    }

    #[tokio::test]
    async fn test_node_binding_follows_connection() {
        let token = CancellationToken::new();
        let server = Arc::new(ConnectionManager::new());
        let client = Arc::new(ConnectionManager::new());

        let (addr, _rx) = echo_sink(&server, &token).await;
        let target = local(addr);

        client.dial(&target).await.unwrap();
        client.bind_node("node-1", &target).await;

        assert!(client.has_node("node-1").await);
        assert_eq!(client.addr_for_node("node-1").await, Some(target.clone()));

        client.unregister(&target).await;
        assert!(!client.has_node("node-1").await);
        assert_eq!(client.addr_for_node("node-1").await, None);

        token.cancel();
    }

    #[tokio::test]
    async fn test_close_all_clears_registry() {
        let token = CancellationToken::new();
        let server = Arc::new(ConnectionManager::new());
        let client = Arc::new(ConnectionManager::new());

        let (addr, _rx) = echo_sink(&server, &token).await;
        client.dial(&local(addr)).await.unwrap();

        client.close_all().await;
        assert_eq!(client.connection_count().await, 0);

        token.cancel();
    }
}
