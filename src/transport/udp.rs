//! UDP transport for multi-process deployments.
//!
//! There is no membership service: broadcasts go to a static peer list
//! (which may contain a subnet broadcast address), and unicast routes are
//! learned from the source address of frames received from each node.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::protocol::codec::{self, MAX_FRAME_BYTES};
use crate::protocol::{Destination, Envelope, Message, NodeId, SessionId};
use crate::transport::mailbox::{DEFAULT_MAILBOX_CAPACITY, Mailboxes};
use crate::transport::{TagFilter, Transport};

type Routes = Arc<RwLock<HashMap<NodeId, SocketAddr>>>;

/// A node attached to the mesh over UDP.
pub struct UdpTransport {
    id: NodeId,
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
    routes: Routes,
    mailboxes: Arc<Mailboxes>,
    reader: JoinHandle<()>,
}

impl UdpTransport {
    /// Bind `bind_addr` and start reading frames.
    pub async fn bind(
        id: NodeId,
        bind_addr: SocketAddr,
        peers: Vec<SocketAddr>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: bind_addr.to_string(),
                reason: e.to_string(),
            })?;
        socket.set_broadcast(true)?;
        let socket = Arc::new(socket);
        let routes: Routes = Arc::new(RwLock::new(HashMap::new()));
        let mailboxes = Arc::new(Mailboxes::new(id, DEFAULT_MAILBOX_CAPACITY));

        let reader = tokio::spawn(read_loop(
            Arc::clone(&socket),
            Arc::clone(&routes),
            Arc::clone(&mailboxes),
        ));

        tracing::info!(
            node_id = %id,
            addr = %socket.local_addr()?,
            peers = peers.len(),
            "UDP transport bound"
        );

        Ok(Self {
            id,
            socket,
            peers,
            routes,
            mailboxes,
            reader,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Currently known route for a node, if any frame from it was seen.
    pub async fn route_to(&self, id: NodeId) -> Option<SocketAddr> {
        self.routes.read().await.get(&id).copied()
    }

    async fn send_to(&self, addr: SocketAddr, frame: &[u8]) {
        if let Err(e) = self.socket.send_to(frame, addr).await {
            tracing::debug!(node_id = %self.id, addr = %addr, error = %e, "UDP send failed");
        }
    }
}

async fn read_loop(socket: Arc<UdpSocket>, routes: Routes, mailboxes: Arc<Mailboxes>) {
    let mut buf = vec![0u8; MAX_FRAME_BYTES];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, addr)) => {
                let Some(envelope) = codec::decode(&buf[..len]) else {
                    continue;
                };
                if envelope.from != mailboxes.owner() {
                    routes.write().await.insert(envelope.from, addr);
                }
                mailboxes.deliver(envelope);
            }
            Err(e) => {
                // Some platforms surface ICMP unreachable as a recv error; back off briefly.
                tracing::debug!(error = %e, "UDP receive failed");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_id(&self) -> NodeId {
        self.id
    }

    async fn send(
        &self,
        to: Destination,
        session: Option<SessionId>,
        message: Message,
    ) -> Result<(), TransportError> {
        let envelope = Envelope::new(self.id, to, session, message);
        let frame = codec::encode(&envelope)?;

        let route = match to {
            Destination::Node(id) => self.route_to(id).await,
            Destination::Broadcast => None,
        };
        match route {
            Some(addr) => self.send_to(addr, &frame).await,
            // Unknown route: fan out, receivers drop frames not addressed to them.
            None => {
                for addr in &self.peers {
                    self.send_to(*addr, &frame).await;
                }
            }
        }
        Ok(())
    }

    async fn receive(&self, filter: TagFilter, timeout: Duration) -> Option<Envelope> {
        self.mailboxes.receive(filter, timeout).await
    }

    async fn receive_in(
        &self,
        session: SessionId,
        filter: TagFilter,
        timeout: Duration,
    ) -> Option<Envelope> {
        self.mailboxes.receive_in(session, filter, timeout).await
    }
}
