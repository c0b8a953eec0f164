//! In-process network: one shared medium, many endpoints.
//!
//! Frames go through the wire codec on the way, so malformed input and
//! validation behave exactly as they do over UDP. Optional fault
//! injection drops, duplicates or delays individual deliveries.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::RwLock;

use crate::error::TransportError;
use crate::protocol::{Destination, Envelope, Message, NodeId, SessionId, codec};
use crate::transport::mailbox::{DEFAULT_MAILBOX_CAPACITY, Mailboxes};
use crate::transport::{TagFilter, Transport};

/// Per-delivery fault probabilities.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability in `[0, 1]` that a delivery is lost.
    pub drop_rate: f64,
    /// Probability in `[0, 1]` that a delivery arrives twice.
    pub duplicate_rate: f64,
    /// Each delivery is delayed by a random duration up to this bound.
    pub max_delay: Duration,
}

impl FaultConfig {
    pub fn lossless() -> Self {
        Self::default()
    }
}

struct NetworkInner {
    name: String,
    nodes: RwLock<HashMap<NodeId, Weak<Mailboxes>>>,
    faults: FaultConfig,
    capacity: usize,
}

/// A named in-process channel. Cloning shares the medium.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

/// How one delivery should happen after fault injection.
struct Delivery {
    target: Arc<Mailboxes>,
    copies: usize,
    delay: Duration,
}

impl MemoryNetwork {
    /// Create a lossless network.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_faults(name, FaultConfig::lossless())
    }

    /// Create a network that injects the given faults.
    pub fn with_faults(name: impl Into<String>, faults: FaultConfig) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                name: name.into(),
                nodes: RwLock::new(HashMap::new()),
                faults,
                capacity: DEFAULT_MAILBOX_CAPACITY,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Attach an endpoint. The id is released when the endpoint is dropped.
    pub async fn open(&self, node_id: NodeId) -> Result<MemoryTransport, TransportError> {
        let mut nodes = self.inner.nodes.write().await;
        if nodes.get(&node_id).is_some_and(|w| w.strong_count() > 0) {
            return Err(TransportError::NodeIdInUse { node_id });
        }
        let mailboxes = Arc::new(Mailboxes::new(node_id, self.inner.capacity));
        nodes.insert(node_id, Arc::downgrade(&mailboxes));
        tracing::debug!(network = %self.inner.name, node_id = %node_id, "Endpoint attached");
        Ok(MemoryTransport {
            id: node_id,
            mailboxes,
            network: self.clone(),
        })
    }

    /// Ids of endpoints currently attached.
    pub async fn nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .inner
            .nodes
            .read()
            .await
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Push raw bytes at one endpoint, bypassing the sender side of the
    /// codec. Returns whether a valid frame was queued.
    pub async fn inject_raw(&self, to: NodeId, bytes: &[u8]) -> bool {
        let target = self.inner.nodes.read().await.get(&to).and_then(Weak::upgrade);
        match (target, codec::decode(bytes)) {
            (Some(target), Some(env)) => target.deliver(env),
            _ => false,
        }
    }

    async fn route(&self, from: NodeId, to: Destination, frame: Vec<u8>) {
        let targets: Vec<Arc<Mailboxes>> = {
            let nodes = self.inner.nodes.read().await;
            match to {
                Destination::Node(id) => nodes.get(&id).and_then(Weak::upgrade).into_iter().collect(),
                Destination::Broadcast => nodes
                    .iter()
                    .filter(|(id, _)| **id != from)
                    .filter_map(|(_, w)| w.upgrade())
                    .collect(),
            }
        };
        if targets.is_empty() {
            tracing::debug!(network = %self.inner.name, from = %from, to = %to, "No endpoint for frame");
            return;
        }

        let Some(envelope) = codec::decode(&frame) else {
            return;
        };
        for delivery in self.plan_deliveries(targets) {
            let envelope = envelope.clone();
            if delivery.delay.is_zero() {
                for _ in 0..delivery.copies {
                    delivery.target.deliver(envelope.clone());
                }
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(delivery.delay).await;
                    for _ in 0..delivery.copies {
                        delivery.target.deliver(envelope.clone());
                    }
                });
            }
        }
    }

    fn plan_deliveries(&self, targets: Vec<Arc<Mailboxes>>) -> Vec<Delivery> {
        let faults = &self.inner.faults;
        let mut rng = rand::thread_rng();
        let max_delay_ms = faults.max_delay.as_millis() as u64;
        targets
            .into_iter()
            .filter_map(|target| {
                if rng.gen_bool(faults.drop_rate.clamp(0.0, 1.0)) {
                    tracing::debug!(network = %self.inner.name, to = %target.owner(), "Fault: dropped delivery");
                    return None;
                }
                let copies = if rng.gen_bool(faults.duplicate_rate.clamp(0.0, 1.0)) {
                    2
                } else {
                    1
                };
                let delay = if max_delay_ms > 0 {
                    Duration::from_millis(rng.gen_range(0..=max_delay_ms))
                } else {
                    Duration::ZERO
                };
                Some(Delivery {
                    target,
                    copies,
                    delay,
                })
            })
            .collect()
    }
}

/// One endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    id: NodeId,
    mailboxes: Arc<Mailboxes>,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
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
        self.network.route(self.id, to, frame).await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Tag;

    const WAIT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn unicast_reaches_only_its_target() {
        let net = MemoryNetwork::new("test");
        let a = net.open(NodeId(1)).await.unwrap();
        let b = net.open(NodeId(2)).await.unwrap();
        let c = net.open(NodeId(3)).await.unwrap();

        a.send(Destination::Node(NodeId(2)), None, Message::Shutdown)
            .await
            .unwrap();

        let got = b.receive(TagFilter::Any, WAIT).await.unwrap();
        assert_eq!(got.from, NodeId(1));
        assert_eq!(got.message, Message::Shutdown);
        assert!(c.receive(TagFilter::Any, Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let net = MemoryNetwork::new("test");
        let a = net.open(NodeId(1)).await.unwrap();
        let b = net.open(NodeId(2)).await.unwrap();
        let c = net.open(NodeId(3)).await.unwrap();

        a.send(Destination::Broadcast, None, Message::Discover)
            .await
            .unwrap();

        assert!(b.receive(Tag::Probe.into(), WAIT).await.is_some());
        assert!(c.receive(Tag::Probe.into(), WAIT).await.is_some());
        assert!(a.receive(TagFilter::Any, Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn send_to_unknown_node_is_silent() {
        let net = MemoryNetwork::new("test");
        let a = net.open(NodeId(1)).await.unwrap();
        assert!(
            a.send(Destination::Node(NodeId(99)), None, Message::Shutdown)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn node_ids_are_exclusive_until_dropped() {
        let net = MemoryNetwork::new("test");
        let a = net.open(NodeId(1)).await.unwrap();
        assert!(matches!(
            net.open(NodeId(1)).await,
            Err(TransportError::NodeIdInUse { .. })
        ));
        drop(a);
        assert!(net.open(NodeId(1)).await.is_ok());
    }

    #[tokio::test]
    async fn networks_are_isolated() {
        let left = MemoryNetwork::new("left");
        let right = MemoryNetwork::new("right");
        let a = left.open(NodeId(1)).await.unwrap();
        let b = right.open(NodeId(2)).await.unwrap();
        a.send(Destination::Broadcast, None, Message::Discover)
            .await
            .unwrap();
        assert!(b.receive(TagFilter::Any, Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn total_loss_drops_everything() {
        let net = MemoryNetwork::with_faults(
            "lossy",
            FaultConfig {
                drop_rate: 1.0,
                ..FaultConfig::default()
            },
        );
        let a = net.open(NodeId(1)).await.unwrap();
        let b = net.open(NodeId(2)).await.unwrap();
        a.send(Destination::Node(NodeId(2)), None, Message::Shutdown)
            .await
            .unwrap();
        assert!(b.receive(TagFilter::Any, Duration::from_millis(30)).await.is_none());
    }

    #[tokio::test]
    async fn duplication_delivers_twice() {
        let net = MemoryNetwork::with_faults(
            "dup",
            FaultConfig {
                duplicate_rate: 1.0,
                ..FaultConfig::default()
            },
        );
        let a = net.open(NodeId(1)).await.unwrap();
        let b = net.open(NodeId(2)).await.unwrap();
        a.send(Destination::Node(NodeId(2)), None, Message::Ping { nonce: 5 })
            .await
            .unwrap();
        assert!(b.receive(Tag::Control.into(), WAIT).await.is_some());
        assert!(b.receive(Tag::Control.into(), WAIT).await.is_some());
        assert!(b.receive(Tag::Control.into(), Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn delayed_frames_still_arrive() {
        let net = MemoryNetwork::with_faults(
            "slow",
            FaultConfig {
                max_delay: Duration::from_millis(30),
                ..FaultConfig::default()
            },
        );
        let a = net.open(NodeId(1)).await.unwrap();
        let b = net.open(NodeId(2)).await.unwrap();
        a.send(Destination::Node(NodeId(2)), None, Message::Shutdown)
            .await
            .unwrap();
        assert!(b.receive(TagFilter::Any, Duration::from_millis(200)).await.is_some());
    }

    #[tokio::test]
    async fn injected_garbage_is_not_queued() {
        let net = MemoryNetwork::new("test");
        let b = net.open(NodeId(2)).await.unwrap();
        assert!(!net.inject_raw(NodeId(2), b"{{{{").await);
        assert!(
            net.inject_raw(
                NodeId(2),
                br#"{"from":1,"to":{"node":2},"message":{"type":"shutdown"}}"#
            )
            .await
        );
        assert_eq!(
            b.receive(TagFilter::Any, WAIT).await.unwrap().message,
            Message::Shutdown
        );
        assert_eq!(net.nodes().await, vec![NodeId(2)]);
    }
}
