//! Transport abstraction over an unreliable, broadcast-capable medium.
//!
//! - `mailbox`: per-tag inboxes shared by every implementation
//! - `memory`: in-process network with fault injection
//! - `udp`: UDP datagrams between processes

pub mod mailbox;
pub mod memory;
pub mod udp;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::protocol::{Destination, Envelope, Message, NodeId, SessionId, Tag};

pub use mailbox::Mailboxes;
pub use memory::{FaultConfig, MemoryNetwork, MemoryTransport};
pub use udp::UdpTransport;

/// Which frames a receive call is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFilter {
    Only(Tag),
    Any,
}

impl From<Tag> for TagFilter {
    fn from(tag: Tag) -> Self {
        Self::Only(tag)
    }
}

/// A node's attachment to the medium.
///
/// `send` is best-effort: a frame to an unknown or dead node vanishes
/// without error. `receive` returns `None` when the wait elapses.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The id this endpoint sends as.
    fn local_id(&self) -> NodeId;

    /// Send one message.
    async fn send(
        &self,
        to: Destination,
        session: Option<SessionId>,
        message: Message,
    ) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next frame matching `filter`.
    async fn receive(&self, filter: TagFilter, timeout: Duration) -> Option<Envelope>;

    /// Like `receive`, but only takes frames of `session` (or unscoped
    /// ones). Frames of other sessions stay queued for their own receivers,
    /// so several sessions can share one endpoint.
    async fn receive_in(
        &self,
        session: SessionId,
        filter: TagFilter,
        timeout: Duration,
    ) -> Option<Envelope>;
}
