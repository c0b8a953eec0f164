//! Per-tag inboxes for one endpoint.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::protocol::{Envelope, NodeId, SessionId, Tag};
use crate::transport::TagFilter;

/// Default number of frames buffered per tag.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Order in which `TagFilter::Any` looks at the queues.
const ANY_ORDER: [Tag; 4] = [Tag::Control, Tag::Role, Tag::Task, Tag::Probe];

type Queue = Mutex<VecDeque<Envelope>>;

/// One bounded queue per protocol tag.
///
/// A receive filtered on one tag never consumes frames of another, so
/// discovery, assignment, dispatch and liveness traffic can be awaited
/// independently on the same endpoint. A session-scoped receive only takes
/// frames of its own session; the rest stay queued for their receivers.
/// A full queue evicts its oldest frame.
pub struct Mailboxes {
    owner: NodeId,
    capacity: usize,
    queues: [Queue; 4],
    arrived: Notify,
}

impl Mailboxes {
    pub fn new(owner: NodeId, capacity: usize) -> Self {
        Self {
            owner,
            capacity: capacity.max(1),
            queues: Tag::ALL.map(|_| Mutex::new(VecDeque::new())),
            arrived: Notify::new(),
        }
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    /// Queue a decoded frame. Returns false when the frame was not for
    /// this node.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        if envelope.from == self.owner || !envelope.to.includes(self.owner) {
            return false;
        }
        let tag = envelope.tag();
        {
            let mut queue = lock(&self.queues[tag.index()]);
            if queue.len() >= self.capacity {
                if let Some(evicted) = queue.pop_front() {
                    tracing::debug!(
                        node_id = %self.owner,
                        tag = %tag,
                        kind = evicted.message.kind(),
                        "Mailbox full, evicting oldest frame"
                    );
                }
            }
            queue.push_back(envelope);
        }
        self.arrived.notify_waiters();
        true
    }

    /// Wait up to `timeout` for the next frame matching `filter`, from any
    /// session.
    pub async fn receive(&self, filter: TagFilter, timeout: Duration) -> Option<Envelope> {
        self.wait_for(filter, None, timeout).await
    }

    /// Like [`Mailboxes::receive`], restricted to frames of `session` and
    /// unscoped frames.
    pub async fn receive_in(
        &self,
        session: SessionId,
        filter: TagFilter,
        timeout: Duration,
    ) -> Option<Envelope> {
        self.wait_for(filter, Some(session), timeout).await
    }

    async fn wait_for(
        &self,
        filter: TagFilter,
        session: Option<SessionId>,
        timeout: Duration,
    ) -> Option<Envelope> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register before looking so a delivery in between still wakes us.
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            if let Some(envelope) = self.take(filter, session) {
                return Some(envelope);
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return None;
            }
        }
    }

    fn take(&self, filter: TagFilter, session: Option<SessionId>) -> Option<Envelope> {
        let tags: &[Tag] = match &filter {
            TagFilter::Only(tag) => std::slice::from_ref(tag),
            TagFilter::Any => &ANY_ORDER,
        };
        tags.iter().find_map(|tag| {
            let mut queue = lock(&self.queues[tag.index()]);
            let position = queue
                .iter()
                .position(|env| session.is_none_or(|s| env.in_session(s)))?;
            queue.remove(position)
        })
    }
}

fn lock(queue: &Queue) -> MutexGuard<'_, VecDeque<Envelope>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}
