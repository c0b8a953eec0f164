//! Correlated task dispatch.
//!
//! Each task gets a fresh id from a per-session counter. A background pump
//! takes this session's result frames from the transport and hands each
//! one to the waiter registered under its id; results nobody waits for
//! (late or duplicated) are dropped there. Frames of other sessions on the
//! same endpoint are left for their own pumps.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::protocol::{
    Destination, Message, NodeId, Payload, Role, SessionId, Tag, TaskId, TaskReply,
};
use crate::transport::{TagFilter, Transport};

/// How long one pump receive waits before looping.
const PUMP_POLL: Duration = Duration::from_secs(1);

/// Monotonic task id source for one session.
#[derive(Debug)]
pub struct TaskIdAllocator {
    next: AtomicU64,
}

impl TaskIdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> TaskId {
        TaskId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TaskIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Waiter {
    worker: NodeId,
    sender: oneshot::Sender<TaskReply>,
}

/// Routes result frames to the dispatch call awaiting them.
#[derive(Clone, Default)]
pub struct ResultRouter {
    pending: Arc<StdMutex<HashMap<TaskId, Waiter>>>,
}

impl ResultRouter {
    /// Register interest in the result of `task_id` from `worker`.
    pub fn register(&self, task_id: TaskId, worker: NodeId) -> oneshot::Receiver<TaskReply> {
        let (sender, receiver) = oneshot::channel();
        let previous = self.lock().insert(task_id, Waiter { worker, sender });
        debug_assert!(previous.is_none(), "task id {task_id} registered twice");
        receiver
    }

    /// Hand a result to its waiter. Returns false when nobody is waiting
    /// for this id or the result came from a node the task was not sent to.
    pub fn resolve(&self, task_id: TaskId, from: NodeId, reply: TaskReply) -> bool {
        let mut pending = self.lock();
        match pending.get(&task_id) {
            Some(waiter) if waiter.worker == from => {}
            _ => return false,
        }
        match pending.remove(&task_id) {
            Some(waiter) => waiter.sender.send(reply).is_ok(),
            None => false,
        }
    }

    /// Stop waiting for `task_id`. Returns whether a waiter was removed.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        self.lock().remove(&task_id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Waiter>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancels a registered waiter when dropped, including when the dispatch
/// future itself is dropped mid-wait.
struct Registration<'a> {
    router: &'a ResultRouter,
    task_id: TaskId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.router.cancel(self.task_id);
    }
}

/// Why a dispatch produced no result.
#[derive(Debug, Clone, PartialEq)]
pub enum Unavailable {
    /// No ready worker holds the role. No traffic was sent.
    NoReadyWorker { role: Role },
    /// The deadline passed. `task_id` is `None` if the role's lane was
    /// still busy with an earlier task when time ran out.
    TimedOut {
        role: Role,
        task_id: Option<TaskId>,
        after: Duration,
    },
    /// The task could not be handed to the transport.
    SendFailed { role: Role, reason: String },
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReadyWorker { role } => write!(f, "no ready worker for {role}"),
            Self::TimedOut {
                role,
                task_id: Some(id),
                after,
            } => write!(f, "{role} task {id} timed out after {after:?}"),
            Self::TimedOut {
                role,
                task_id: None,
                after,
            } => write!(f, "{role} lane busy for {after:?}"),
            Self::SendFailed { role, reason } => write!(f, "{role} send failed: {reason}"),
        }
    }
}

/// Result of one dispatch call.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed {
        task_id: TaskId,
        worker: NodeId,
        reply: TaskReply,
    },
    Unavailable(Unavailable),
}

impl DispatchOutcome {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Unavailable(Unavailable::TimedOut { .. }))
    }

    /// The value map, if the worker reported success.
    pub fn value(&self) -> Option<&Payload> {
        match self {
            Self::Completed { reply, .. } => reply.value(),
            Self::Unavailable(_) => None,
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::Completed { task_id, .. } => Some(*task_id),
            Self::Unavailable(Unavailable::TimedOut { task_id, .. }) => *task_id,
            Self::Unavailable(_) => None,
        }
    }
}

/// Sends tasks and awaits their correlated results.
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    session: SessionId,
    ids: TaskIdAllocator,
    router: ResultRouter,
    /// One lane per role: at most one outstanding awaited task per role.
    lanes: HashMap<Role, Mutex<()>>,
    pump: JoinHandle<()>,
}

impl<T: Transport> Dispatcher<T> {
    /// Create a dispatcher and start its result pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(transport: Arc<T>, session: SessionId) -> Self {
        let router = ResultRouter::default();
        let pump = tokio::spawn(pump_results(
            Arc::clone(&transport),
            session,
            router.clone(),
        ));
        Self {
            transport,
            session,
            ids: TaskIdAllocator::new(),
            router,
            lanes: Role::ALL.iter().map(|&role| (role, Mutex::new(()))).collect(),
            pump,
        }
    }

    pub fn router(&self) -> &ResultRouter {
        &self.router
    }

    /// Send `function(payload)` to `worker` and wait for its result.
    ///
    /// Returns within `timeout` (plus scheduling jitter) whether the worker
    /// replies, stays silent, or replies late.
    pub async fn send_task(
        &self,
        role: Role,
        worker: NodeId,
        function: &str,
        payload: Payload,
        timeout: Duration,
    ) -> DispatchOutcome {
        let deadline = Instant::now() + timeout;

        let Some(lane) = self.lanes.get(&role) else {
            return DispatchOutcome::Unavailable(Unavailable::NoReadyWorker { role });
        };
        let Ok(_lane) = tokio::time::timeout_at(deadline, lane.lock()).await else {
            tracing::warn!(role = %role, "Dispatch lane still busy at deadline");
            return DispatchOutcome::Unavailable(Unavailable::TimedOut {
                role,
                task_id: None,
                after: timeout,
            });
        };

        let task_id = self.ids.next_id();
        let reply_rx = self.router.register(task_id, worker);
        let _registration = Registration {
            router: &self.router,
            task_id,
        };

        tracing::debug!(
            session = %self.session,
            role = %role,
            worker = %worker,
            task_id = %task_id,
            function,
            "Dispatching task"
        );

        let message = Message::Task {
            task_id,
            function: function.to_string(),
            payload,
        };
        if let Err(e) = self
            .transport
            .send(Destination::Node(worker), Some(self.session), message)
            .await
        {
            tracing::warn!(role = %role, task_id = %task_id, error = %e, "Failed to send task");
            return DispatchOutcome::Unavailable(Unavailable::SendFailed {
                role,
                reason: e.to_string(),
            });
        }

        match tokio::time::timeout_at(deadline, reply_rx).await {
            Ok(Ok(reply)) => DispatchOutcome::Completed {
                task_id,
                worker,
                reply,
            },
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(
                    role = %role,
                    worker = %worker,
                    task_id = %task_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Task timed out"
                );
                DispatchOutcome::Unavailable(Unavailable::TimedOut {
                    role,
                    task_id: Some(task_id),
                    after: timeout,
                })
            }
        }
    }

    /// Send a task without waiting for its result. The result, when it
    /// arrives, is discarded by the pump.
    ///
    /// Takes an id from the same counter as [`Dispatcher::send_task`] but
    /// does not wait on the role's lane.
    pub async fn notify(&self, worker: NodeId, function: &str, payload: Payload) -> Option<TaskId> {
        let task_id = self.ids.next_id();
        let message = Message::Task {
            task_id,
            function: function.to_string(),
            payload,
        };
        match self
            .transport
            .send(Destination::Node(worker), Some(self.session), message)
            .await
        {
            Ok(()) => Some(task_id),
            Err(e) => {
                tracing::warn!(worker = %worker, task_id = %task_id, error = %e, "Failed to send notification");
                None
            }
        }
    }
}

impl<T: Transport> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_results<T: Transport>(transport: Arc<T>, session: SessionId, router: ResultRouter) {
    loop {
        let Some(envelope) = transport
            .receive_in(session, TagFilter::Only(Tag::Task), PUMP_POLL)
            .await
        else {
            continue;
        };
        if envelope.session != Some(session) {
            tracing::debug!(from = %envelope.from, "Ignoring unscoped result");
            continue;
        }
        match envelope.message {
            Message::Result { task_id, reply } => {
                if !router.resolve(task_id, envelope.from, reply) {
                    tracing::debug!(
                        from = %envelope.from,
                        task_id = %task_id,
                        "Discarding uncorrelated result"
                    );
                }
            }
            other => {
                tracing::debug!(from = %envelope.from, kind = other.kind(), "Unexpected frame on task tag");
            }
        }
    }
}
