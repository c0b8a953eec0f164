//! The worker executor loop.
//!
//! A worker answers discovery, accepts one role per coordinator session,
//! runs tasks against the active skill set and exits on `Shutdown`.
//! Skill invocations run in their own task under a timeout, so a failing
//! or panicking skill becomes an error result instead of ending the loop.

use std::sync::Arc;
use std::time::Duration;

use crate::config::WorkerConfig;
use crate::error::SkillError;
use crate::protocol::{
    Destination, Envelope, Message, NodeId, Payload, Role, SessionId, TaskId, TaskReply,
};
use crate::transport::{TagFilter, Transport};
use crate::worker::catalog::SkillCatalog;
use crate::worker::set::SkillSet;
use crate::worker::skill::{Skill, SkillContext};
use crate::worker::state::{WorkerPhase, WorkerStats};

/// Error text for tasks from a session this worker holds no role in.
pub const NO_ACTIVE_ROLE: &str = "no active role for this session";

/// The role a worker accepted, and for which session.
struct Binding {
    session: Option<SessionId>,
    skills: SkillSet,
}

enum Flow {
    Continue,
    Stop,
}

/// One worker node.
pub struct WorkerNode<T: Transport> {
    transport: Arc<T>,
    config: WorkerConfig,
    catalog: SkillCatalog,
    binding: Option<Binding>,
    phase: WorkerPhase,
    stats: WorkerStats,
}

impl<T: Transport> WorkerNode<T> {
    pub fn new(transport: Arc<T>, config: WorkerConfig, catalog: SkillCatalog) -> Self {
        Self {
            transport,
            config,
            catalog,
            binding: None,
            phase: WorkerPhase::Idle,
            stats: WorkerStats::default(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.transport.local_id()
    }

    /// The currently bound role, if any.
    pub fn role(&self) -> Option<Role> {
        self.binding.as_ref().map(|b| b.skills.role())
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Run until `Shutdown`. Returns the task counters.
    pub async fn run(mut self) -> WorkerStats {
        let id = self.node_id();
        tracing::info!(node_id = %id, roles = ?self.catalog.roles(), "Worker started");

        if self.config.announce_on_start {
            self.send(Destination::Broadcast, None, Message::WorkerAvailable { id })
                .await;
        }

        loop {
            let Some(envelope) = self
                .transport
                .receive(TagFilter::Any, self.config.poll_interval)
                .await
            else {
                continue;
            };
            if let Flow::Stop = self.handle(envelope).await {
                break;
            }
        }

        self.enter(WorkerPhase::Stopped);
        tracing::info!(
            node_id = %id,
            executed = self.stats.executed,
            failed = self.stats.failed,
            rejected = self.stats.rejected,
            "Worker stopped"
        );
        self.stats
    }

    async fn handle(&mut self, envelope: Envelope) -> Flow {
        let Envelope {
            from,
            session,
            message,
            ..
        } = envelope;

        match message {
            Message::Discover => {
                let id = self.node_id();
                self.send(Destination::Node(from), session, Message::WorkerAvailable { id })
                    .await;
            }
            Message::AssignRole { role } => {
                let (ok, reason) = self.assign(role, session);
                self.send(
                    Destination::Node(from),
                    session,
                    Message::RoleAck { role, ok, reason },
                )
                .await;
            }
            Message::Task {
                task_id,
                function,
                payload,
            } => {
                let reply = self.run_task(session, task_id, &function, payload).await;
                self.send(
                    Destination::Node(from),
                    session,
                    Message::Result { task_id, reply },
                )
                .await;
            }
            Message::Ping { nonce } => {
                self.send(Destination::Node(from), session, Message::Pong { nonce })
                    .await;
            }
            Message::Shutdown => {
                if self.accepts_control_from(session) {
                    return Flow::Stop;
                }
                tracing::debug!(from = %from, "Ignoring shutdown from another session");
            }
            other => {
                tracing::debug!(from = %from, kind = other.kind(), "Ignoring frame");
            }
        }
        Flow::Continue
    }

    /// Apply the session binding rules. Returns the ack fields.
    fn assign(&mut self, role: Role, session: Option<SessionId>) -> (bool, Option<String>) {
        if let Some(binding) = &self.binding
            && binding.session == session
        {
            let current = binding.skills.role();
            if current == role {
                return (true, None);
            }
            tracing::warn!(current = %current, requested = %role, "Refusing second role in session");
            return (false, Some(format!("already serving {current} in this session")));
        }

        match self.catalog.activate(role) {
            Ok(skills) => {
                tracing::info!(
                    node_id = %self.node_id(),
                    role = %role,
                    skills = skills.count(),
                    "Role activated"
                );
                self.binding = Some(Binding { session, skills });
                (true, None)
            }
            Err(e) => {
                tracing::warn!(node_id = %self.node_id(), role = %role, error = %e, "Role refused");
                (false, Some(e.to_string()))
            }
        }
    }

    async fn run_task(
        &mut self,
        session: Option<SessionId>,
        task_id: TaskId,
        function: &str,
        payload: Payload,
    ) -> TaskReply {
        let Some(binding) = self.binding.as_ref().filter(|b| b.session == session) else {
            self.stats.rejected += 1;
            tracing::debug!(task_id = %task_id, function, "Task outside the bound session");
            return TaskReply::Error(NO_ACTIVE_ROLE.to_string());
        };

        let role = binding.skills.role();
        let Some(skill) = binding.skills.get(function) else {
            self.stats.failed += 1;
            let err = SkillError::UnknownFunction {
                name: function.to_string(),
            };
            tracing::debug!(task_id = %task_id, role = %role, "{err}");
            return TaskReply::Error(err.to_string());
        };

        let ctx = SkillContext {
            node_id: self.node_id(),
            role,
            task_id,
        };
        let timeout = skill.execution_timeout().unwrap_or(self.config.skill_timeout);

        self.enter(WorkerPhase::Executing);
        let result = invoke(skill, payload, ctx, timeout).await;
        self.enter(WorkerPhase::Idle);

        match result {
            Ok(value) => {
                self.stats.executed += 1;
                tracing::debug!(task_id = %task_id, role = %role, function, "Task completed");
                TaskReply::Value(value)
            }
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!(task_id = %task_id, role = %role, error = %e, "Task failed");
                TaskReply::Error(e.to_string())
            }
        }
    }

    /// Shutdown is honored when unbound, unsessioned, or from the bound session.
    fn accepts_control_from(&self, session: Option<SessionId>) -> bool {
        match (&self.binding, session) {
            (None, _) | (_, None) => true,
            (Some(binding), Some(session)) => binding.session == Some(session),
        }
    }

    fn enter(&mut self, next: WorkerPhase) {
        if !self.phase.can_transition_to(next) {
            tracing::debug!(from = %self.phase, to = %next, "Unexpected phase change");
        }
        self.phase = next;
    }

    async fn send(&self, to: Destination, session: Option<SessionId>, message: Message) {
        if let Err(e) = self.transport.send(to, session, message).await {
            tracing::warn!(node_id = %self.node_id(), to = %to, error = %e, "Failed to send reply");
        }
    }
}

/// Run one skill in its own task, bounded by `timeout`.
async fn invoke(
    skill: Arc<dyn Skill>,
    payload: Payload,
    ctx: SkillContext,
    timeout: Duration,
) -> Result<Payload, SkillError> {
    let function = skill.name().to_string();
    let handle = tokio::spawn(async move { skill.execute(payload, &ctx).await });
    let abort = handle.abort_handle();

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) if join_error.is_panic() => Err(SkillError::Panicked { function }),
        Ok(Err(join_error)) => Err(SkillError::ExecutionFailed {
            function,
            reason: join_error.to_string(),
        }),
        Err(_) => {
            abort.abort();
            Err(SkillError::Timeout { function, timeout })
        }
    }
}
