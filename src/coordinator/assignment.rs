//! Role assignment: pair discovered workers with roles, one ack at a time.

use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::coordinator::registry::WorkerRegistry;
use crate::error::Error;
use crate::protocol::{Destination, Message, NodeId, Role, SessionId, Tag};
use crate::transport::Transport;

/// How one assignment attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Accepted,
    Refused(String),
    TimedOut,
}

/// What one assignment round did.
#[derive(Debug, Clone, Default)]
pub struct AssignmentReport {
    pub assigned: Vec<(Role, NodeId)>,
    pub refused: Vec<(Role, NodeId, String)>,
    /// Roles left without a worker (more roles than workers).
    pub unserved: Vec<Role>,
    /// Workers left without a role (more workers than roles).
    pub idle: Vec<NodeId>,
}

/// Assign `roles` to unassigned workers in discovery order.
///
/// Roles already held by a worker are skipped. Each worker gets one
/// `AssignRole` and one bounded wait; a refusal or silence marks it
/// failed for the rest of the session.
pub async fn assign_roles<T: Transport + ?Sized>(
    transport: &T,
    session: SessionId,
    registry: &RwLock<WorkerRegistry>,
    roles: &[Role],
    ack_timeout: Duration,
) -> Result<AssignmentReport, Error> {
    let (workers, open_roles) = {
        let registry = registry.read().await;
        let open_roles: Vec<Role> = roles
            .iter()
            .copied()
            .filter(|role| registry.holder_of(*role).is_none())
            .collect();
        (registry.unassigned(), open_roles)
    };

    let mut report = AssignmentReport::default();
    let pairs = workers.iter().copied().zip(open_roles.iter().copied());

    for (worker, role) in pairs {
        registry.write().await.begin_assignment(worker, role)?;
        transport
            .send(Destination::Node(worker), Some(session), Message::AssignRole { role })
            .await?;

        let outcome = await_ack(transport, session, worker, role, ack_timeout).await;
        let mut registry = registry.write().await;
        match outcome {
            AckOutcome::Accepted => {
                registry.mark_ready(worker)?;
                tracing::info!(session = %session, worker = %worker, role = %role, "Role assigned");
                report.assigned.push((role, worker));
            }
            AckOutcome::Refused(reason) => {
                registry.mark_failed(worker, reason.clone())?;
                tracing::warn!(worker = %worker, role = %role, reason = %reason, "Role refused");
                report.refused.push((role, worker, reason));
            }
            AckOutcome::TimedOut => {
                let reason = "no role ack".to_string();
                registry.mark_failed(worker, reason.clone())?;
                tracing::warn!(worker = %worker, role = %role, "Role ack timed out");
                report.refused.push((role, worker, reason));
            }
        }
    }

    report.unserved = open_roles.iter().skip(workers.len()).copied().collect();
    report.idle = workers.iter().skip(open_roles.len()).copied().collect();
    if !report.unserved.is_empty() {
        tracing::warn!(roles = ?report.unserved, "Roles left without a worker");
    }
    Ok(report)
}

/// Wait for the `RoleAck` of `worker` for `role`, ignoring anything else.
async fn await_ack<T: Transport + ?Sized>(
    transport: &T,
    session: SessionId,
    worker: NodeId,
    role: Role,
    timeout: Duration,
) -> AckOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return AckOutcome::TimedOut;
        }
        let Some(envelope) = transport
            .receive_in(session, Tag::Role.into(), remaining)
            .await else {
            return AckOutcome::TimedOut;
        };
        if envelope.session != Some(session) || envelope.from != worker {
            tracing::debug!(from = %envelope.from, "Discarding unrelated role frame");
            continue;
        }
        match envelope.message {
            Message::RoleAck {
                role: acked,
                ok,
                reason,
            } if acked == role => {
                return if ok {
                    AckOutcome::Accepted
                } else {
                    AckOutcome::Refused(reason.unwrap_or_else(|| "refused".to_string()))
                };
            }
            other => {
                tracing::debug!(from = %envelope.from, kind = other.kind(), "Discarding mismatched ack");
            }
        }
    }
}
