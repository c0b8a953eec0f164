//! Worker registry: who is out there, what role they serve, and whether
//! they can take tasks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::protocol::{NodeId, Role};

/// Assignment and liveness state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Discovered, no role offered yet (or surplus to the role list).
    Unassigned,
    /// `AssignRole` sent, waiting for the ack.
    AssignPending,
    /// Role accepted; dispatch may target this worker.
    Ready,
    /// Role accepted but the worker stopped answering.
    Stale,
    /// Assignment was refused or timed out. Terminal for the session.
    Failed,
}

impl WorkerState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, target),
            (Unassigned, AssignPending)
                | (AssignPending, Ready)
                | (AssignPending, Failed)
                | (Ready, Stale)
                | (Stale, Ready)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unassigned => "unassigned",
            Self::AssignPending => "assign_pending",
            Self::Ready => "ready",
            Self::Stale => "stale",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// What the coordinator knows about one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRecord {
    pub id: NodeId,
    /// Set when assignment starts; never changes afterwards.
    pub role: Option<Role>,
    pub state: WorkerState,
    pub discovered_at: DateTime<Utc>,
    pub last_contact: DateTime<Utc>,
    /// Why assignment failed or the worker went stale.
    pub note: Option<String>,
}

impl WorkerRecord {
    fn new(id: NodeId) -> Self {
        let now = Utc::now();
        Self {
            id,
            role: None,
            state: WorkerState::Unassigned,
            discovered_at: now,
            last_contact: now,
            note: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == WorkerState::Ready
    }
}

/// Registry of discovered workers, in discovery order.
///
/// Owned by one coordinator; never shared between sessions.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    records: Vec<WorkerRecord>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovery reply. Returns true if the id was new.
    pub fn upsert_discovered(&mut self, id: NodeId) -> bool {
        if let Some(record) = self.get_mut(id) {
            record.last_contact = Utc::now();
            return false;
        }
        self.records.push(WorkerRecord::new(id));
        true
    }

    pub fn get(&self, id: NodeId) -> Option<&WorkerRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut WorkerRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    fn require_mut(&mut self, id: NodeId) -> Result<&mut WorkerRecord, RegistryError> {
        self.get_mut(id).ok_or(RegistryError::UnknownWorker { id })
    }

    fn transition(
        record: &mut WorkerRecord,
        target: WorkerState,
        note: Option<String>,
    ) -> Result<(), RegistryError> {
        if !record.state.can_transition_to(target) {
            return Err(RegistryError::InvalidTransition {
                id: record.id,
                from: record.state.to_string(),
                target: target.to_string(),
            });
        }
        record.state = target;
        record.note = note;
        Ok(())
    }

    /// `Unassigned → AssignPending`, binding the role.
    pub fn begin_assignment(&mut self, id: NodeId, role: Role) -> Result<(), RegistryError> {
        let record = self.require_mut(id)?;
        if let Some(current) = record.role
            && current != role
        {
            return Err(RegistryError::RoleLocked {
                id,
                current,
                requested: role,
            });
        }
        Self::transition(record, WorkerState::AssignPending, None)?;
        record.role = Some(role);
        Ok(())
    }

    /// `AssignPending → Ready`.
    pub fn mark_ready(&mut self, id: NodeId) -> Result<(), RegistryError> {
        let record = self.require_mut(id)?;
        Self::transition(record, WorkerState::Ready, None)?;
        record.last_contact = Utc::now();
        Ok(())
    }

    /// `AssignPending → Failed`.
    pub fn mark_failed(&mut self, id: NodeId, reason: impl Into<String>) -> Result<(), RegistryError> {
        let record = self.require_mut(id)?;
        Self::transition(record, WorkerState::Failed, Some(reason.into()))
    }

    /// `Ready → Stale`.
    pub fn mark_stale(&mut self, id: NodeId, reason: impl Into<String>) -> Result<(), RegistryError> {
        let record = self.require_mut(id)?;
        Self::transition(record, WorkerState::Stale, Some(reason.into()))
    }

    /// `Stale → Ready`. The role is unchanged.
    pub fn revive(&mut self, id: NodeId) -> Result<(), RegistryError> {
        let record = self.require_mut(id)?;
        Self::transition(record, WorkerState::Ready, None)?;
        record.last_contact = Utc::now();
        Ok(())
    }

    /// Note that a worker was heard from.
    pub fn touch(&mut self, id: NodeId) {
        if let Some(record) = self.get_mut(id) {
            record.last_contact = Utc::now();
        }
    }

    /// The ready worker serving `role`, if any.
    pub fn ready_worker(&self, role: Role) -> Option<NodeId> {
        self.records
            .iter()
            .find(|r| r.role == Some(role) && r.is_ready())
            .map(|r| r.id)
    }

    /// The worker holding `role` in any state.
    pub fn holder_of(&self, role: Role) -> Option<&WorkerRecord> {
        self.records.iter().find(|r| r.role == Some(role))
    }

    /// Workers still without a role, in discovery order.
    pub fn unassigned(&self) -> Vec<NodeId> {
        self.records
            .iter()
            .filter(|r| r.state == WorkerState::Unassigned)
            .map(|r| r.id)
            .collect()
    }

    /// Workers that hold a role and have not failed.
    pub fn assigned(&self) -> Vec<(NodeId, Role, WorkerState)> {
        self.records
            .iter()
            .filter_map(|r| r.role.map(|role| (r.id, role, r.state)))
            .filter(|(_, _, state)| matches!(state, WorkerState::Ready | WorkerState::Stale))
            .collect()
    }

    pub fn records(&self) -> &[WorkerRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Availability of each role in `roles`. Pure read.
    pub fn status(&self, roles: &[Role]) -> StatusReport {
        let roles = roles
            .iter()
            .map(|&role| {
                let (worker, availability) = match self.holder_of(role) {
                    None => (None, Availability::NoWorker),
                    Some(record) => (
                        Some(record.id),
                        match record.state {
                            WorkerState::Ready => Availability::Ready,
                            WorkerState::Stale => Availability::Stale,
                            WorkerState::Failed => Availability::Failed,
                            WorkerState::AssignPending | WorkerState::Unassigned => {
                                Availability::Pending
                            }
                        },
                    ),
                };
                RoleStatus {
                    role,
                    worker,
                    availability,
                    note: self.holder_of(role).and_then(|r| r.note.clone()),
                }
            })
            .collect();
        StatusReport {
            roles,
            idle_workers: self.unassigned(),
        }
    }
}

/// Whether a role can be served right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Ready,
    Stale,
    Failed,
    Pending,
    NoWorker,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Stale => "stale",
            Self::Failed => "failed",
            Self::Pending => "pending",
            Self::NoWorker => "no worker",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleStatus {
    pub role: Role,
    pub worker: Option<NodeId>,
    pub availability: Availability,
    pub note: Option<String>,
}

/// Snapshot of role availability for the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub roles: Vec<RoleStatus>,
    pub idle_workers: Vec<NodeId>,
}

impl StatusReport {
    pub fn ready_count(&self) -> usize {
        self.roles
            .iter()
            .filter(|r| r.availability == Availability::Ready)
            .count()
    }

    pub fn availability(&self, role: Role) -> Option<Availability> {
        self.roles
            .iter()
            .find(|r| r.role == role)
            .map(|r| r.availability)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<12} {:<8} status", "role", "worker")?;
        for status in &self.roles {
            let worker = status
                .worker
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            write!(f, "{:<12} {:<8} {}", status.role, worker, status.availability)?;
            if let Some(note) = &status.note {
                write!(f, " ({note})")?;
            }
            writeln!(f)?;
        }
        write!(f, "{}/{} roles ready", self.ready_count(), self.roles.len())?;
        if !self.idle_workers.is_empty() {
            let idle: Vec<String> = self.idle_workers.iter().map(|id| id.to_string()).collect();
            write!(f, ", idle workers: {}", idle.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_registry() -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        registry.upsert_discovered(NodeId(1));
        registry.begin_assignment(NodeId(1), Role::Language).unwrap();
        registry.mark_ready(NodeId(1)).unwrap();
        registry
    }

    #[test]
    fn state_transitions_valid() {
        assert!(WorkerState::Unassigned.can_transition_to(WorkerState::AssignPending));
        assert!(WorkerState::AssignPending.can_transition_to(WorkerState::Ready));
        assert!(WorkerState::AssignPending.can_transition_to(WorkerState::Failed));
        assert!(WorkerState::Ready.can_transition_to(WorkerState::Stale));
        assert!(WorkerState::Stale.can_transition_to(WorkerState::Ready));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!WorkerState::Failed.can_transition_to(WorkerState::AssignPending));
        assert!(!WorkerState::Failed.can_transition_to(WorkerState::Ready));
        assert!(!WorkerState::Ready.can_transition_to(WorkerState::AssignPending));
        assert!(!WorkerState::Unassigned.can_transition_to(WorkerState::Ready));
        assert!(WorkerState::Failed.is_terminal());
    }

    #[test]
    fn discovery_upsert_is_idempotent() {
        let mut registry = WorkerRegistry::new();
        assert!(registry.upsert_discovered(NodeId(3)));
        for _ in 0..10 {
            assert!(!registry.upsert_discovered(NodeId(3)));
        }
        assert!(registry.upsert_discovered(NodeId(4)));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.records()[0].id, NodeId(3));
    }

    #[test]
    fn role_is_locked_after_assignment() {
        let mut registry = ready_registry();
        let err = registry
            .begin_assignment(NodeId(1), Role::Memory)
            .unwrap_err();
        assert!(matches!(err, RegistryError::RoleLocked { .. }));
        assert_eq!(registry.ready_worker(Role::Language), Some(NodeId(1)));
    }

    #[test]
    fn failed_is_terminal() {
        let mut registry = WorkerRegistry::new();
        registry.upsert_discovered(NodeId(2));
        registry.begin_assignment(NodeId(2), Role::Memory).unwrap();
        registry.mark_failed(NodeId(2), "nack").unwrap();
        assert!(registry.mark_ready(NodeId(2)).is_err());
        assert!(registry.revive(NodeId(2)).is_err());
        assert_eq!(registry.ready_worker(Role::Memory), None);
    }

    #[test]
    fn stale_workers_are_not_dispatchable_until_revived() {
        let mut registry = ready_registry();
        registry.mark_stale(NodeId(1), "missed ping").unwrap();
        assert_eq!(registry.ready_worker(Role::Language), None);
        registry.revive(NodeId(1)).unwrap();
        assert_eq!(registry.ready_worker(Role::Language), Some(NodeId(1)));
        assert_eq!(registry.get(NodeId(1)).unwrap().role, Some(Role::Language));
    }

    #[test]
    fn unknown_worker_is_an_error() {
        let mut registry = WorkerRegistry::new();
        assert!(matches!(
            registry.mark_ready(NodeId(9)),
            Err(RegistryError::UnknownWorker { .. })
        ));
    }

    #[test]
    fn status_reports_every_role() {
        let mut registry = ready_registry();
        registry.upsert_discovered(NodeId(2));
        registry.begin_assignment(NodeId(2), Role::Knowledge).unwrap();
        registry.mark_failed(NodeId(2), "no handler set").unwrap();
        registry.upsert_discovered(NodeId(3));

        let report = registry.status(&Role::CORE);
        assert_eq!(report.availability(Role::Language), Some(Availability::Ready));
        assert_eq!(report.availability(Role::Knowledge), Some(Availability::Failed));
        assert_eq!(report.availability(Role::Memory), Some(Availability::NoWorker));
        assert_eq!(report.ready_count(), 1);
        assert_eq!(report.idle_workers, vec![NodeId(3)]);

        let rendered = report.to_string();
        assert!(rendered.contains("no handler set"));
        assert!(rendered.contains("1/4 roles ready"));
    }
}
