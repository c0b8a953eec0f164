//! The coordinator: owns the worker registry and drives the protocol.

mod assignment;
mod discovery;
mod dispatch;
mod liveness;
mod registry;

pub use assignment::{AckOutcome, AssignmentReport};
pub use discovery::DiscoveryReport;
pub use dispatch::{DispatchOutcome, Dispatcher, ResultRouter, TaskIdAllocator, Unavailable};
pub use liveness::LivenessReport;
pub use registry::{
    Availability, RoleStatus, StatusReport, WorkerRecord, WorkerRegistry, WorkerState,
};

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::config::CoordinatorConfig;
use crate::error::{Error, TransportError};
use crate::protocol::{Destination, Message, NodeId, Payload, Role, SessionId, TaskId};
use crate::transport::Transport;

/// One coordinator session over a transport.
///
/// The registry lives here and nowhere else; it is only changed by
/// discovery, assignment, liveness checks and [`Coordinator::demote`].
pub struct Coordinator<T: Transport> {
    config: CoordinatorConfig,
    session: SessionId,
    transport: Arc<T>,
    registry: RwLock<WorkerRegistry>,
    dispatcher: Dispatcher<T>,
    nonces: AtomicU64,
}

impl<T: Transport> Coordinator<T> {
    /// Start a coordinator with a fresh session id.
    pub fn new(config: CoordinatorConfig, transport: Arc<T>) -> Self {
        Self::with_session(config, transport, SessionId::new())
    }

    pub fn with_session(config: CoordinatorConfig, transport: Arc<T>, session: SessionId) -> Self {
        let dispatcher = Dispatcher::start(Arc::clone(&transport), session);
        tracing::info!(
            session = %session,
            node_id = %transport.local_id(),
            roles = config.roles.len(),
            "Coordinator started"
        );
        Self {
            config,
            session,
            transport,
            registry: RwLock::new(WorkerRegistry::new()),
            dispatcher,
            nonces: AtomicU64::new(1),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn node_id(&self) -> NodeId {
        self.transport.local_id()
    }

    /// Run one discovery round over the configured window.
    pub async fn discover(&self) -> Result<DiscoveryReport, TransportError> {
        discovery::discover(
            self.transport.as_ref(),
            self.session,
            &self.registry,
            self.config.discovery_window,
        )
        .await
    }

    /// Assign configured roles to unassigned workers.
    pub async fn assign_roles(&self) -> Result<AssignmentReport, Error> {
        assignment::assign_roles(
            self.transport.as_ref(),
            self.session,
            &self.registry,
            &self.config.roles,
            self.config.role_ack_timeout,
        )
        .await
    }

    /// Discovery followed by assignment. Returns the resulting status.
    pub async fn bootstrap(&self) -> Result<StatusReport, Error> {
        self.discover().await?;
        self.assign_roles().await?;
        let status = self.status().await;
        tracing::info!(
            session = %self.session,
            ready = status.ready_count(),
            roles = status.roles.len(),
            "Bootstrap complete"
        );
        Ok(status)
    }

    /// Run `function(payload)` on the ready worker of `role`.
    ///
    /// Without a ready worker this returns `Unavailable` at once and puts
    /// nothing on the wire.
    pub async fn dispatch(
        &self,
        role: Role,
        function: &str,
        payload: Payload,
        timeout: Duration,
    ) -> DispatchOutcome {
        let Some(worker) = self.registry.read().await.ready_worker(role) else {
            tracing::debug!(role = %role, function, "No ready worker; skipping dispatch");
            return DispatchOutcome::Unavailable(Unavailable::NoReadyWorker { role });
        };
        let outcome = self
            .dispatcher
            .send_task(role, worker, function, payload, timeout)
            .await;
        if let DispatchOutcome::Completed { worker, .. } = &outcome {
            self.registry.write().await.touch(*worker);
        }
        outcome
    }

    /// [`Coordinator::dispatch`] with the configured task timeout.
    pub async fn dispatch_default(
        &self,
        role: Role,
        function: &str,
        payload: Payload,
    ) -> DispatchOutcome {
        self.dispatch(role, function, payload, self.config.task_timeout)
            .await
    }

    /// Send a task to `role` without waiting for the result.
    pub async fn notify(&self, role: Role, function: &str, payload: Payload) -> Option<TaskId> {
        let worker = self.registry.read().await.ready_worker(role)?;
        self.dispatcher.notify(worker, function, payload).await
    }

    /// Availability of every configured role. No network traffic.
    pub async fn status(&self) -> StatusReport {
        self.registry.read().await.status(&self.config.roles)
    }

    /// Ping assigned workers; see [`LivenessReport`].
    pub async fn check_liveness(&self) -> Result<LivenessReport, Error> {
        liveness::check(
            self.transport.as_ref(),
            self.session,
            &self.registry,
            &self.nonces,
            self.config.liveness_timeout,
        )
        .await
    }

    /// Mark the ready worker of `role` stale. Returns the demoted worker.
    pub async fn demote(&self, role: Role, reason: &str) -> Result<Option<NodeId>, Error> {
        let mut registry = self.registry.write().await;
        let Some(worker) = registry.ready_worker(role) else {
            return Ok(None);
        };
        registry.mark_stale(worker, reason)?;
        tracing::warn!(role = %role, worker = %worker, reason, "Demoted worker");
        Ok(Some(worker))
    }

    /// Broadcast `Shutdown` to every worker on the medium.
    pub async fn shutdown_workers(&self) -> Result<(), TransportError> {
        tracing::info!(session = %self.session, "Shutting down workers");
        self.transport
            .send(Destination::Broadcast, Some(self.session), Message::Shutdown)
            .await
    }

    /// A copy of every worker record, in discovery order.
    pub async fn registry_snapshot(&self) -> Vec<WorkerRecord> {
        self.registry.read().await.records().to_vec()
    }
}
