//! Liveness checks: ping assigned workers, demote the silent ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::coordinator::registry::{WorkerRegistry, WorkerState};
use crate::error::Error;
use crate::protocol::{Destination, Message, NodeId, SessionId, Tag};
use crate::transport::Transport;

/// What one liveness round changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessReport {
    /// Workers that answered.
    pub alive: Vec<NodeId>,
    /// Ready workers that stayed silent and are now stale.
    pub lapsed: Vec<NodeId>,
    /// Stale workers that answered and are ready again.
    pub revived: Vec<NodeId>,
}

/// Ping every ready or stale worker and collect pongs until `timeout`.
pub async fn check<T: Transport + ?Sized>(
    transport: &T,
    session: SessionId,
    registry: &RwLock<WorkerRegistry>,
    nonces: &AtomicU64,
    timeout: Duration,
) -> Result<LivenessReport, Error> {
    let targets = registry.read().await.assigned();
    let mut outstanding: HashMap<u64, (NodeId, WorkerState)> = HashMap::new();

    for (worker, _role, state) in targets {
        let nonce = nonces.fetch_add(1, Ordering::Relaxed);
        transport
            .send(Destination::Node(worker), Some(session), Message::Ping { nonce })
            .await?;
        outstanding.insert(nonce, (worker, state));
    }

    let mut report = LivenessReport::default();
    let deadline = Instant::now() + timeout;
    while !outstanding.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Some(envelope) = transport
            .receive_in(session, Tag::Control.into(), remaining)
            .await else {
            break;
        };
        let Message::Pong { nonce } = envelope.message else {
            continue;
        };
        if envelope.session != Some(session) {
            continue;
        }
        match outstanding.get(&nonce) {
            Some(&(worker, state)) if worker == envelope.from => {
                outstanding.remove(&nonce);
                let mut registry = registry.write().await;
                registry.touch(worker);
                if state == WorkerState::Stale {
                    match registry.revive(worker) {
                        Ok(()) => {
                            tracing::info!(worker = %worker, "Stale worker answered; ready again");
                            report.revived.push(worker);
                        }
                        Err(e) => {
                            tracing::warn!(worker = %worker, error = %e, "Could not revive worker");
                        }
                    }
                }
                report.alive.push(worker);
            }
            _ => tracing::debug!(from = %envelope.from, nonce, "Discarding unexpected pong"),
        }
    }

    let mut registry = registry.write().await;
    for (worker, state) in outstanding.into_values() {
        if state != WorkerState::Ready {
            continue;
        }
        // The record may have moved on since the snapshot (e.g. demoted).
        match registry.mark_stale(worker, "no reply to liveness ping") {
            Ok(()) => {
                tracing::warn!(worker = %worker, "Worker missed liveness ping; marked stale");
                report.lapsed.push(worker);
            }
            Err(e) => {
                tracing::debug!(worker = %worker, error = %e, "Skipping lapsed worker");
            }
        }
    }
    report.lapsed.sort();
    Ok(report)
}
