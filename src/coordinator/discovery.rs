//! Discovery: one probe broadcast, then listen for a fixed window.

use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::coordinator::registry::WorkerRegistry;
use crate::error::TransportError;
use crate::protocol::{Destination, Message, NodeId, SessionId, Tag};
use crate::transport::Transport;

/// What one discovery round found.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    /// Ids seen for the first time, in reply order.
    pub discovered: Vec<NodeId>,
    /// Availability frames received, duplicates included.
    pub replies: usize,
    /// Registry size after the round.
    pub total: usize,
}

/// Broadcast `Discover` and upsert every worker that answers within `window`.
///
/// Zero replies is a valid outcome, not an error.
pub async fn discover<T: Transport + ?Sized>(
    transport: &T,
    session: SessionId,
    registry: &RwLock<WorkerRegistry>,
    window: Duration,
) -> Result<DiscoveryReport, TransportError> {
    transport
        .send(Destination::Broadcast, Some(session), Message::Discover)
        .await?;

    let deadline = Instant::now() + window;
    let mut report = DiscoveryReport::default();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Some(envelope) = transport
            .receive_in(session, Tag::Probe.into(), remaining)
            .await else {
            break;
        };
        if !envelope.in_session(session) {
            continue;
        }
        match envelope.message {
            Message::WorkerAvailable { id } => {
                report.replies += 1;
                if registry.write().await.upsert_discovered(id) {
                    tracing::info!(session = %session, worker = %id, "Discovered worker");
                    report.discovered.push(id);
                }
            }
            other => {
                tracing::debug!(from = %envelope.from, kind = other.kind(), "Ignoring probe frame");
            }
        }
    }

    report.total = registry.read().await.len();
    if report.total == 0 {
        tracing::warn!(session = %session, "Discovery found no workers; running degraded");
    } else {
        tracing::info!(
            session = %session,
            new = report.discovered.len(),
            total = report.total,
            "Discovery finished"
        );
    }
    Ok(report)
}
