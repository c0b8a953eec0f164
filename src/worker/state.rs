//! Worker executor phases and counters.

use serde::{Deserialize, Serialize};

/// What the executor loop is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    /// Waiting for a frame.
    Idle,
    /// Running one skill invocation.
    Executing,
    /// Left the loop after `Shutdown`.
    Stopped,
}

impl WorkerPhase {
    /// Check if this phase allows moving to another phase.
    pub fn can_transition_to(&self, target: WorkerPhase) -> bool {
        use WorkerPhase::*;

        matches!(
            (self, target),
            (Idle, Executing) | (Executing, Idle) | (Idle, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Executing => "executing",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Counters a worker returns when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Skill invocations that returned a value.
    pub executed: u64,
    /// Invocations that errored, timed out or panicked, plus unknown functions.
    pub failed: u64,
    /// Tasks refused because no role was bound for their session.
    pub rejected: u64,
}

impl WorkerStats {
    pub fn total(&self) -> u64 {
        self.executed + self.failed + self.rejected
    }
}
