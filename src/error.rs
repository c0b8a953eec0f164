//! Error types for skill-mesh.
//!
//! Protocol outcomes (timeouts, NACKs, handler failures reported by a
//! worker) are values, not errors. The types here cover local faults:
//! bad configuration, transport setup, registry misuse, and skill
//! execution on the worker side.

use std::time::Duration;

use crate::protocol::{NodeId, Role};

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Skill error: {0}")]
    Skill(#[from] SkillError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Transport errors. Delivery failures are not errors: the medium is
/// best-effort and sends to unreachable nodes succeed silently.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Node id {node_id} is already attached to this network")]
    NodeIdInUse { node_id: NodeId },

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Registry state machine violations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Worker {id} is not in the registry")]
    UnknownWorker { id: NodeId },

    #[error("Worker {id} is {from}, cannot transition to {target}")]
    InvalidTransition {
        id: NodeId,
        from: String,
        target: String,
    },

    #[error("Worker {id} already serves {current}, cannot take {requested}")]
    RoleLocked {
        id: NodeId,
        current: Role,
        requested: Role,
    },
}

/// Skill activation and execution errors on a worker.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("unknown function: {name}")]
    UnknownFunction { name: String },

    #[error("no handler set for role {role}")]
    NoHandlerSet { role: Role },

    #[error("invalid payload for {function}: {reason}")]
    InvalidPayload { function: String, reason: String },

    #[error("{function} failed: {reason}")]
    ExecutionFailed { function: String, reason: String },

    #[error("{function} timed out after {timeout:?}")]
    Timeout { function: String, timeout: Duration },

    #[error("{function} panicked")]
    Panicked { function: String },
}

impl SkillError {
    /// Shorthand for a payload validation failure.
    pub fn invalid(function: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            function: function.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
