//! Identifiers and roles shared by every node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Arguments and results of a task. Keys are function-specific.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Stable identifier of a participant, assigned by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(NodeId)
    }
}

/// Correlation id of a task. Only the coordinator mints these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one coordinator session on a shared medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First block of the uuid is enough to tell sessions apart in logs.
        let s = self.0.to_string();
        write!(f, "{}", &s[..8])
    }
}

/// Capability tag naming one handler set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Language,
    Knowledge,
    Memory,
    Response,
    Reasoning,
    Emotion,
    Learning,
    Planning,
    Creativity,
    Perception,
}

impl Role {
    /// The four roles of the standard deployment.
    pub const CORE: [Role; 4] = [Role::Language, Role::Knowledge, Role::Memory, Role::Response];

    /// Every role, for the "all modules" deployment.
    pub const ALL: [Role; 10] = [
        Role::Language,
        Role::Knowledge,
        Role::Memory,
        Role::Response,
        Role::Reasoning,
        Role::Emotion,
        Role::Learning,
        Role::Planning,
        Role::Creativity,
        Role::Perception,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Language => "language",
            Self::Knowledge => "knowledge",
            Self::Memory => "memory",
            Self::Response => "response",
            Self::Reasoning => "reasoning",
            Self::Emotion => "emotion",
            Self::Learning => "learning",
            Self::Planning => "planning",
            Self::Creativity => "creativity",
            Self::Perception => "perception",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == lower)
            .ok_or_else(|| format!("unknown role '{}'", s.trim()))
    }
}
