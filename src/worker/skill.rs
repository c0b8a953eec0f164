//! The skill abstraction: one named function a worker can run.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SkillError;
use crate::protocol::{NodeId, Payload, Role, TaskId};

/// Where a skill invocation runs.
#[derive(Debug, Clone, Copy)]
pub struct SkillContext {
    pub node_id: NodeId,
    pub role: Role,
    pub task_id: TaskId,
}

/// A named function in a role's skill set.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Function name used in `Task` frames.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Per-skill execution bound. `None` uses the worker default.
    fn execution_timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, payload: Payload, ctx: &SkillContext) -> Result<Payload, SkillError>;
}

/// Fetch a required string field.
pub fn require_str<'a>(payload: &'a Payload, function: &str, key: &str) -> Result<&'a str, SkillError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SkillError::invalid(function, format!("missing string field '{key}'")))
}

/// Fetch an optional string field, rejecting other types.
pub fn optional_str<'a>(
    payload: &'a Payload,
    function: &str,
    key: &str,
) -> Result<Option<&'a str>, SkillError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(SkillError::invalid(function, format!("field '{key}' must be a string"))),
    }
}

/// Build a payload from `json!` object literals.
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}
