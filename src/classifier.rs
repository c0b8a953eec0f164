//! Input classification and local reply composition.
//!
//! The session loop asks an [`InputClassifier`] which roles an input
//! concerns and what to send them, and falls back to a
//! [`ResponseComposer`] when the response role cannot compose the reply.

use serde_json::json;

use crate::protocol::{Payload, Role};
use crate::skills::knowledge::{parse_statement, question_subject};
use crate::skills::response::compose_reply;
use crate::worker::skill::payload;

/// One task the session should dispatch for an input.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPlan {
    pub role: Role,
    pub function: String,
    pub payload: Payload,
}

impl TaskPlan {
    pub fn new(role: Role, function: &str, payload: Payload) -> Self {
        Self {
            role,
            function: function.to_string(),
            payload,
        }
    }
}

/// Decides which roles an input concerns.
pub trait InputClassifier: Send + Sync {
    /// Analysis tasks for `input`, at most one per role.
    fn classify(&self, input: &str) -> Vec<TaskPlan>;
}

/// Builds reply text when the response role is unavailable.
pub trait ResponseComposer: Send + Sync {
    /// `results` maps role names to result payloads; absent roles were
    /// unavailable.
    fn compose(&self, input: &str, user: Option<&str>, results: &Payload) -> String;
}

const MEMORY_CUES: &[&str] = &[
    "remember",
    "recall",
    "earlier",
    "before",
    "last time",
    "did i",
    "again",
];

/// Keyword rules over the core roles.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl InputClassifier for KeywordClassifier {
    fn classify(&self, input: &str) -> Vec<TaskPlan> {
        let text = input.trim();
        let mut plans = vec![TaskPlan::new(
            Role::Language,
            "analyze",
            payload(json!({ "text": text })),
        )];

        if question_subject(text).is_some() {
            plans.push(TaskPlan::new(
                Role::Knowledge,
                "lookup",
                payload(json!({ "question": text })),
            ));
        } else if parse_statement(text).is_some() {
            plans.push(TaskPlan::new(
                Role::Knowledge,
                "learn",
                payload(json!({ "text": text })),
            ));
        }

        let lower = text.to_lowercase();
        if MEMORY_CUES.iter().any(|cue| lower.contains(cue)) {
            plans.push(TaskPlan::new(
                Role::Memory,
                "recall",
                payload(json!({ "query": text })),
            ));
        }
        plans
    }
}

/// Template replies built locally from whatever results arrived.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateComposer;

impl ResponseComposer for TemplateComposer {
    fn compose(&self, input: &str, user: Option<&str>, results: &Payload) -> String {
        compose_reply(input, user, results)
    }
}
