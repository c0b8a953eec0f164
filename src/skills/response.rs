//! Response role: turn per-role results into one reply.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::SkillError;
use crate::protocol::{Payload, Role};
use crate::worker::skill::{Skill, SkillContext, optional_str, payload, require_str};
use crate::worker::SkillSet;

/// Said when nothing more specific applies.
pub const NEUTRAL_REPLY: &str = "I hear you.";

pub fn skill_set() -> SkillSet {
    SkillSet::new(Role::Response).with(ComposeSkill)
}

/// Build reply text from `results`, a map of role name → result payload.
///
/// Roles missing from `results` were unavailable; their part of the reply
/// is replaced by a neutral sentence or left out.
pub fn compose_reply(input: &str, user: Option<&str>, results: &Payload) -> String {
    let language = results.get(Role::Language.as_str());
    let knowledge = results.get(Role::Knowledge.as_str());
    let memory = results.get(Role::Memory.as_str());

    let intent = field(language, "intent").unwrap_or("statement");
    let sentiment = field(language, "sentiment").unwrap_or("neutral");
    let addressed = |base: &str| match user {
        Some(name) => format!("{base}, {name}!"),
        None => format!("{base}!"),
    };

    let mut parts: Vec<String> = Vec::new();
    match intent {
        "greeting" => parts.push(addressed("Hello")),
        "farewell" => parts.push(addressed("Goodbye")),
        _ => {}
    }

    match knowledge {
        Some(k) if k.get("learned") == Some(&Value::Bool(true)) => {
            if let (Some(subject), Some(fact)) = (field(knowledge, "subject"), field(knowledge, "fact")) {
                parts.push(format!("Got it: {subject} is {fact}."));
            }
        }
        Some(k) if k.get("found") == Some(&Value::Bool(true)) => {
            if let (Some(subject), Some(fact)) = (field(knowledge, "subject"), field(knowledge, "fact")) {
                parts.push(format!("{} is {fact}.", capitalize(subject)));
            }
        }
        Some(_) if intent == "question" => parts.push("I don't know that yet.".to_string()),
        None if intent == "question" && looks_factual(input) => {
            parts.push("I can't look that up right now.".to_string())
        }
        _ => {}
    }

    if let Some(earlier) = memory
        .and_then(|m| m.get("matches"))
        .and_then(Value::as_array)
        .and_then(|m| m.first())
        .and_then(|ex| ex.get("input"))
        .and_then(Value::as_str)
        .filter(|earlier| earlier.trim() != input.trim())
    {
        parts.push(format!("Earlier you said: \"{earlier}\"."));
    }

    match sentiment {
        "positive" => parts.push("Glad to hear it.".to_string()),
        "negative" => parts.push("Sorry to hear that.".to_string()),
        _ => {}
    }

    if parts.is_empty() {
        NEUTRAL_REPLY.to_string()
    } else {
        parts.join(" ")
    }
}

fn field<'a>(result: Option<&'a Value>, key: &str) -> Option<&'a str> {
    result?.get(key)?.as_str()
}

fn looks_factual(input: &str) -> bool {
    let lower = input.trim().to_lowercase();
    lower.starts_with("what") || lower.starts_with("who")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `compose`: the final reply for one input.
pub struct ComposeSkill;

#[async_trait]
impl Skill for ComposeSkill {
    fn name(&self) -> &str {
        "compose"
    }

    fn description(&self) -> &str {
        "Compose a reply from the input and per-role results"
    }

    async fn execute(&self, input: Payload, _ctx: &SkillContext) -> Result<Payload, SkillError> {
        let text = require_str(&input, self.name(), "input")?;
        let user = optional_str(&input, self.name(), "user")?;
        let results = match input.get("results") {
            None | Some(Value::Null) => Payload::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(SkillError::invalid(self.name(), "'results' must be an object")),
        };
        Ok(payload(json!({ "text": compose_reply(text, user, &results) })))
    }
}
