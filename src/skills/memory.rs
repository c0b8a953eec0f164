//! Memory role: recent exchanges and key/value notes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::error::SkillError;
use crate::protocol::{Payload, Role};
use crate::skills::{keywords, tokenize};
use crate::worker::skill::{Skill, SkillContext, optional_str, payload, require_str};
use crate::worker::SkillSet;

/// Oldest exchanges are evicted past this many.
pub const MAX_EXCHANGES: usize = 200;
/// Least recently written notes are evicted past this many.
pub const MAX_NOTES: usize = 200;

const DEFAULT_RECALL_LIMIT: usize = 3;
const MAX_RECALL_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub input: String,
    pub response: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    exchanges: VecDeque<Exchange>,
    notes: HashMap<String, String>,
    /// Note keys in write order, oldest first.
    note_order: VecDeque<String>,
}

impl MemoryStore {
    pub fn record(&mut self, input: String, response: Option<String>) -> usize {
        if self.exchanges.len() == MAX_EXCHANGES {
            self.exchanges.pop_front();
        }
        self.exchanges.push_back(Exchange {
            input,
            response,
            at: Utc::now(),
        });
        self.exchanges.len()
    }

    pub fn remember(&mut self, key: String, value: String) {
        self.note_order.retain(|k| *k != key);
        if self.note_order.len() >= MAX_NOTES {
            if let Some(oldest) = self.note_order.pop_front() {
                self.notes.remove(&oldest);
            }
        }
        self.note_order.push_back(key.clone());
        self.notes.insert(key, value);
    }

    pub fn note(&self, key: &str) -> Option<&String> {
        self.notes.get(key)
    }

    /// Most recent exchanges sharing a keyword with `query` (any, if `None`).
    pub fn recall(&self, query: Option<&str>, limit: usize) -> Vec<&Exchange> {
        let wanted = query.map(|q| keywords(&tokenize(q))).unwrap_or_default();
        self.exchanges
            .iter()
            .rev()
            .filter(|ex| {
                wanted.is_empty() || {
                    let seen = tokenize(&ex.input);
                    wanted.iter().any(|w| seen.contains(w))
                }
            })
            .take(limit)
            .collect()
    }
}

type SharedStore = Arc<RwLock<MemoryStore>>;

pub fn skill_set() -> SkillSet {
    let store: SharedStore = Arc::default();
    SkillSet::new(Role::Memory)
        .with(RecordSkill(Arc::clone(&store)))
        .with(RecallSkill(Arc::clone(&store)))
        .with(RememberSkill(Arc::clone(&store)))
        .with(RetrieveSkill(store))
}

/// `record`: append one exchange.
pub struct RecordSkill(SharedStore);

#[async_trait]
impl Skill for RecordSkill {
    fn name(&self) -> &str {
        "record"
    }

    fn description(&self) -> &str {
        "Record an input/response exchange"
    }

    async fn execute(&self, input: Payload, _ctx: &SkillContext) -> Result<Payload, SkillError> {
        let text = require_str(&input, self.name(), "input")?.to_string();
        let response = optional_str(&input, self.name(), "response")?.map(str::to_string);
        let total = self.0.write().await.record(text, response);
        Ok(payload(json!({ "recorded": true, "total": total })))
    }
}

/// `recall`: recent exchanges related to `query`.
pub struct RecallSkill(SharedStore);

#[async_trait]
impl Skill for RecallSkill {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Find recent exchanges sharing keywords with a query"
    }

    async fn execute(&self, input: Payload, _ctx: &SkillContext) -> Result<Payload, SkillError> {
        let query = optional_str(&input, self.name(), "query")?;
        let limit = input
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| (l as usize).min(MAX_RECALL_LIMIT))
            .unwrap_or(DEFAULT_RECALL_LIMIT);

        let store = self.0.read().await;
        let matches = store.recall(query, limit);
        Ok(payload(json!({ "count": matches.len(), "matches": matches })))
    }
}

/// `remember`: store a note under a key.
pub struct RememberSkill(SharedStore);

#[async_trait]
impl Skill for RememberSkill {
    fn name(&self) -> &str {
        "remember"
    }

    fn description(&self) -> &str {
        "Store a value under a key"
    }

    async fn execute(&self, input: Payload, _ctx: &SkillContext) -> Result<Payload, SkillError> {
        let key = require_str(&input, self.name(), "key")?.trim().to_lowercase();
        let value = require_str(&input, self.name(), "value")?.to_string();
        if key.is_empty() {
            return Err(SkillError::invalid(self.name(), "key must not be empty"));
        }
        self.0.write().await.remember(key.clone(), value);
        Ok(payload(json!({ "stored": key })))
    }
}

/// `retrieve`: read a note back.
pub struct RetrieveSkill(SharedStore);

#[async_trait]
impl Skill for RetrieveSkill {
    fn name(&self) -> &str {
        "retrieve"
    }

    fn description(&self) -> &str {
        "Read the value stored under a key"
    }

    async fn execute(&self, input: Payload, _ctx: &SkillContext) -> Result<Payload, SkillError> {
        let key = require_str(&input, self.name(), "key")?.trim().to_lowercase();
        let store = self.0.read().await;
        Ok(match store.note(&key) {
            Some(value) => payload(json!({ "found": true, "key": key, "value": value })),
            None => payload(json!({ "found": false, "key": key })),
        })
    }
}
