//! Knowledge role: a small fact base that answers and learns.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tokio::sync::RwLock;

use crate::error::SkillError;
use crate::protocol::{Payload, Role};
use crate::worker::skill::{Skill, SkillContext, optional_str, payload};
use crate::worker::SkillSet;

static QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:what|who)\s+(?:is|are|was|were)\s+(?:an?\s+|the\s+)?(.+?)\s*[?.!]*\s*$")
        .expect("question pattern is valid")
});

static STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:an?\s+|the\s+)?([\w][\w\s'-]{0,40}?)\s+(?:is|are)\s+(.+?)\s*[.!]*\s*$")
        .expect("statement pattern is valid")
});

const SEED_FACTS: &[(&str, &str)] = &[
    ("rust", "a systems programming language focused on safety and speed"),
    ("tokio", "an asynchronous runtime for Rust"),
    ("udp", "a connectionless datagram protocol"),
    ("json", "a text format for structured data"),
];

/// Least recently learned subjects are evicted past this many.
pub const MAX_FACTS: usize = 500;

/// Subject → fact table, bounded by [`MAX_FACTS`].
#[derive(Debug, Default)]
pub struct FactTable {
    facts: BTreeMap<String, String>,
    /// Subjects in learning order, oldest first.
    order: VecDeque<String>,
}

impl FactTable {
    pub fn seeded() -> Self {
        let mut table = Self::default();
        for (subject, fact) in SEED_FACTS {
            table.insert(subject.to_string(), fact.to_string());
        }
        table
    }

    /// Store `fact`, returning the fact it replaced.
    pub fn insert(&mut self, subject: String, fact: String) -> Option<String> {
        self.order.retain(|s| *s != subject);
        if self.order.len() >= MAX_FACTS {
            if let Some(oldest) = self.order.pop_front() {
                self.facts.remove(&oldest);
            }
        }
        self.order.push_back(subject.clone());
        self.facts.insert(subject, fact)
    }

    pub fn get(&self, subject: &str) -> Option<&String> {
        self.facts.get(subject)
    }

    pub fn subjects(&self) -> impl Iterator<Item = &String> {
        self.facts.keys()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// Fact table shared by one activation's skills.
pub type FactBase = Arc<RwLock<FactTable>>;

pub fn skill_set() -> SkillSet {
    let facts: FactBase = Arc::new(RwLock::new(FactTable::seeded()));
    SkillSet::new(Role::Knowledge)
        .with(LookupSkill::new(Arc::clone(&facts)))
        .with(LearnSkill::new(Arc::clone(&facts)))
        .with(FactsSkill::new(facts))
}

/// Subject of a "what is X" question, normalized.
pub fn question_subject(text: &str) -> Option<String> {
    QUESTION
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| normalize(m.as_str()))
}

/// `(subject, fact)` of an "X is Y" statement. Questions never match.
pub fn parse_statement(text: &str) -> Option<(String, String)> {
    if text.trim_end().ends_with('?') || QUESTION.is_match(text) {
        return None;
    }
    let caps = STATEMENT.captures(text)?;
    let subject = normalize(caps.get(1)?.as_str());
    let fact = caps.get(2)?.as_str().trim().to_string();
    (!subject.is_empty() && !fact.is_empty()).then_some((subject, fact))
}

fn normalize(subject: &str) -> String {
    subject.trim().to_lowercase()
}

/// `lookup`: answer a question from the fact base.
pub struct LookupSkill {
    facts: FactBase,
}

impl LookupSkill {
    pub fn new(facts: FactBase) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Skill for LookupSkill {
    fn name(&self) -> &str {
        "lookup"
    }

    fn description(&self) -> &str {
        "Answer 'what is X' from known facts"
    }

    async fn execute(&self, input: Payload, _ctx: &SkillContext) -> Result<Payload, SkillError> {
        let subject = match optional_str(&input, self.name(), "subject")? {
            Some(subject) => normalize(subject),
            None => {
                let question = optional_str(&input, self.name(), "question")?
                    .ok_or_else(|| SkillError::invalid(self.name(), "expected 'question' or 'subject'"))?;
                match question_subject(question) {
                    Some(subject) => subject,
                    None => return Ok(payload(json!({ "found": false }))),
                }
            }
        };

        let facts = self.facts.read().await;
        Ok(match facts.get(&subject) {
            Some(fact) => payload(json!({ "found": true, "subject": subject, "fact": fact })),
            None => payload(json!({ "found": false, "subject": subject })),
        })
    }
}

/// `learn`: store a fact, explicitly or parsed from "X is Y".
pub struct LearnSkill {
    facts: FactBase,
}

impl LearnSkill {
    pub fn new(facts: FactBase) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Skill for LearnSkill {
    fn name(&self) -> &str {
        "learn"
    }

    fn description(&self) -> &str {
        "Remember a fact given as subject/fact or as 'X is Y' text"
    }

    async fn execute(&self, input: Payload, _ctx: &SkillContext) -> Result<Payload, SkillError> {
        let explicit = (
            optional_str(&input, self.name(), "subject")?,
            optional_str(&input, self.name(), "fact")?,
        );
        let (subject, fact) = match explicit {
            (Some(subject), Some(fact)) => (normalize(subject), fact.trim().to_string()),
            _ => {
                let text = optional_str(&input, self.name(), "text")?.ok_or_else(|| {
                    SkillError::invalid(self.name(), "expected 'subject' and 'fact', or 'text'")
                })?;
                match parse_statement(text) {
                    Some(pair) => pair,
                    None => return Ok(payload(json!({ "learned": false }))),
                }
            }
        };

        let previous = self.facts.write().await.insert(subject.clone(), fact.clone());
        tracing::debug!(subject = %subject, replaced = previous.is_some(), "Learned fact");
        Ok(payload(json!({
            "learned": true,
            "subject": subject,
            "fact": fact,
            "replaced": previous.is_some(),
        })))
    }
}

/// `facts`: how many facts are known, and about what.
pub struct FactsSkill {
    facts: FactBase,
}

impl FactsSkill {
    pub fn new(facts: FactBase) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Skill for FactsSkill {
    fn name(&self) -> &str {
        "facts"
    }

    fn description(&self) -> &str {
        "Count known facts"
    }

    async fn execute(&self, _input: Payload, _ctx: &SkillContext) -> Result<Payload, SkillError> {
        let facts = self.facts.read().await;
        let subjects: Vec<&String> = facts.subjects().collect();
        Ok(payload(json!({ "count": facts.len(), "subjects": subjects })))
    }
}
