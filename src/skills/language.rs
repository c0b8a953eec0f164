//! Language role: tokenization and shallow analysis.

use async_trait::async_trait;
use serde_json::json;

use crate::error::SkillError;
use crate::protocol::{Payload, Role};
use crate::skills::{keywords, tokenize};
use crate::worker::skill::{Skill, SkillContext, payload, require_str};
use crate::worker::SkillSet;

const GREETINGS: &[&str] = &["hello", "hi", "hey", "greetings", "howdy", "morning"];
const FAREWELLS: &[&str] = &["bye", "goodbye", "farewell", "later", "goodnight"];
const QUESTION_WORDS: &[&str] = &[
    "what", "who", "where", "when", "why", "how", "which", "is", "are", "can", "do", "does", "did",
];
const COMMAND_WORDS: &[&str] = &["tell", "show", "remember", "explain", "list", "give", "find"];

const POSITIVE: &[&str] = &[
    "good", "great", "happy", "love", "like", "nice", "awesome", "excellent", "thanks", "glad",
    "wonderful", "fun",
];
const NEGATIVE: &[&str] = &[
    "bad", "sad", "hate", "angry", "terrible", "awful", "upset", "annoyed", "tired", "sorry",
    "worried", "wrong",
];

pub fn skill_set() -> SkillSet {
    SkillSet::new(Role::Language)
        .with(AnalyzeSkill)
        .with(TokenizeSkill)
}

/// Coarse intent of an utterance.
pub fn intent(text: &str, tokens: &[String]) -> &'static str {
    let first = tokens.first().map(String::as_str).unwrap_or_default();
    if GREETINGS.contains(&first) {
        "greeting"
    } else if FAREWELLS.contains(&first) {
        "farewell"
    } else if text.trim_end().ends_with('?') || QUESTION_WORDS.contains(&first) {
        "question"
    } else if COMMAND_WORDS.contains(&first) {
        "command"
    } else {
        "statement"
    }
}

/// Word-list sentiment: positive hits minus negative hits.
pub fn sentiment(tokens: &[String]) -> (i64, &'static str) {
    let score = tokens.iter().fold(0i64, |acc, t| {
        if POSITIVE.contains(&t.as_str()) {
            acc + 1
        } else if NEGATIVE.contains(&t.as_str()) {
            acc - 1
        } else {
            acc
        }
    });
    let label = match score {
        s if s > 0 => "positive",
        s if s < 0 => "negative",
        _ => "neutral",
    };
    (score, label)
}

/// `analyze`: tokens, intent, sentiment and keywords of `text`.
pub struct AnalyzeSkill;

#[async_trait]
impl Skill for AnalyzeSkill {
    fn name(&self) -> &str {
        "analyze"
    }

    fn description(&self) -> &str {
        "Tokenize text and report intent, sentiment and keywords"
    }

    async fn execute(&self, input: Payload, _ctx: &SkillContext) -> Result<Payload, SkillError> {
        let text = require_str(&input, self.name(), "text")?;
        let tokens = tokenize(text);
        let (score, label) = sentiment(&tokens);

        Ok(payload(json!({
            "intent": intent(text, &tokens),
            "sentiment": label,
            "sentiment_score": score,
            "keywords": keywords(&tokens),
            "word_count": tokens.len(),
            "tokens": tokens,
        })))
    }
}

/// `tokenize`: lowercased word tokens of `text`.
pub struct TokenizeSkill;

#[async_trait]
impl Skill for TokenizeSkill {
    fn name(&self) -> &str {
        "tokenize"
    }

    fn description(&self) -> &str {
        "Split text into lowercase word tokens"
    }

    async fn execute(&self, input: Payload, _ctx: &SkillContext) -> Result<Payload, SkillError> {
        let text = require_str(&input, self.name(), "text")?;
        let tokens = tokenize(text);
        Ok(payload(json!({ "count": tokens.len(), "tokens": tokens })))
    }
}
