//! The coordinator session loop.
//!
//! Each input is classified into per-role analysis tasks, dispatched
//! (concurrently by default), then composed into one reply by the
//! response role or, failing that, locally. Roles that are unavailable
//! are left out of the results and the reply degrades instead of failing.

mod command;

pub use command::Command;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::classifier::{InputClassifier, KeywordClassifier, ResponseComposer, TemplateComposer};
use crate::coordinator::{Coordinator, DispatchOutcome, StatusReport};
use crate::error::Error;
use crate::protocol::{Payload, Role, TaskReply};
use crate::transport::Transport;
use crate::worker::skill::payload;

/// Who produced the reply text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposedBy {
    Worker,
    Local,
}

/// The reply to one free-text input.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    /// Roles that returned a value.
    pub served: Vec<Role>,
    /// Roles with no ready worker or no timely answer.
    pub unavailable: Vec<Role>,
    /// Roles whose worker answered with an error.
    pub errors: Vec<(Role, String)>,
    pub composed_by: ComposedBy,
}

/// What the session produced for one input line.
#[derive(Debug, Clone)]
pub enum SessionReply {
    Response(Reply),
    Status(StatusReport),
    Renamed(String),
    Goodbye,
}

impl fmt::Display for SessionReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(reply) => write!(f, "{}", reply.text),
            Self::Status(status) => write!(f, "{status}"),
            Self::Renamed(name) => write!(f, "Nice to meet you, {name}."),
            Self::Goodbye => write!(f, "Goodbye."),
        }
    }
}

/// One interactive session over a bootstrapped coordinator.
pub struct Session<T: Transport> {
    coordinator: Arc<Coordinator<T>>,
    classifier: Box<dyn InputClassifier>,
    composer: Box<dyn ResponseComposer>,
    user: Option<String>,
    /// Consecutive dispatch timeouts per role.
    misses: HashMap<Role, u32>,
}

impl<T: Transport> Session<T> {
    pub fn new(coordinator: Arc<Coordinator<T>>) -> Self {
        Self {
            coordinator,
            classifier: Box::new(KeywordClassifier),
            composer: Box::new(TemplateComposer),
            user: None,
            misses: HashMap::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: impl InputClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_composer(mut self, composer: impl ResponseComposer + 'static) -> Self {
        self.composer = Box::new(composer);
        self
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<T>> {
        &self.coordinator
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Parse and handle one line. Blank lines produce nothing.
    pub async fn handle_line(&mut self, line: &str) -> Result<Option<SessionReply>, Error> {
        self.handle(Command::parse(line)).await
    }

    pub async fn handle(&mut self, command: Command) -> Result<Option<SessionReply>, Error> {
        Ok(match command {
            Command::Empty => None,
            Command::Status => Some(SessionReply::Status(self.coordinator.status().await)),
            Command::Name(name) => {
                tracing::info!(user = %name, "User renamed");
                self.user = Some(name.clone());
                Some(SessionReply::Renamed(name))
            }
            Command::Quit => {
                self.coordinator.shutdown_workers().await?;
                Some(SessionReply::Goodbye)
            }
            Command::Input(text) => Some(SessionReply::Response(self.respond(&text).await)),
        })
    }

    /// Run the full pipeline for one input.
    pub async fn respond(&mut self, input: &str) -> Reply {
        let configured = self.coordinator.config().roles.clone();
        let plans: Vec<_> = self
            .classifier
            .classify(input)
            .into_iter()
            .filter(|plan| configured.contains(&plan.role) && plan.role != Role::Response)
            .collect();

        let outcomes: Vec<DispatchOutcome> = if self.coordinator.config().parallel_dispatch {
            join_all(plans.iter().map(|plan| {
                self.coordinator
                    .dispatch_default(plan.role, &plan.function, plan.payload.clone())
            }))
            .await
        } else {
            let mut outcomes = Vec::with_capacity(plans.len());
            for plan in &plans {
                outcomes.push(
                    self.coordinator
                        .dispatch_default(plan.role, &plan.function, plan.payload.clone())
                        .await,
                );
            }
            outcomes
        };

        let mut results = Payload::new();
        let mut reply = Reply {
            text: String::new(),
            served: Vec::new(),
            unavailable: Vec::new(),
            errors: Vec::new(),
            composed_by: ComposedBy::Local,
        };
        for (plan, outcome) in plans.iter().zip(outcomes) {
            self.track(plan.role, &outcome).await;
            match outcome {
                DispatchOutcome::Completed {
                    reply: TaskReply::Value(value),
                    ..
                } => {
                    results.insert(plan.role.as_str().to_string(), Value::Object(value));
                    reply.served.push(plan.role);
                }
                DispatchOutcome::Completed {
                    reply: TaskReply::Error(error),
                    ..
                } => {
                    tracing::warn!(role = %plan.role, function = %plan.function, error = %error, "Skill returned an error");
                    reply.errors.push((plan.role, error));
                }
                DispatchOutcome::Unavailable(why) => {
                    tracing::debug!(role = %plan.role, "{why}");
                    reply.unavailable.push(plan.role);
                }
            }
        }

        match self.compose_remote(input, &results).await {
            Some(text) => {
                reply.text = text;
                reply.composed_by = ComposedBy::Worker;
            }
            None => {
                reply.text = self.composer.compose(input, self.user(), &results);
            }
        }

        if self.coordinator.config().record_exchanges && configured.contains(&Role::Memory) {
            let record = payload(json!({ "input": input, "response": reply.text }));
            self.coordinator.notify(Role::Memory, "record", record).await;
        }
        reply
    }

    /// Ask the response role to compose. `None` means compose locally.
    async fn compose_remote(&mut self, input: &str, results: &Payload) -> Option<String> {
        if !self.coordinator.config().roles.contains(&Role::Response) {
            return None;
        }
        let request = payload(json!({
            "input": input,
            "user": self.user,
            "results": results,
        }));
        let outcome = self
            .coordinator
            .dispatch_default(Role::Response, "compose", request)
            .await;
        self.track(Role::Response, &outcome).await;
        match outcome.value()?.get("text")?.as_str() {
            Some(text) if !text.is_empty() => Some(text.to_string()),
            _ => None,
        }
    }

    /// Count consecutive timeouts per role and demote at the limit.
    async fn track(&mut self, role: Role, outcome: &DispatchOutcome) {
        let limit = self.coordinator.config().max_consecutive_misses;
        if !outcome.is_timeout() {
            if !outcome.is_unavailable() {
                self.misses.remove(&role);
            }
            return;
        }
        let misses = self.misses.entry(role).or_default();
        *misses += 1;
        if limit == 0 || *misses < limit {
            return;
        }
        let reason = format!("{misses} consecutive timeouts");
        self.misses.remove(&role);
        if let Err(e) = self.coordinator.demote(role, &reason).await {
            tracing::warn!(role = %role, error = %e, "Failed to demote worker");
        }
    }

    /// Serve `lines` until `quit` or end of input, then shut the workers
    /// down. Liveness checks run between lines when configured.
    pub async fn run<S>(
        &mut self,
        mut lines: S,
        mut emit: impl FnMut(&SessionReply),
    ) -> Result<(), Error>
    where
        S: Stream<Item = String> + Unpin,
    {
        let mut liveness = self.coordinator.config().liveness_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let line = tokio::select! {
                line = lines.next() => line,
                _ = next_tick(&mut liveness) => {
                    match self.coordinator.check_liveness().await {
                        Ok(report) if !report.lapsed.is_empty() || !report.revived.is_empty() => {
                            tracing::info!(lapsed = ?report.lapsed, revived = ?report.revived, "Liveness changed");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "Liveness check failed"),
                    }
                    continue;
                }
            };

            let Some(line) = line else {
                tracing::info!("Input closed; ending session");
                self.coordinator.shutdown_workers().await?;
                return Ok(());
            };

            match self.handle_line(&line).await? {
                Some(reply @ SessionReply::Goodbye) => {
                    emit(&reply);
                    return Ok(());
                }
                Some(reply) => emit(&reply),
                None => {}
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
