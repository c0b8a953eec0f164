//! End-to-end scenarios: a coordinator and workers on one in-memory network.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream;
use serde_json::json;
use tokio::task::JoinHandle;

use skill_mesh::classifier::{InputClassifier, TaskPlan};
use skill_mesh::config::{CoordinatorConfig, WorkerConfig};
use skill_mesh::coordinator::{Availability, Coordinator, DispatchOutcome, Unavailable};
use skill_mesh::error::SkillError;
use skill_mesh::protocol::{
    Destination, Message, NodeId, Payload, Role, SessionId, TaskId, TaskReply,
};
use skill_mesh::session::{Command, ComposedBy, Session, SessionReply};
use skill_mesh::skills::response::NEUTRAL_REPLY;
use skill_mesh::transport::{FaultConfig, MemoryNetwork, MemoryTransport, TagFilter, Transport};
use skill_mesh::worker::skill::payload;
use skill_mesh::worker::{Skill, SkillCatalog, SkillContext, SkillSet, WorkerNode, WorkerStats};

const SCENARIO_LIMIT: Duration = Duration::from_secs(10);

async fn within(scenario: impl Future<Output = ()>) {
    tokio::time::timeout(SCENARIO_LIMIT, scenario)
        .await
        .expect("scenario hung");
}

fn fast_config(roles: &[Role]) -> CoordinatorConfig {
    CoordinatorConfig {
        roles: roles.to_vec(),
        discovery_window: Duration::from_millis(150),
        role_ack_timeout: Duration::from_millis(300),
        task_timeout: Duration::from_millis(500),
        liveness_timeout: Duration::from_millis(100),
        ..CoordinatorConfig::default()
    }
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(20),
        skill_timeout: Duration::from_secs(2),
        announce_on_start: true,
    }
}

struct Mesh {
    network: MemoryNetwork,
    coordinator: Arc<Coordinator<MemoryTransport>>,
    workers: Vec<JoinHandle<WorkerStats>>,
}

impl Mesh {
    async fn start(network: MemoryNetwork, workers: u64, config: CoordinatorConfig, catalog: SkillCatalog) -> Self {
        let transport = Arc::new(network.open(NodeId(0)).await.unwrap());
        let coordinator = Arc::new(Coordinator::new(config, transport));
        let mut handles = Vec::new();
        for id in 1..=workers {
            let endpoint = Arc::new(network.open(NodeId(id)).await.unwrap());
            let node = WorkerNode::new(endpoint, worker_config(), catalog.clone());
            handles.push(tokio::spawn(node.run()));
        }
        Self {
            network,
            coordinator,
            workers: handles,
        }
    }

    async fn builtin(workers: u64, roles: &[Role]) -> Self {
        Self::start(
            MemoryNetwork::new("scenario"),
            workers,
            fast_config(roles),
            SkillCatalog::builtin(),
        )
        .await
    }

    async fn stop(self) -> Vec<WorkerStats> {
        self.coordinator.shutdown_workers().await.unwrap();
        let mut stats = Vec::new();
        for handle in self.workers {
            stats.push(
                tokio::time::timeout(Duration::from_secs(2), handle)
                    .await
                    .expect("worker did not stop")
                    .unwrap(),
            );
        }
        stats
    }
}

/// Sleeps before answering, to play a slow worker.
struct Slow {
    name: &'static str,
    delay: Duration,
}

#[async_trait]
impl Skill for Slow {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "answers after a delay"
    }

    async fn execute(&self, input: Payload, _ctx: &SkillContext) -> Result<Payload, SkillError> {
        tokio::time::sleep(self.delay).await;
        Ok(input)
    }
}

fn slow_language(delay: Duration) -> SkillCatalog {
    SkillCatalog::builtin().with(Role::Language, move || {
        skill_mesh::skills::language::skill_set().with(Slow { name: "slow", delay })
    })
}

#[derive(Clone, Copy)]
enum Fake {
    /// Refuses every role.
    Nack,
    /// Accepts a role, never answers tasks.
    Silent,
    /// Sends a stale and a foreign-session result before the real one.
    Tricky,
}

/// A hand-rolled worker speaking the raw protocol.
fn spawn_fake(endpoint: MemoryTransport, behavior: Fake) -> JoinHandle<()> {
    tokio::spawn(async move {
        let id = endpoint.local_id();
        while let Some(env) = endpoint.receive(TagFilter::Any, Duration::from_secs(5)).await {
            let to = Destination::Node(env.from);
            let reply = |message| endpoint.send(to, env.session, message);
            match env.message {
                Message::Discover => {
                    reply(Message::WorkerAvailable { id }).await.unwrap();
                    reply(Message::WorkerAvailable { id }).await.unwrap();
                }
                Message::AssignRole { role } => {
                    let ok = !matches!(behavior, Fake::Nack);
                    let reason = (!ok).then(|| "not today".to_string());
                    reply(Message::RoleAck { role, ok, reason }).await.unwrap();
                }
                Message::Task { task_id, .. } => {
                    if let Fake::Tricky = behavior {
                        let value = |v: &str| TaskReply::Value(payload(json!({ "answer": v })));
                        reply(Message::Result {
                            task_id: TaskId(task_id.0 + 1000),
                            reply: value("stale"),
                        })
                        .await
                        .unwrap();
                        endpoint
                            .send(
                                to,
                                Some(SessionId::new()),
                                Message::Result {
                                    task_id,
                                    reply: value("foreign"),
                                },
                            )
                            .await
                            .unwrap();
                        reply(Message::Result {
                            task_id,
                            reply: value("right"),
                        })
                        .await
                        .unwrap();
                    }
                }
                Message::Shutdown => break,
                _ => {}
            }
        }
    })
}

#[tokio::test]
async fn full_readiness() {
    within(async {
        let mesh = Mesh::builtin(4, &Role::CORE).await;
        let status = mesh.coordinator.bootstrap().await.unwrap();
        assert_eq!(status.ready_count(), 4);

        let mut workers: Vec<NodeId> = status.roles.iter().filter_map(|r| r.worker).collect();
        workers.sort();
        workers.dedup();
        assert_eq!(workers.len(), 4, "each role has its own worker");

        let mut session = Session::new(Arc::clone(&mesh.coordinator));
        let reply = session.respond("What is Rust?").await;
        assert_eq!(reply.composed_by, ComposedBy::Worker);
        assert!(reply.unavailable.is_empty());
        assert!(reply.served.contains(&Role::Language));
        assert!(reply.served.contains(&Role::Knowledge));
        assert!(reply.text.starts_with("Rust is a systems programming language"));

        let stats = mesh.stop().await;
        assert!(stats.iter().map(|s| s.executed).sum::<u64>() >= 3);
    })
    .await;
}

#[tokio::test]
async fn partial_failure_leaves_one_role_unserved() {
    within(async {
        let mesh = Mesh::builtin(3, &Role::CORE).await;
        let status = mesh.coordinator.bootstrap().await.unwrap();
        assert_eq!(status.ready_count(), 3);
        assert_eq!(status.availability(Role::Response), Some(Availability::NoWorker));

        let started = Instant::now();
        let outcome = mesh
            .coordinator
            .dispatch(Role::Response, "compose", Payload::new(), Duration::from_secs(5))
            .await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Unavailable(Unavailable::NoReadyWorker { role: Role::Response })
        ));
        assert!(started.elapsed() < Duration::from_millis(100));

        let mut session = Session::new(Arc::clone(&mesh.coordinator));
        let reply = session.respond("What is Rust?").await;
        assert_eq!(reply.composed_by, ComposedBy::Local);
        assert_eq!(
            reply.text,
            "Rust is a systems programming language focused on safety and speed."
        );
        mesh.stop().await;
    })
    .await;
}

#[tokio::test]
async fn slow_worker_times_out_then_serves_follow_up() {
    within(async {
        let mesh = Mesh::start(
            MemoryNetwork::new("slow"),
            1,
            fast_config(&[Role::Language]),
            slow_language(Duration::from_millis(400)),
        )
        .await;
        mesh.coordinator.bootstrap().await.unwrap();

        let timeout = Duration::from_millis(100);
        let started = Instant::now();
        let first = mesh
            .coordinator
            .dispatch(Role::Language, "slow", payload(json!({"n": 1})), timeout)
            .await;
        let elapsed = started.elapsed();
        assert!(first.is_timeout());
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(150), "took {elapsed:?}");

        let second = mesh
            .coordinator
            .dispatch(
                Role::Language,
                "tokenize",
                payload(json!({"text": "still here"})),
                Duration::from_secs(2),
            )
            .await;
        let value = second.value().expect("follow-up completes");
        assert_eq!(value["tokens"], json!(["still", "here"]));
        assert!(second.task_id() > first.task_id());

        let status = mesh.coordinator.status().await;
        assert_eq!(status.availability(Role::Language), Some(Availability::Ready));
        mesh.stop().await;
    })
    .await;
}

#[tokio::test]
async fn silent_worker_dispatch_is_bounded() {
    within(async {
        let network = MemoryNetwork::new("silent");
        let mesh = Mesh::start(network.clone(), 0, fast_config(&[Role::Memory]), SkillCatalog::builtin()).await;
        let fake = spawn_fake(network.open(NodeId(9)).await.unwrap(), Fake::Silent);
        mesh.coordinator.bootstrap().await.unwrap();

        for timeout in [Duration::from_millis(50), Duration::from_millis(200)] {
            let started = Instant::now();
            let outcome = mesh
                .coordinator
                .dispatch(Role::Memory, "recall", Payload::new(), timeout)
                .await;
            let elapsed = started.elapsed();
            assert!(outcome.is_timeout());
            assert!(elapsed < timeout + Duration::from_millis(150), "took {elapsed:?}");
        }
        mesh.stop().await;
        fake.await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn stale_and_foreign_results_are_ignored() {
    within(async {
        let network = MemoryNetwork::new("tricky");
        let mesh = Mesh::start(network.clone(), 0, fast_config(&[Role::Knowledge]), SkillCatalog::builtin()).await;
        let fake = spawn_fake(network.open(NodeId(5)).await.unwrap(), Fake::Tricky);
        mesh.coordinator.bootstrap().await.unwrap();

        for _ in 0..3 {
            let outcome = mesh
                .coordinator
                .dispatch_default(Role::Knowledge, "lookup", Payload::new())
                .await;
            match outcome {
                DispatchOutcome::Completed { worker, reply, .. } => {
                    assert_eq!(worker, NodeId(5));
                    assert_eq!(reply.value().unwrap()["answer"], "right");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        mesh.stop().await;
        fake.await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn role_nack_marks_worker_failed() {
    within(async {
        let network = MemoryNetwork::new("nack");
        let mesh = Mesh::start(network.clone(), 0, fast_config(&[Role::Memory]), SkillCatalog::builtin()).await;
        let fake = spawn_fake(network.open(NodeId(3)).await.unwrap(), Fake::Nack);

        let status = mesh.coordinator.bootstrap().await.unwrap();
        assert_eq!(status.availability(Role::Memory), Some(Availability::Failed));
        assert_eq!(status.roles[0].note.as_deref(), Some("not today"));

        let outcome = mesh
            .coordinator
            .dispatch_default(Role::Memory, "recall", Payload::new())
            .await;
        assert!(outcome.is_unavailable() && !outcome.is_timeout());

        // Failed is terminal: a second round does not retry the worker.
        mesh.coordinator.discover().await.unwrap();
        let report = mesh.coordinator.assign_roles().await.unwrap();
        assert!(report.assigned.is_empty());
        assert_eq!(
            mesh.coordinator.status().await.availability(Role::Memory),
            Some(Availability::Failed)
        );
        mesh.stop().await;
        fake.await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn extended_role_without_skills_is_refused() {
    within(async {
        let mesh = Mesh::builtin(2, &[Role::Language, Role::Reasoning]).await;
        let status = mesh.coordinator.bootstrap().await.unwrap();
        assert_eq!(status.availability(Role::Language), Some(Availability::Ready));
        assert_eq!(status.availability(Role::Reasoning), Some(Availability::Failed));
        let note = status.roles[1].note.as_deref().unwrap();
        assert_eq!(note, "no handler set for role reasoning");
        mesh.stop().await;
    })
    .await;
}

#[tokio::test]
async fn discovery_is_idempotent() {
    within(async {
        let network = MemoryNetwork::new("idempotent");
        let mesh = Mesh::start(network.clone(), 2, fast_config(&Role::CORE), SkillCatalog::builtin()).await;
        let fake = spawn_fake(network.open(NodeId(7)).await.unwrap(), Fake::Silent);

        let first = mesh.coordinator.discover().await.unwrap();
        assert_eq!(first.total, 3);
        assert!(first.replies > 3, "duplicates were received");

        let second = mesh.coordinator.discover().await.unwrap();
        assert_eq!(second.total, 3);
        assert!(second.discovered.is_empty());
        assert_eq!(mesh.coordinator.registry_snapshot().await.len(), 3);
        mesh.stop().await;
        fake.await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn empty_registry_degrades_immediately() {
    within(async {
        let mesh = Mesh::builtin(0, &Role::CORE).await;
        let status = mesh.coordinator.bootstrap().await.unwrap();
        assert_eq!(status.ready_count(), 0);

        let mut session = Session::new(Arc::clone(&mesh.coordinator));
        let started = Instant::now();
        let reply = session.respond("hello there").await;
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(reply.text, NEUTRAL_REPLY);
        assert_eq!(reply.unavailable, vec![Role::Language]);
        assert_eq!(reply.composed_by, ComposedBy::Local);

        match session.handle(Command::Status).await.unwrap() {
            Some(SessionReply::Status(status)) => {
                assert!(status.to_string().contains("0/4 roles ready"));
            }
            other => panic!("unexpected {other:?}"),
        }
    })
    .await;
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    within(async {
        let mesh = Mesh::builtin(1, &[Role::Language]).await;
        mesh.coordinator.bootstrap().await.unwrap();
        let worker = mesh.coordinator.status().await.roles[0].worker.unwrap();

        for junk in [
            &b"not json at all"[..],
            &br#"{"from":0,"to":{"node":1},"message":{"type":"teleport"}}"#[..],
            &br#"{"from":0,"to":{"node":1},"message":{"type":"task","task_id":1,"function":""}}"#[..],
            &[0xff, 0xfe, 0x00][..],
        ] {
            mesh.network.inject_raw(worker, junk).await;
            mesh.network.inject_raw(NodeId(0), junk).await;
        }

        let outcome = mesh
            .coordinator
            .dispatch_default(Role::Language, "tokenize", payload(json!({"text": "ok"})))
            .await;
        assert_eq!(outcome.value().unwrap()["count"], 1);
        mesh.stop().await;
    })
    .await;
}

#[tokio::test]
async fn handler_errors_come_back_as_results() {
    within(async {
        let mesh = Mesh::builtin(2, &[Role::Language, Role::Knowledge]).await;
        mesh.coordinator.bootstrap().await.unwrap();

        let unknown = mesh
            .coordinator
            .dispatch_default(Role::Language, "frobnicate", Payload::new())
            .await;
        match unknown {
            DispatchOutcome::Completed { reply, .. } => {
                assert_eq!(reply, TaskReply::Error("unknown function: frobnicate".into()));
            }
            other => panic!("unexpected {other:?}"),
        }

        let invalid = mesh
            .coordinator
            .dispatch_default(Role::Knowledge, "lookup", Payload::new())
            .await;
        match invalid {
            DispatchOutcome::Completed { reply: TaskReply::Error(e), .. } => {
                assert!(e.contains("expected 'question'"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let fine = mesh
            .coordinator
            .dispatch_default(Role::Knowledge, "facts", Payload::new())
            .await;
        assert!(fine.value().is_some(), "worker survives handler errors");

        let stats = mesh.stop().await;
        assert_eq!(stats.iter().map(|s| s.failed).sum::<u64>(), 2);
    })
    .await;
}

#[tokio::test]
async fn repeated_timeouts_demote_the_worker() {
    within(async {
        let mut config = fast_config(&[Role::Language]);
        config.task_timeout = Duration::from_millis(50);
        config.max_consecutive_misses = 2;
        config.record_exchanges = false;
        let catalog = SkillCatalog::builtin().with(Role::Language, || {
            SkillSet::new(Role::Language).with(Slow {
                name: "analyze",
                delay: Duration::from_millis(300),
            })
        });
        let mesh = Mesh::start(MemoryNetwork::new("demote"), 1, config, catalog).await;
        mesh.coordinator.bootstrap().await.unwrap();

        let mut session = Session::new(Arc::clone(&mesh.coordinator));
        let first = session.respond("hello").await;
        assert_eq!(first.unavailable, vec![Role::Language]);
        assert_eq!(
            mesh.coordinator.status().await.availability(Role::Language),
            Some(Availability::Ready)
        );

        session.respond("hello again").await;
        assert_eq!(
            mesh.coordinator.status().await.availability(Role::Language),
            Some(Availability::Stale)
        );

        // Stale workers are skipped without waiting.
        let started = Instant::now();
        let third = session.respond("anyone?").await;
        assert_eq!(third.unavailable, vec![Role::Language]);
        assert!(started.elapsed() < Duration::from_millis(40));

        // Once it catches up it answers pings and comes back.
        tokio::time::sleep(Duration::from_millis(700)).await;
        let report = mesh.coordinator.check_liveness().await.unwrap();
        assert_eq!(report.revived.len(), 1);
        assert_eq!(
            mesh.coordinator.status().await.availability(Role::Language),
            Some(Availability::Ready)
        );
        mesh.stop().await;
    })
    .await;
}

#[tokio::test]
async fn duplicated_frames_do_not_break_correlation() {
    within(async {
        let network = MemoryNetwork::with_faults(
            "duplicating",
            FaultConfig {
                drop_rate: 0.0,
                duplicate_rate: 0.5,
                max_delay: Duration::from_millis(5),
            },
        );
        let mesh = Mesh::start(network, 1, fast_config(&[Role::Language]), SkillCatalog::builtin()).await;
        mesh.coordinator.bootstrap().await.unwrap();

        for word in ["alpha", "beta", "gamma", "delta", "epsilon"] {
            let outcome = mesh
                .coordinator
                .dispatch_default(Role::Language, "tokenize", payload(json!({ "text": word })))
                .await;
            assert_eq!(outcome.value().unwrap()["tokens"], json!([word]));
        }
        mesh.stop().await;
    })
    .await;
}

#[tokio::test]
async fn quit_shuts_workers_down() {
    within(async {
        let mesh = Mesh::builtin(4, &Role::CORE).await;
        mesh.coordinator.bootstrap().await.unwrap();
        let mut session = Session::new(Arc::clone(&mesh.coordinator));

        assert!(matches!(
            session.handle_line("name Ada").await.unwrap(),
            Some(SessionReply::Renamed(name)) if name == "Ada"
        ));
        match session.handle_line("hello").await.unwrap() {
            Some(SessionReply::Response(reply)) => assert_eq!(reply.text, "Hello, Ada!"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            session.handle_line("quit").await.unwrap(),
            Some(SessionReply::Goodbye)
        ));

        for handle in mesh.workers {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("worker stopped")
                .unwrap();
        }
    })
    .await;
}

fn lines(items: &[&str]) -> stream::Iter<std::vec::IntoIter<String>> {
    stream::iter(items.iter().map(|s| s.to_string()).collect::<Vec<_>>())
}

async fn join_workers(workers: Vec<JoinHandle<WorkerStats>>) {
    for handle in workers {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker stopped")
            .unwrap();
    }
}

#[tokio::test]
async fn session_run_shuts_workers_down_at_end_of_input() {
    within(async {
        let mesh = Mesh::builtin(4, &Role::CORE).await;
        mesh.coordinator.bootstrap().await.unwrap();
        let mut session = Session::new(Arc::clone(&mesh.coordinator));

        let mut seen = Vec::new();
        session
            .run(lines(&["name Ada", "", "hello", "status"]), |reply| {
                seen.push(reply.to_string())
            })
            .await
            .unwrap();

        assert_eq!(seen.len(), 3, "blank lines produce nothing: {seen:?}");
        assert_eq!(seen[0], "Nice to meet you, Ada.");
        assert_eq!(seen[1], "Hello, Ada!");
        assert!(seen[2].contains("language"));
        join_workers(mesh.workers).await;
    })
    .await;
}

#[tokio::test]
async fn session_run_stops_at_quit() {
    within(async {
        let mesh = Mesh::builtin(4, &Role::CORE).await;
        mesh.coordinator.bootstrap().await.unwrap();
        let mut session = Session::new(Arc::clone(&mesh.coordinator));

        let mut seen = Vec::new();
        session
            .run(lines(&["hello", "quit", "hello again"]), |reply| {
                seen.push(reply.clone())
            })
            .await
            .unwrap();

        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], SessionReply::Response(_)));
        assert!(matches!(seen[1], SessionReply::Goodbye));
        join_workers(mesh.workers).await;
    })
    .await;
}

#[tokio::test]
async fn session_run_checks_liveness_between_lines() {
    within(async {
        let network = MemoryNetwork::new("liveness-loop");
        let mut config = fast_config(&[Role::Memory]);
        config.liveness_interval = Some(Duration::from_millis(50));
        let mesh = Mesh::start(network.clone(), 0, config, SkillCatalog::builtin()).await;
        let fake = spawn_fake(network.open(NodeId(4)).await.unwrap(), Fake::Silent);
        let status = mesh.coordinator.bootstrap().await.unwrap();
        assert_eq!(status.availability(Role::Memory), Some(Availability::Ready));

        // Input stays quiet long enough for a check to run.
        let input = Box::pin(stream::once(async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            "status".to_string()
        }));
        let mut seen = None;
        let mut session = Session::new(Arc::clone(&mesh.coordinator));
        session
            .run(input, |reply| {
                if let SessionReply::Status(status) = reply {
                    seen = status.availability(Role::Memory);
                }
            })
            .await
            .unwrap();

        assert_eq!(seen, Some(Availability::Stale));
        fake.await.unwrap();
    })
    .await;
}

/// Sends one `slow` task to each of its roles.
struct SlowEverywhere(Vec<Role>);

impl InputClassifier for SlowEverywhere {
    fn classify(&self, input: &str) -> Vec<TaskPlan> {
        self.0
            .iter()
            .map(|&role| TaskPlan::new(role, "slow", payload(json!({ "text": input }))))
            .collect()
    }
}

/// Time one session cycle over three roles that each take `delay`.
async fn timed_cycle(parallel: bool, delay: Duration) -> Duration {
    use skill_mesh::skills::{knowledge, language, memory};

    let roles = [Role::Language, Role::Knowledge, Role::Memory];
    let mut config = fast_config(&roles);
    config.parallel_dispatch = parallel;
    config.record_exchanges = false;
    let slow = move |set: SkillSet| set.with(Slow { name: "slow", delay });
    let catalog = SkillCatalog::builtin()
        .with(Role::Language, move || slow(language::skill_set()))
        .with(Role::Knowledge, move || slow(knowledge::skill_set()))
        .with(Role::Memory, move || slow(memory::skill_set()));
    let mesh = Mesh::start(MemoryNetwork::new("cycle"), 3, config, catalog).await;
    assert_eq!(mesh.coordinator.bootstrap().await.unwrap().ready_count(), 3);

    let mut session =
        Session::new(Arc::clone(&mesh.coordinator)).with_classifier(SlowEverywhere(roles.to_vec()));
    let started = Instant::now();
    let reply = session.respond("hello").await;
    let elapsed = started.elapsed();
    assert_eq!(reply.served.len(), 3, "{reply:?}");
    mesh.stop().await;
    elapsed
}

#[tokio::test]
async fn parallel_cycle_costs_the_slowest_role() {
    within(async {
        let delay = Duration::from_millis(200);
        let parallel = timed_cycle(true, delay).await;
        assert!(parallel >= delay);
        assert!(parallel < delay * 2, "parallel cycle took {parallel:?}");

        let sequential = timed_cycle(false, delay).await;
        assert!(sequential >= delay * 3, "sequential cycle took {sequential:?}");
    })
    .await;
}

#[tokio::test]
async fn recorded_exchanges_reach_memory() {
    within(async {
        let mesh = Mesh::builtin(4, &Role::CORE).await;
        mesh.coordinator.bootstrap().await.unwrap();
        let mut session = Session::new(Arc::clone(&mesh.coordinator));

        let reply = session.respond("I like green tea").await;
        let recall = mesh
            .coordinator
            .dispatch_default(Role::Memory, "recall", payload(json!({ "query": "tea" })))
            .await;
        let value = recall.value().expect("recall completes");
        assert_eq!(value["count"], 1);
        assert_eq!(value["matches"][0]["input"], "I like green tea");
        assert_eq!(value["matches"][0]["response"], reply.text.as_str());
        mesh.stop().await;
    })
    .await;
}

#[tokio::test]
async fn exchanges_are_not_recorded_when_disabled() {
    within(async {
        let mut config = fast_config(&Role::CORE);
        config.record_exchanges = false;
        let mesh = Mesh::start(MemoryNetwork::new("no-record"), 4, config, SkillCatalog::builtin()).await;
        mesh.coordinator.bootstrap().await.unwrap();
        let mut session = Session::new(Arc::clone(&mesh.coordinator));

        session.respond("I like green tea").await;
        let recall = mesh
            .coordinator
            .dispatch_default(Role::Memory, "recall", Payload::new())
            .await;
        assert_eq!(recall.value().expect("recall completes")["count"], 0);
        mesh.stop().await;
    })
    .await;
}
