use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use skill_mesh::cli;
use skill_mesh::config::{CoordinatorConfig, NetworkConfig, WorkerConfig};
use skill_mesh::coordinator::Coordinator;
use skill_mesh::protocol::NodeId;
use skill_mesh::session::Session;
use skill_mesh::transport::{MemoryNetwork, Transport, UdpTransport};
use skill_mesh::worker::{SkillCatalog, WorkerNode, WorkerStats};

/// How long to wait for workers to leave their loops after `Shutdown`.
const WORKER_EXIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "skill-mesh", version)]
#[command(about = "Coordinator/worker skill mesh over a broadcast medium")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run a coordinator and N workers in one process over an in-memory network
    Demo {
        #[arg(long, default_value_t = 4)]
        workers: u64,
    },
    /// Run a coordinator over UDP and read input from stdin
    Coordinator {
        #[arg(long, env = "SKILL_MESH_NODE_ID", default_value_t = 0)]
        node_id: u64,
    },
    /// Run one worker over UDP until shut down
    Worker {
        #[arg(long, env = "SKILL_MESH_NODE_ID")]
        node_id: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing()?;

    match args.mode {
        Mode::Demo { workers } => run_demo(workers).await,
        Mode::Coordinator { node_id } => run_coordinator(NodeId(node_id)).await,
        Mode::Worker { node_id } => run_worker(NodeId(node_id)).await,
    }
}

/// Stderr logging, or a daily file under `SKILL_MESH_LOG_DIR` when set.
fn init_tracing() -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match std::env::var("SKILL_MESH_LOG_DIR") {
        Ok(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::daily(&dir, "skill-mesh.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            eprintln!("   Logs: {dir}/skill-mesh.log");
            Ok(Some(guard))
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
            Ok(None)
        }
    }
}

/// Network settings from the environment, with the node id from the CLI.
fn network_config(node_id: NodeId) -> anyhow::Result<NetworkConfig> {
    let id = node_id.to_string();
    Ok(NetworkConfig::from_lookup(|key| match key {
        "SKILL_MESH_NODE_ID" => Some(id.clone()),
        _ => std::env::var(key).ok(),
    })?)
}

async fn run_demo(workers: u64) -> anyhow::Result<()> {
    let config = CoordinatorConfig::from_env()?;
    let worker_config = WorkerConfig::from_env()?;
    let network = MemoryNetwork::new("demo");
    let catalog = SkillCatalog::builtin();

    let transport = Arc::new(network.open(NodeId(0)).await?);
    let mut handles = Vec::new();
    for id in 1..=workers {
        let endpoint = Arc::new(network.open(NodeId(id)).await?);
        let node = WorkerNode::new(endpoint, worker_config.clone(), catalog.clone());
        handles.push(tokio::spawn(node.run()));
    }

    eprintln!("🕸  skill-mesh v{} (demo)", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {workers} in-process");
    serve(config, transport).await?;

    for handle in handles {
        match tokio::time::timeout(WORKER_EXIT_GRACE, handle).await {
            Ok(Ok(stats)) => log_stats(stats),
            Ok(Err(e)) => tracing::warn!(error = %e, "Worker task failed"),
            Err(_) => tracing::warn!("Worker did not stop in time"),
        }
    }
    Ok(())
}

async fn run_coordinator(node_id: NodeId) -> anyhow::Result<()> {
    let config = CoordinatorConfig::from_env()?;
    let network = network_config(node_id)?;
    let transport =
        Arc::new(UdpTransport::bind(network.node_id, network.bind, network.peers.clone()).await?);

    eprintln!("🕸  skill-mesh v{} (coordinator)", env!("CARGO_PKG_VERSION"));
    eprintln!("   Node: {} on {}", network.node_id, transport.local_addr()?);
    eprintln!("   Peers: {}", format_peers(&network.peers));
    serve(config, transport).await
}

async fn run_worker(node_id: NodeId) -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    let network = network_config(node_id)?;
    let transport =
        Arc::new(UdpTransport::bind(network.node_id, network.bind, network.peers.clone()).await?);

    eprintln!("🕸  skill-mesh v{} (worker)", env!("CARGO_PKG_VERSION"));
    eprintln!("   Node: {} on {}", network.node_id, transport.local_addr()?);
    let stats = WorkerNode::new(transport, config, SkillCatalog::builtin())
        .run()
        .await;
    log_stats(stats);
    Ok(())
}

/// Bootstrap a coordinator and run the session loop over stdin.
async fn serve<T: Transport>(config: CoordinatorConfig, transport: Arc<T>) -> anyhow::Result<()> {
    let coordinator = Arc::new(Coordinator::new(config, transport));
    eprintln!("   Session: {}", coordinator.session());
    eprintln!("   Discovering workers...");

    let status = coordinator.bootstrap().await?;
    eprintln!("{status}");
    eprintln!("   Type a message and press Enter. 'status', 'name <x>', 'quit'.\n");

    let mut session = Session::new(coordinator);
    session.run(cli::stdin_lines(), cli::print_reply).await?;
    Ok(())
}

fn log_stats(stats: WorkerStats) {
    tracing::info!(
        executed = stats.executed,
        failed = stats.failed,
        rejected = stats.rejected,
        "Worker finished"
    );
}

fn format_peers(peers: &[SocketAddr]) -> String {
    if peers.is_empty() {
        "none (set SKILL_MESH_PEERS)".to_string()
    } else {
        peers
            .iter()
            .map(SocketAddr::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
