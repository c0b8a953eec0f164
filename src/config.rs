//! Configuration types.
//!
//! Every struct has sensible defaults and a `from_env` constructor reading
//! `SKILL_MESH_*` variables. Durations are given in milliseconds and must
//! be positive.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::protocol::{NodeId, Role};

/// Coordinator and session-loop configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Roles to assign, in assignment order.
    pub roles: Vec<Role>,
    /// How long discovery listens for availability replies.
    pub discovery_window: Duration,
    /// How long to wait for each `RoleAck`.
    pub role_ack_timeout: Duration,
    /// Default wait for a task result.
    pub task_timeout: Duration,
    /// Run a liveness check this often (disabled when `None`).
    pub liveness_interval: Option<Duration>,
    /// How long a liveness check waits for pongs.
    pub liveness_timeout: Duration,
    /// Demote a role's worker to stale after this many consecutive
    /// dispatch timeouts (0 disables demotion).
    pub max_consecutive_misses: u32,
    /// Dispatch independent roles concurrently within one cycle.
    pub parallel_dispatch: bool,
    /// Send each exchange to the memory role after responding.
    pub record_exchanges: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            roles: Role::CORE.to_vec(),
            discovery_window: Duration::from_secs(3),
            role_ack_timeout: Duration::from_secs(2),
            task_timeout: Duration::from_secs(5),
            liveness_interval: None,
            liveness_timeout: Duration::from_secs(1),
            max_consecutive_misses: 3,
            parallel_dispatch: true,
            record_exchanges: true,
        }
    }
}

impl CoordinatorConfig {
    /// Build from `SKILL_MESH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let roles = match lookup("SKILL_MESH_ROLES") {
            Some(list) => parse_roles(&list)?,
            None => defaults.roles,
        };
        let liveness_interval = match lookup("SKILL_MESH_LIVENESS_INTERVAL_MS") {
            Some(raw) => {
                let ms: u64 = parse_value("SKILL_MESH_LIVENESS_INTERVAL_MS", &raw)?;
                (ms > 0).then(|| Duration::from_millis(ms))
            }
            None => defaults.liveness_interval,
        };

        Ok(Self {
            roles,
            discovery_window: duration_ms(
                &lookup,
                "SKILL_MESH_DISCOVERY_WINDOW_MS",
                defaults.discovery_window,
            )?,
            role_ack_timeout: duration_ms(
                &lookup,
                "SKILL_MESH_ROLE_ACK_TIMEOUT_MS",
                defaults.role_ack_timeout,
            )?,
            task_timeout: duration_ms(&lookup, "SKILL_MESH_TASK_TIMEOUT_MS", defaults.task_timeout)?,
            liveness_interval,
            liveness_timeout: duration_ms(
                &lookup,
                "SKILL_MESH_LIVENESS_TIMEOUT_MS",
                defaults.liveness_timeout,
            )?,
            max_consecutive_misses: lookup("SKILL_MESH_MAX_MISSES")
                .map(|raw| parse_value("SKILL_MESH_MAX_MISSES", &raw))
                .transpose()?
                .unwrap_or(defaults.max_consecutive_misses),
            parallel_dispatch: flag(&lookup, "SKILL_MESH_PARALLEL", defaults.parallel_dispatch)?,
            record_exchanges: flag(&lookup, "SKILL_MESH_RECORD", defaults.record_exchanges)?,
        })
    }
}

/// Worker executor configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Receive timeout of one executor loop iteration.
    pub poll_interval: Duration,
    /// Upper bound on one handler invocation, unless the skill sets its own.
    pub skill_timeout: Duration,
    /// Broadcast `WorkerAvailable` once at startup.
    pub announce_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            skill_timeout: Duration::from_secs(5),
            announce_on_start: true,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: duration_ms(&lookup, "SKILL_MESH_POLL_MS", defaults.poll_interval)?,
            skill_timeout: duration_ms(
                &lookup,
                "SKILL_MESH_SKILL_TIMEOUT_MS",
                defaults.skill_timeout,
            )?,
            announce_on_start: flag(&lookup, "SKILL_MESH_ANNOUNCE", defaults.announce_on_start)?,
        })
    }
}

/// Where a UDP node binds and whom it broadcasts to.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub node_id: NodeId,
    pub bind: SocketAddr,
    pub peers: Vec<SocketAddr>,
}

impl NetworkConfig {
    pub const DEFAULT_BIND: &'static str = "0.0.0.0:7400";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let node_id = lookup("SKILL_MESH_NODE_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("SKILL_MESH_NODE_ID".to_string()))?;
        let node_id: NodeId = parse_value("SKILL_MESH_NODE_ID", &node_id)?;

        let bind = lookup("SKILL_MESH_BIND").unwrap_or_else(|| Self::DEFAULT_BIND.to_string());
        let bind: SocketAddr = parse_value("SKILL_MESH_BIND", &bind)?;

        let peers = lookup("SKILL_MESH_PEERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| parse_value::<SocketAddr>("SKILL_MESH_PEERS", s))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            node_id,
            bind,
            peers,
        })
    }
}

/// Parse a role list: `core`, `all`, or comma-separated role names.
/// Duplicates are dropped, first occurrence wins.
pub fn parse_roles(list: &str) -> Result<Vec<Role>, ConfigError> {
    let list = list.trim();
    match list.to_lowercase().as_str() {
        "core" | "" => return Ok(Role::CORE.to_vec()),
        "all" => return Ok(Role::ALL.to_vec()),
        _ => {}
    }
    let mut roles = Vec::new();
    for part in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let role: Role = part.parse().map_err(|message| ConfigError::InvalidValue {
            key: "SKILL_MESH_ROLES".to_string(),
            message,
        })?;
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    Ok(roles)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{}': {}", raw.trim(), e),
    })
}

fn duration_ms(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match parse_value::<u64>(key, &raw)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        }),
        ms => Ok(Duration::from_millis(ms)),
    }
}

fn flag(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(key).map(|s| s.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{v}' is not a boolean"),
            }),
        },
    }
}
