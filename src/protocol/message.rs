//! Wire messages and the envelope that carries them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::types::{NodeId, Payload, Role, SessionId, TaskId};

/// Upper bound on function names accepted from the wire.
pub const MAX_FUNCTION_NAME_LEN: usize = 64;

/// Protocol tag. Receivers filter on these; each tag has its own mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Discovery traffic.
    Probe,
    /// Role assignment traffic.
    Role,
    /// Task dispatch and results.
    Task,
    /// Shutdown and liveness pings.
    Control,
}

impl Tag {
    pub const ALL: [Tag; 4] = [Tag::Probe, Tag::Role, Tag::Task, Tag::Control];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Probe => 0,
            Self::Role => 1,
            Self::Task => 2,
            Self::Control => 3,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Probe => "probe",
            Self::Role => "role",
            Self::Task => "task",
            Self::Control => "control",
        };
        f.write_str(s)
    }
}

/// Outcome a worker reports for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskReply {
    Value(Payload),
    Error(String),
}

impl TaskReply {
    pub fn value(&self) -> Option<&Payload> {
        match self {
            Self::Value(v) => Some(v),
            Self::Error(_) => None,
        }
    }
}

/// A protocol message. Exactly one variant per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Discover,
    WorkerAvailable {
        id: NodeId,
    },
    AssignRole {
        role: Role,
    },
    RoleAck {
        role: Role,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Task {
        task_id: TaskId,
        function: String,
        #[serde(default)]
        payload: Payload,
    },
    Result {
        task_id: TaskId,
        reply: TaskReply,
    },
    Ping {
        nonce: u64,
    },
    Pong {
        nonce: u64,
    },
    Shutdown,
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Self::Discover | Self::WorkerAvailable { .. } => Tag::Probe,
            Self::AssignRole { .. } | Self::RoleAck { .. } => Tag::Role,
            Self::Task { .. } | Self::Result { .. } => Tag::Task,
            Self::Ping { .. } | Self::Pong { .. } | Self::Shutdown => Tag::Control,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::WorkerAvailable { .. } => "worker_available",
            Self::AssignRole { .. } => "assign_role",
            Self::RoleAck { .. } => "role_ack",
            Self::Task { .. } => "task",
            Self::Result { .. } => "result",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Where a frame is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Node(NodeId),
    Broadcast,
}

impl Destination {
    pub fn includes(&self, id: NodeId) -> bool {
        match self {
            Self::Node(target) => *target == id,
            Self::Broadcast => true,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node {id}"),
            Self::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// A message plus routing and session scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: NodeId,
    pub to: Destination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
    pub message: Message,
}

impl Envelope {
    pub fn new(from: NodeId, to: Destination, session: Option<SessionId>, message: Message) -> Self {
        Self {
            from,
            to,
            session,
            message,
        }
    }

    pub fn tag(&self) -> Tag {
        self.message.tag()
    }

    /// Whether this frame belongs to `session`. Unscoped frames (startup
    /// readiness broadcasts) match any session.
    pub fn in_session(&self, session: SessionId) -> bool {
        self.session.is_none_or(|s| s == session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_group_request_and_reply() {
        assert_eq!(Message::Discover.tag(), Message::WorkerAvailable { id: NodeId(1) }.tag());
        assert_eq!(
            Message::AssignRole { role: Role::Memory }.tag(),
            Message::RoleAck {
                role: Role::Memory,
                ok: true,
                reason: None
            }
            .tag()
        );
        assert_eq!(Message::Shutdown.tag(), Tag::Control);
        assert_eq!(Message::Pong { nonce: 3 }.tag(), Tag::Control);
    }

    #[test]
    fn result_wire_shape() {
        let msg = Message::Result {
            task_id: TaskId(9),
            reply: TaskReply::Error("unknown function: x".into()),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["task_id"], 9);
        assert_eq!(json["reply"]["error"], "unknown function: x");
    }

    #[test]
    fn task_payload_defaults_to_empty() {
        let msg: Message =
            serde_json::from_str(r#"{"type":"task","task_id":1,"function":"analyze"}"#).unwrap();
        match msg {
            Message::Task { payload, .. } => assert!(payload.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unscoped_envelope_matches_any_session() {
        let env = Envelope::new(
            NodeId(2),
            Destination::Broadcast,
            None,
            Message::WorkerAvailable { id: NodeId(2) },
        );
        assert!(env.in_session(SessionId::new()));

        let session = SessionId::new();
        let scoped = Envelope {
            session: Some(session),
            ..env
        };
        assert!(scoped.in_session(session));
        assert!(!scoped.in_session(SessionId::new()));
    }
}
