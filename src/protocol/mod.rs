//! Coordination protocol: identifiers, roles, messages and the wire codec.

pub mod codec;
pub mod message;
pub mod types;

pub use message::{Destination, Envelope, Message, Tag, TaskReply};
pub use types::{NodeId, Payload, Role, SessionId, TaskId};
