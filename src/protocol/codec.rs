//! JSON frame codec with schema validation.
//!
//! Decoding never fails loudly: a frame that does not parse or breaks a
//! message invariant comes back as `None` and the caller drops it.

use crate::error::TransportError;
use crate::protocol::message::{Destination, Envelope, MAX_FUNCTION_NAME_LEN, Message};

/// Largest frame accepted in either direction: one IPv4 UDP datagram.
pub const MAX_FRAME_BYTES: usize = 65_507;

/// Serialize an envelope into a frame.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, TransportError> {
    let bytes = serde_json::to_vec(envelope)?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(bytes)
}

/// Parse and validate a frame.
pub fn decode(bytes: &[u8]) -> Option<Envelope> {
    if bytes.len() > MAX_FRAME_BYTES {
        tracing::debug!(size = bytes.len(), "Dropping oversized frame");
        return None;
    }
    let envelope: Envelope = match serde_json::from_slice(bytes) {
        Ok(env) => env,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping unparseable frame");
            return None;
        }
    };
    match validate(&envelope) {
        Ok(()) => Some(envelope),
        Err(reason) => {
            tracing::debug!(from = %envelope.from, kind = envelope.message.kind(), reason, "Dropping invalid frame");
            None
        }
    }
}

/// Check invariants serde cannot express.
pub fn validate(envelope: &Envelope) -> Result<(), &'static str> {
    if envelope.to == Destination::Node(envelope.from) {
        return Err("frame addressed to its own sender");
    }
    match &envelope.message {
        Message::WorkerAvailable { id } if *id != envelope.from => {
            Err("availability announced for a different node")
        }
        Message::Task { function, .. } if function.trim().is_empty() => Err("empty function name"),
        Message::Task { function, .. } if function.len() > MAX_FUNCTION_NAME_LEN => {
            Err("function name too long")
        }
        _ => Ok(()),
    }
}
