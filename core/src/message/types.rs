// Message types — what callers hand to a pipe

use crate::pipe::PipeError;
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Hop budget for relayed messages
pub const DEFAULT_TTL: u8 = 16;

/// Upper bound for an encoded message on any medium: 16 MiB
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// What kind of message this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Application payload, opaque to the transport
    Data,
    /// Distance-vector advertisement (bincode `Vec<RoutingEntry>`)
    RouteAdvertisement,
}

/// A structured message addressed from one node to another.
///
/// The transport never looks inside `payload`. `destination` may be several
/// hops away; relays decrement `ttl` on every forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMessage {
    /// Unique message ID (UUID v4)
    pub id: String,
    /// Originating node
    pub source: String,
    /// Final recipient node
    pub destination: String,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
    /// Unix timestamp (milliseconds)
    pub timestamp_ms: u64,
    /// Remaining hops
    pub ttl: u8,
}

impl NetworkMessage {
    /// Create a new data message
    pub fn new(source: impl Into<String>, destination: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            destination: destination.into(),
            kind: MessageKind::Data,
            payload,
            timestamp_ms: crate::now_ms(),
            ttl: DEFAULT_TTL,
        }
    }

    /// Create a route advertisement for a direct neighbour
    pub fn route_advertisement(
        source: impl Into<String>,
        destination: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind: MessageKind::RouteAdvertisement,
            ttl: 1,
            ..Self::new(source, destination, payload)
        }
    }

    /// bincode bytes, refused when they would exceed `limit`
    pub fn encode(&self, limit: usize) -> Result<Vec<u8>, PipeError> {
        wire_options(limit).serialize(self).map_err(|e| {
            PipeError::Encoding(format!("message {} does not fit in {} bytes: {}", self.id, limit, e))
        })
    }

    /// Inverse of [`encode`](Self::encode); the limit bounds every
    /// allocation bincode makes while reading.
    pub fn decode(bytes: &[u8], limit: usize) -> Result<Self, PipeError> {
        wire_options(limit)
            .deserialize(bytes)
            .map_err(|e| PipeError::Encoding(format!("not a message ({} bytes): {}", bytes.len(), e)))
    }

    /// Copy for the next hop, or `None` once the hop budget is spent
    pub fn forwarded(&self) -> Option<Self> {
        if self.ttl <= 1 {
            return None;
        }
        Some(Self {
            ttl: self.ttl - 1,
            ..self.clone()
        })
    }
}

fn wire_options(limit: usize) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(limit as u64)
}
