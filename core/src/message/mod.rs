// Message module — the structured unit a pipe carries and its serialization

pub mod types;

pub use types::{MessageKind, NetworkMessage, DEFAULT_TTL, MAX_MESSAGE_SIZE};
