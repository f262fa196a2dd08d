// Store module — in-memory store-and-forward cache
//
// Holds messages that could not be handed to a pipe yet and decides when
// each one is due for another delivery attempt. Not durable across restarts.

pub mod message_store;

pub use message_store::{MessageStore, MessageStoreConfig, StoredMessage};
