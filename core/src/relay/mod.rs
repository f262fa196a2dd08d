//! Relay — multi-hop delivery over a set of pipes
//!
//! The dispatcher ties the pieces together: pipes to direct neighbours,
//! the routing table for next hops and the message store for anything that
//! cannot leave right now.

pub mod dispatcher;

pub use dispatcher::{DispatchOutcome, Dispatcher};
