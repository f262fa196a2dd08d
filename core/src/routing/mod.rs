//! Routing — distance-vector next-hop selection for multi-hop relay
//!
//! Each node keeps one entry per known destination: which neighbour to hand
//! a message to and how many hops it is from there. Neighbours exchange
//! their tables as route advertisements and relax their own entries.
//! Unreachable destinations carry [`INFINITE_DISTANCE`] until they age out.

pub mod table;

pub use table::{RoutingConfig, RoutingEntry, RoutingTable, INFINITE_DISTANCE};
