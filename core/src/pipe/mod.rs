// Pipe — one uniform contract over every physical medium
//
// abstraction: shared types, states, errors
// config:      tagged per-medium configuration
// adapter:     the physical primitives an adapter implements
// base:        the lifecycle, framing and reliability every adapter inherits

pub mod abstraction;
pub mod adapter;
pub mod base;
pub mod config;

pub use abstraction::{PipeCapabilities, PipeError, PipeEvent, PipeState, PipeStatus, PipeType};
pub use adapter::{Inbound, InboundSink, PipeAdapter};
pub use base::Pipe;
pub use config::{
    PipeConfiguration, PipeSettings, QrKissConfig, RadioConfig, WebConfig, DEFAULT_TIMEOUT_MS,
};
