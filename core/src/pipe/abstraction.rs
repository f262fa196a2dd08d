//! Pipe abstraction layer
//!
//! Defines the core types, states and errors shared by every pipe regardless
//! of the physical medium underneath.

use crate::frame::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Physical medium of a pipe. Numeric values are fixed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PipeType {
    /// Animated QR code stream (visual channel)
    QrKiss = 0,
    /// Bluetooth Low Energy GATT
    Ble = 1,
    /// Near-field communication
    Nfc = 2,
    /// WebSocket, or HTTP polling when sockets are unavailable
    Web = 3,
}

impl PipeType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for PipeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeType::QrKiss => write!(f, "QR_KISS"),
            PipeType::Ble => write!(f, "BLE"),
            PipeType::Nfc => write!(f, "NFC"),
            PipeType::Web => write!(f, "WEB"),
        }
    }
}

/// Lifecycle of a pipe. The single authoritative state enum: every adapter
/// and the shared pipe logic use these values and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PipeState {
    Initializing = 0,
    Ready = 1,
    Connecting = 2,
    Connected = 3,
    Disconnecting = 4,
    Disconnected = 5,
    Error = 6,
}

impl fmt::Display for PipeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipeState::Initializing => "INITIALIZING",
            PipeState::Ready => "READY",
            PipeState::Connecting => "CONNECTING",
            PipeState::Connected => "CONNECTED",
            PipeState::Disconnecting => "DISCONNECTING",
            PipeState::Disconnected => "DISCONNECTED",
            PipeState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Static limits an adapter declares at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeCapabilities {
    /// Largest logical message the medium is practical for, in bytes
    pub max_message_size: usize,
    /// Sustained throughput in bytes per second
    pub max_throughput_bps: u64,
    pub bidirectional: bool,
    /// A human has to do something (hold a phone, aim a camera)
    pub requires_user_interaction: bool,
    pub supports_background: bool,
}

/// Point-in-time snapshot of a pipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeStatus {
    pub pipe_id: String,
    pub pipe_type: PipeType,
    pub state: PipeState,
    pub error_message: Option<String>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub round_trip_time_ms: Option<u64>,
    pub uptime_seconds: u64,
}

/// Notifications a pipe publishes to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum PipeEvent {
    StateChanged { from: PipeState, to: PipeState },
    /// A complete message was reassembled (message id)
    MessageReceived(String),
    /// Incoming bytes that were not a valid frame
    DecodeFailed(String),
    /// The pipe entered ERROR
    Failed(String),
}

/// Errors that can occur on a pipe
#[derive(Debug, Clone, Error)]
pub enum PipeError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("No acknowledgment for frame {frame_id} after {attempts} attempts")]
    ReliabilityExhausted { frame_id: Uuid, attempts: u32 },

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: PipeState,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Encoding error: {0}")]
    Encoding(String),
}
