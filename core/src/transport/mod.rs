// Transport — concrete pipe adapters, one per physical medium
//
// Each adapter owns a narrow platform bridge trait (render/scan a QR code,
// write a GATT characteristic, exchange an NFC APDU, talk to a socket).
// Production builds plug in real bindings; tests plug in fakes.

pub mod ble;
pub mod nfc;
pub mod qr_kiss;
pub mod web;

pub use ble::{BleAdapter, BleBridge};
pub use nfc::{NfcAdapter, NfcBridge};
pub use qr_kiss::{QrCodeBridge, QrKissAdapter};
pub use web::{WebAdapter, WebBridge, WebSocketBridge};

use crate::frame::wire::MIN_FRAME_LEN;
use crate::pipe::PipeError;
use thiserror::Error;

/// Failures reported by a platform bridge
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Medium unavailable on this device")]
    Unavailable,
    #[error("Not connected")]
    NotConnected,
    #[error("Peer not found: {0}")]
    PeerNotFound(String),
    #[error("Platform error: {0}")]
    Platform(String),
}

/// Frame payload budget for a medium whose single write holds `unit` bytes
/// of which `framing` go to the medium's own header.
pub(crate) fn chunk_size_for(unit: usize, framing: usize) -> Result<usize, PipeError> {
    match unit
        .checked_sub(framing)
        .and_then(|n| n.checked_sub(MIN_FRAME_LEN))
    {
        Some(size) if size > 0 => Ok(size),
        _ => Err(PipeError::Configuration(format!(
            "transfer unit of {} bytes cannot hold a frame (needs more than {})",
            unit,
            framing + MIN_FRAME_LEN
        ))),
    }
}
