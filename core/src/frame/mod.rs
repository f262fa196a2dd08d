//! Frame Codec — the on-wire unit shared by every pipe
//!
//! This module provides:
//! - Frame: chunk of a logical message plus metadata, CRC32-bounded on the wire
//! - Compression: optional per-chunk GZIP / LZ4 / ZSTD
//! - FrameCodec: splits a payload into adapter-sized frames
//! - Reassembler: collects chunks by frame id and rebuilds the payload
//! - Acknowledgment: receiver → sender confirmation for one frame id
//!
//! Format progression:
//! 1. Payload bytes (usually a bincode-encoded NetworkMessage)
//! 2. Chunks no larger than the adapter chunk size
//! 3. Optional compression of each chunk
//! 4. Frame header + CRC32 per chunk

pub mod ack;
pub mod codec;
pub mod compress;
pub mod types;
pub mod wire;

pub use ack::Acknowledgment;
pub use codec::{CodecConfig, FrameCodec, Reassembler, Reassembly};
pub use types::{Compression, Frame, FrameType};
pub use wire::decode_frame;

use thiserror::Error;

/// Frame decoding errors. Decoding never has side effects, so every variant
/// only describes the offending input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Buffer too short: need {need} bytes, got {got}")]
    BufferTooShort { need: usize, got: usize },

    #[error("Bad frame magic: {0:#06x}")]
    BadMagic(u16),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid frame type: {0}")]
    InvalidFrameType(u8),

    #[error("Invalid compression type: {0}")]
    InvalidCompression(u8),

    #[error("CRC32 mismatch")]
    CrcMismatch,

    #[error("Invalid chunk: index {index} of {count}")]
    InvalidChunk { index: u32, count: u32 },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Current wire protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_constant() {
        assert_eq!(PROTOCOL_VERSION, 0x01);
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::InvalidChunk { index: 4, count: 2 };
        assert_eq!(err.to_string(), "Invalid chunk: index 4 of 2");
    }
}
