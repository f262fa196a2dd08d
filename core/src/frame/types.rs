//! Frame, frame type and compression type

use super::{DecodeError, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Frame type enumeration. Numeric values are fixed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    /// Chunk of an application message (0)
    Data = 0,
    /// Pipe-level control traffic (1)
    Control = 1,
    /// Liveness check, answered with an acknowledgment (2)
    Heartbeat = 2,
    /// Remote-side error report (3)
    Error = 3,
    /// Acknowledgment of a frame id (4)
    Acknowledgment = 4,
}

impl FrameType {
    /// Convert from u8 to FrameType
    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::Control),
            2 => Ok(FrameType::Heartbeat),
            3 => Ok(FrameType::Error),
            4 => Ok(FrameType::Acknowledgment),
            other => Err(DecodeError::InvalidFrameType(other)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::Data => write!(f, "DATA"),
            FrameType::Control => write!(f, "CONTROL"),
            FrameType::Heartbeat => write!(f, "HEARTBEAT"),
            FrameType::Error => write!(f, "ERROR"),
            FrameType::Acknowledgment => write!(f, "ACKNOWLEDGMENT"),
        }
    }
}

/// Per-chunk compression. Numeric values are fixed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Compression {
    #[default]
    None = 0,
    Gzip = 1,
    Lz4 = 2,
    Zstd = 3,
}

impl Compression {
    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Lz4),
            3 => Ok(Compression::Zstd),
            other => Err(DecodeError::InvalidCompression(other)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// One on-wire unit: a chunk of a logical message plus metadata.
///
/// All chunks of one message share `frame_id` and `sequence_number`;
/// `chunk_index < chunk_count` always holds for a decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_id: Uuid,
    pub frame_type: FrameType,
    /// Chunk bytes, compressed when `compression != None`
    pub payload: Vec<u8>,
    pub headers: BTreeMap<String, String>,
    pub timestamp_ms: u64,
    pub compression: Compression,
    pub chunk_index: u32,
    pub chunk_count: u32,
    pub protocol_version: u8,
    pub sequence_number: u32,
}

impl Frame {
    /// Single-chunk, uncompressed frame.
    pub fn single(frame_id: Uuid, frame_type: FrameType, sequence_number: u32, payload: Vec<u8>) -> Self {
        Self {
            frame_id,
            frame_type,
            payload,
            headers: BTreeMap::new(),
            timestamp_ms: crate::now_ms(),
            compression: Compression::None,
            chunk_index: 0,
            chunk_count: 1,
            protocol_version: PROTOCOL_VERSION,
            sequence_number,
        }
    }

    pub fn is_single_chunk(&self) -> bool {
        self.chunk_count == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::Data.as_u8(), 0);
        assert_eq!(FrameType::Control.as_u8(), 1);
        assert_eq!(FrameType::Heartbeat.as_u8(), 2);
        assert_eq!(FrameType::Error.as_u8(), 3);
        assert_eq!(FrameType::Acknowledgment.as_u8(), 4);

        assert_eq!(FrameType::from_u8(4).unwrap(), FrameType::Acknowledgment);
        assert!(matches!(
            FrameType::from_u8(5),
            Err(DecodeError::InvalidFrameType(5))
        ));
    }

    #[test]
    fn test_compression_conversion() {
        for c in [
            Compression::None,
            Compression::Gzip,
            Compression::Lz4,
            Compression::Zstd,
        ] {
            assert_eq!(Compression::from_u8(c.as_u8()).unwrap(), c);
        }
        assert_eq!(Compression::Zstd.as_u8(), 3);
        assert!(Compression::from_u8(9).is_err());
    }

    #[test]
    fn test_single_frame_defaults() {
        let frame = Frame::single(Uuid::new_v4(), FrameType::Heartbeat, 7, vec![]);
        assert!(frame.is_single_chunk());
        assert_eq!(frame.chunk_index, 0);
        assert_eq!(frame.protocol_version, PROTOCOL_VERSION);
        assert_eq!(frame.sequence_number, 7);
    }

    #[test]
    fn test_frame_type_display() {
        assert_eq!(FrameType::Acknowledgment.to_string(), "ACKNOWLEDGMENT");
        assert_eq!(FrameType::Data.to_string(), "DATA");
    }
}
