/// Acknowledgment — receiver confirms one frame id

use super::types::{Frame, FrameType};
use super::DecodeError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub frame_id: Uuid,
    pub sequence_number: u32,
    pub received_at_ms: u64,
}

impl Acknowledgment {
    pub fn new(frame_id: Uuid, sequence_number: u32) -> Self {
        Self {
            frame_id,
            sequence_number,
            received_at_ms: crate::now_ms(),
        }
    }

    /// Acknowledge the message `frame` belongs to.
    pub fn for_frame(frame: &Frame) -> Self {
        Self::new(frame.frame_id, frame.sequence_number)
    }

    /// Wrap as an ACKNOWLEDGMENT frame: id and sequence ride in the frame
    /// header, the payload is `received_at_ms` (LE u64).
    pub fn to_frame(&self) -> Frame {
        Frame::single(
            self.frame_id,
            FrameType::Acknowledgment,
            self.sequence_number,
            self.received_at_ms.to_le_bytes().to_vec(),
        )
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, DecodeError> {
        if frame.frame_type != FrameType::Acknowledgment {
            return Err(DecodeError::InvalidFrameType(frame.frame_type.as_u8()));
        }
        if frame.payload.len() != 8 {
            return Err(DecodeError::BufferTooShort {
                need: 8,
                got: frame.payload.len(),
            });
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&frame.payload);
        Ok(Self {
            frame_id: frame.frame_id,
            sequence_number: frame.sequence_number,
            received_at_ms: u64::from_le_bytes(arr),
        })
    }
}
