//! Frame codec — payload → frames → payload
//!
//! Outbound: split into chunks no larger than the adapter chunk size,
//! compress each chunk when that actually helps, stamp a shared frame id
//! and a per-message sequence number.
//!
//! Inbound: the [`Reassembler`] collects chunks by frame id and returns the
//! payload once every chunk is present. Single-chunk frames bypass the
//! buffers entirely. Buffered and decompressed bytes per message are capped
//! at `max_message_size`, so a forged header cannot force a large allocation.

use super::compress::{compress, decompress};
use super::types::{Compression, Frame, FrameType};
use super::wire::MAX_FRAME_PAYLOAD;
use super::{DecodeError, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, trace};
use uuid::Uuid;

/// Frame codec configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Max payload bytes per frame (the adapter's chunk size)
    pub max_chunk_size: usize,
    /// Compression applied to each chunk
    pub compression: Compression,
    /// Partial messages older than this are dropped (ms)
    pub reassembly_timeout_ms: u64,
    /// How many completed frame ids to remember for duplicate detection
    pub completed_history: usize,
    /// Largest reassembled payload accepted from a peer (bytes)
    pub max_message_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1024,
            compression: Compression::None,
            reassembly_timeout_ms: 60_000,
            completed_history: 1024,
            max_message_size: MAX_FRAME_PAYLOAD,
        }
    }
}

impl CodecConfig {
    pub fn with_chunk_size(max_chunk_size: usize) -> Self {
        Self {
            max_chunk_size,
            ..Default::default()
        }
    }
}

/// Splits payloads into frames
#[derive(Debug)]
pub struct FrameCodec {
    config: CodecConfig,
    next_sequence: AtomicU32,
}

impl FrameCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self {
            config,
            next_sequence: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Effective chunk size; a zero setting behaves as one byte.
    pub fn chunk_size(&self) -> usize {
        self.config.max_chunk_size.max(1)
    }

    /// Allocate the next outbound sequence number (wraps at u32::MAX).
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Encode `payload` under a fresh frame id and sequence number.
    pub fn encode_frames(
        &self,
        payload: &[u8],
        frame_type: FrameType,
        headers: &BTreeMap<String, String>,
    ) -> Result<Vec<Frame>, DecodeError> {
        self.encode_frames_with_id(Uuid::new_v4(), self.next_sequence(), payload, frame_type, headers)
    }

    /// Encode `payload` under a caller-chosen frame id, so that a
    /// retransmission is recognised as the same message.
    pub fn encode_frames_with_id(
        &self,
        frame_id: Uuid,
        sequence_number: u32,
        payload: &[u8],
        frame_type: FrameType,
        headers: &BTreeMap<String, String>,
    ) -> Result<Vec<Frame>, DecodeError> {
        let size = self.payload_budget(headers)?;
        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&payload[..0]]
        } else {
            payload.chunks(size).collect()
        };

        if chunks.len() > u32::MAX as usize {
            return Err(DecodeError::PayloadTooLarge(payload.len()));
        }
        let chunk_count = chunks.len() as u32;
        let timestamp_ms = crate::now_ms();

        let frames: Vec<Frame> = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let (compression, bytes) = self.compress_chunk(chunk);
                Frame {
                    frame_id,
                    frame_type,
                    payload: bytes,
                    headers: headers.clone(),
                    timestamp_ms,
                    compression,
                    chunk_index: index as u32,
                    chunk_count,
                    protocol_version: PROTOCOL_VERSION,
                    sequence_number,
                }
            })
            .collect();

        trace!(
            frame_id = %frame_id,
            chunks = chunk_count,
            bytes = payload.len(),
            "Encoded payload"
        );
        Ok(frames)
    }

    /// Chunk bytes left once `headers` ride on every frame
    fn payload_budget(&self, headers: &BTreeMap<String, String>) -> Result<usize, DecodeError> {
        let headers_len: usize = headers.iter().map(|(k, v)| 4 + k.len() + v.len()).sum();
        match self.chunk_size().checked_sub(headers_len) {
            Some(size) if size > 0 => Ok(size),
            _ => Err(DecodeError::InvalidHeader(format!(
                "{} header bytes leave no room in a {} byte chunk",
                headers_len,
                self.chunk_size()
            ))),
        }
    }

    /// Compressed chunk, or the raw chunk when compression fails or does
    /// not shrink it. Keeps every payload within the chunk size.
    fn compress_chunk(&self, chunk: &[u8]) -> (Compression, Vec<u8>) {
        if self.config.compression == Compression::None {
            return (Compression::None, chunk.to_vec());
        }
        match compress(self.config.compression, chunk) {
            Ok(compressed) if compressed.len() < chunk.len() => {
                (self.config.compression, compressed)
            }
            _ => (Compression::None, chunk.to_vec()),
        }
    }
}

/// Outcome of feeding one frame to the reassembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// Every chunk arrived; the decompressed payload
    Complete(Vec<u8>),
    /// Still waiting on chunks
    Incomplete { received: u32, expected: u32 },
    /// The message for this frame id was already delivered
    Duplicate,
}

struct Partial {
    chunk_count: u32,
    chunks: BTreeMap<u32, (Compression, Vec<u8>)>,
    buffered: usize,
    first_seen_ms: u64,
}

/// Collects chunks per frame id
pub struct Reassembler {
    timeout_ms: u64,
    partial: HashMap<Uuid, Partial>,
    completed: HashSet<Uuid>,
    completed_order: VecDeque<Uuid>,
    completed_capacity: usize,
    chunk_limit: usize,
    max_message_size: usize,
}

impl Reassembler {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            timeout_ms: config.reassembly_timeout_ms,
            partial: HashMap::new(),
            completed: HashSet::new(),
            completed_order: VecDeque::new(),
            completed_capacity: config.completed_history.max(1),
            chunk_limit: config.max_chunk_size.max(1),
            max_message_size: config.max_message_size,
        }
    }

    /// Most chunks a message within the size cap can be split into
    fn max_chunks(&self) -> usize {
        self.max_message_size / self.chunk_limit + 1
    }

    pub fn accept(&mut self, frame: &Frame) -> Result<Reassembly, DecodeError> {
        self.accept_at(frame, crate::now_ms())
    }

    pub fn accept_at(&mut self, frame: &Frame, now_ms: u64) -> Result<Reassembly, DecodeError> {
        if frame.chunk_index >= frame.chunk_count {
            return Err(DecodeError::InvalidChunk {
                index: frame.chunk_index,
                count: frame.chunk_count,
            });
        }
        if self.completed.contains(&frame.frame_id) {
            return Ok(Reassembly::Duplicate);
        }

        if frame.is_single_chunk() {
            let cap = self.chunk_limit.min(self.max_message_size);
            let payload = decompress(frame.compression, &frame.payload, cap)?;
            self.remember_completed(frame.frame_id);
            return Ok(Reassembly::Complete(payload));
        }

        if frame.chunk_count as usize > self.max_chunks() {
            debug!(
                frame_id = %frame.frame_id,
                chunk_count = frame.chunk_count,
                "Chunk count exceeds message cap"
            );
            return Err(DecodeError::InvalidChunk {
                index: frame.chunk_index,
                count: frame.chunk_count,
            });
        }

        let partial = self.partial.entry(frame.frame_id).or_insert_with(|| Partial {
            chunk_count: frame.chunk_count,
            chunks: BTreeMap::new(),
            buffered: 0,
            first_seen_ms: now_ms,
        });

        if partial.chunk_count != frame.chunk_count {
            let expected = partial.chunk_count;
            self.partial.remove(&frame.frame_id);
            debug!(
                frame_id = %frame.frame_id,
                expected,
                got = frame.chunk_count,
                "Inconsistent chunk count, dropping partial message"
            );
            return Err(DecodeError::InvalidChunk {
                index: frame.chunk_index,
                count: frame.chunk_count,
            });
        }

        if !partial.chunks.contains_key(&frame.chunk_index) {
            let buffered = partial.buffered + frame.payload.len();
            if buffered > self.max_message_size {
                self.partial.remove(&frame.frame_id);
                debug!(frame_id = %frame.frame_id, buffered, "Partial message over cap, dropped");
                return Err(DecodeError::PayloadTooLarge(buffered));
            }
            partial
                .chunks
                .insert(frame.chunk_index, (frame.compression, frame.payload.clone()));
            partial.buffered = buffered;
        }

        let received = partial.chunks.len() as u32;
        if received < partial.chunk_count {
            return Ok(Reassembly::Incomplete {
                received,
                expected: partial.chunk_count,
            });
        }

        let Some(done) = self.partial.remove(&frame.frame_id) else {
            return Ok(Reassembly::Duplicate);
        };
        let mut payload = Vec::new();
        for (compression, bytes) in done.chunks.into_values() {
            let room = self.max_message_size - payload.len();
            let chunk = decompress(compression, &bytes, self.chunk_limit.min(room))?;
            payload.extend_from_slice(&chunk);
        }
        self.remember_completed(frame.frame_id);
        Ok(Reassembly::Complete(payload))
    }

    fn remember_completed(&mut self, frame_id: Uuid) {
        if self.completed.insert(frame_id) {
            self.completed_order.push_back(frame_id);
            while self.completed_order.len() > self.completed_capacity {
                if let Some(old) = self.completed_order.pop_front() {
                    self.completed.remove(&old);
                }
            }
        }
    }

    /// Drop partial messages older than the reassembly timeout.
    pub fn purge_expired(&mut self, now_ms: u64) -> usize {
        let timeout = self.timeout_ms;
        let before = self.partial.len();
        self.partial
            .retain(|_, p| now_ms.saturating_sub(p.first_seen_ms) < timeout);
        before - self.partial.len()
    }

    /// Number of messages with some but not all chunks
    pub fn pending_count(&self) -> usize {
        self.partial.len()
    }
}
