/// Frame wire format — fixed header, headers map, payload and CRC32

use super::types::{Compression, Frame, FrameType};
use super::{DecodeError, PROTOCOL_VERSION};
use crc32fast::Hasher;
use std::collections::BTreeMap;
use uuid::Uuid;

/// "MP" in little endian
pub const FRAME_MAGIC: u16 = 0x504D;

/// Fixed header: magic(2) version(1) type(1) compression(1) frame_id(16)
/// sequence(4) timestamp(8) chunk_index(4) chunk_count(4) header_count(2)
pub const FIXED_HEADER_LEN: usize = 43;

/// Smallest valid frame: fixed header + payload length(4) + CRC32(4)
pub const MIN_FRAME_LEN: usize = FIXED_HEADER_LEN + 4 + 4;

/// Upper bound on a single frame payload, independent of adapter limits
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

impl Frame {
    /// Serialize frame to bytes
    ///
    /// Format (LE): [2 magic][1 version][1 type][1 compression][16 frame_id]
    /// [4 sequence][8 timestamp_ms][4 chunk_index][4 chunk_count]
    /// [2 header_count]{[2 klen][k][2 vlen][v]}*[4 payload_len][N payload]
    /// [4 CRC32 over everything before it]
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        if self.chunk_index >= self.chunk_count {
            return Err(DecodeError::InvalidChunk {
                index: self.chunk_index,
                count: self.chunk_count,
            });
        }
        if self.payload.len() > MAX_FRAME_PAYLOAD {
            return Err(DecodeError::PayloadTooLarge(self.payload.len()));
        }
        if self.headers.len() > u16::MAX as usize {
            return Err(DecodeError::InvalidHeader(format!(
                "{} headers exceed the u16 count field",
                self.headers.len()
            )));
        }

        let headers_len: usize = self
            .headers
            .iter()
            .map(|(k, v)| 4 + k.len() + v.len())
            .sum();
        let mut buf = Vec::with_capacity(MIN_FRAME_LEN + headers_len + self.payload.len());

        buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
        buf.push(self.protocol_version);
        buf.push(self.frame_type.as_u8());
        buf.push(self.compression.as_u8());
        buf.extend_from_slice(self.frame_id.as_bytes());
        buf.extend_from_slice(&self.sequence_number.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.extend_from_slice(&self.chunk_index.to_le_bytes());
        buf.extend_from_slice(&self.chunk_count.to_le_bytes());
        buf.extend_from_slice(&(self.headers.len() as u16).to_le_bytes());

        for (key, value) in &self.headers {
            write_short_str(&mut buf, key)?;
            write_short_str(&mut buf, value)?;
        }

        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);

        let mut hasher = Hasher::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());

        Ok(buf)
    }
}

fn write_short_str(buf: &mut Vec<u8>, s: &str) -> Result<(), DecodeError> {
    if s.len() > u16::MAX as usize {
        return Err(DecodeError::InvalidHeader(format!(
            "header field of {} bytes exceeds u16 length",
            s.len()
        )));
    }
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Bounds-checked little-endian reader over the CRC-covered region
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::BufferTooShort {
            need: usize::MAX,
            got: self.data.len(),
        })?;
        if end > self.data.len() {
            return Err(DecodeError::BufferTooShort {
                need: end,
                got: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn short_str(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DecodeError::InvalidHeader(e.to_string()))
    }
}

/// Deserialize a frame from bytes
///
/// Returns error if:
/// - Buffer too short or trailing bytes present
/// - CRC32 mismatch
/// - Unknown magic, version, frame type or compression
/// - chunk_index >= chunk_count
pub fn decode_frame(data: &[u8]) -> Result<Frame, DecodeError> {
    if data.len() < MIN_FRAME_LEN {
        return Err(DecodeError::BufferTooShort {
            need: MIN_FRAME_LEN,
            got: data.len(),
        });
    }

    let crc_offset = data.len() - 4;
    let received_crc = u32::from_le_bytes([
        data[crc_offset],
        data[crc_offset + 1],
        data[crc_offset + 2],
        data[crc_offset + 3],
    ]);
    let mut hasher = Hasher::new();
    hasher.update(&data[..crc_offset]);
    if hasher.finalize() != received_crc {
        return Err(DecodeError::CrcMismatch);
    }

    let mut r = Reader {
        data: &data[..crc_offset],
        pos: 0,
    };

    let magic = r.u16()?;
    if magic != FRAME_MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let protocol_version = r.u8()?;
    if protocol_version == 0 || protocol_version > PROTOCOL_VERSION {
        return Err(DecodeError::UnsupportedVersion(protocol_version));
    }
    let frame_type = FrameType::from_u8(r.u8()?)?;
    let compression = Compression::from_u8(r.u8()?)?;

    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(r.take(16)?);
    let frame_id = Uuid::from_bytes(id_bytes);

    let sequence_number = r.u32()?;
    let timestamp_ms = r.u64()?;
    let chunk_index = r.u32()?;
    let chunk_count = r.u32()?;
    if chunk_index >= chunk_count {
        return Err(DecodeError::InvalidChunk {
            index: chunk_index,
            count: chunk_count,
        });
    }

    let header_count = r.u16()?;
    let mut headers = BTreeMap::new();
    for _ in 0..header_count {
        let key = r.short_str()?;
        let value = r.short_str()?;
        headers.insert(key, value);
    }

    let payload_len = r.u32()? as usize;
    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(DecodeError::PayloadTooLarge(payload_len));
    }
    let payload = r.take(payload_len)?.to_vec();

    if r.pos != r.data.len() {
        return Err(DecodeError::BufferTooShort {
            need: r.pos + 4,
            got: data.len(),
        });
    }

    Ok(Frame {
        frame_id,
        frame_type,
        payload,
        headers,
        timestamp_ms,
        compression,
        chunk_index,
        chunk_count,
        protocol_version,
        sequence_number,
    })
}
