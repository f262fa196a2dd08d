/// Per-chunk compression: GZIP (flate2), LZ4 (lz4_flex), ZSTD (zstd)

use super::types::Compression;
use super::DecodeError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

const ZSTD_LEVEL: i32 = 3;

/// Compress `data` with `method`.
///
/// LZ4 output carries the uncompressed size up front and ZSTD output
/// records it in the frame header, so decompression can bound its buffer.
pub fn compress(method: Compression, data: &[u8]) -> std::io::Result<Vec<u8>> {
    match method {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        Compression::Zstd => zstd::bulk::compress(data, ZSTD_LEVEL),
    }
}

/// Decompress data produced by [`compress`] with the same method.
///
/// Output is capped at `max_len` bytes; a chunk claiming or producing more
/// is rejected before the memory is committed.
pub fn decompress(method: Compression, data: &[u8], max_len: usize) -> Result<Vec<u8>, DecodeError> {
    match method {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(data)
                .take(max_len as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;
            if out.len() > max_len {
                return Err(DecodeError::PayloadTooLarge(out.len()));
            }
            Ok(out)
        }
        Compression::Lz4 => {
            let claimed = match data.get(..4) {
                Some(prefix) => u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]),
                None => {
                    return Err(DecodeError::DecompressionFailed(
                        "missing LZ4 size prefix".into(),
                    ))
                }
            } as usize;
            if claimed > max_len {
                return Err(DecodeError::PayloadTooLarge(claimed));
            }
            lz4_flex::decompress_size_prepended(data)
                .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))
        }
        Compression::Zstd => zstd::bulk::decompress(data, max_len)
            .map_err(|e| DecodeError::DecompressionFailed(e.to_string())),
    }
}
