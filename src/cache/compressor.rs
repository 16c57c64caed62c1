//! Record compression for the indexed tier.
//!
//! Serialized entries at or above `min_bytes` are zstd-compressed. Every
//! stored record starts with a one-byte format tag so raw and compressed
//! records can coexist in the same store.

use crate::config::CompressionConfig;
use thiserror::Error;

const FORMAT_RAW: u8 = 0;
const FORMAT_ZSTD: u8 = 1;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Zstd compression failed: {0}")]
    ZstdError(#[from] std::io::Error),

    #[error("Unknown record format tag {0}")]
    UnknownFormat(u8),

    #[error("Record is empty")]
    Empty,
}

/// The compression engine wraps serialized records for storage.
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Wrap a serialized record, compressing it when worthwhile.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if self.config.enabled && data.len() >= self.config.min_bytes {
            let compressed = self.zstd_compress(data)?;
            // Incompressible data stays raw.
            if compressed.len() < data.len() {
                let mut out = Vec::with_capacity(compressed.len() + 1);
                out.push(FORMAT_ZSTD);
                out.extend_from_slice(&compressed);
                return Ok(out);
            }
        }
        let mut out = Vec::with_capacity(data.len() + 1);
        out.push(FORMAT_RAW);
        out.extend_from_slice(data);
        Ok(out)
    }

    /// Unwrap a stored record back to its serialized form.
    pub fn decode(&self, record: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let (&tag, body) = record.split_first().ok_or(CompressionError::Empty)?;
        match tag {
            FORMAT_RAW => Ok(body.to_vec()),
            FORMAT_ZSTD => self.zstd_decompress(body),
            other => Err(CompressionError::UnknownFormat(other)),
        }
    }

    /// Whether a stored record is compressed.
    pub fn is_compressed(record: &[u8]) -> bool {
        record.first() == Some(&FORMAT_ZSTD)
    }

    /// Compress data with zstd.
    fn zstd_compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let compressed = zstd::encode_all(data, self.config.zstd_level)?;
        Ok(compressed)
    }

    /// Decompress zstd data.
    fn zstd_decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let decompressed = zstd::decode_all(data)?;
        Ok(decompressed)
    }
}
