//! Per-table compression transform.
//!
//! Tables negotiate a compression mode in their metadata; when active,
//! every outbound row buffer is compressed and every inbound payload is
//! decompressed before further processing. A failure is fatal for that
//! call and never retried here.

use serde::{Deserialize, Serialize};

use kestrel_common::{KestrelError, KestrelResult};

/// Compression mode recorded in table metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    #[default]
    None,
    /// LZ4 block format with a size-prepended header.
    Lz4,
}

impl CompressionMode {
    pub fn is_active(self) -> bool {
        self != CompressionMode::None
    }

    pub fn compress(self, data: &[u8]) -> KestrelResult<Vec<u8>> {
        match self {
            CompressionMode::None => Ok(data.to_vec()),
            CompressionMode::Lz4 => Ok(lz4_flex::block::compress_prepend_size(data)),
        }
    }

    pub fn decompress(self, data: &[u8]) -> KestrelResult<Vec<u8>> {
        match self {
            CompressionMode::None => Ok(data.to_vec()),
            CompressionMode::Lz4 => lz4_flex::block::decompress_size_prepended(data)
                .map_err(|e| KestrelError::Compression(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_roundtrip() {
        let data: Vec<u8> = (0..64u8).cycle().take(4096).collect();
        let compressed = CompressionMode::Lz4.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        let restored = CompressionMode::Lz4.decompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_none_is_passthrough() {
        let data = b"raw payload".to_vec();
        assert_eq!(CompressionMode::None.compress(&data).unwrap(), data);
        assert_eq!(CompressionMode::None.decompress(&data).unwrap(), data);
    }

    #[test]
    fn test_corrupt_input_is_compression_error() {
        let err = CompressionMode::Lz4.decompress(&[0xff, 0x01]).unwrap_err();
        assert!(matches!(err, KestrelError::Compression(_)));
    }
}
