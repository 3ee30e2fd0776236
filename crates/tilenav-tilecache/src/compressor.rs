//! Compression of stored tile layers

use tilenav_common::{Error, Result};

/// Compresses and decompresses tile layer bytes
pub trait TileCompressor: Send + Sync + std::fmt::Debug {
    /// Compress the input data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress the input data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 block compressor with the uncompressed size prepended
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl TileCompressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| Error::CorruptLayer(format!("lz4 decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_shrinks_repetitive_data() {
        let data: Vec<u8> = (0..4096).map(|i| (i % 7) as u8).collect();
        let compressed = Lz4Compressor.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(Lz4Compressor.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_truncated_data_is_rejected() {
        let compressed = Lz4Compressor.compress(&[1u8; 512]).unwrap();
        let result = Lz4Compressor.decompress(&compressed[..compressed.len() / 2]);
        assert!(matches!(result, Err(Error::CorruptLayer(_))));
    }
}
