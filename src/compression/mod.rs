//! Thin contract around an external byte-in/byte-out entropy compressor.
//! `compress` is deterministic; `decompress(compress(x)) == x` always
//! holds.

use crate::error::{OtaError, Result};

/// A deterministic, reentrant byte-in/byte-out compressor.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 block compression with a little-endian `u32` original-size prefix,
/// so `decompress` never needs an externally tracked length. Chosen as the
/// concrete entropy coder because it is the compression crate already used
/// for this exact job (size-prefixed block compress/decompress) by
/// `re_log_encoding` elsewhere in this corpus.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = lz4_flex::block::compress(data);
        let mut out = Vec::with_capacity(4 + compressed.len());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 4 {
            return Err(OtaError::ExternalFailure {
                adapter: "lz4",
                diagnostic: format!("block too short to hold a size prefix: {} bytes", data.len()),
            });
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[..4]);
        let original_len = u32::from_le_bytes(len_bytes) as usize;
        lz4_flex::block::decompress(&data[4..], original_len).map_err(|e| OtaError::ExternalFailure {
            adapter: "lz4",
            diagnostic: e.to_string(),
        })
    }
}
