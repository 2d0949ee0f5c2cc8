use crate::error::CacheError;

/// Compression trait for the compressed tier
pub trait Compression: Send + Sync + 'static {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError>;
}

/// No-op compression (passthrough)
#[derive(Debug, Clone)]
pub struct NoCompression;

impl Compression for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        Ok(data.to_vec())
    }
}

/// zstd compression
#[derive(Debug, Clone)]
pub struct ZstdCompression {
    level: i32,
}

impl ZstdCompression {
    pub fn new() -> Self {
        Self { level: 3 }
    }

    pub fn with_level(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
        }
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Default for ZstdCompression {
    fn default() -> Self {
        Self::new()
    }
}

impl Compression for ZstdCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        zstd::encode_all(data, self.level).map_err(|e| CacheError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        zstd::decode_all(data).map_err(|e| CacheError::Decompression(e.to_string()))
    }
}
