//! Stable on-disk image of a buffer.
//!
//! Persistence via rkyv archives. The image carries the record layout and
//! the flat row-major data; `load` validates the archive before use.

use std::path::Path;

use rkyv::{Archive, Deserialize, Serialize};

use super::Buffer;
use crate::error::{EngineError, Result};

/// Format tag written into every image.
pub const IMAGE_VERSION: u32 = 1;

#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[rkyv(derive(Debug))]
pub struct BufferImage {
    pub version: u32,
    /// Elements per record.
    pub record_len: u64,
    /// Number of records.
    pub count: u64,
    /// Row-major record data, `record_len * count` values.
    pub data: Vec<f64>,
}

impl BufferImage {
    pub fn of(buffer: &Buffer) -> Self {
        Self {
            version: IMAGE_VERSION,
            record_len: buffer.record_len() as u64,
            count: buffer.count() as u64,
            data: buffer.as_slice().to_vec(),
        }
    }

    pub fn into_buffer(self) -> Result<Buffer> {
        if self.version != IMAGE_VERSION {
            return Err(EngineError::resource(format!(
                "buffer image version {} (expected {})",
                self.version, IMAGE_VERSION
            )));
        }
        let expected = self.record_len.checked_mul(self.count);
        if expected != Some(self.data.len() as u64) {
            return Err(EngineError::resource(format!(
                "buffer image holds {} value(s) for {} x {} records",
                self.data.len(),
                self.count,
                self.record_len
            )));
        }
        if self.record_len == 0 {
            return Ok(Buffer::new(0, self.count as usize));
        }
        Buffer::from_vec(self.record_len as usize, self.data)
    }
}

pub fn to_bytes(buffer: &Buffer) -> Result<Vec<u8>> {
    let image = BufferImage::of(buffer);
    rkyv::to_bytes::<rkyv::rancor::Error>(&image)
        .map(|bytes| bytes.into_vec())
        .map_err(|e| EngineError::resource(format!("cannot serialize buffer: {}", e)))
}

pub fn from_bytes(bytes: &[u8]) -> Result<Buffer> {
    // Archives must be read from aligned memory.
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    let image = rkyv::from_bytes::<BufferImage, rkyv::rancor::Error>(&aligned)
        .map_err(|e| EngineError::resource(format!("invalid buffer image: {}", e)))?;
    image.into_buffer()
}

pub fn save(buffer: &Buffer, path: &Path) -> Result<()> {
    let bytes = to_bytes(buffer)?;
    std::fs::write(path, bytes)
        .map_err(|e| EngineError::resource(format!("cannot write '{}': {}", path.display(), e)))?;
    tracing::debug!(
        path = %path.display(),
        records = buffer.count(),
        "saved buffer image"
    );
    Ok(())
}

pub fn load(path: &Path) -> Result<Buffer> {
    let bytes = std::fs::read(path)
        .map_err(|e| EngineError::resource(format!("cannot read '{}': {}", path.display(), e)))?;
    from_bytes(&bytes)
}
