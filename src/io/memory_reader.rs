use async_trait::async_trait;
use bytes::Bytes;

use super::range_reader::{check_range, RangeReader};
use crate::error::IoError;

/// In-memory implementation of [`RangeReader`].
///
/// Useful for containers that were already fetched whole, and for tests.
/// Reads are zero-copy slices of the shared buffer.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    data: Bytes,
    identifier: String,
}

impl MemoryReader {
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }

    /// The whole buffer.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

#[async_trait]
impl RangeReader for MemoryReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size())?;
        if len == 0 {
            return Ok(Bytes::new());
        }
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
