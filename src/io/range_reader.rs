use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from the storage behind an image container.
///
/// The plane reader never assumes the whole file is in memory: every pixel
/// request is turned into one or more positioned reads. Implementations must
/// be thread-safe so several readers can be opened over the same storage.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Total size of the storage in bytes.
    ///
    /// This is the length used for truncation checks.
    fn size(&self) -> u64;

    /// A unique identifier for this resource, used in log messages.
    fn identifier(&self) -> &str;
}

/// Check that `offset..offset + len` lies within a resource of `size` bytes.
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> Result<(), IoError> {
    let out_of_bounds = IoError::RangeOutOfBounds {
        offset,
        requested: len as u64,
        size,
    };
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(out_of_bounds),
    }
}

// =============================================================================
// Byte order
// =============================================================================
//
// Containers in this domain come in both byte orders, declared either by the
// container header or by the descriptor. Discovery scans read length fields
// with these helpers, and the plane reader uses `normalize` to bring samples
// into the host order.

/// Byte order of multi-byte values in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Byte order of the machine running this code.
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }

    /// Byte order named by a descriptor's little-endian flag.
    pub fn from_little_endian(little_endian: bool) -> Self {
        if little_endian {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }

    /// Read a u16 from the start of a byte slice.
    ///
    /// # Panics
    /// Panics if the slice has fewer than 2 bytes.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    /// Read a u32 from the start of a byte slice.
    ///
    /// # Panics
    /// Panics if the slice has fewer than 4 bytes.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    /// Read a u64 from the start of a byte slice.
    ///
    /// # Panics
    /// Panics if the slice has fewer than 8 bytes.
    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }

    /// Rewrite samples of `sample_size` bytes from this order into `target`.
    ///
    /// A trailing partial sample is left untouched.
    pub fn normalize(self, data: &mut [u8], sample_size: usize, target: ByteOrder) {
        if self == target || sample_size < 2 {
            return;
        }
        for sample in data.chunks_exact_mut(sample_size) {
            sample.reverse();
        }
    }
}
