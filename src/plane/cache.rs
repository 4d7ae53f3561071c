//! Single-slot block cache.
//!
//! Many containers store all channels of a Z position next to each other, and
//! viewers tend to walk through Z at a fixed timepoint. The cache therefore
//! holds one multi-Z, all-channel block of one (series, resolution,
//! timepoint) at a time:
//!
//! ```text
//! CacheEntry (z_range_start = 4, z_range_len = 3, 2 channels)
//! ┌────────────┬────────────┬────────────┬────────────┬────────────┬────────────┐
//! │ z=4, c=0   │ z=4, c=1   │ z=5, c=0   │ z=5, c=1   │ z=6, c=0   │ z=6, c=1   │
//! └────────────┴────────────┴────────────┴────────────┴────────────┴────────────┘
//!  ◄─ channel_stride ─►
//! ```
//!
//! A request outside the current key or Z range drops the entry; the reader
//! then fills a new one. Whether a (series, resolution) uses the cache at all
//! is a static size check made once: if one timepoint's worth of planes does
//! not fit the byte budget, reads bypass the cache.

use std::collections::HashMap;

use crate::model::CoreDescriptor;

/// Default cache budget: 1 GiB.
pub const DEFAULT_CACHE_BUDGET: u64 = 1 << 30;

/// Identity of a cached block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub series: usize,
    pub resolution: usize,
    pub timepoint: u32,
}

/// A cached plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedPlane<'a> {
    Present(&'a [u8]),
    /// The plane was not loaded: it lies beyond the end of storage or could
    /// not be located
    Missing,
}

/// One block of planes: every channel of `z_range_len` consecutive Z positions.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: CacheKey,
    z_range_start: u32,
    z_range_len: u32,
    channel_count: u32,
    channel_stride: usize,
    bytes: Vec<u8>,
    present: Vec<bool>,
}

impl CacheEntry {
    /// A zeroed entry with every plane marked missing.
    pub fn new(
        key: CacheKey,
        z_range_start: u32,
        z_range_len: u32,
        channel_count: u32,
        channel_stride: usize,
    ) -> Self {
        let planes = z_range_len as usize * channel_count as usize;
        Self {
            key,
            z_range_start,
            z_range_len,
            channel_count,
            channel_stride,
            bytes: vec![0; planes * channel_stride],
            present: vec![false; planes],
        }
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn z_range(&self) -> std::ops::Range<u32> {
        self.z_range_start..self.z_range_start + self.z_range_len
    }

    pub fn channel_stride(&self) -> usize {
        self.channel_stride
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// All channels of Z position `z`, back to back.
    pub fn slab(&self, z: u32) -> Option<&[u8]> {
        let index = self.slot(z, 0)?;
        let start = index * self.channel_stride;
        Some(&self.bytes[start..start + self.channel_count as usize * self.channel_stride])
    }

    pub fn plane(&self, z: u32, c: u32) -> Option<CachedPlane<'_>> {
        let index = self.slot(z, c)?;
        if !self.present[index] {
            return Some(CachedPlane::Missing);
        }
        let start = index * self.channel_stride;
        Some(CachedPlane::Present(&self.bytes[start..start + self.channel_stride]))
    }

    /// Storage for plane (z, c); marks it present.
    pub fn plane_mut(&mut self, z: u32, c: u32) -> Option<&mut [u8]> {
        let index = self.slot(z, c)?;
        self.present[index] = true;
        let start = index * self.channel_stride;
        Some(&mut self.bytes[start..start + self.channel_stride])
    }

    fn slot(&self, z: u32, c: u32) -> Option<usize> {
        if !self.z_range().contains(&z) || c >= self.channel_count {
            return None;
        }
        Some((z - self.z_range_start) as usize * self.channel_count as usize + c as usize)
    }
}

/// Single-slot cache with a static per-(series, resolution) bypass decision.
#[derive(Debug)]
pub struct BlockCache {
    budget: u64,
    entry: Option<CacheEntry>,
    bypass: HashMap<(usize, usize), bool>,
}

impl BlockCache {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            entry: None,
            bypass: HashMap::new(),
        }
    }

    /// A cache that bypasses every read.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Whether reads of (series, resolution) skip the cache.
    ///
    /// True when `plane_size * size_z * effective_size_c` exceeds the budget.
    /// Computed once per (series, resolution).
    pub fn bypasses(&mut self, series: usize, resolution: usize, descriptor: &CoreDescriptor) -> bool {
        let budget = self.budget;
        *self.bypass.entry((series, resolution)).or_insert_with(|| {
            let volume = descriptor.plane_size().ok().and_then(|plane| {
                plane
                    .checked_mul(descriptor.size_z() as u64)?
                    .checked_mul(descriptor.effective_size_c() as u64)
            });
            volume.map_or(true, |volume| volume > budget)
        })
    }

    /// All channels of Z position `z`, if the entry covers it.
    pub fn get(&self, series: usize, resolution: usize, timepoint: u32, z: u32) -> Option<&[u8]> {
        self.covering(
            CacheKey {
                series,
                resolution,
                timepoint,
            },
            z,
        )
        .and_then(|entry| entry.slab(z))
    }

    /// The entry holding `key` at `z`, if any.
    pub fn covering(&self, key: CacheKey, z: u32) -> Option<&CacheEntry> {
        self.entry
            .as_ref()
            .filter(|entry| entry.key == key && entry.z_range().contains(&z))
    }

    /// Replace the live entry. Entries larger than the budget are dropped.
    pub fn fill(&mut self, entry: CacheEntry) -> bool {
        if entry.len() as u64 > self.budget {
            self.entry = None;
            return false;
        }
        self.entry = Some(entry);
        true
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }
}

/// Z positions cached together for Z position `z`.
///
/// The whole Z stack for untiled blocks, otherwise runs aligned to the
/// block's frames per tile.
pub fn z_block(z: u32, size_z: u32, frames_per_tile: Option<u64>) -> (u32, u32) {
    let len = match frames_per_tile {
        None => size_z,
        Some(frames) => frames.clamp(1, size_z.max(1) as u64) as u32,
    };
    let start = (z / len) * len;
    (start, len.min(size_z - start))
}
