use serde::{Deserialize, Serialize};

use crate::error::LayoutError;

/// One contiguous run of pixel data in storage.
///
/// A block holds `tile_count` tiles. When there is more than one tile, frames
/// of the tiles are interleaved: a group of frames for tile 0, then the same
/// frames for tile 1, and so on, each group `byte_increment_per_tile` bytes
/// long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    pub base_offset: u64,
    pub tile_count: u32,
    /// Ignored when `tile_count == 1`
    pub byte_increment_per_tile: u64,
    /// Planes per tile stored in this block. `None` means every remaining
    /// plane of the image.
    pub plane_count: Option<u32>,
}

impl BlockDescriptor {
    /// An untiled block starting at `base_offset`.
    pub fn new(base_offset: u64) -> Self {
        Self {
            base_offset,
            tile_count: 1,
            byte_increment_per_tile: 0,
            plane_count: None,
        }
    }

    /// A block of `tile_count` interleaved tiles.
    pub fn tiled(base_offset: u64, tile_count: u32, byte_increment_per_tile: u64) -> Self {
        Self {
            base_offset,
            tile_count,
            byte_increment_per_tile,
            plane_count: None,
        }
    }

    pub fn with_plane_count(mut self, plane_count: u32) -> Self {
        self.plane_count = Some(plane_count);
        self
    }

    pub fn is_tiled(&self) -> bool {
        self.tile_count > 1
    }
}

/// Ordered blocks describing where the planes of one series/resolution live.
///
/// Built once while the container is opened and never mutated afterwards.
/// Deserialized tables pass the same checks as [`BlockTable::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredBlockTable")]
pub struct BlockTable {
    blocks: Vec<BlockDescriptor>,
    end_pointer: Option<u64>,
}

/// Unvalidated serialized form of a [`BlockTable`].
#[derive(Deserialize)]
struct StoredBlockTable {
    blocks: Vec<BlockDescriptor>,
    end_pointer: Option<u64>,
}

impl TryFrom<StoredBlockTable> for BlockTable {
    type Error = LayoutError;

    fn try_from(stored: StoredBlockTable) -> Result<Self, Self::Error> {
        let table = Self::new(stored.blocks)?;
        match stored.end_pointer {
            Some(end_pointer) => table.with_end_pointer(end_pointer),
            None => Ok(table),
        }
    }
}

impl BlockTable {
    /// Validate and wrap a list of blocks.
    pub fn new(blocks: Vec<BlockDescriptor>) -> Result<Self, LayoutError> {
        if blocks.is_empty() {
            return Err(LayoutError::EmptyTable);
        }

        let mut previous: Option<u64> = None;
        for (index, block) in blocks.iter().enumerate() {
            if block.tile_count == 0 {
                return Err(LayoutError::ZeroTileCount { index });
            }
            if block.is_tiled() && block.byte_increment_per_tile == 0 {
                return Err(LayoutError::MissingTileIncrement {
                    index,
                    tile_count: block.tile_count,
                });
            }
            if let Some(previous) = previous {
                if block.base_offset < previous {
                    return Err(LayoutError::UnorderedBlocks {
                        index,
                        offset: block.base_offset,
                        previous,
                    });
                }
            }
            previous = Some(block.base_offset);
        }

        Ok(Self {
            blocks,
            end_pointer: None,
        })
    }

    /// Build a table from raw per-plane offsets, one untiled block per plane.
    pub fn from_plane_offsets(offsets: &[u64]) -> Result<Self, LayoutError> {
        Self::new(
            offsets
                .iter()
                .map(|&offset| BlockDescriptor::new(offset).with_plane_count(1))
                .collect(),
        )
    }

    /// Set the end of pixel data, used as the boundary of the last block.
    pub fn with_end_pointer(mut self, end_pointer: u64) -> Result<Self, LayoutError> {
        let last = self.blocks.last().ok_or(LayoutError::EmptyTable)?.base_offset;
        if end_pointer < last {
            return Err(LayoutError::UnorderedBlocks {
                index: self.blocks.len(),
                offset: end_pointer,
                previous: last,
            });
        }
        self.end_pointer = Some(end_pointer);
        Ok(self)
    }

    pub fn blocks(&self) -> &[BlockDescriptor] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false; a table holds at least one block.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn end_pointer(&self) -> Option<u64> {
        self.end_pointer
    }

    /// Largest tile count of any block.
    pub fn max_tile_count(&self) -> u32 {
        self.blocks.iter().map(|b| b.tile_count).max().unwrap_or(1)
    }

    /// Start of the data following block `index`: the next block, the end
    /// pointer, or `storage_len` if neither exists.
    pub fn boundary_after(&self, index: usize, storage_len: u64) -> u64 {
        match self.blocks.get(index + 1) {
            Some(next) => next.base_offset,
            None => self.end_pointer.unwrap_or(storage_len),
        }
    }
}
