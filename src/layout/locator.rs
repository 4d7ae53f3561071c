//! Block locator: plane and tile to byte ranges.
//!
//! The locator turns a flat plane index, a tile index and a window into a
//! [`ReadPlan`] describing where the window's rows live in storage.
//!
//! # Block geometry
//!
//! ```text
//! untiled block (tile_count == 1), rows padded by row_skip bytes:
//!
//!   base_offset
//!   │
//!   ▼
//!   ┌──────────── row_bytes ───────────┬ skip ┐
//!   │ plane 0, row 0                    │//////│
//!   │ plane 0, row 1                    │//////│
//!   │ ...                               │      │
//!   │ plane 1, row 0                    │//////│
//!   └───────────────────────────────────┴──────┘
//!
//! tiled block (tile_count == 4, 3 frames per tile):
//!
//!   base_offset
//!   │  ◄──── byte_increment_per_tile ────►
//!   ▼
//!   [t0: f0 f1 f2][t1: f0 f1 f2][t2: f0 f1 f2][t3: f0 f1 f2]   frames 0..3
//!   [t0: f3 f4 f5][t1: f3 f4 f5][t2: f3 f4 f5][t3: f3 f4 f5]   frames 3..6
//! ```
//!
//! The block boundary is the next block's base offset, the table's end
//! pointer, or the storage length. Any excess between the end of the block's
//! pixel data and that boundary is spread over the rows as padding, unless the
//! row width is a multiple of the row alignment.
//!
//! Multi-sample planes that are not interleaved are stored as one sub-plane
//! per sample; every sub-plane row is padded the same way.
//!
//! A plane whose bytes extend past the storage length is reported as
//! [`LocateOutcome::Truncated`]. Inconsistent tables are [`LayoutError`]s.

use crate::error::LayoutError;
use crate::model::CoreDescriptor;

use super::block_table::{BlockDescriptor, BlockTable};

/// Default row alignment below which rows may carry padding.
pub const DEFAULT_ROW_ALIGNMENT: u32 = 4;

// =============================================================================
// Requests and plans
// =============================================================================

/// A rectangular window of a plane, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// The whole plane.
    pub fn full(descriptor: &CoreDescriptor) -> Self {
        Self::new(0, 0, descriptor.size_x(), descriptor.size_y())
    }

    /// Check that the window is non-empty and lies within the plane.
    pub fn check(&self, size_x: u32, size_y: u32) -> Result<(), String> {
        if self.w == 0 || self.h == 0 {
            return Err(format!("empty window {}x{}", self.w, self.h));
        }
        let fits_x = self.x.checked_add(self.w).is_some_and(|end| end <= size_x);
        let fits_y = self.y.checked_add(self.h).is_some_and(|end| end <= size_y);
        if !fits_x || !fits_y {
            return Err(format!(
                "window {}x{} at ({}, {}) exceeds plane {}x{}",
                self.w, self.h, self.x, self.y, size_x, size_y
            ));
        }
        Ok(())
    }

    pub fn is_full(&self, size_x: u32, size_y: u32) -> bool {
        self.x == 0 && self.y == 0 && self.w == size_x && self.h == size_y
    }
}

/// Where the rows of a window live in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPlan {
    /// First byte of the plane
    pub plane_offset: u64,
    /// Distance between consecutive planes of the same tile, padding included
    pub plane_stride: u64,
    /// First byte of the window
    pub byte_offset: u64,
    /// Distance between consecutive rows
    pub row_stride: u64,
    /// Bytes copied from each row
    pub bytes_per_row: u64,
    /// Padding bytes after each stored row
    pub row_skip: u64,
    /// Number of rows in the window
    pub rows: u32,
    /// Sample planes stored one after another; 1 unless samples are planar
    pub sample_planes: u32,
    /// Distance between consecutive sample planes
    pub sample_stride: u64,
}

impl ReadPlan {
    /// Storage offset of window row `row` of sample plane `sample`.
    pub fn row_offset(&self, sample: u32, row: u32) -> u64 {
        self.byte_offset + sample as u64 * self.sample_stride + row as u64 * self.row_stride
    }

    /// Whether the window is one contiguous byte range.
    pub fn is_contiguous(&self) -> bool {
        let rows_contiguous = self.rows <= 1 || self.row_stride == self.bytes_per_row;
        let samples_contiguous =
            self.sample_planes <= 1 || self.sample_stride == self.bytes_per_row * self.rows as u64;
        rows_contiguous && samples_contiguous
    }

    /// Bytes from the first byte of the window to its last byte.
    pub fn span(&self) -> u64 {
        if self.rows == 0 || self.sample_planes == 0 {
            return 0;
        }
        (self.sample_planes as u64 - 1) * self.sample_stride
            + (self.rows as u64 - 1) * self.row_stride
            + self.bytes_per_row
    }

    /// Size of the materialized window.
    pub fn output_len(&self) -> u64 {
        self.bytes_per_row * self.rows as u64 * self.sample_planes as u64
    }
}

/// A plane whose bytes are not all present in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatedPlane {
    pub plane_offset: u64,
    pub plane_end: u64,
    pub storage_len: u64,
}

/// Result of locating a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateOutcome {
    Ready(ReadPlan),
    Truncated(TruncatedPlane),
}

// =============================================================================
// Locator
// =============================================================================

/// How one plane is laid out in rows.
#[derive(Debug, Clone, Copy)]
struct RowLayout {
    /// Bytes of pixel data in one stored row
    row_bytes: u64,
    /// Stored rows per plane
    rows: u64,
    /// Bytes per pixel within one stored row
    pixel_bytes: u64,
    sample_planes: u32,
}

impl RowLayout {
    fn of(descriptor: &CoreDescriptor) -> Self {
        let spp = descriptor.samples_per_pixel();
        let size_x = descriptor.size_x() as u64;
        let size_y = descriptor.size_y() as u64;
        if spp > 1 && !descriptor.is_interleaved() {
            let sample_bytes = descriptor.pixel_type().bytes_per_sample() as u64;
            Self {
                row_bytes: size_x * sample_bytes,
                rows: size_y * spp as u64,
                pixel_bytes: sample_bytes,
                sample_planes: spp,
            }
        } else {
            Self {
                row_bytes: descriptor.row_bytes(),
                rows: size_y,
                pixel_bytes: descriptor.bytes_per_pixel(),
                sample_planes: 1,
            }
        }
    }
}

/// Layout of one block once the storage boundary is known.
#[derive(Debug, Clone, Copy)]
struct BlockGeometry {
    row_skip: u64,
    row_stride: u64,
    plane_stride: u64,
    /// Frames of one tile stored back to back; `None` for untiled blocks
    frames_per_tile: Option<u64>,
    /// Bytes of pixel data in the block, padding included
    data_len: u64,
}

/// A block together with the planes it covers.
#[derive(Debug, Clone, Copy)]
struct PlaneRange<'a> {
    index: usize,
    block: &'a BlockDescriptor,
    first_plane: u64,
    plane_count: u64,
}

/// Resolves planes of one descriptor against one block table.
#[derive(Debug, Clone, Copy)]
pub struct BlockLocator<'a> {
    descriptor: &'a CoreDescriptor,
    table: &'a BlockTable,
    row_alignment: u32,
}

impl<'a> BlockLocator<'a> {
    pub fn new(descriptor: &'a CoreDescriptor, table: &'a BlockTable, row_alignment: u32) -> Self {
        Self {
            descriptor,
            table,
            row_alignment,
        }
    }

    /// Locate `region` of plane `plane`, tile `tile`.
    pub fn locate(
        &self,
        plane: u32,
        tile: u32,
        region: Region,
        storage_len: u64,
    ) -> Result<LocateOutcome, LayoutError> {
        let range = self.block_for(plane)?;
        let geometry = self.geometry(&range, storage_len)?;
        let plane_offset =
            self.plane_offset(&range, &geometry, plane as u64 - range.first_plane, tile)?;

        let layout = RowLayout::of(self.descriptor);
        let plane_end = (layout.rows - 1)
            .checked_mul(geometry.row_stride)
            .and_then(|v| v.checked_add(layout.row_bytes))
            .and_then(|v| v.checked_add(plane_offset))
            .ok_or(LayoutError::Overflow { what: "plane end" })?;

        if plane_end > storage_len {
            return Ok(LocateOutcome::Truncated(TruncatedPlane {
                plane_offset,
                plane_end,
                storage_len,
            }));
        }

        let byte_offset = (region.y as u64)
            .checked_mul(geometry.row_stride)
            .and_then(|v| v.checked_add(region.x as u64 * layout.pixel_bytes))
            .and_then(|v| v.checked_add(plane_offset))
            .ok_or(LayoutError::Overflow { what: "window offset" })?;

        Ok(LocateOutcome::Ready(ReadPlan {
            plane_offset,
            plane_stride: geometry.plane_stride,
            byte_offset,
            row_stride: geometry.row_stride,
            bytes_per_row: region.w as u64 * layout.pixel_bytes,
            row_skip: geometry.row_skip,
            rows: region.h,
            sample_planes: layout.sample_planes,
            sample_stride: geometry.row_stride * self.descriptor.size_y() as u64,
        }))
    }

    /// Frames of one tile stored back to back in the block holding `plane`.
    ///
    /// Returns `None` for untiled blocks.
    pub fn frames_per_tile(&self, plane: u32, storage_len: u64) -> Result<Option<u64>, LayoutError> {
        let range = self.block_for(plane)?;
        Ok(self.geometry(&range, storage_len)?.frames_per_tile)
    }

    /// Byte ranges of every block's pixel data, clamped to the storage length.
    pub fn block_ranges(&self, storage_len: u64) -> Result<Vec<(u64, u64)>, LayoutError> {
        let mut ranges = Vec::with_capacity(self.table.len());
        for range in self.plane_ranges() {
            if range.plane_count == 0 {
                continue;
            }
            let geometry = self.geometry(&range, storage_len)?;
            let start = range.block.base_offset;
            let len = geometry.data_len.min(storage_len.saturating_sub(start));
            if len > 0 {
                ranges.push((start, len));
            }
        }
        Ok(ranges)
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    fn plane_ranges(&self) -> impl Iterator<Item = PlaneRange<'a>> + 'a {
        let image_count = self.descriptor.image_count() as u64;
        let mut first_plane = 0u64;
        self.table
            .blocks()
            .iter()
            .enumerate()
            .map(move |(index, block)| {
                let remaining = image_count.saturating_sub(first_plane);
                let plane_count = block.plane_count.map_or(remaining, u64::from);
                let range = PlaneRange {
                    index,
                    block,
                    first_plane,
                    plane_count,
                };
                first_plane = first_plane.saturating_add(plane_count);
                range
            })
    }

    fn block_for(&self, plane: u32) -> Result<PlaneRange<'a>, LayoutError> {
        let plane64 = plane as u64;
        let mut covered = 0u64;
        for range in self.plane_ranges() {
            if plane64 < range.first_plane + range.plane_count {
                return Ok(range);
            }
            covered = range.first_plane + range.plane_count;
        }
        Err(LayoutError::PlaneNotCovered { plane, covered })
    }

    fn geometry(&self, range: &PlaneRange<'_>, storage_len: u64) -> Result<BlockGeometry, LayoutError> {
        let block = range.block;
        let plane_size = self.descriptor.plane_size()?;
        let layout = RowLayout::of(self.descriptor);
        let tiles = block.tile_count as u64;

        let required = plane_size
            .checked_mul(range.plane_count)
            .and_then(|v| v.checked_mul(tiles))
            .ok_or(LayoutError::Overflow { what: "block size" })?;
        let block_end = block
            .base_offset
            .checked_add(required)
            .ok_or(LayoutError::Overflow { what: "block end" })?;
        let boundary = self.table.boundary_after(range.index, storage_len);

        let row_skip = if boundary >= block_end {
            let aligned = self.row_alignment != 0 && self.descriptor.size_x() % self.row_alignment == 0;
            let rows = layout.rows * range.plane_count * tiles;
            if aligned || rows == 0 {
                0
            } else {
                (boundary - block_end) / rows
            }
        } else if range.index + 1 < self.table.len() {
            return Err(LayoutError::OverlappingBlocks {
                index: range.index,
                required,
                available: boundary.saturating_sub(block.base_offset),
            });
        } else {
            // last block running past the storage end: truncation, not padding
            0
        };

        let row_stride = layout
            .row_bytes
            .checked_add(row_skip)
            .ok_or(LayoutError::Overflow { what: "row stride" })?;
        let plane_stride = row_stride
            .checked_mul(layout.rows)
            .ok_or(LayoutError::Overflow { what: "plane stride" })?;

        let frames_per_tile = if block.is_tiled() {
            let increment = block.byte_increment_per_tile;
            if plane_stride == 0 || increment % plane_stride != 0 {
                return Err(LayoutError::UnevenTileIncrement {
                    byte_increment: increment,
                    plane_size: plane_stride,
                });
            }
            Some(increment / plane_stride)
        } else {
            None
        };

        let data_len = plane_stride
            .checked_mul(range.plane_count)
            .and_then(|v| v.checked_mul(tiles))
            .ok_or(LayoutError::Overflow { what: "block size" })?;

        Ok(BlockGeometry {
            row_skip,
            row_stride,
            plane_stride,
            frames_per_tile,
            data_len,
        })
    }

    fn plane_offset(
        &self,
        range: &PlaneRange<'_>,
        geometry: &BlockGeometry,
        local_plane: u64,
        tile: u32,
    ) -> Result<u64, LayoutError> {
        let block = range.block;
        if tile >= block.tile_count {
            return Err(LayoutError::TileOutOfRange {
                tile,
                tile_count: block.tile_count,
            });
        }

        let relative = match geometry.frames_per_tile {
            None => local_plane.checked_mul(geometry.plane_stride),
            Some(frames_per_tile) => {
                let increment = block.byte_increment_per_tile;
                let outside = local_plane / frames_per_tile;
                let inside = local_plane % frames_per_tile;
                outside
                    .checked_mul(increment)
                    .and_then(|v| v.checked_mul(block.tile_count as u64))
                    .and_then(|v| v.checked_add((tile as u64).checked_mul(increment)?))
                    .and_then(|v| v.checked_add(inside.checked_mul(geometry.plane_stride)?))
            }
        };

        relative
            .and_then(|v| v.checked_add(block.base_offset))
            .ok_or(LayoutError::Overflow { what: "plane offset" })
    }
}
