//! Series registry and the flattening step.
//!
//! While a container is being opened, its decoder registers every raw image
//! block it finds with a [`RegistryBuilder`], one descriptor and block table
//! per resolution level. [`RegistryBuilder::finalize`] then folds runs of
//! consecutive, identically shaped blocks into single timelapse series and
//! freezes the result into a [`SeriesRegistry`].
//!
//! ```text
//! raw blocks:   [A t=1] [A t=1] [A t=1] [B t=1] [A t=1] [A t=1]
//!                \______________________/  |    \_____________/
//! series:          0: A, size_t = 3      1: B    2: A, size_t = 2
//! ```
//!
//! A folded series keeps each raw block as a [`Segment`] so planes are still
//! read from the block they were stored in.

use std::sync::Arc;

use tracing::debug;

use crate::error::{CoordinateError, RegistryError};
use crate::layout::BlockTable;
use crate::model::{checked_u32, CoreDescriptor, Zct};

/// Handle to a raw block registered with a [`RegistryBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesHandle(usize);

impl SeriesHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

// =============================================================================
// Opening state
// =============================================================================

#[derive(Debug, Clone)]
struct RawLevel {
    descriptor: CoreDescriptor,
    table: Arc<BlockTable>,
}

#[derive(Debug, Clone)]
struct RawSeries {
    name: Option<String>,
    tile: u32,
    /// Tiles of one block are never folded together
    foldable: bool,
    levels: Vec<RawLevel>,
}

impl RawSeries {
    fn folds_with(&self, other: &RawSeries) -> bool {
        self.foldable
            && other.foldable
            && self.name == other.name
            && self.levels.len() == other.levels.len()
            && self
                .levels
                .iter()
                .zip(&other.levels)
                .all(|(a, b)| a.descriptor.same_shape(&b.descriptor))
    }
}

/// Registry in its opening state.
#[derive(Debug, Clone)]
pub struct RegistryBuilder {
    raw: Vec<RawSeries>,
    flatten: bool,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            raw: Vec::new(),
            flatten: true,
        }
    }

    /// Enable or disable folding of consecutive blocks. Enabled by default.
    pub fn with_flattening(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    /// Register an unnamed raw block with its full-resolution level.
    pub fn register(&mut self, descriptor: CoreDescriptor, table: BlockTable) -> SeriesHandle {
        self.push(None, 0, true, descriptor, Arc::new(table))
    }

    /// Register a raw block carrying a logical name.
    pub fn register_named(
        &mut self,
        name: impl Into<String>,
        descriptor: CoreDescriptor,
        table: BlockTable,
    ) -> SeriesHandle {
        self.push(Some(name.into()), 0, true, descriptor, Arc::new(table))
    }

    /// Register one series per tile of a tiled block table.
    pub fn register_tiles(
        &mut self,
        name: Option<String>,
        descriptor: CoreDescriptor,
        table: BlockTable,
    ) -> Vec<SeriesHandle> {
        let table = Arc::new(table);
        (0..table.max_tile_count())
            .map(|tile| self.push(name.clone(), tile, false, descriptor.clone(), Arc::clone(&table)))
            .collect()
    }

    /// Append a lower resolution level to a raw block.
    ///
    /// Returns the index of the new level. Levels must agree with level 0 on
    /// everything except the X/Y extent.
    pub fn add_resolution(
        &mut self,
        handle: SeriesHandle,
        descriptor: CoreDescriptor,
        table: BlockTable,
    ) -> Result<usize, RegistryError> {
        let count = self.raw.len();
        let raw = self
            .raw
            .get_mut(handle.0)
            .ok_or(RegistryError::UnknownSeries {
                handle: handle.0,
                count,
            })?;
        let resolution = raw.levels.len();
        check_level(&raw.levels[0].descriptor, &descriptor).map_err(|reason| {
            RegistryError::ResolutionMismatch {
                series: handle.0,
                resolution,
                reason,
            }
        })?;
        raw.levels.push(RawLevel {
            descriptor,
            table: Arc::new(table),
        });
        Ok(resolution)
    }

    /// Replace the descriptor of one level while still opening.
    pub fn replace_descriptor(
        &mut self,
        handle: SeriesHandle,
        resolution: usize,
        descriptor: CoreDescriptor,
    ) -> Result<(), RegistryError> {
        let count = self.raw.len();
        let raw = self
            .raw
            .get_mut(handle.0)
            .ok_or(RegistryError::UnknownSeries {
                handle: handle.0,
                count,
            })?;
        let levels = raw.levels.len();
        if resolution >= levels {
            return Err(RegistryError::UnknownResolution {
                series: handle.0,
                resolution,
                count: levels,
            });
        }
        if resolution > 0 {
            check_level(&raw.levels[0].descriptor, &descriptor).map_err(|reason| {
                RegistryError::ResolutionMismatch {
                    series: handle.0,
                    resolution,
                    reason,
                }
            })?;
        }
        raw.levels[resolution].descriptor = descriptor;
        Ok(())
    }

    /// Descriptor of a registered level.
    pub fn descriptor(&self, handle: SeriesHandle, resolution: usize) -> Option<&CoreDescriptor> {
        self.raw
            .get(handle.0)
            .and_then(|raw| raw.levels.get(resolution))
            .map(|level| &level.descriptor)
    }

    /// Fold consecutive blocks and freeze the registry.
    pub fn finalize(self) -> Result<SeriesRegistry, RegistryError> {
        let RegistryBuilder { raw, flatten } = self;
        let raw_count = raw.len();
        let mut runs: Vec<Vec<RawSeries>> = Vec::new();
        for raw in raw {
            let joins = flatten
                && runs
                    .last()
                    .and_then(|run| run.last())
                    .is_some_and(|last| last.folds_with(&raw));
            if joins {
                if let Some(run) = runs.last_mut() {
                    run.push(raw);
                    continue;
                }
            }
            runs.push(vec![raw]);
        }

        let mut series = Vec::with_capacity(runs.len());
        let mut raw_to_series = Vec::with_capacity(raw_count);
        for run in runs {
            let index = series.len();
            raw_to_series.extend(std::iter::repeat(index).take(run.len()));
            series.push(fold_run(run)?);
        }

        debug!(
            raw_blocks = raw_count,
            series = series.len(),
            "registry finalized"
        );

        Ok(SeriesRegistry {
            series,
            raw_to_series,
        })
    }

    fn push(
        &mut self,
        name: Option<String>,
        tile: u32,
        foldable: bool,
        descriptor: CoreDescriptor,
        table: Arc<BlockTable>,
    ) -> SeriesHandle {
        let handle = SeriesHandle(self.raw.len());
        self.raw.push(RawSeries {
            name,
            tile,
            foldable,
            levels: vec![RawLevel { descriptor, table }],
        });
        handle
    }
}

/// Check that `level` describes the same logical image as `base`.
fn check_level(base: &CoreDescriptor, level: &CoreDescriptor) -> Result<(), String> {
    if base.plane_sizes() != level.plane_sizes() {
        return Err(format!(
            "Z/C/T sizes {:?} differ from {:?}",
            level.plane_sizes(),
            base.plane_sizes()
        ));
    }
    if base.pixel_type() != level.pixel_type() || base.samples_per_pixel() != level.samples_per_pixel() {
        return Err("pixel format differs".to_string());
    }
    Ok(())
}

/// Build one logical series from a run of foldable raw blocks.
fn fold_run(run: Vec<RawSeries>) -> Result<Series, RegistryError> {
    let name = run[0].name.clone();
    let level_count = run[0].levels.len();

    let mut levels = Vec::with_capacity(level_count);
    for resolution in 0..level_count {
        let mut segments = Vec::with_capacity(run.len());
        let mut size_t = 0u64;
        for raw in &run {
            let level = &raw.levels[resolution];
            segments.push(Segment {
                descriptor: level.descriptor.clone(),
                table: Arc::clone(&level.table),
                tile: raw.tile,
                t_start: checked_u32("size_t", size_t)?,
            });
            size_t += level.descriptor.size_t() as u64;
        }

        let first = &run[0].levels[resolution].descriptor;
        let descriptor = if run.len() == 1 {
            first.clone()
        } else {
            first.with_size_t(checked_u32("size_t", size_t)?)?
        };
        levels.push(Level {
            descriptor,
            segments,
        });
    }

    Ok(Series { name, levels })
}

// =============================================================================
// Frozen state
// =============================================================================

/// One raw block inside a logical series.
#[derive(Debug, Clone)]
pub struct Segment {
    descriptor: CoreDescriptor,
    table: Arc<BlockTable>,
    tile: u32,
    t_start: u32,
}

impl Segment {
    /// Descriptor of the raw block, with its own T extent.
    pub fn descriptor(&self) -> &CoreDescriptor {
        &self.descriptor
    }

    pub fn table(&self) -> &BlockTable {
        &self.table
    }

    pub fn tile(&self) -> u32 {
        self.tile
    }

    /// First timepoint of the logical series stored in this block.
    pub fn t_start(&self) -> u32 {
        self.t_start
    }
}

/// One resolution level of a logical series.
#[derive(Debug, Clone)]
pub struct Level {
    descriptor: CoreDescriptor,
    segments: Vec<Segment>,
}

impl Level {
    pub fn descriptor(&self) -> &CoreDescriptor {
        &self.descriptor
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segment holding timepoint `zct.t` and the plane index inside it.
    pub fn resolve(&self, zct: Zct) -> Result<(&Segment, u32), CoordinateError> {
        let index = self
            .segments
            .partition_point(|s| s.t_start <= zct.t)
            .saturating_sub(1);
        let segment = &self.segments[index];
        let local = Zct::new(zct.z, zct.c, zct.t - segment.t_start);
        let plane = segment.descriptor.flat_index(local)?;
        Ok((segment, plane))
    }
}

/// A logical series: one or more resolution levels of the same image.
#[derive(Debug, Clone)]
pub struct Series {
    name: Option<String>,
    levels: Vec<Level>,
}

impl Series {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn resolution_count(&self) -> usize {
        self.levels.len()
    }
}

/// Frozen series registry shared by every reader over one container.
#[derive(Debug, Clone)]
pub struct SeriesRegistry {
    series: Vec<Series>,
    raw_to_series: Vec<usize>,
}

impl SeriesRegistry {
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn series(&self, series: usize) -> Result<&Series, RegistryError> {
        self.series.get(series).ok_or(RegistryError::UnknownSeries {
            handle: series,
            count: self.series.len(),
        })
    }

    pub fn resolution_count(&self, series: usize) -> Result<usize, RegistryError> {
        Ok(self.series(series)?.resolution_count())
    }

    pub fn level(&self, series: usize, resolution: usize) -> Result<&Level, RegistryError> {
        let entry = self.series(series)?;
        entry
            .levels
            .get(resolution)
            .ok_or(RegistryError::UnknownResolution {
                series,
                resolution,
                count: entry.levels.len(),
            })
    }

    pub fn descriptor(&self, series: usize, resolution: usize) -> Result<&CoreDescriptor, RegistryError> {
        Ok(self.level(series, resolution)?.descriptor())
    }

    /// Logical series a raw block ended up in.
    pub fn series_of(&self, handle: SeriesHandle) -> Option<usize> {
        self.raw_to_series.get(handle.0).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Series> {
        self.series.iter()
    }
}
