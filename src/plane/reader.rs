//! Plane reader: the entry point for pixel requests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          PlaneReader                             │
//! │  read_plane(series, resolution, plane, region)                   │
//! │   1. validate request      4. cache lookup / fill                │
//! │   2. plane -> (z, c, t)    5. direct windowed read on bypass     │
//! │   3. pick segment + tile   6. byte order, BGR, de-interleave     │
//! └──────────────────────────────────────────────────────────────────┘
//!        │                   │                    │
//!        ▼                   ▼                    ▼
//!  ┌───────────────┐  ┌──────────────┐   ┌─────────────────┐
//!  │ SeriesRegistry│  │ BlockLocator │   │   BlockCache    │
//!  └───────────────┘  └──────────────┘   └─────────────────┘
//!                            │
//!                            ▼
//!                     ┌──────────────┐
//!                     │ RangeReader  │
//!                     └──────────────┘
//! ```
//!
//! A reader owns one cache and takes `&mut self` for reads; open further
//! readers over the same container with [`PlaneReader::open_another`].
//! Planes beyond the end of storage come back as zero-filled buffers flagged
//! as truncated, never as errors.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ReaderConfig;
use crate::error::{LayoutError, PlaneError};
use crate::io::{ByteOrder, RangeReader};
use crate::layout::{BlockLocator, LocateOutcome, ReadPlan, Region};
use crate::model::{ChannelOrder, CoreDescriptor, Zct};
use crate::series::{Level, Segment, SeriesRegistry};

use super::buffer::{ChannelContext, PixelBuffer, RawWindow};
use super::cache::{z_block, BlockCache, CacheEntry, CacheKey, CachedPlane};

/// Counters of what the reader did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Planes returned zero-filled because storage ended early
    pub truncated_planes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Reads that skipped the cache because the series is too large
    pub bypassed: u64,
    /// Coalesced storage reads issued while filling the cache
    pub bulk_reads: u64,
    /// Storage reads issued for uncached windows
    pub direct_reads: u64,
}

/// Reads planes of a frozen [`SeriesRegistry`] from storage.
pub struct PlaneReader<R> {
    storage: R,
    registry: Arc<SeriesRegistry>,
    config: ReaderConfig,
    cache: BlockCache,
    active_series: usize,
    active_resolution: usize,
    stats: ReadStats,
}

impl<R: RangeReader> PlaneReader<R> {
    pub fn new(storage: R, registry: SeriesRegistry, config: ReaderConfig) -> Self {
        Self::with_registry(storage, Arc::new(registry), config)
    }

    /// Create a reader over a registry that is already shared.
    pub fn with_registry(storage: R, registry: Arc<SeriesRegistry>, config: ReaderConfig) -> Self {
        let cache = BlockCache::new(config.effective_cache_budget());
        Self {
            storage,
            registry,
            config,
            cache,
            active_series: 0,
            active_resolution: 0,
            stats: ReadStats::default(),
        }
    }

    /// Another reader over the same container, with its own storage handle
    /// and an empty cache.
    pub fn open_another<S: RangeReader>(&self, storage: S) -> PlaneReader<S> {
        PlaneReader::with_registry(storage, Arc::clone(&self.registry), self.config.clone())
    }

    pub fn registry(&self) -> &Arc<SeriesRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &R {
        &self.storage
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    // =========================================================================
    // Registry queries
    // =========================================================================

    pub fn series_count(&self) -> usize {
        self.registry.series_count()
    }

    pub fn resolution_count(&self, series: usize) -> Result<usize, PlaneError> {
        self.registry
            .resolution_count(series)
            .map_err(|e| PlaneError::invalid(e.to_string()))
    }

    pub fn descriptor(&self, series: usize, resolution: usize) -> Result<&CoreDescriptor, PlaneError> {
        self.registry
            .descriptor(series, resolution)
            .map_err(|e| PlaneError::invalid(e.to_string()))
    }

    /// Select the series used by [`Self::read_active_plane`]. Resets the
    /// active resolution to 0.
    pub fn set_active_series(&mut self, series: usize) -> Result<(), PlaneError> {
        self.resolution_count(series)?;
        self.active_series = series;
        self.active_resolution = 0;
        Ok(())
    }

    pub fn set_active_resolution(&mut self, resolution: usize) -> Result<(), PlaneError> {
        self.descriptor(self.active_series, resolution)?;
        self.active_resolution = resolution;
        Ok(())
    }

    pub fn active_series(&self) -> usize {
        self.active_series
    }

    pub fn active_resolution(&self) -> usize {
        self.active_resolution
    }

    /// Byte ranges of storage holding pixel data, sorted and merged.
    pub fn used_storage_ranges(&self) -> Result<Vec<(u64, u64)>, PlaneError> {
        let storage_len = self.storage.size();
        let mut ranges = Vec::new();
        for (series, entry) in self.registry.iter().enumerate() {
            for (resolution, level) in entry.levels().iter().enumerate() {
                for segment in level.segments() {
                    let locator = self.locator(segment);
                    let found = locator.block_ranges(storage_len).map_err(|source| {
                        PlaneError::CorruptLayout {
                            series,
                            resolution,
                            plane: 0,
                            source,
                        }
                    })?;
                    ranges.extend(found);
                }
            }
        }

        ranges.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
        for (start, len) in ranges {
            match merged.last_mut() {
                Some((last_start, last_len)) if start <= *last_start + *last_len => {
                    let end = (*last_start + *last_len).max(start + len);
                    *last_len = end - *last_start;
                }
                _ => merged.push((start, len)),
            }
        }
        Ok(merged)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read a window of the active series and resolution.
    pub async fn read_active_plane(&mut self, plane: u32, region: Region) -> Result<PixelBuffer, PlaneError> {
        self.read_plane(self.active_series, self.active_resolution, plane, region)
            .await
    }

    /// Read `region` of flat plane `plane` of a series and resolution.
    pub async fn read_plane(
        &mut self,
        series: usize,
        resolution: usize,
        plane: u32,
        region: Region,
    ) -> Result<PixelBuffer, PlaneError> {
        let registry = Arc::clone(&self.registry);
        let level = registry
            .level(series, resolution)
            .map_err(|e| PlaneError::invalid(e.to_string()))?;
        let descriptor = level.descriptor();
        region
            .check(descriptor.size_x(), descriptor.size_y())
            .map_err(PlaneError::invalid)?;

        let zct = descriptor.zct(plane)?;
        let (segment, local_plane) = level.resolve(zct)?;
        let request = Request {
            context: ChannelContext {
                series,
                resolution,
                plane,
                z: zct.z,
                c: zct.c,
                t: zct.t,
            },
            descriptor,
            segment,
            local_plane,
            region,
        };

        let window = if self.cache.bypasses(series, resolution, descriptor) {
            self.stats.bypassed += 1;
            self.read_direct(&request).await?
        } else {
            self.read_cached(&request, level).await?
        };

        Ok(self.finish(&request, window))
    }

    /// Serve a window from the cache, refilling it on a miss.
    async fn read_cached(&mut self, request: &Request<'_>, level: &Level) -> Result<Window, PlaneError> {
        let ctx = request.context;
        let key = CacheKey {
            series: ctx.series,
            resolution: ctx.resolution,
            timepoint: ctx.t,
        };

        if self.cache.covering(key, ctx.z).is_some() {
            self.stats.cache_hits += 1;
            debug!(
                series = ctx.series,
                resolution = ctx.resolution,
                plane = ctx.plane,
                "cache hit"
            );
        } else {
            self.stats.cache_misses += 1;
            debug!(
                series = ctx.series,
                resolution = ctx.resolution,
                plane = ctx.plane,
                t = ctx.t,
                "cache miss"
            );
            let entry = self.load_entry(request, level, key).await?;
            if !self.cache.fill(entry) {
                return self.read_direct(request).await;
            }
        }

        match self.cache.covering(key, ctx.z).and_then(|e| e.plane(ctx.z, ctx.c)) {
            Some(CachedPlane::Present(bytes)) => {
                let plan = unpadded_plan(request.segment.descriptor(), request.region);
                let mut data = vec![0u8; request.context_err(to_usize("window", plan.output_len()))?];
                copy_rows(bytes, 0, &plan, &mut data);
                Ok(Window {
                    data,
                    truncated: false,
                })
            }
            // truncated or unlocatable; the direct path reports which
            Some(CachedPlane::Missing) | None => self.read_direct(request).await,
        }
    }

    /// Read every channel of the Z block around the request into a new entry.
    async fn load_entry(
        &mut self,
        request: &Request<'_>,
        level: &Level,
        key: CacheKey,
    ) -> Result<CacheEntry, PlaneError> {
        let descriptor = request.descriptor;
        let ctx = request.context;
        let storage_len = self.storage.size();
        let locator = self.locator(request.segment);

        let frames_per_tile = request.context_err(locator.frames_per_tile(request.local_plane, storage_len))?;
        let (z_start, z_len) = z_block(ctx.z, descriptor.size_z(), frames_per_tile);
        let channels = descriptor.effective_size_c();
        let plane_bytes = request.context_err(
            descriptor
                .plane_size()
                .and_then(|size| to_usize("plane size", size)),
        )?;
        let mut entry = CacheEntry::new(key, z_start, z_len, channels, plane_bytes);

        // locate every plane of the block; truncated or uncovered ones stay
        // missing, and only the requested plane's own failure is an error
        let mut plans: Vec<(u32, u32, ReadPlan)> = Vec::new();
        for z in z_start..z_start + z_len {
            for c in 0..channels {
                let requested = z == ctx.z && c == ctx.c;
                let (segment, local) = level.resolve(Zct::new(z, c, ctx.t))?;
                let outcome = match self.locator(segment).locate(
                    local,
                    segment.tile(),
                    Region::full(descriptor),
                    storage_len,
                ) {
                    Ok(outcome) => outcome,
                    Err(e) if requested => return Err(request.corrupt(e)),
                    Err(e) => {
                        debug!(
                            series = ctx.series,
                            resolution = ctx.resolution,
                            z,
                            c,
                            t = ctx.t,
                            error = %e,
                            "plane left out of cache fill"
                        );
                        continue;
                    }
                };
                if let LocateOutcome::Ready(plan) = outcome {
                    plans.push((z, c, plan));
                }
            }
        }
        plans.sort_by_key(|(_, _, plan)| plan.plane_offset);

        // coalesce planes stored back to back into single reads
        let mut start = 0;
        while start < plans.len() {
            let mut end = start + 1;
            while end < plans.len() {
                let previous = &plans[end - 1].2;
                if plans[end].2.plane_offset != previous.plane_offset + previous.plane_stride {
                    break;
                }
                end += 1;
            }

            let first = &plans[start].2;
            let last = &plans[end - 1].2;
            let offset = first.byte_offset;
            let len = request.context_err(to_usize(
                "bulk read",
                last.byte_offset + last.span() - offset,
            ))?;
            let bytes = self.fetch(request, offset, len).await?;
            self.stats.bulk_reads += 1;

            for (z, c, plan) in &plans[start..end] {
                if let Some(dst) = entry.plane_mut(*z, *c) {
                    copy_rows(&bytes, offset, plan, dst);
                }
            }
            start = end;
        }

        debug!(
            series = ctx.series,
            resolution = ctx.resolution,
            t = ctx.t,
            z_start,
            z_len,
            bytes = entry.len(),
            "cache filled"
        );
        Ok(entry)
    }

    /// Read a window straight from storage.
    async fn read_direct(&mut self, request: &Request<'_>) -> Result<Window, PlaneError> {
        let locator = self.locator(request.segment);
        let outcome = request.context_err(locator.locate(
            request.local_plane,
            request.segment.tile(),
            request.region,
            self.storage.size(),
        ))?;

        let plan = match outcome {
            LocateOutcome::Ready(plan) => plan,
            LocateOutcome::Truncated(truncated) => {
                return self.truncated(request, Some(truncated.plane_offset))
            }
        };

        let span = request.context_err(to_usize("window span", plan.span()))?;
        let bytes = self.fetch(request, plan.byte_offset, span).await?;
        self.stats.direct_reads += 1;

        let data = if plan.is_contiguous() {
            bytes.to_vec()
        } else {
            let mut data = vec![0u8; request.context_err(to_usize("window", plan.output_len()))?];
            copy_rows(&bytes, plan.byte_offset, &plan, &mut data);
            data
        };
        Ok(Window {
            data,
            truncated: false,
        })
    }

    fn truncated(&mut self, request: &Request<'_>, offset: Option<u64>) -> Result<Window, PlaneError> {
        let ctx = request.context;
        self.stats.truncated_planes += 1;
        warn!(
            source = self.storage.identifier(),
            series = ctx.series,
            resolution = ctx.resolution,
            plane = ctx.plane,
            offset,
            "plane lies beyond the end of storage; returning zeros"
        );
        let len = unpadded_plan(request.segment.descriptor(), request.region).output_len();
        Ok(Window {
            data: vec![0u8; request.context_err(to_usize("window", len))?],
            truncated: true,
        })
    }

    async fn fetch(&self, request: &Request<'_>, offset: u64, len: usize) -> Result<bytes::Bytes, PlaneError> {
        let ctx = request.context;
        self.storage
            .read_exact_at(offset, len)
            .await
            .map_err(|source| PlaneError::StorageIo {
                series: ctx.series,
                resolution: ctx.resolution,
                plane: ctx.plane,
                offset,
                source,
            })
    }

    /// Apply the configured sample conversions.
    ///
    /// Sample format comes from the segment holding the plane, since folded
    /// blocks may differ in byte order or interleaving.
    fn finish(&self, request: &Request<'_>, window: Window) -> PixelBuffer {
        let descriptor = request.segment.descriptor();
        let mut raw = RawWindow {
            data: window.data,
            width: request.region.w,
            height: request.region.h,
            pixel_type: descriptor.pixel_type(),
            samples_per_pixel: descriptor.samples_per_pixel(),
            interleaved: descriptor.is_interleaved(),
            byte_order: ByteOrder::from_little_endian(descriptor.is_little_endian()),
        };

        if self.config.native_byte_order {
            raw.convert_byte_order(ByteOrder::native());
        }
        if self.config.bgr_to_rgb && descriptor.channel_order() == ChannelOrder::Bgr {
            raw.bgr_to_rgb();
        }
        if self.config.deinterleave {
            raw.deinterleave();
        }
        raw.into_buffer(request.context, window.truncated)
    }

    fn locator<'a>(&self, segment: &'a Segment) -> BlockLocator<'a> {
        BlockLocator::new(segment.descriptor(), segment.table(), self.config.row_alignment)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// A validated request.
struct Request<'a> {
    context: ChannelContext,
    descriptor: &'a CoreDescriptor,
    segment: &'a Segment,
    /// Plane index inside the segment's block table
    local_plane: u32,
    region: Region,
}

impl Request<'_> {
    /// Attach series/resolution/plane context to a layout error.
    fn context_err<T>(&self, result: Result<T, LayoutError>) -> Result<T, PlaneError> {
        result.map_err(|source| self.corrupt(source))
    }

    fn corrupt(&self, source: LayoutError) -> PlaneError {
        PlaneError::CorruptLayout {
            series: self.context.series,
            resolution: self.context.resolution,
            plane: self.context.plane,
            source,
        }
    }
}

/// Materialized window bytes before conversion.
struct Window {
    data: Vec<u8>,
    truncated: bool,
}

fn to_usize(field: &'static str, value: u64) -> Result<usize, LayoutError> {
    usize::try_from(value).map_err(|_| LayoutError::LossyConversion { field, value })
}

/// Plan for cutting `region` out of an unpadded plane held in memory.
fn unpadded_plan(descriptor: &CoreDescriptor, region: Region) -> ReadPlan {
    let spp = descriptor.samples_per_pixel();
    let planar = spp > 1 && !descriptor.is_interleaved();
    let pixel_bytes = if planar {
        descriptor.pixel_type().bytes_per_sample() as u64
    } else {
        descriptor.bytes_per_pixel()
    };
    let row_stride = descriptor.size_x() as u64 * pixel_bytes;
    ReadPlan {
        plane_offset: 0,
        plane_stride: row_stride * descriptor.size_y() as u64 * if planar { spp as u64 } else { 1 },
        byte_offset: region.y as u64 * row_stride + region.x as u64 * pixel_bytes,
        row_stride,
        bytes_per_row: region.w as u64 * pixel_bytes,
        row_skip: 0,
        rows: region.h,
        sample_planes: if planar { spp } else { 1 },
        sample_stride: row_stride * descriptor.size_y() as u64,
    }
}

/// Copy the rows of `plan` out of `src`, which starts at storage offset
/// `src_base`, into `dst` packed back to back.
fn copy_rows(src: &[u8], src_base: u64, plan: &ReadPlan, dst: &mut [u8]) {
    let row_len = plan.bytes_per_row as usize;
    let mut out = 0;
    for sample in 0..plan.sample_planes {
        for row in 0..plan.rows {
            let at = (plan.row_offset(sample, row) - src_base) as usize;
            dst[out..out + row_len].copy_from_slice(&src[at..at + row_len]);
            out += row_len;
        }
    }
}
