//! Block cache integration tests.
//!
//! Tests verify:
//! - Cached and uncached reads return identical pixels
//! - A Z walk at a fixed timepoint costs one storage read
//! - Timepoint changes and budget overruns behave as documented
//! - Tiled blocks are cached in tile-aligned Z runs
//! - Planes missing from a partial table do not poison the cache

use std::sync::Arc;

use bioplane::error::{LayoutError, PlaneError};
use bioplane::{
    BlockDescriptor, BlockTable, DescriptorPatch, DimensionOrder, PixelType, PlaneReader,
    ReaderConfig, Region, RegistryBuilder, SeriesRegistry,
};

use super::test_utils::{
    descriptor, descriptor_with, plane_pattern, ContainerBuilder, TrackingMockReader,
};

const SERIES: usize = 3;
const SIZE_Z: u32 = 10;
const SIZE_C: u32 = 3;
const SIZE_T: u32 = 5;

/// Three series, each with a full and a half resolution level.
fn dataset() -> (Vec<u8>, Arc<SeriesRegistry>) {
    let full = descriptor(8, 6, SIZE_Z, SIZE_C, SIZE_T, PixelType::UInt16);
    let half = descriptor(4, 3, SIZE_Z, SIZE_C, SIZE_T, PixelType::UInt16);

    let mut container = ContainerBuilder::new(128);
    let mut builder = RegistryBuilder::new();
    for series in 0..SERIES {
        let tag = series as u8 * 2;
        let base = container.push_planes(&full, tag, 0);
        let table = BlockTable::new(vec![BlockDescriptor::new(base)])
            .unwrap()
            .with_end_pointer(container.len())
            .unwrap();
        let handle = builder.register_named(format!("series {}", series), full.clone(), table);

        let base = container.push_planes(&half, tag + 1, 0);
        let table = BlockTable::new(vec![BlockDescriptor::new(base)])
            .unwrap()
            .with_end_pointer(container.len())
            .unwrap();
        builder.add_resolution(handle, half.clone(), table).unwrap();
    }

    (container.into_bytes(), Arc::new(builder.finalize().unwrap()))
}

/// One series per layout the reader distinguishes:
/// 0. XYCTZ order with padded rows
/// 1-2. two tiles of one mosaic block
/// 3. a little-endian XYZCT block folded with a big-endian XYCZT block
fn mixed_dataset() -> (Vec<u8>, Arc<SeriesRegistry>) {
    let mut container = ContainerBuilder::new(64);
    let mut builder = RegistryBuilder::new();

    let ordered = descriptor_with(DescriptorPatch {
        size_x: Some(5),
        size_y: Some(3),
        size_z: Some(3),
        size_c: Some(2),
        size_t: Some(2),
        pixel_type: Some(PixelType::UInt8),
        dimension_order: Some(DimensionOrder::XYCTZ),
        ..Default::default()
    });
    let base = container.push_planes(&ordered, 10, 3);
    let table = BlockTable::new(vec![BlockDescriptor::new(base)])
        .unwrap()
        .with_end_pointer(container.len())
        .unwrap();
    builder.register_named("ordered", ordered, table);

    // [t0 z0 z1][t1 z0 z1][t0 z2 z3][t1 z2 z3]
    let tile = descriptor(4, 2, 4, 1, 1, PixelType::UInt8);
    let base = container.len();
    for group in 0..2u32 {
        for tile in 0..2u8 {
            for frame in 0..2 {
                container.push_bytes(&plane_pattern(20 + tile, group * 2 + frame, 8));
            }
        }
    }
    let table = BlockTable::new(vec![BlockDescriptor::tiled(base, 2, 16)])
        .unwrap()
        .with_end_pointer(container.len())
        .unwrap();
    builder.register_tiles(Some("mosaic".to_string()), tile, table);

    let shape = DescriptorPatch {
        size_x: Some(3),
        size_y: Some(2),
        size_z: Some(2),
        size_c: Some(2),
        pixel_type: Some(PixelType::UInt16),
        ..Default::default()
    };
    let little = descriptor_with(DescriptorPatch {
        size_t: Some(1),
        little_endian: Some(true),
        dimension_order: Some(DimensionOrder::XYZCT),
        ..shape.clone()
    });
    let big = descriptor_with(DescriptorPatch {
        size_t: Some(2),
        little_endian: Some(false),
        dimension_order: Some(DimensionOrder::XYCZT),
        ..shape
    });
    for (tag, desc) in [(30u8, little), (31, big)] {
        let base = container.push_planes(&desc, tag, 0);
        let table = BlockTable::new(vec![BlockDescriptor::new(base)])
            .unwrap()
            .with_end_pointer(container.len())
            .unwrap();
        builder.register_named("timelapse", desc, table);
    }

    (container.into_bytes(), Arc::new(builder.finalize().unwrap()))
}

fn cached_reader(bytes: &[u8], registry: &Arc<SeriesRegistry>) -> PlaneReader<TrackingMockReader> {
    PlaneReader::with_registry(
        TrackingMockReader::new(bytes.to_vec(), "mock://cached"),
        Arc::clone(registry),
        ReaderConfig::default(),
    )
}

fn direct_reader(bytes: &[u8], registry: &Arc<SeriesRegistry>) -> PlaneReader<TrackingMockReader> {
    PlaneReader::with_registry(
        TrackingMockReader::new(bytes.to_vec(), "mock://direct"),
        Arc::clone(registry),
        ReaderConfig {
            no_cache: true,
            ..Default::default()
        },
    )
}

// =============================================================================
// Equivalence
// =============================================================================

#[tokio::test]
async fn test_cached_reads_match_direct_reads() {
    let (bytes, registry) = dataset();
    assert_eq!(registry.series_count(), SERIES);

    let mut cached = cached_reader(&bytes, &registry);
    let mut direct = direct_reader(&bytes, &registry);

    let mut reads = 0u64;
    for series in 0..SERIES {
        for resolution in 0..2 {
            let desc = registry.descriptor(series, resolution).unwrap().clone();
            for plane in 0..desc.image_count() {
                let window = Region::new(1, 1, desc.size_x() - 2, desc.size_y() - 1);
                for region in [Region::full(&desc), window] {
                    let a = cached.read_plane(series, resolution, plane, region).await.unwrap();
                    let b = direct.read_plane(series, resolution, plane, region).await.unwrap();
                    assert_eq!(
                        a.data(),
                        b.data(),
                        "series {} resolution {} plane {} region {:?}",
                        series,
                        resolution,
                        plane,
                        region
                    );
                    assert_eq!(a.context(), b.context());
                    reads += 1;
                }
            }
        }
    }

    // one fill per (series, resolution, timepoint), all channels of a Z
    // stack being contiguous
    let fills = (SERIES * 2) as u64 * SIZE_T as u64;
    let stats = cached.stats();
    assert_eq!(stats.cache_misses, fills);
    assert_eq!(stats.bulk_reads, fills);
    assert_eq!(stats.cache_hits, reads - fills);
    assert_eq!(stats.bypassed, 0);
    assert_eq!(cached.storage().request_count() as u64, fills);

    assert_eq!(direct.stats().bypassed, reads);
    assert_eq!(direct.stats().direct_reads, reads);
}

#[tokio::test]
async fn test_cached_reads_match_direct_reads_across_layouts() {
    let (bytes, registry) = mixed_dataset();
    assert_eq!(registry.series_count(), 4);
    assert_eq!(registry.descriptor(3, 0).unwrap().size_t(), 3);
    assert_eq!(registry.series(3).unwrap().levels()[0].segments().len(), 2);

    let mut cached = cached_reader(&bytes, &registry);
    let mut direct = direct_reader(&bytes, &registry);

    for series in 0..registry.series_count() {
        let desc = registry.descriptor(series, 0).unwrap().clone();
        for plane in 0..desc.image_count() {
            let window = Region::new(1, 1, desc.size_x() - 2, desc.size_y() - 1);
            for region in [Region::full(&desc), window] {
                let a = cached.read_plane(series, 0, plane, region).await.unwrap();
                let b = direct.read_plane(series, 0, plane, region).await.unwrap();
                assert_eq!(
                    a.data(),
                    b.data(),
                    "series {} plane {} region {:?}",
                    series,
                    plane,
                    region
                );
                assert_eq!(a.context(), b.context());
                assert_eq!(a.byte_order(), b.byte_order());
                assert!(!a.is_truncated());
            }
        }
    }

    // padded rows are stripped: stored plane p holds pattern p
    let ordered = registry.descriptor(0, 0).unwrap().clone();
    for plane in 0..ordered.image_count() {
        let buffer = cached.read_plane(0, 0, plane, Region::full(&ordered)).await.unwrap();
        assert_eq!(buffer.data().as_ref(), plane_pattern(10, plane, 15).as_slice());
    }

    let stats = cached.stats();
    assert_eq!(stats.bypassed, 0);
    assert!(stats.cache_hits > stats.cache_misses);
    assert_eq!(stats.truncated_planes, 0);
}

#[tokio::test]
async fn test_cached_plane_matches_stored_pattern() {
    let (bytes, registry) = dataset();
    let mut reader = PlaneReader::with_registry(
        TrackingMockReader::new(bytes, "mock://pattern"),
        Arc::clone(&registry),
        ReaderConfig {
            native_byte_order: false,
            ..Default::default()
        },
    );

    // series 2, half resolution: tag 5, plane 37
    let desc = registry.descriptor(2, 1).unwrap().clone();
    let buffer = reader.read_plane(2, 1, 37, Region::full(&desc)).await.unwrap();
    assert_eq!(buffer.data().as_ref(), plane_pattern(5, 37, 24).as_slice());
}

// =============================================================================
// Access Patterns
// =============================================================================

#[tokio::test]
async fn test_z_walk_costs_one_read() {
    let (bytes, registry) = dataset();
    let mut reader = cached_reader(&bytes, &registry);
    let desc = registry.descriptor(1, 0).unwrap().clone();

    for z in 0..SIZE_Z {
        let plane = desc.flat_index(bioplane::Zct::new(z, 1, 2)).unwrap();
        reader.read_plane(1, 0, plane, Region::full(&desc)).await.unwrap();
    }

    assert_eq!(reader.storage().request_count(), 1);
    let requests = reader.storage().get_requests().await;
    assert_eq!(requests[0].1, 96 * (SIZE_Z * SIZE_C) as usize);
}

#[tokio::test]
async fn test_timepoint_change_refills() {
    let (bytes, registry) = dataset();
    let mut reader = cached_reader(&bytes, &registry);
    let desc = registry.descriptor(0, 0).unwrap().clone();
    let at = |t: u32| desc.flat_index(bioplane::Zct::new(0, 0, t)).unwrap();

    reader.read_plane(0, 0, at(0), Region::full(&desc)).await.unwrap();
    reader.read_plane(0, 0, at(1), Region::full(&desc)).await.unwrap();
    reader.read_plane(0, 0, at(0), Region::full(&desc)).await.unwrap();

    assert_eq!(reader.stats().cache_misses, 3);
    assert_eq!(reader.stats().cache_hits, 0);
}

#[tokio::test]
async fn test_budget_too_small_bypasses_large_levels() {
    let (bytes, registry) = dataset();
    // full level: 96 bytes x 30 planes per timepoint; half level: 24 x 30
    let mut reader = PlaneReader::with_registry(
        TrackingMockReader::new(bytes, "mock://budget"),
        Arc::clone(&registry),
        ReaderConfig {
            cache_budget: 96 * 30 - 1,
            ..Default::default()
        },
    );

    let full = registry.descriptor(0, 0).unwrap().clone();
    let half = registry.descriptor(0, 1).unwrap().clone();
    reader.read_plane(0, 0, 3, Region::full(&full)).await.unwrap();
    reader.read_plane(0, 0, 4, Region::full(&full)).await.unwrap();
    reader.read_plane(0, 1, 3, Region::full(&half)).await.unwrap();
    reader.read_plane(0, 1, 4, Region::full(&half)).await.unwrap();

    let stats = reader.stats();
    assert_eq!(stats.bypassed, 2);
    assert_eq!(stats.direct_reads, 2);
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits, 1);
}

// =============================================================================
// Tiled Blocks
// =============================================================================

#[tokio::test]
async fn test_tiled_block_cached_in_tile_runs() {
    // two tiles, two frames of 4x2 bytes per tile group:
    // [t0 z0 z1][t1 z0 z1][t0 z2 z3][t1 z2 z3]
    let desc = descriptor(4, 2, 4, 1, 1, PixelType::UInt8);
    let mut bytes = Vec::new();
    for group in 0..2u32 {
        for tile in 0..2u8 {
            for frame in 0..2 {
                bytes.extend(plane_pattern(tile, group * 2 + frame, 8));
            }
        }
    }

    let mut builder = RegistryBuilder::new();
    let tiles = builder.register_tiles(
        Some("mosaic".to_string()),
        desc.clone(),
        BlockTable::new(vec![BlockDescriptor::tiled(0, 2, 16)]).unwrap(),
    );
    assert_eq!(tiles.len(), 2);
    let registry = Arc::new(builder.finalize().unwrap());
    assert_eq!(registry.series_count(), 2);

    let mut reader = cached_reader(&bytes, &registry);
    for z in 0..4 {
        let buffer = reader.read_plane(1, 0, z, Region::full(&desc)).await.unwrap();
        assert_eq!(buffer.data().as_ref(), plane_pattern(1, z, 8).as_slice(), "z {}", z);
    }

    assert_eq!(
        reader.storage().get_requests().await,
        vec![(16, 16), (48, 16)]
    );
    assert_eq!(reader.stats().cache_misses, 2);
    assert_eq!(reader.stats().cache_hits, 2);
}

// =============================================================================
// Partial Tables
// =============================================================================

#[tokio::test]
async fn test_partial_table_cached_reads_match_direct_reads() {
    // an interrupted acquisition: only the first of three Z planes was written
    let desc = descriptor(2, 1, 3, 1, 1, PixelType::UInt16);
    let bytes = vec![0u8, 1, 2, 3];
    let mut builder = RegistryBuilder::new();
    builder.register(desc.clone(), BlockTable::from_plane_offsets(&[0]).unwrap());
    let registry = Arc::new(builder.finalize().unwrap());

    let mut cached = cached_reader(&bytes, &registry);
    let mut direct = direct_reader(&bytes, &registry);

    let a = cached.read_plane(0, 0, 0, Region::full(&desc)).await.unwrap();
    let b = direct.read_plane(0, 0, 0, Region::full(&desc)).await.unwrap();
    assert_eq!(a.data(), b.data());
    assert_eq!(a.len(), 4);
    assert_eq!(cached.stats().cache_misses, 1);

    // the uncovered planes fail the same way with or without the cache,
    // whether or not an entry for their Z stack is already held
    for plane in [1, 2, 1] {
        for reader in [&mut cached, &mut direct] {
            let result = reader.read_plane(0, 0, plane, Region::full(&desc)).await;
            assert!(
                matches!(
                    result,
                    Err(PlaneError::CorruptLayout {
                        plane: p,
                        source: LayoutError::PlaneNotCovered { covered: 1, .. },
                        ..
                    }) if p == plane
                ),
                "plane {}: {:?}",
                plane,
                result
            );
        }
    }

    // plane 0 is still served from the entry
    let again = cached.read_plane(0, 0, 0, Region::full(&desc)).await.unwrap();
    assert_eq!(again.data(), b.data());
    assert_eq!(cached.storage().request_count(), 1);
}

#[tokio::test]
async fn test_uncovered_plane_fails_with_its_own_error() {
    // a request for a plane not yet cached still fails on its own error
    let desc = descriptor(2, 1, 3, 1, 1, PixelType::UInt16);
    let mut builder = RegistryBuilder::new();
    builder.register(desc.clone(), BlockTable::from_plane_offsets(&[0]).unwrap());
    let registry = Arc::new(builder.finalize().unwrap());

    let mut reader = cached_reader(&[0u8, 1, 2, 3], &registry);
    let result = reader.read_plane(0, 0, 2, Region::full(&desc)).await;
    assert!(matches!(
        result,
        Err(PlaneError::CorruptLayout {
            plane: 2,
            source: LayoutError::PlaneNotCovered { plane: 2, .. },
            ..
        })
    ));
    assert_eq!(reader.storage().request_count(), 0);
}
