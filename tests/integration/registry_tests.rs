//! Series registry integration tests.
//!
//! Tests verify:
//! - Same-named, same-shaped blocks fold into one timelapse series
//! - A name change splits the run
//! - Planes of a folded series are read from the right block
//! - Each folded block is decoded with its own byte order

use bioplane::{
    BlockDescriptor, BlockTable, ByteOrder, DescriptorPatch, DimensionOrder, PixelType,
    PlaneReader, ReaderConfig, Region, RegistryBuilder, Zct,
};

use super::test_utils::{
    descriptor, descriptor_with, plane_pattern, ContainerBuilder, TrackingMockReader,
};

/// Five one-timepoint blocks separated by 24-byte headers.
fn blocks(names: [&str; 5]) -> (Vec<u8>, RegistryBuilder) {
    let desc = descriptor(8, 2, 2, 1, 1, PixelType::UInt8);
    let mut container = ContainerBuilder::new(0);
    let mut builder = RegistryBuilder::new();
    for (tag, name) in names.iter().enumerate() {
        container.push_bytes(&[0xFF; 24]);
        let base = container.push_planes(&desc, tag as u8, 0);
        let table = BlockTable::new(vec![BlockDescriptor::new(base)])
            .unwrap()
            .with_end_pointer(container.len())
            .unwrap();
        builder.register_named(*name, desc.clone(), table);
    }
    (container.into_bytes(), builder)
}

#[test]
fn test_identical_blocks_fold_into_one_series() {
    let (_, builder) = blocks(["scan"; 5]);
    let registry = builder.finalize().unwrap();

    assert_eq!(registry.series_count(), 1);
    let series = registry.series(0).unwrap();
    assert_eq!(series.name(), Some("scan"));
    let desc = registry.descriptor(0, 0).unwrap();
    assert_eq!(desc.size_t(), 5);
    assert_eq!(desc.image_count(), 10);
    assert_eq!(series.levels()[0].segments().len(), 5);
}

#[test]
fn test_renamed_block_splits_the_run() {
    let (_, builder) = blocks(["first", "first", "second", "second", "second"]);
    let registry = builder.finalize().unwrap();

    assert_eq!(registry.series_count(), 2);
    assert_eq!(registry.descriptor(0, 0).unwrap().size_t(), 2);
    assert_eq!(registry.descriptor(1, 0).unwrap().size_t(), 3);
    assert_eq!(registry.series(1).unwrap().name(), Some("second"));
}

#[test]
fn test_flattening_disabled_keeps_raw_series() {
    let (_, builder) = blocks(["scan"; 5]);
    let registry = builder.with_flattening(false).finalize().unwrap();

    assert_eq!(registry.series_count(), 5);
    for series in 0..5 {
        assert_eq!(registry.descriptor(series, 0).unwrap().size_t(), 1);
    }
}

#[test]
fn test_shape_change_splits_the_run() {
    let (_, mut builder) = blocks(["scan"; 5]);
    let other = descriptor(8, 2, 2, 1, 1, PixelType::UInt16);
    builder.register_named(
        "scan",
        other,
        BlockTable::new(vec![BlockDescriptor::new(0)]).unwrap(),
    );
    let registry = builder.finalize().unwrap();

    assert_eq!(registry.series_count(), 2);
    assert_eq!(registry.descriptor(0, 0).unwrap().size_t(), 5);
    assert_eq!(registry.descriptor(1, 0).unwrap().pixel_type(), PixelType::UInt16);
}

#[tokio::test]
async fn test_folded_planes_read_from_their_block() {
    let (bytes, builder) = blocks(["scan"; 5]);
    let registry = builder.finalize().unwrap();
    let desc = registry.descriptor(0, 0).unwrap().clone();

    let mut reader = PlaneReader::new(
        TrackingMockReader::new(bytes, "mock://folded"),
        registry,
        ReaderConfig::default(),
    );

    for t in 0..5 {
        for z in 0..2 {
            let plane = desc.flat_index(Zct::new(z, 0, t)).unwrap();
            let buffer = reader.read_plane(0, 0, plane, Region::full(&desc)).await.unwrap();
            assert_eq!(
                buffer.data().as_ref(),
                plane_pattern(t as u8, z, 16).as_slice(),
                "t {} z {}",
                t,
                z
            );
            assert_eq!(buffer.context().t, t);
        }
    }

    // one fill per timepoint, each inside its own block
    let requests = reader.storage().get_requests().await;
    assert_eq!(requests.len(), 5);
    for (t, (offset, len)) in requests.into_iter().enumerate() {
        assert_eq!(offset, 24 + t as u64 * 56);
        assert_eq!(len, 32);
    }
}

#[tokio::test]
async fn test_folded_blocks_keep_their_byte_order() {
    let patch = |little_endian| DescriptorPatch {
        size_x: Some(2),
        size_y: Some(1),
        size_z: Some(1),
        size_c: Some(1),
        size_t: Some(1),
        pixel_type: Some(PixelType::UInt16),
        little_endian: Some(little_endian),
        dimension_order: Some(DimensionOrder::XYZCT),
        ..Default::default()
    };
    // samples 1, 2 stored little-endian, then 1, 2 stored big-endian
    let bytes = vec![1u8, 0, 2, 0, 0, 1, 0, 2];

    let mut builder = RegistryBuilder::new();
    builder.register_named(
        "scan",
        descriptor_with(patch(true)),
        BlockTable::new(vec![BlockDescriptor::new(0)])
            .unwrap()
            .with_end_pointer(4)
            .unwrap(),
    );
    builder.register_named(
        "scan",
        descriptor_with(patch(false)),
        BlockTable::new(vec![BlockDescriptor::new(4)]).unwrap(),
    );
    let registry = std::sync::Arc::new(builder.finalize().unwrap());
    assert_eq!(registry.series_count(), 1);
    let desc = registry.descriptor(0, 0).unwrap().clone();
    assert_eq!(desc.size_t(), 2);

    let no_cache = ReaderConfig {
        no_cache: true,
        ..Default::default()
    };
    for config in [ReaderConfig::default(), no_cache] {
        let mut reader = PlaneReader::with_registry(
            TrackingMockReader::new(bytes.clone(), "mock://byte-order"),
            std::sync::Arc::clone(&registry),
            config,
        );
        for t in 0..2 {
            let buffer = reader.read_plane(0, 0, t, Region::full(&desc)).await.unwrap();
            assert_eq!(buffer.byte_order(), ByteOrder::native());
            let samples: Vec<u16> = buffer
                .data()
                .chunks(2)
                .map(|sample| ByteOrder::native().read_u16(sample))
                .collect();
            assert_eq!(samples, vec![1, 2], "t {}", t);
        }
    }

    // without conversion the buffer reports the stored order of its block
    let mut raw = PlaneReader::with_registry(
        TrackingMockReader::new(bytes, "mock://raw"),
        registry,
        ReaderConfig {
            native_byte_order: false,
            ..Default::default()
        },
    );
    let buffer = raw.read_plane(0, 0, 1, Region::full(&desc)).await.unwrap();
    assert_eq!(buffer.byte_order(), ByteOrder::BigEndian);
    assert_eq!(buffer.data().as_ref(), &[0u8, 1, 0, 2][..]);
}
