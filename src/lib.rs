//! # bioplane
//!
//! Plane addressing and caching for multi-dimensional, multi-resolution
//! microscopy image containers.
//!
//! A container holds one or more series. Each series is a stack of 2D planes
//! indexed by Z (focal depth), C (channel) and T (timepoint), optionally at
//! several resolutions. Format parsers describe what they find with a
//! [`CoreDescriptor`] and a [`BlockTable`] per series; this crate answers
//! "give me plane N of series S at resolution R, window (x, y, w, h)" with the
//! fewest storage reads it can.
//!
//! ## Features
//!
//! - **Coordinate mapping**: flat plane index to (Z, C, T) for all six
//!   dimension orders
//! - **Series flattening**: consecutive same-shaped blocks fold into one
//!   series whose T axis spans them
//! - **Block location**: row padding, tile interleaving and truncated storage
//!   handled from the block table alone
//! - **Single-slot cache**: one multi-Z, all-channel block per reader
//! - **Block discovery**: marker scans for containers without an offset index
//!
//! ## Architecture
//!
//! ```text
//!   format parser ──► RegistryBuilder ──finalize──► SeriesRegistry
//!                                                        │
//!   RangeReader ─────────────────────────────► PlaneReader ──► PixelBuffer
//!                                               │        │
//!                                        BlockLocator  BlockCache
//! ```
//!
//! - [`model`] - Dimension orders, the coordinate mapper, core descriptors
//! - [`layout`] - Block tables, the block locator and block discovery
//! - [`series`] - Series registration and flattening
//! - [`plane`] - The plane reader, block cache and pixel buffers
//! - [`io`] - Storage abstraction with file and memory backends
//! - [`config`] - Reader options and logging setup
//!
//! ## Example
//!
//! ```rust
//! use bioplane::{
//!     BlockDescriptor, BlockTable, CoreDescriptor, DescriptorPatch, MemoryReader, PixelType,
//!     PlaneReader, ReaderConfig, Region, RegistryBuilder,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Two 4x2 UInt8 planes stored back to back at offset 16
//! let mut bytes = vec![0u8; 16];
//! bytes.extend(0..16u8);
//!
//! let descriptor = CoreDescriptor::builder()
//!     .apply(DescriptorPatch {
//!         size_x: Some(4),
//!         size_y: Some(2),
//!         size_z: Some(2),
//!         pixel_type: Some(PixelType::UInt8),
//!         ..Default::default()
//!     })
//!     .build()?;
//!
//! let mut builder = RegistryBuilder::new();
//! builder.register(descriptor, BlockTable::new(vec![BlockDescriptor::new(16)])?);
//! let registry = builder.finalize()?;
//!
//! let storage = MemoryReader::new(bytes, "memory://demo");
//! let mut reader = PlaneReader::new(storage, registry, ReaderConfig::default());
//! let plane = reader.read_plane(0, 0, 1, Region::new(1, 0, 2, 2)).await?;
//! assert_eq!(plane.data().as_ref(), &[9, 10, 13, 14]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod layout;
pub mod model;
pub mod plane;
pub mod series;

// Re-export commonly used types
pub use config::{init_logging, ReaderConfig};
pub use error::{
    CoordinateError, DescriptorError, DiscoveryError, IoError, LayoutError, PlaneError,
    RegistryError,
};
pub use io::{ByteOrder, FileReader, MemoryReader, RangeReader};
pub use layout::{
    discover_block_table, BlockDescriptor, BlockLocator, BlockTable, Discovery, LocateOutcome,
    ReadPlan, Region, ScanOptions,
};
pub use model::{
    to_flat, to_zct, Axis, ChannelOrder, CoreDescriptor, DescriptorPatch, DimensionOrder,
    PixelType, PlaneSizes, Zct,
};
pub use plane::{ChannelContext, PixelBuffer, PlaneReader, ReadStats};
pub use series::{RegistryBuilder, SeriesHandle, SeriesRegistry};
