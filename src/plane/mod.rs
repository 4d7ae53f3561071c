//! Plane reading: the block cache, returned pixel buffers and the reader
//! that ties the registry, locator and storage together.

mod buffer;
mod cache;
mod reader;

pub use buffer::{ChannelContext, PixelBuffer};
pub use cache::{z_block, BlockCache, CacheEntry, CacheKey, CachedPlane, DEFAULT_CACHE_BUDGET};
pub use reader::{PlaneReader, ReadStats};
