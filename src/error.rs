use thiserror::Error;

use crate::model::Axis;

/// I/O errors that can occur when reading from the underlying storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Error reported by the file system or another backend
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),
}

/// Errors from the coordinate mapper.
///
/// These are caller bugs: an index outside the plane domain is never clamped
/// or wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinateError {
    /// Flat plane index is not smaller than the image count
    #[error("Plane index {index} out of range (image count {image_count})")]
    PlaneOutOfRange { index: u32, image_count: u64 },

    /// A Z, C or T index is not smaller than its axis size
    #[error("{axis} index {index} out of range (size {size})")]
    AxisOutOfRange { axis: Axis, index: u32, size: u32 },

    /// An axis has size zero, so no plane exists at all
    #[error("{axis} size is zero")]
    EmptyAxis { axis: Axis },

    /// The Z*C*T product does not fit a 32-bit plane index
    #[error("Image count {image_count} does not fit in a 32-bit plane index")]
    TooManyPlanes { image_count: u64 },
}

/// Errors raised while building or validating a [`crate::model::CoreDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Dimension order is not `XY` followed by a permutation of Z, C and T
    #[error("Invalid dimension order: {0}")]
    InvalidDimensionOrder(String),

    /// A required field was never set by any pass
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A size field is zero
    #[error("Invalid {field}: must be at least 1")]
    ZeroSize { field: &'static str },

    /// The channel count is not a multiple of the samples per pixel
    #[error("SizeC {size_c} is not a multiple of samples per pixel {samples_per_pixel}")]
    ChannelPacking { size_c: u32, samples_per_pixel: u32 },

    /// The declared bit depth does not fit the pixel type
    #[error("{bits} bits per pixel do not fit a {bytes}-byte sample")]
    BitsPerPixel { bits: u16, bytes: u32 },

    /// A header value could not be converted without losing information
    #[error("Lossy conversion of {field}: {value}")]
    LossyConversion { field: &'static str, value: String },

    /// The Z*C*T volume is too large to index
    #[error(transparent)]
    Coordinates(#[from] CoordinateError),
}

/// Errors from block table construction and offset arithmetic.
///
/// Every variant describes an internally inconsistent layout. None of them is
/// a truncated-data situation; truncation is reported as
/// [`crate::layout::LocateOutcome::Truncated`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Offset arithmetic overflowed 64 bits
    #[error("Offset arithmetic overflow while computing {what}")]
    Overflow { what: &'static str },

    /// Tile increment is not a whole number of planes
    #[error("Byte increment per tile {byte_increment} is not a multiple of plane size {plane_size}")]
    UnevenTileIncrement { byte_increment: u64, plane_size: u64 },

    /// A block declares zero tiles
    #[error("Block {index} has a tile count of zero")]
    ZeroTileCount { index: usize },

    /// A tiled block has no byte increment
    #[error("Block {index} has {tile_count} tiles but no byte increment per tile")]
    MissingTileIncrement { index: usize, tile_count: u32 },

    /// Tile index is not covered by the block
    #[error("Tile {tile} out of range (block holds {tile_count} tiles)")]
    TileOutOfRange { tile: u32, tile_count: u32 },

    /// Base offsets go backwards
    #[error("Block {index} starts at {offset}, before the previous block at {previous}")]
    UnorderedBlocks {
        index: usize,
        offset: u64,
        previous: u64,
    },

    /// A block's pixel data runs into the next block
    #[error("Block {index} needs {required} bytes but the next block starts after {available}")]
    OverlappingBlocks {
        index: usize,
        required: u64,
        available: u64,
    },

    /// No block covers the requested plane
    #[error("Plane {plane} is not covered by the block table ({covered} planes covered)")]
    PlaneNotCovered { plane: u32, covered: u64 },

    /// The table contains no blocks
    #[error("Block table is empty")]
    EmptyTable,

    /// A 64-bit quantity does not fit in memory addressing
    #[error("Lossy conversion of {field}: {value}")]
    LossyConversion { field: &'static str, value: u64 },
}

/// Errors raised while registering series during the opening phase.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Handle does not name a registered raw block
    #[error("Unknown series handle {handle} ({count} registered)")]
    UnknownSeries { handle: usize, count: usize },

    /// Resolution level does not exist for the series
    #[error("Unknown resolution {resolution} for series {series} ({count} levels)")]
    UnknownResolution {
        series: usize,
        resolution: usize,
        count: usize,
    },

    /// Descriptor failed validation
    #[error("Invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Block table failed validation
    #[error("Invalid block table: {0}")]
    Layout(#[from] LayoutError),

    /// Resolution levels of one series disagree on the non-spatial axes
    #[error("Resolution {resolution} of series {series} does not match level 0: {reason}")]
    ResolutionMismatch {
        series: usize,
        resolution: usize,
        reason: String,
    },
}

/// Errors from heuristic block discovery.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// I/O error while scanning
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Scan parameters are unusable
    #[error("Invalid scan parameters: {0}")]
    InvalidScan(String),

    /// The marker never occurs in the scanned range
    #[error("No blocks found between offsets {start} and {end}")]
    NoBlocksFound { start: u64, end: u64 },

    /// The discovered offsets do not form a valid table
    #[error("Discovered blocks do not form a valid table: {0}")]
    Layout(#[from] LayoutError),
}

/// Errors returned by [`crate::plane::PlaneReader::read_plane`].
///
/// Truncated storage never appears here: it is recovered inside the reader.
#[derive(Debug, Clone, Error)]
pub enum PlaneError {
    /// Bad coordinates, rectangle, series or resolution
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Flat plane or Z/C/T index out of bounds
    #[error("Index out of range: {0}")]
    IndexOutOfRange(#[from] CoordinateError),

    /// The block layout for this series is internally inconsistent
    #[error("Corrupt layout in series {series}, resolution {resolution}, plane {plane}: {source}")]
    CorruptLayout {
        series: usize,
        resolution: usize,
        plane: u32,
        #[source]
        source: LayoutError,
    },

    /// The underlying storage failed
    #[error(
        "Storage read failed in series {series}, resolution {resolution}, plane {plane} at offset {offset}: {source}"
    )]
    StorageIo {
        series: usize,
        resolution: usize,
        plane: u32,
        offset: u64,
        #[source]
        source: IoError,
    },
}

impl PlaneError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        PlaneError::InvalidRequest {
            reason: reason.into(),
        }
    }
}
