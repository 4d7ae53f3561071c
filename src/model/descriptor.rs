//! Core descriptors: the per-series, per-resolution image geometry.
//!
//! Format decoders learn the geometry of an image over several passes
//! (a fixed header, then an XML block, then a trailing index...). Instead of
//! mutating one descriptor in place, each pass produces a [`DescriptorPatch`]
//! and a [`CoreDescriptorBuilder`] accumulates them. [`CoreDescriptorBuilder::build`]
//! validates the result and freezes it into an immutable [`CoreDescriptor`].
//!
//! # Example
//!
//! ```
//! use bioplane::model::{CoreDescriptorBuilder, DescriptorPatch, DimensionOrder, PixelType};
//!
//! let mut builder = CoreDescriptorBuilder::new();
//! builder.apply(DescriptorPatch {
//!     size_x: Some(512),
//!     size_y: Some(512),
//!     pixel_type: Some(PixelType::UInt16),
//!     ..Default::default()
//! });
//! builder.apply(DescriptorPatch {
//!     size_z: Some(10),
//!     size_c: Some(3),
//!     dimension_order: Some(DimensionOrder::XYCZT),
//!     ..Default::default()
//! });
//!
//! let descriptor = builder.build().unwrap();
//! assert_eq!(descriptor.image_count(), 30);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoordinateError, DescriptorError, LayoutError};

use super::dimension::{to_flat, to_zct, DimensionOrder, PlaneSizes, Zct};

// =============================================================================
// Pixel types
// =============================================================================

/// Storage type of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float,
    Double,
    /// 1-bit data, stored one sample per byte
    Bit,
}

impl PixelType {
    /// Size in bytes of one sample.
    pub fn bytes_per_sample(self) -> u32 {
        match self {
            PixelType::Int8 | PixelType::UInt8 | PixelType::Bit => 1,
            PixelType::Int16 | PixelType::UInt16 => 2,
            PixelType::Int32 | PixelType::UInt32 | PixelType::Float => 4,
            PixelType::Double => 8,
        }
    }
}

/// Order in which colour samples of a packed pixel are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    /// Blue first; several vendors store colour planes this way
    Bgr,
}

// =============================================================================
// Checked conversions
// =============================================================================

/// Convert a header value stored as a float into a dimension.
///
/// Fails unless the value is a finite, non-negative whole number that fits in
/// a `u32`.
pub fn checked_dimension(field: &'static str, value: f64) -> Result<u32, DescriptorError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
        Ok(value as u32)
    } else {
        Err(DescriptorError::LossyConversion {
            field,
            value: value.to_string(),
        })
    }
}

/// Narrow a 64-bit header value into a `u32`.
pub fn checked_u32(field: &'static str, value: u64) -> Result<u32, DescriptorError> {
    u32::try_from(value).map_err(|_| DescriptorError::LossyConversion {
        field,
        value: value.to_string(),
    })
}

// =============================================================================
// CoreDescriptor
// =============================================================================

/// Geometry and sample format of one resolution level of one series.
///
/// Immutable once built. `image_count == size_z * effective_size_c * size_t`
/// holds for every value of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreDescriptor {
    size_x: u32,
    size_y: u32,
    size_z: u32,
    size_c: u32,
    size_t: u32,
    samples_per_pixel: u32,
    pixel_type: PixelType,
    bits_per_pixel: u16,
    interleaved: bool,
    indexed: bool,
    little_endian: bool,
    dimension_order: DimensionOrder,
    channel_order: ChannelOrder,
    image_count: u32,
}

impl CoreDescriptor {
    /// Start a builder.
    pub fn builder() -> CoreDescriptorBuilder {
        CoreDescriptorBuilder::new()
    }

    pub fn size_x(&self) -> u32 {
        self.size_x
    }

    pub fn size_y(&self) -> u32 {
        self.size_y
    }

    pub fn size_z(&self) -> u32 {
        self.size_z
    }

    /// Total channel count, counting each packed sample.
    pub fn size_c(&self) -> u32 {
        self.size_c
    }

    pub fn size_t(&self) -> u32 {
        self.size_t
    }

    /// Channel count seen by the plane index (`size_c / samples_per_pixel`).
    pub fn effective_size_c(&self) -> u32 {
        self.size_c / self.samples_per_pixel
    }

    /// Samples packed into one pixel (3 for RGB, 1 otherwise).
    pub fn samples_per_pixel(&self) -> u32 {
        self.samples_per_pixel
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn bits_per_pixel(&self) -> u16 {
        self.bits_per_pixel
    }

    pub fn is_rgb(&self) -> bool {
        self.samples_per_pixel > 1
    }

    /// Packed samples are stored pixel by pixel (`RGBRGB...`) rather than
    /// plane by plane (`RRR...GGG...BBB...`).
    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    pub fn dimension_order(&self) -> DimensionOrder {
        self.dimension_order
    }

    pub fn channel_order(&self) -> ChannelOrder {
        self.channel_order
    }

    /// Number of planes, `size_z * effective_size_c * size_t`.
    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    /// Sizes seen by the coordinate mapper.
    pub fn plane_sizes(&self) -> PlaneSizes {
        PlaneSizes::new(self.size_z, self.effective_size_c(), self.size_t)
    }

    /// Bytes per pixel, all packed samples included.
    pub fn bytes_per_pixel(&self) -> u64 {
        self.pixel_type.bytes_per_sample() as u64 * self.samples_per_pixel as u64
    }

    /// Bytes in one unpadded row.
    pub fn row_bytes(&self) -> u64 {
        self.size_x as u64 * self.bytes_per_pixel()
    }

    /// Bytes in one unpadded plane.
    pub fn plane_size(&self) -> Result<u64, LayoutError> {
        self.row_bytes()
            .checked_mul(self.size_y as u64)
            .ok_or(LayoutError::Overflow { what: "plane size" })
    }

    /// Map a flat plane index to (Z, C, T).
    pub fn zct(&self, flat: u32) -> Result<Zct, CoordinateError> {
        to_zct(flat, self.plane_sizes(), self.dimension_order)
    }

    /// Map (Z, C, T) to a flat plane index.
    pub fn flat_index(&self, zct: Zct) -> Result<u32, CoordinateError> {
        to_flat(zct, self.plane_sizes(), self.dimension_order)
    }

    /// Whether two descriptors have the same X/Y/C/Z extent and pixel type.
    ///
    /// This is the shape test used when folding raw blocks into a timelapse.
    pub fn same_shape(&self, other: &CoreDescriptor) -> bool {
        self.size_x == other.size_x
            && self.size_y == other.size_y
            && self.size_c == other.size_c
            && self.size_z == other.size_z
            && self.pixel_type == other.pixel_type
    }

    /// Copy of this descriptor with a different T extent.
    pub fn with_size_t(&self, size_t: u32) -> Result<CoreDescriptor, DescriptorError> {
        CoreDescriptorBuilder::from_descriptor(self)
            .apply(DescriptorPatch {
                size_t: Some(size_t),
                ..Default::default()
            })
            .build()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Fields learned by one metadata pass. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorPatch {
    pub size_x: Option<u32>,
    pub size_y: Option<u32>,
    pub size_z: Option<u32>,
    pub size_c: Option<u32>,
    pub size_t: Option<u32>,
    pub samples_per_pixel: Option<u32>,
    pub pixel_type: Option<PixelType>,
    pub bits_per_pixel: Option<u16>,
    pub interleaved: Option<bool>,
    pub indexed: Option<bool>,
    pub little_endian: Option<bool>,
    pub dimension_order: Option<DimensionOrder>,
    pub channel_order: Option<ChannelOrder>,
}

impl DescriptorPatch {
    /// Whether the patch sets nothing.
    pub fn is_empty(&self) -> bool {
        *self == DescriptorPatch::default()
    }

    /// Overlay `later` on top of `self`.
    fn merge(&mut self, later: &DescriptorPatch) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if later.$field.is_some() { self.$field = later.$field; })*
            };
        }
        overlay!(
            size_x,
            size_y,
            size_z,
            size_c,
            size_t,
            samples_per_pixel,
            pixel_type,
            bits_per_pixel,
            interleaved,
            indexed,
            little_endian,
            dimension_order,
            channel_order
        );
    }
}

/// Accumulates [`DescriptorPatch`]es and freezes them into a [`CoreDescriptor`].
#[derive(Debug, Clone, Default)]
pub struct CoreDescriptorBuilder {
    state: DescriptorPatch,
    passes: Vec<DescriptorPatch>,
}

impl CoreDescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a revision of an existing descriptor.
    pub fn from_descriptor(descriptor: &CoreDescriptor) -> Self {
        let state = DescriptorPatch {
            size_x: Some(descriptor.size_x),
            size_y: Some(descriptor.size_y),
            size_z: Some(descriptor.size_z),
            size_c: Some(descriptor.size_c),
            size_t: Some(descriptor.size_t),
            samples_per_pixel: Some(descriptor.samples_per_pixel),
            pixel_type: Some(descriptor.pixel_type),
            bits_per_pixel: Some(descriptor.bits_per_pixel),
            interleaved: Some(descriptor.interleaved),
            indexed: Some(descriptor.indexed),
            little_endian: Some(descriptor.little_endian),
            dimension_order: Some(descriptor.dimension_order),
            channel_order: Some(descriptor.channel_order),
        };
        Self {
            state: state.clone(),
            passes: vec![state],
        }
    }

    /// Record one pass. Fields set by later passes win.
    pub fn apply(&mut self, patch: DescriptorPatch) -> &mut Self {
        if !patch.is_empty() {
            self.state.merge(&patch);
            self.passes.push(patch);
        }
        self
    }

    /// Patches applied so far, oldest first.
    pub fn passes(&self) -> &[DescriptorPatch] {
        &self.passes
    }

    /// Validate the accumulated state and freeze it.
    pub fn build(&self) -> Result<CoreDescriptor, DescriptorError> {
        let s = &self.state;

        let size_x = s.size_x.ok_or(DescriptorError::MissingField("size_x"))?;
        let size_y = s.size_y.ok_or(DescriptorError::MissingField("size_y"))?;
        let pixel_type = s.pixel_type.ok_or(DescriptorError::MissingField("pixel_type"))?;
        let size_z = s.size_z.unwrap_or(1);
        let size_c = s.size_c.unwrap_or(1);
        let size_t = s.size_t.unwrap_or(1);
        let samples_per_pixel = s.samples_per_pixel.unwrap_or(1);

        for (field, value) in [
            ("size_x", size_x),
            ("size_y", size_y),
            ("size_z", size_z),
            ("size_c", size_c),
            ("size_t", size_t),
            ("samples_per_pixel", samples_per_pixel),
        ] {
            if value == 0 {
                return Err(DescriptorError::ZeroSize { field });
            }
        }

        if size_c % samples_per_pixel != 0 {
            return Err(DescriptorError::ChannelPacking {
                size_c,
                samples_per_pixel,
            });
        }

        let bytes = pixel_type.bytes_per_sample();
        let bits_per_pixel = s.bits_per_pixel.unwrap_or((bytes * 8) as u16);
        if bits_per_pixel == 0 || bits_per_pixel as u32 > bytes * 8 {
            return Err(DescriptorError::BitsPerPixel {
                bits: bits_per_pixel,
                bytes,
            });
        }

        let sizes = PlaneSizes::new(size_z, size_c / samples_per_pixel, size_t);
        let image_count = sizes.validate()?;

        Ok(CoreDescriptor {
            size_x,
            size_y,
            size_z,
            size_c,
            size_t,
            samples_per_pixel,
            pixel_type,
            bits_per_pixel,
            interleaved: s.interleaved.unwrap_or(false),
            indexed: s.indexed.unwrap_or(false),
            little_endian: s.little_endian.unwrap_or(true),
            dimension_order: s.dimension_order.unwrap_or_default(),
            channel_order: s.channel_order.unwrap_or_default(),
            image_count,
        })
    }
}
