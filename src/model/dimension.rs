//! Dimension orders and the flat-plane coordinate mapper.
//!
//! A series holds `size_z * size_c * size_t` planes. Each plane is addressed
//! by a single flat index; the dimension order says which of Z, C and T
//! varies fastest once X and Y have been peeled off. X and Y index pixels
//! *within* a plane and never take part in the flat index.
//!
//! ```text
//!   XYZCT:  flat = z + size_z * (c + size_c * t)
//!   XYCTZ:  flat = c + size_c * (t + size_t * z)
//! ```
//!
//! [`to_zct`] and [`to_flat`] are exact inverses over their whole domain.
//! Every higher layer (block lookup, cache keys, channel context) indexes
//! through them, so out-of-range input is rejected rather than clamped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinateError, DescriptorError};

// =============================================================================
// Axis
// =============================================================================

/// One of the three non-spatial axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Focal plane
    Z,
    /// Channel (after samples-per-pixel packing is taken into account)
    C,
    /// Timepoint
    T,
}

impl Axis {
    /// Letter used for this axis in dimension order tokens.
    pub fn letter(self) -> char {
        match self {
            Axis::Z => 'Z',
            Axis::C => 'C',
            Axis::T => 'T',
        }
    }

    fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'Z' => Some(Axis::Z),
            'C' => Some(Axis::C),
            'T' => Some(Axis::T),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

// =============================================================================
// DimensionOrder
// =============================================================================

/// Rasterization order of the Z, C and T axes after the fixed `XY` prefix.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimensionOrder {
    XYZCT,
    XYZTC,
    XYCZT,
    XYCTZ,
    XYTZC,
    XYTCZ,
}

impl DimensionOrder {
    /// All six permutations.
    pub const ALL: [DimensionOrder; 6] = [
        DimensionOrder::XYZCT,
        DimensionOrder::XYZTC,
        DimensionOrder::XYCZT,
        DimensionOrder::XYCTZ,
        DimensionOrder::XYTZC,
        DimensionOrder::XYTCZ,
    ];

    /// The three axes, fastest-varying first.
    pub fn axes(self) -> [Axis; 3] {
        match self {
            DimensionOrder::XYZCT => [Axis::Z, Axis::C, Axis::T],
            DimensionOrder::XYZTC => [Axis::Z, Axis::T, Axis::C],
            DimensionOrder::XYCZT => [Axis::C, Axis::Z, Axis::T],
            DimensionOrder::XYCTZ => [Axis::C, Axis::T, Axis::Z],
            DimensionOrder::XYTZC => [Axis::T, Axis::Z, Axis::C],
            DimensionOrder::XYTCZ => [Axis::T, Axis::C, Axis::Z],
        }
    }

    /// Build an order from its axes, fastest-varying first.
    ///
    /// Returns `None` unless each axis appears exactly once.
    pub fn from_axes(axes: [Axis; 3]) -> Option<Self> {
        Self::ALL.into_iter().find(|order| order.axes() == axes)
    }

    /// The canonical token, e.g. `"XYZCT"`.
    pub fn as_str(self) -> &'static str {
        match self {
            DimensionOrder::XYZCT => "XYZCT",
            DimensionOrder::XYZTC => "XYZTC",
            DimensionOrder::XYCZT => "XYCZT",
            DimensionOrder::XYCTZ => "XYCTZ",
            DimensionOrder::XYTZC => "XYTZC",
            DimensionOrder::XYTCZ => "XYTCZ",
        }
    }

    /// Position of `axis` in the rasterization order (0 = fastest).
    pub fn rank(self, axis: Axis) -> usize {
        self.axes()
            .iter()
            .position(|a| *a == axis)
            .unwrap_or_default()
    }
}

impl Default for DimensionOrder {
    fn default() -> Self {
        DimensionOrder::XYZCT
    }
}

impl fmt::Display for DimensionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DimensionOrder {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DescriptorError::InvalidDimensionOrder(s.to_string());

        let rest = s.trim().strip_prefix("XY").ok_or_else(invalid)?;
        let letters: Vec<char> = rest.chars().collect();
        if letters.len() != 3 {
            return Err(invalid());
        }

        let mut axes = [Axis::Z; 3];
        for (slot, letter) in axes.iter_mut().zip(letters) {
            *slot = Axis::from_letter(letter.to_ascii_uppercase()).ok_or_else(invalid)?;
        }

        Self::from_axes(axes).ok_or_else(invalid)
    }
}

// =============================================================================
// Sizes and coordinates
// =============================================================================

/// Sizes of the three non-spatial axes.
///
/// `c` is the *effective* channel count: RGB-packed samples count once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaneSizes {
    pub z: u32,
    pub c: u32,
    pub t: u32,
}

impl PlaneSizes {
    pub fn new(z: u32, c: u32, t: u32) -> Self {
        Self { z, c, t }
    }

    /// Size of one axis.
    pub fn get(&self, axis: Axis) -> u32 {
        match axis {
            Axis::Z => self.z,
            Axis::C => self.c,
            Axis::T => self.t,
        }
    }

    /// Total number of planes, `z * c * t`.
    pub fn image_count(&self) -> u64 {
        self.z as u64 * self.c as u64 * self.t as u64
    }

    /// Check every axis is non-empty and the plane count fits a `u32` index.
    pub fn validate(&self) -> Result<u32, CoordinateError> {
        for axis in [Axis::Z, Axis::C, Axis::T] {
            if self.get(axis) == 0 {
                return Err(CoordinateError::EmptyAxis { axis });
            }
        }
        let image_count = self.image_count();
        u32::try_from(image_count).map_err(|_| CoordinateError::TooManyPlanes { image_count })
    }
}

/// A (Z, C, T) position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Zct {
    pub z: u32,
    pub c: u32,
    pub t: u32,
}

impl Zct {
    pub fn new(z: u32, c: u32, t: u32) -> Self {
        Self { z, c, t }
    }

    /// Index along one axis.
    pub fn get(&self, axis: Axis) -> u32 {
        match axis {
            Axis::Z => self.z,
            Axis::C => self.c,
            Axis::T => self.t,
        }
    }

    fn set(&mut self, axis: Axis, value: u32) {
        match axis {
            Axis::Z => self.z = value,
            Axis::C => self.c = value,
            Axis::T => self.t = value,
        }
    }
}

// =============================================================================
// Coordinate mapper
// =============================================================================

/// Map a flat plane index to its (Z, C, T) position.
pub fn to_zct(flat: u32, sizes: PlaneSizes, order: DimensionOrder) -> Result<Zct, CoordinateError> {
    let image_count = sizes.validate()?;
    if flat >= image_count {
        return Err(CoordinateError::PlaneOutOfRange {
            index: flat,
            image_count: image_count as u64,
        });
    }

    let [a0, a1, a2] = order.axes();
    let len0 = sizes.get(a0);
    let len1 = sizes.get(a1);

    let mut zct = Zct::new(0, 0, 0);
    zct.set(a0, flat % len0);
    let rest = flat / len0;
    zct.set(a1, rest % len1);
    zct.set(a2, rest / len1);
    Ok(zct)
}

/// Map a (Z, C, T) position to its flat plane index.
pub fn to_flat(zct: Zct, sizes: PlaneSizes, order: DimensionOrder) -> Result<u32, CoordinateError> {
    sizes.validate()?;

    for axis in [Axis::Z, Axis::C, Axis::T] {
        let index = zct.get(axis);
        let size = sizes.get(axis);
        if index >= size {
            return Err(CoordinateError::AxisOutOfRange { axis, index, size });
        }
    }

    let [a0, a1, a2] = order.axes();
    let len0 = sizes.get(a0);
    let len1 = sizes.get(a1);

    // cannot overflow: validate() proved len0 * len1 * len2 fits in u32
    Ok(zct.get(a0) + len0 * (zct.get(a1) + len1 * zct.get(a2)))
}
