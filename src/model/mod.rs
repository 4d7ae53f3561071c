//! Image model: dimension orders, the coordinate mapper and core descriptors.

mod descriptor;
mod dimension;

pub use descriptor::{
    checked_dimension, checked_u32, ChannelOrder, CoreDescriptor, CoreDescriptorBuilder,
    DescriptorPatch, PixelType,
};
pub use dimension::{to_flat, to_zct, Axis, DimensionOrder, PlaneSizes, Zct};
