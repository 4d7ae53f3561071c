//! Series registry: per-series, per-resolution descriptors and block tables.

mod registry;

pub use registry::{Level, RegistryBuilder, Segment, Series, SeriesHandle, SeriesRegistry};
