//! Block tables, the block locator and heuristic block discovery.

mod block_table;
pub mod discovery;
mod locator;

pub use block_table::{BlockDescriptor, BlockTable};
pub use discovery::{discover_block_table, scan, Discovery, ScanOptions};
pub use locator::{
    BlockLocator, LocateOutcome, ReadPlan, Region, TruncatedPlane, DEFAULT_ROW_ALIGNMENT,
};
