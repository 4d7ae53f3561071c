//! Heuristic block discovery.
//!
//! Some containers do not store a usable offset table. Their pixel blocks can
//! still be found by scanning the storage for a marker that precedes each
//! block, optionally followed by a length field. The scan is a pure function
//! of the storage contents and the [`ScanOptions`]: it returns every block it
//! found together with a confidence score and a trail of notes explaining
//! anything unexpected, and leaves the decision of whether to trust the
//! result to the caller.

use tracing::{debug, warn};

use crate::error::{DiscoveryError, LayoutError};
use crate::io::{ByteOrder, RangeReader};

use super::block_table::{BlockDescriptor, BlockTable};

/// Default number of bytes fetched per scan request.
pub const DEFAULT_SCAN_CHUNK: usize = 64 * 1024;

/// Default limit on the number of blocks a scan may report.
pub const DEFAULT_MAX_BLOCKS: usize = 100_000;

/// Width of a length field in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    U16,
    U32,
    U64,
}

impl FieldWidth {
    pub fn bytes(self) -> usize {
        match self {
            FieldWidth::U16 => 2,
            FieldWidth::U32 => 4,
            FieldWidth::U64 => 8,
        }
    }
}

/// A block length stored after the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthField {
    /// Distance from the end of the marker to the field
    pub offset: u64,
    pub width: FieldWidth,
    pub byte_order: ByteOrder,
}

/// Parameters of a marker scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Byte patterns that start a block; the earliest occurrence of any wins
    pub markers: Vec<Vec<u8>>,
    pub start: u64,
    /// End of the scanned range; defaults to the storage length
    pub end: Option<u64>,
    /// Distance from the end of the marker to the first pixel byte
    pub data_offset: u64,
    pub length_field: Option<LengthField>,
    /// Bytes per plane, if known; drives the confidence score
    pub expected_plane_size: Option<u64>,
    pub max_blocks: usize,
    pub chunk_size: usize,
}

impl ScanOptions {
    pub fn new(marker: impl Into<Vec<u8>>) -> Self {
        Self {
            markers: vec![marker.into()],
            start: 0,
            end: None,
            data_offset: 0,
            length_field: None,
            expected_plane_size: None,
            max_blocks: DEFAULT_MAX_BLOCKS,
            chunk_size: DEFAULT_SCAN_CHUNK,
        }
    }

    fn longest_marker(&self) -> usize {
        self.markers.iter().map(Vec::len).max().unwrap_or(0)
    }

    fn validate(&self) -> Result<(), DiscoveryError> {
        if self.markers.is_empty() || self.markers.iter().any(Vec::is_empty) {
            return Err(DiscoveryError::InvalidScan(
                "at least one non-empty marker is required".to_string(),
            ));
        }
        if self.chunk_size < self.longest_marker() {
            return Err(DiscoveryError::InvalidScan(format!(
                "chunk size {} is shorter than the longest marker ({} bytes)",
                self.chunk_size,
                self.longest_marker()
            )));
        }
        if self.max_blocks == 0 {
            return Err(DiscoveryError::InvalidScan("max_blocks must be at least 1".to_string()));
        }
        if self.expected_plane_size == Some(0) {
            return Err(DiscoveryError::InvalidScan("expected plane size is zero".to_string()));
        }
        Ok(())
    }
}

/// One block found by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredBlock {
    pub marker_offset: u64,
    /// First pixel byte
    pub data_offset: u64,
    /// Length read from the length field, if the scan has one
    pub declared_length: Option<u64>,
    /// Bytes from `data_offset` to the next marker or the end of the scan
    pub span: u64,
}

impl DiscoveredBlock {
    /// Declared length, or the span when no length was declared.
    pub fn length(&self) -> u64 {
        self.declared_length.unwrap_or(self.span)
    }
}

/// Outcome of a scan.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub blocks: Vec<DiscoveredBlock>,
    /// 0.0 (nothing matches expectations) to 1.0 (everything does)
    pub confidence: f64,
    /// Human-readable trail of anomalies met during the scan
    pub notes: Vec<String>,
    pub expected_plane_size: Option<u64>,
}

impl Discovery {
    /// Turn the discovered blocks into a block table.
    ///
    /// With a known plane size each block holds `length / plane_size` planes;
    /// otherwise one plane per block.
    pub fn block_table(&self) -> Result<BlockTable, LayoutError> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for found in &self.blocks {
            let planes = match self.expected_plane_size {
                Some(plane_size) => (found.length() / plane_size).max(1),
                None => 1,
            };
            let plane_count = u32::try_from(planes).map_err(|_| LayoutError::LossyConversion {
                field: "plane count",
                value: planes,
            })?;
            blocks.push(BlockDescriptor::new(found.data_offset).with_plane_count(plane_count));
        }

        let table = BlockTable::new(blocks)?;
        match self.blocks.last() {
            Some(last) => {
                let end = last
                    .data_offset
                    .checked_add(last.length())
                    .ok_or(LayoutError::Overflow { what: "end pointer" })?;
                table.with_end_pointer(end)
            }
            None => Ok(table),
        }
    }
}

/// Scan `reader` for blocks.
pub async fn scan<R: RangeReader + ?Sized>(
    reader: &R,
    options: &ScanOptions,
) -> Result<Discovery, DiscoveryError> {
    options.validate()?;

    let end = options.end.unwrap_or(reader.size()).min(reader.size());
    if options.start > end {
        return Err(DiscoveryError::InvalidScan(format!(
            "scan start {} is past the end {}",
            options.start, end
        )));
    }

    let mut blocks: Vec<DiscoveredBlock> = Vec::new();
    let mut notes = Vec::new();
    let mut pos = options.start;

    while pos < end {
        if blocks.len() == options.max_blocks {
            let note = format!(
                "stopped after {} blocks at offset {}; block limit reached",
                blocks.len(),
                pos
            );
            warn!(source = reader.identifier(), offset = pos, "{}", note);
            notes.push(note);
            break;
        }

        let Some((marker_offset, marker_len)) = find_marker(reader, pos, end, options).await? else {
            break;
        };
        let header_end = marker_offset + marker_len as u64;

        let declared_length = match options.length_field {
            Some(field) => match read_length(reader, header_end, end, field).await? {
                Some(length) => Some(length),
                None => {
                    notes.push(format!(
                        "length field of marker at {} runs past the end of the scan",
                        marker_offset
                    ));
                    break;
                }
            },
            None => None,
        };

        let data_offset = match header_end.checked_add(options.data_offset) {
            Some(offset) if offset <= end => offset,
            _ => {
                notes.push(format!(
                    "pixel data of marker at {} starts past the end of the scan",
                    marker_offset
                ));
                break;
            }
        };

        debug!(
            source = reader.identifier(),
            marker_offset,
            data_offset,
            declared_length,
            "found block"
        );

        // close the previous block's span at this marker
        if let Some(previous) = blocks.last_mut() {
            previous.span = marker_offset.saturating_sub(previous.data_offset);
        }
        blocks.push(DiscoveredBlock {
            marker_offset,
            data_offset,
            declared_length,
            span: end - data_offset,
        });

        pos = match declared_length {
            Some(length) => match data_offset.checked_add(length) {
                Some(next) => next,
                None => {
                    notes.push(format!(
                        "declared length of block at {} overflows; resuming after its header",
                        marker_offset
                    ));
                    header_end
                }
            },
            None => header_end,
        };
    }

    if blocks.is_empty() {
        return Err(DiscoveryError::NoBlocksFound {
            start: options.start,
            end,
        });
    }

    if options.length_field.is_some() {
        for pair in blocks.windows(2) {
            if pair[0].length() > pair[0].span {
                notes.push(format!(
                    "block at {} declares {} bytes but the next marker follows after {}",
                    pair[0].data_offset,
                    pair[0].length(),
                    pair[0].span
                ));
            }
        }
    }

    let confidence = confidence(&blocks, options.expected_plane_size, &mut notes);
    if confidence < 1.0 {
        warn!(
            source = reader.identifier(),
            blocks = blocks.len(),
            confidence,
            "block discovery is uncertain"
        );
    }

    Ok(Discovery {
        blocks,
        confidence,
        notes,
        expected_plane_size: options.expected_plane_size,
    })
}

/// Scan and convert the result into a block table in one step.
pub async fn discover_block_table<R: RangeReader + ?Sized>(
    reader: &R,
    options: &ScanOptions,
) -> Result<(BlockTable, Discovery), DiscoveryError> {
    let discovery = scan(reader, options).await?;
    let table = discovery.block_table()?;
    Ok((table, discovery))
}

// =============================================================================
// Helpers
// =============================================================================

/// Earliest marker occurrence in `[pos, end)`, as (offset, marker length).
async fn find_marker<R: RangeReader + ?Sized>(
    reader: &R,
    pos: u64,
    end: u64,
    options: &ScanOptions,
) -> Result<Option<(u64, usize)>, DiscoveryError> {
    let overlap = (options.longest_marker() - 1) as u64;
    let mut chunk_start = pos;

    while chunk_start < end {
        let chunk_end = chunk_start.saturating_add(options.chunk_size as u64).min(end);
        let data = reader
            .read_exact_at(chunk_start, (chunk_end - chunk_start) as usize)
            .await?;

        if let Some((index, len)) = earliest_match(&data, &options.markers) {
            return Ok(Some((chunk_start + index as u64, len)));
        }
        if chunk_end == end {
            break;
        }
        chunk_start = chunk_end - overlap;
    }
    Ok(None)
}

fn earliest_match(data: &[u8], markers: &[Vec<u8>]) -> Option<(usize, usize)> {
    (0..data.len()).find_map(|i| {
        markers
            .iter()
            .find(|marker| data[i..].starts_with(marker))
            .map(|marker| (i, marker.len()))
    })
}

/// Read a length field at `header_end + field.offset`; `None` if it does not
/// fit before `end`.
async fn read_length<R: RangeReader + ?Sized>(
    reader: &R,
    header_end: u64,
    end: u64,
    field: LengthField,
) -> Result<Option<u64>, DiscoveryError> {
    let width = field.width.bytes();
    let at = match header_end.checked_add(field.offset) {
        Some(at) if at.checked_add(width as u64).is_some_and(|e| e <= end) => at,
        _ => return Ok(None),
    };
    let bytes = reader.read_exact_at(at, width).await?;
    let order = field.byte_order;
    Ok(Some(match field.width {
        FieldWidth::U16 => order.read_u16(&bytes) as u64,
        FieldWidth::U32 => order.read_u32(&bytes) as u64,
        FieldWidth::U64 => order.read_u64(&bytes),
    }))
}

/// Score how well the block lengths match expectations.
///
/// With a plane size, a block scores 1 when its length is a whole number of
/// planes and 0.5 when it merely holds at least one plane. Without one, the
/// score is the share of blocks with the most common length.
fn confidence(blocks: &[DiscoveredBlock], plane_size: Option<u64>, notes: &mut Vec<String>) -> f64 {
    if blocks.is_empty() {
        return 0.0;
    }

    let score = match plane_size {
        Some(plane_size) => blocks
            .iter()
            .map(|block| {
                let length = block.length();
                if length >= plane_size && length % plane_size == 0 {
                    1.0
                } else if length >= plane_size {
                    notes.push(format!(
                        "block at {} holds {} bytes, not a multiple of the plane size {}",
                        block.data_offset, length, plane_size
                    ));
                    0.5
                } else {
                    notes.push(format!(
                        "block at {} holds {} bytes, less than one plane of {}",
                        block.data_offset, length, plane_size
                    ));
                    0.0
                }
            })
            .sum::<f64>(),
        None => {
            let mut lengths: Vec<u64> = blocks.iter().map(DiscoveredBlock::length).collect();
            lengths.sort_unstable();
            let mut most_common = 0;
            let mut run = 0;
            for (i, length) in lengths.iter().enumerate() {
                run = if i > 0 && lengths[i - 1] == *length { run + 1 } else { 1 };
                most_common = most_common.max(run);
            }
            if most_common < blocks.len() {
                notes.push(format!(
                    "block lengths disagree: {} of {} blocks share the most common length",
                    most_common,
                    blocks.len()
                ));
            }
            most_common as f64
        }
    };

    score / blocks.len() as f64
}
