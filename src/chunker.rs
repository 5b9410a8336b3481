use std::fmt;

use crate::error::{ScanError, ScanResult};

/// Most public RPC nodes cap a single `eth_getLogs` response; 400 blocks stays under those limits.
pub const DEFAULT_CHUNK_SIZE: u64 = 400;

/// Inclusive block range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub(crate) fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, block: u64) -> bool {
        self.start <= block && block <= self.end
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Splits `[start, end]` into consecutive ranges.
///
/// The first range is `[start, start + size]` and every following one starts right after the
/// previous end, so `chunks(0, 30, 10)` yields `[0, 10]`, `[11, 21]`, `[22, 30]`. The last range
/// is clipped to `end`.
pub fn chunks(start: u64, end: u64, size: u64) -> ScanResult<Vec<BlockRange>> {
    if size == 0 {
        return Err(ScanError::InvalidChunkSize);
    }
    if start > end {
        return Err(ScanError::InvalidRange { start, end });
    }

    let mut ranges = Vec::new();
    let mut from = start;

    loop {
        let to = from.saturating_add(size).min(end);
        ranges.push(BlockRange::new(from, to));

        if to == end {
            break;
        }
        from = to + 1;
    }

    Ok(ranges)
}
