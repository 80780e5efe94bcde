use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_BLOCK_SIZE;

/// A contiguous range of blocks: `length` blocks of `block_size` bytes
/// starting at block `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Region {
    start: u64,
    length: u64,
    block_size: u32,
}

impl Region {
    pub fn new(start: u64, length: u64, block_size: u32) -> Self {
        Self {
            start,
            length,
            block_size,
        }
    }

    /// Creates a region of `bytes` bytes, rounded down to whole blocks,
    /// starting at block `start`.
    pub fn from_bytes(start: u64, bytes: u64, block_size: u32) -> Self {
        Self::new(start, bytes / u64::from(block_size.max(1)), block_size)
    }

    /// Creates a region in 512-byte sectors.
    pub fn from_sectors(start: u64, length: u64) -> Self {
        Self::new(start, length, DEFAULT_BLOCK_SIZE)
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Last block of the region. For an empty region this is the block
    /// before `start`, saturating at zero.
    pub fn end(&self) -> u64 {
        (self.start + self.length).saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Converts a number of blocks of this region into bytes.
    pub fn to_bytes(&self, blocks: u64) -> u64 {
        blocks * u64::from(self.block_size)
    }

    /// Size of the region in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.to_bytes(self.length)
    }

    /// Byte offset of the first block.
    pub fn start_bytes(&self) -> u64 {
        self.to_bytes(self.start)
    }

    /// Byte offset one past the last block.
    pub fn end_bytes(&self) -> u64 {
        self.to_bytes(self.start + self.length)
    }

    /// Returns a copy with a different length, keeping start and block size.
    pub fn with_length(&self, length: u64) -> Self {
        Self::new(self.start, length, self.block_size)
    }

    /// Returns whether the two regions share at least one byte. Regions with
    /// different block sizes are compared by byte offsets.
    pub fn overlaps(&self, other: &Region) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.start_bytes() < other.end_bytes() && other.start_bytes() < self.end_bytes()
    }

    /// Returns whether `other` lies completely within this region.
    pub fn contains(&self, other: &Region) -> bool {
        self.start_bytes() <= other.start_bytes() && other.end_bytes() <= self.end_bytes()
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {} B]",
            self.start, self.length, self.block_size
        )
    }
}

/// Renders a byte count with a binary unit, e.g. `250.00 MiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{value:.2} {}", UNITS[unit])
}
