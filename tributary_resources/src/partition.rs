use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Identifies one independently ordered subdivision of the ingestion channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartitionId(u32);

/// An inclusive range of offsets within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetRange {
    pub start: u64,
    pub end: u64,
}

impl PartitionId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for PartitionId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OffsetRange {
    /// Creates a range covering a single offset.
    pub fn single(offset: u64) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    /// Extends the range so that it ends at `offset`.
    ///
    /// Offsets within a partition only grow, so the start never moves.
    pub fn extend_to(&mut self, offset: u64) {
        debug_assert!(offset >= self.end);
        self.end = offset;
    }

    /// Number of offsets covered by the range. Never zero.
    pub fn num_offsets(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset <= self.end
    }
}

impl Display for OffsetRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
