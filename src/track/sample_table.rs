//! Per-track sample index: byte offset, size, timestamp and flags for every sample.

use std::ops::{BitOr, BitOrAssign};

use crate::{support::{binary_search_ceil, binary_search_floor}, Mp4Error};

/// Sample flags, shared by sample tables and committed samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: Self = Self(0);
    /// Keyframe, decodable without earlier samples.
    pub const SYNC: Self = Self(1);
    /// Payload is encrypted.
    pub const ENCRYPTED: Self = Self(2);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_sync(&self) -> bool {
        self.contains(Self::SYNC)
    }

    pub fn is_encrypted(&self) -> bool {
        self.contains(Self::ENCRYPTED)
    }
}

impl BitOr for SampleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SampleFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

/// Sample table for a single track.
/// Built once per prepare and never modified.
///
/// All arrays share the same length. Offsets follow the order
/// samples are stored in, timestamps are presentation times and
/// may be out of order for tracks with composition offsets.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub(crate) offsets: Vec<u64>,
    pub(crate) sizes: Vec<u32>,
    pub(crate) timestamps_us: Vec<i64>,
    pub(crate) flags: Vec<SampleFlags>,
    /// 1-based `stsd` entry per sample.
    pub(crate) descriptions: Vec<u32>,
}

impl SampleTable {
    pub fn new(
        offsets: Vec<u64>,
        sizes: Vec<u32>,
        timestamps_us: Vec<i64>,
        flags: Vec<SampleFlags>,
    ) -> Result<Self, Mp4Error> {
        let descriptions = vec![1; offsets.len()];
        Self::with_descriptions(offsets, sizes, timestamps_us, flags, descriptions)
    }

    pub(crate) fn with_descriptions(
        offsets: Vec<u64>,
        sizes: Vec<u32>,
        timestamps_us: Vec<i64>,
        flags: Vec<SampleFlags>,
        descriptions: Vec<u32>,
    ) -> Result<Self, Mp4Error> {
        let len = offsets.len();
        if sizes.len() != len || timestamps_us.len() != len || flags.len() != len || descriptions.len() != len {
            return Err(Mp4Error::InvalidSampleTable(format!(
                "array lengths differ: offsets {len}, sizes {}, timestamps {}, flags {}",
                sizes.len(), timestamps_us.len(), flags.len()
            )))
        }
        Ok(Self {offsets, sizes, timestamps_us, flags, descriptions})
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    pub fn timestamps_us(&self) -> &[i64] {
        &self.timestamps_us
    }

    pub fn flags(&self) -> &[SampleFlags] {
        &self.flags
    }

    pub fn offset(&self, index: usize) -> Option<u64> {
        self.offsets.get(index).copied()
    }

    pub fn size(&self, index: usize) -> Option<u32> {
        self.sizes.get(index).copied()
    }

    pub fn timestamp_us(&self, index: usize) -> Option<i64> {
        self.timestamps_us.get(index).copied()
    }

    pub fn sample_flags(&self, index: usize) -> Option<SampleFlags> {
        self.flags.get(index).copied()
    }

    /// 1-based sample description index for sample.
    pub fn description(&self, index: usize) -> Option<u32> {
        self.descriptions.get(index).copied()
    }

    /// Largest sample in bytes.
    pub fn max_size(&self) -> u32 {
        self.sizes.iter().copied().max().unwrap_or(0)
    }

    /// Closest sync sample at or before `time_us`.
    pub fn floor_sync(&self, time_us: i64) -> Option<usize> {
        let start = binary_search_floor(&self.timestamps_us, time_us)?;
        (0 ..= start).rev()
            .find(|i| self.timestamps_us[*i] <= time_us && self.flags[*i].is_sync())
    }

    /// Closest sync sample at or after `time_us`.
    pub fn ceil_sync(&self, time_us: i64) -> Option<usize> {
        let start = binary_search_ceil(&self.timestamps_us, time_us);
        (start .. self.len())
            .find(|i| self.timestamps_us[*i] >= time_us && self.flags[*i].is_sync())
    }

    /// Closest sample at or after `time_us`, sync or not.
    pub fn floor_closest(&self, time_us: i64) -> Option<usize> {
        let index = binary_search_ceil(&self.timestamps_us, time_us);
        (index < self.len()).then_some(index)
    }
}
