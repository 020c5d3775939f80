//! Sample size atom (`stsz`).
//!
//! Location: `moov/trak[multiple]/mdia/minf/stbl/stsz`
//!
//! Lists sample sizes, not chunk sizes.
//! Sample offsets are derived from these and the chunk offsets in `stco`/`co64`.
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/sample_size_atom>

use binrw::BinRead;

use crate::{support::try_vec_with_capacity, Mp4Error};

/// Sample size atom (`stsz`).
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Stsz {
    _version: u8,
    _flags: [u8; 3],
    /// Size shared by all samples.
    /// If 0, one size per sample follows.
    pub(crate) sample_size: u32,
    pub(crate) sample_count: u32,
    #[br(count = if sample_size == 0 {sample_count} else {0})]
    pub(crate) table: Vec<u32>,
}

impl Stsz {
    /// Number of samples in the track.
    pub fn len(&self) -> usize {
        self.sample_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Size shared by all samples, `None` if listed per sample.
    pub fn constant_size(&self) -> Option<u32> {
        (self.sample_size != 0).then_some(self.sample_size)
    }

    /// Size in bytes of sample at 0-based `index`.
    pub fn size(&self, index: usize) -> Option<u32> {
        if index >= self.len() {
            return None
        }
        match self.constant_size() {
            Some(size) => Some(size),
            None => self.table.get(index).copied(),
        }
    }

    /// Size in bytes for every sample.
    /// A constant size is expanded to `sample_count` entries.
    pub fn sizes(&self) -> Result<Vec<u32>, Mp4Error> {
        match self.constant_size() {
            Some(size) => {
                let mut sizes = try_vec_with_capacity(self.len(), "sample size")?;
                sizes.resize(self.len(), size);
                Ok(sizes)
            },
            None => Ok(self.table.clone()),
        }
    }
}
