//! Composition offset atom (`ctts`).
//!
//! Location: `moov/trak[multiple]/mdia/minf/stbl/ctts`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/composition_offset_atom>

use binrw::BinRead;

use crate::{support::try_vec_with_capacity, Mp4Error};

/// Composition offset atom (`ctts`).
///
/// See: <https://developer.apple.com/documentation/quicktime-file-format/composition_offset_atom>
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Ctts {
    _version: u8,
    _flags: [u8; 3],
    _entry_count: u32,
    #[br(count = _entry_count)]
    pub(crate) offset_table: Vec<OffsetTableEntry>
}

impl Ctts {
    pub fn offset_table(&self) -> &[OffsetTableEntry] {
        &self.offset_table
    }

    /// Number of samples covered by the table.
    pub fn sample_total(&self) -> u64 {
        self.offset_table.iter()
            .map(|e| e.sample_count as u64)
            .sum()
    }

    /// Returns one composition offset per sample,
    /// for at most `limit` samples.
    pub fn offsets(&self, limit: usize) -> Result<Vec<i64>, Mp4Error> {
        let len = self.sample_total().min(limit as u64) as usize;
        let mut offsets = try_vec_with_capacity(len, "composition offset")?;
        offsets.extend(
            self.offset_table.iter()
                .flat_map(|e| std::iter::repeat(e.composition_offset as i64).take(e.sample_count as usize))
                .take(len)
        );
        Ok(offsets)
    }
}

/// Composition offset table entry.
///
/// Offsets are signed in version 1 atoms.
/// Version 0 offsets above `i32::MAX` do not occur in practice,
/// so both are read as `i32`.
#[derive(Debug, BinRead)]
#[br(big)]
pub struct OffsetTableEntry {
    pub sample_count: u32,
    pub composition_offset: i32
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use binrw::BinReaderExt;

    use super::*;

    #[test]
    fn expands_signed_offsets_up_to_limit() {
        // 2 x 20, 1 x -10
        let data = [0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 2, 0, 0, 0, 20, 0, 0, 0, 1, 0xff, 0xff, 0xff, 0xf6];
        let ctts = Cursor::new(&data).read_be::<Ctts>().unwrap();
        assert_eq!(ctts.sample_total(), 3);
        assert_eq!(ctts.offsets(8).unwrap(), vec![20, 20, -10]);
        assert_eq!(ctts.offsets(1).unwrap(), vec![20]);
    }
}
