//! Time-to-sample atom (`stts`).
//!
//! Location: `moov/trak[multiple]/mdia/minf/stbl/stts`
//!
//! See <https://developer.apple.com/documentation/quicktime-file-format/time-to-sample_atom>

use binrw::BinRead;

use crate::{support::try_vec_with_capacity, Mp4Error};

#[derive(Debug, BinRead)]
#[br(big)]
pub struct TimeToSample {
    pub(crate) sample_count: u32,
    pub(crate) sample_duration: u32,
}

impl TimeToSample {
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn sample_duration(&self) -> u32 {
        self.sample_duration
    }
}

/// Time to sample atom (`stts`).
///
/// Path: `moov/trak[multiple]/mdia/minf/stbl/stts`
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Stts {
    _version: u8,
    _flags: [u8; 3],
    _no_of_entries: u32,
    #[br(count = _no_of_entries)]
    pub(crate) table: Vec<TimeToSample>
}

impl Stts {
    /// Returns total number of samples.
    ///
    /// If an entry lists a duration for four samples,
    /// it counts as four entries towards the total.
    pub fn sample_total(&self) -> u64 {
        self.table.iter()
            .map(|t| t.sample_count as u64)
            .sum()
    }

    pub fn table(&self) -> &[TimeToSample] {
        &self.table
    }

    /// Returns unscaled decode timestamps, one per sample,
    /// starting at zero, for at most `limit` samples.
    pub fn decode_times(&self, limit: usize) -> Result<Vec<u64>, Mp4Error> {
        let len = self.sample_total().min(limit as u64) as usize;
        let mut times = try_vec_with_capacity(len, "decode time")?;
        let mut time = 0_u64;
        'entries: for entry in self.table.iter() {
            for _ in 0 .. entry.sample_count {
                if times.len() == len {
                    break 'entries
                }
                times.push(time);
                time = time.saturating_add(entry.sample_duration as u64);
            }
        }
        Ok(times)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use binrw::BinReaderExt;

    use super::*;

    #[test]
    fn expands_runs_up_to_limit() {
        // 3 x 10, 2 x 25
        let data = [0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 10, 0, 0, 0, 2, 0, 0, 0, 25];
        let stts = Cursor::new(&data).read_be::<Stts>().unwrap();
        assert_eq!(stts.sample_total(), 5);
        assert_eq!(stts.decode_times(10).unwrap(), vec![0, 10, 20, 30, 55]);
        assert_eq!(stts.decode_times(2).unwrap(), vec![0, 10]);
    }

    #[test]
    fn huge_run_expands_only_to_limit() {
        let data = [0, 0, 0, 0, 0, 0, 0, 1, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 1];
        let stts = Cursor::new(&data).read_be::<Stts>().unwrap();
        assert_eq!(stts.sample_total(), u32::MAX as u64);
        assert_eq!(stts.decode_times(3).unwrap(), vec![0, 1, 2]);
    }
}
