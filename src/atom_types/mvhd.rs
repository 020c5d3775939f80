//! Movie header atom (`mvhd`).
//!
//! Location: `moov/mvhd`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/movie_header_atom>

use binrw::BinRead;
use time::{Duration, OffsetDateTime, ext::NumericalDuration};

use crate::consts::mp4_time_zero;

use super::versioned_u64;

/// Movie header atom (`mvhd`).
///
/// Location: `moov/mvhd`
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Mvhd {
    _version: u8,
    _flags: [u8; 3],
    /// Seconds since midnight, 1904-01-01 UTC
    #[br(parse_with = versioned_u64, args(_version))]
    pub(crate) creation_time: u64,
    /// Seconds since midnight, 1904-01-01 UTC
    #[br(parse_with = versioned_u64, args(_version))]
    pub(crate) modification_time: u64,
    /// Number of time units that pass in one second
    pub(crate) time_scale: u32,
    /// Unscaled duration of the longest track.
    #[br(parse_with = versioned_u64, args(_version))]
    pub(crate) duration: u64,
}

impl Mvhd {
    pub fn time_scale(&self) -> u32 {
        self.time_scale
    }

    /// Creation time as UTC datetime.
    /// May default to MP4 default time
    /// `1904-01-01 00:00:00` depending on device and settings.
    pub fn creation_time(&self) -> OffsetDateTime {
        mp4_time_zero() + Duration::seconds(self.creation_time as i64)
    }

    /// Modification time as UTC datetime.
    pub fn modification_time(&self) -> OffsetDateTime {
        mp4_time_zero() + Duration::seconds(self.modification_time as i64)
    }

    /// Duration of the longest track.
    pub fn duration(&self) -> Duration {
        if self.time_scale == 0 {
            return Duration::ZERO
        }
        (self.duration as f64 / self.time_scale as f64).seconds()
    }
}
