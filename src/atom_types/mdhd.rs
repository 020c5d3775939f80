//! Media header atom (`mdhd`).
//!
//! Similar to `mvhd`,
//! but only describes a single track (`trak`).
//! Specifies the characteristics of a media (`mdia`),
//! including time scale and duration.
//!
//! Location: `moov/trak/mdia/mdhd`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/media_header_atom>

use binrw::BinRead;
use time::{ext::NumericalDuration, Duration};

use super::versioned_u64;

/// Media header atom ('mdhd'). One per track (`trak`).
///
/// Path: `moov/trak/mdia/mdhd`
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Mdhd {
    _version: u8,
    _flags: [u8; 3],
    #[br(parse_with = versioned_u64, args(_version))]
    _creation_time: u64,
    #[br(parse_with = versioned_u64, args(_version))]
    _modification_time: u64,
    /// Units per second for all timestamps in this track.
    pub(crate) time_scale: u32,
    /// Unscaled duration. I.e. "ticks"
    /// that require dividing by time scale
    /// to derive a value in seconds.
    #[br(parse_with = versioned_u64, args(_version))]
    pub(crate) duration: u64,
    /// 1 bit pad 0 then [u5; 3]
    #[br(map = |data: u16| derive_language_code(data))]
    pub(crate) language: String,
}

impl Mdhd {
    pub fn time_scale(&self) -> u32 {
        self.time_scale
    }

    pub fn duration_unscaled(&self) -> u64 {
        self.duration
    }

    /// ISO-639-2/T language code
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Duration of the track.
    pub fn duration(&self) -> Duration {
        if self.time_scale == 0 {
            return Duration::ZERO
        }
        (self.duration as f64 / self.time_scale as f64).seconds()
    }
}

/// Derive three letter ISO639-2/T language code.
///
/// Packed in 16 bits `X u5 u5 u5`:
/// - most significant bit is padding (BE so left most)
/// - 1 `u5` + `0x60`
/// - 1 `u5` + `0x60`
/// - 1 `u5` + `0x60`
fn derive_language_code(data: u16) -> String {
    [
        // value between 0-31 + 96 = ascii range so casting to u8 is ok
        (((0b0111_1100_0000_0000 & data) >> 10) as u8 + 0x60) as char,
        (((0b0000_0011_1110_0000 & data) >> 5) as u8 + 0x60) as char,
        ((0b0000_0000_0001_1111 & data) as u8 + 0x60) as char
    ]
    .iter()
    .collect()
}
