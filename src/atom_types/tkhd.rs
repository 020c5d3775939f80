//! Track header atom (`tkhd`).
//!
//! Location: `moov/trak[multiple]/tkhd`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/track_header_atom>

use binrw::BinRead;
use time::{Duration, OffsetDateTime};

use super::versioned_u64;

/// Track header atom (`tkhd`).
///
/// Location: `moov/trak[multiple]/tkhd`
///
/// See: <https://developer.apple.com/documentation/quicktime-file-format/track_header_atom>
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Tkhd {
    _version: u8,
    _flags: [u8; 3],
    /// Seconds since midnight, January 1, 1904.
    #[br(parse_with = versioned_u64, args(_version))]
    pub(crate) creation_time: u64,
    #[br(parse_with = versioned_u64, args(_version))]
    pub(crate) modification_time: u64,
    /// Uniquely identifies the track.
    /// Value 0 cannot be used.
    pub(crate) track_id: u32,
    _reserved1: [u8; 4],
    /// Duration in the movie's time scale.
    #[br(parse_with = versioned_u64, args(_version))]
    pub(crate) duration: u64,
    _reserved2: [u8; 8],
    pub(crate) layer: i16,
    pub(crate) alternate_group: i16,
    /// 8.8 fixed-point volume.
    pub(crate) volume: u16,
    _reserved3: [u8; 2],
    /// Transformation matrix `a, b, u, c, d, v, x, y, w`.
    /// `u`, `v`, `w` are 2.30 fixed-point, the rest 16.16.
    pub(crate) matrix: [i32; 9],
    /// 16.16 fixed-point width in pixels.
    pub(crate) track_width: u32,
    /// 16.16 fixed-point height in pixels.
    pub(crate) track_height: u32,
}

/// 1.0 in 16.16 fixed-point.
const FIXED_ONE: i32 = 0x0001_0000;

impl Tkhd {
    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    /// Track width in pixels (video tracks only).
    pub fn width(&self) -> f64 {
        self.track_width as f64 / 2_u32.pow(16) as f64
    }

    /// Track height in pixels (video tracks only).
    pub fn height(&self) -> f64 {
        self.track_height as f64 / 2_u32.pow(16) as f64
    }

    /// This track's unscaled duration in movie time scale units.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Creation datetime for this track.
    pub fn creation_time(&self) -> OffsetDateTime {
        crate::consts::mp4_time_zero() + Duration::seconds(self.creation_time as i64)
    }

    pub fn modification_time(&self) -> OffsetDateTime {
        crate::consts::mp4_time_zero() + Duration::seconds(self.modification_time as i64)
    }

    /// Stacking order, lower is closer to the viewer.
    pub fn layer(&self) -> i16 {
        self.layer
    }

    pub fn alternate_group(&self) -> i16 {
        self.alternate_group
    }

    /// Playback volume, 1.0 is full volume.
    pub fn volume(&self) -> f64 {
        self.volume as f64 / 256.0
    }

    /// Clockwise rotation in degrees derived from the matrix.
    /// Only exact multiples of 90 are recognized, anything else is 0.
    pub fn rotation_degrees(&self) -> u16 {
        let [a, b, _, c, d, ..] = self.matrix;
        match (a, b, c, d) {
            (0, FIXED_ONE, n, 0) if n == -FIXED_ONE => 90,
            (n, 0, 0, m) if n == -FIXED_ONE && m == -FIXED_ONE => 180,
            (0, n, FIXED_ONE, 0) if n == -FIXED_ONE => 270,
            _ => 0,
        }
    }
}
