use time::{Duration, OffsetDateTime};

/// FourCC:s for container atoms the parser descends into.
/// These are nested and contains more atoms,
/// within its specified, total size.
///
/// - `moov`: movie metadata, one or more `trak`
/// - `trak`: moov.trak (multiple)
/// - `mdia`: moov.trak.mdia
/// - `minf`: moov.trak.mdia.minf
/// - `stbl`: moov.trak.mdia.minf.stbl, contains timing (stts), offsets (stco)
/// - `wave`: QuickTime audio wrapper, holds `esds` for some `mp4a` entries
pub const CONTAINER: [&'static str; 6] = [
    "moov",
    "trak",
    "mdia",
    "minf",
    "stbl",
    "wave",
];

/// FourCC:s for leaf atoms whose payload is buffered
/// and folded into the track model once `moov` is complete.
/// Any other atom is opaque and only skipped.
pub const LEAF: [&'static str; 18] = [
    "mvhd",
    "tkhd",
    "mdhd",
    "hdlr",
    "vmhd",
    "smhd",
    "stsd",
    "avc1",
    "avcC",
    "mp4a",
    "esds",
    "stts",
    "ctts",
    "stss",
    "stsc",
    "stsz",
    "stco",
    "co64",
];

/// Size of a compact atom header: 32-bit size + FourCC.
pub const HEADER_SIZE: u64 = 8;
/// Size of an atom header with a 64-bit extended size.
pub const LONG_HEADER_SIZE: u64 = 16;
/// 32-bit size value announcing a 64-bit extended size.
pub const LONG_SIZE_PREFIX: u32 = 1;

/// Payloads and forward skips at or above this many bytes
/// are satisfied by reopening the source instead of reading through.
pub const RELOAD_MINIMUM_SEEK_DISTANCE: u64 = 256 * 1024;

/// Default pool block length.
pub const BUFFER_FRAGMENT_LENGTH: usize = 256 * 1024;

/// Annex B start code replacing length prefixed NAL units.
pub const NAL_START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Seconds between 1904-01-01 and 1970-01-01.
const MP4_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Time zero for MP4 containers. Midnight January 1, 1904, UTC.
pub fn mp4_time_zero() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH - Duration::seconds(MP4_EPOCH_OFFSET)
}
