//! Visual sample entry fields shared by `avc1`, `hvc1`, `mp4v`, `encv`, ...
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/video_sample_description>

use binrw::BinRead;

use crate::support::counted_string;

/// Fixed fields of a visual sample entry,
/// following the reserved bytes and data reference index.
/// Extension atoms (`avcC`, `pasp`, `sinf`, ...) follow directly after.
#[derive(Debug, BinRead)]
#[br(big)]
pub struct VisualSampleEntry {
    /// A 16-bit integer that holds the sample description version.
    _version: u16,
    _revision_level: u16,
    /// Developer of the compressor that generated the compressed data.
    _vendor: u32,
    _temporal_quality: u32,
    _spatial_quality: u32,
    /// Width of the source image in pixels.
    pub(crate) width: u16,
    /// Height of the source image in pixels.
    pub(crate) height: u16,
    /// 16.16 fixed-point horizontal resolution in pixels per inch.
    _horizontal_resolution: u32,
    /// 16.16 fixed-point vertical resolution in pixels per inch.
    _vertical_resolution: u32,
    _data_size: u32,
    /// How many frames of compressed data are stored in each sample.
    pub(crate) frame_count: u16,
    /// A 32-byte Pascal string containing the name of the compressor,
    /// first byte is the character count.
    #[br(map = |data: [u8; 32]| counted_string(&data, true))]
    pub(crate) compressor_name: String,
    /// Pixel depth of the compressed image.
    pub(crate) depth: i16,
    _color_table_id: i16,
}

impl VisualSampleEntry {
    /// Byte length of the fixed fields.
    pub(crate) const SIZE: usize = 70;

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn frame_count(&self) -> u16 {
        self.frame_count
    }

    pub fn compressor_name(&self) -> &str {
        self.compressor_name.as_str()
    }

    pub fn depth(&self) -> i16 {
        self.depth
    }
}
