//! Audio sample entry fields shared by `mp4a`, `ac-3`, `ec-3`, `enca`, ...
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/sound_sample_description_version_0>

use binrw::BinRead;

/// Fixed fields of an audio sample entry,
/// following the reserved bytes and data reference index.
///
/// QuickTime version 1 and 2 entries carry extra fields
/// before any extension atoms.
#[derive(Debug, BinRead)]
#[br(big)]
pub struct AudioSampleEntry {
    /// 0, or 1/2 for QuickTime extended sound descriptions.
    pub(crate) version: u16,
    _revision_level: u16,
    _vendor: u32,
    pub(crate) channel_count: u16,
    pub(crate) sample_size: u16,
    _compression_id: i16,
    _packet_size: u16,
    /// 16.16 fixed-point sample rate.
    pub(crate) sample_rate: u32,
    /// Samples per packet, bytes per packet/frame/sample.
    #[br(if(version == 1))]
    _version1: Option<[u32; 4]>,
    #[br(if(version == 2))]
    pub(crate) version2: Option<AudioSampleEntryV2>,
}

/// QuickTime version 2 sound description fields.
#[derive(Debug, BinRead)]
#[br(big)]
pub struct AudioSampleEntryV2 {
    _size_of_struct_only: u32,
    pub(crate) sample_rate: f64,
    pub(crate) channel_count: u32,
    _always_7f000000: u32,
    _const_bits_per_channel: u32,
    _format_specific_flags: u32,
    _const_bytes_per_audio_packet: u32,
    _const_lpcm_frames_per_audio_packet: u32,
}

impl AudioSampleEntry {
    pub fn channel_count(&self) -> u16 {
        match &self.version2 {
            Some(v2) => v2.channel_count as u16,
            None => self.channel_count,
        }
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        match &self.version2 {
            Some(v2) => v2.sample_rate.round() as u32,
            None => self.sample_rate >> 16,
        }
    }

    /// Sound description version, 0 for ISO files.
    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn sample_size(&self) -> u16 {
        self.sample_size
    }
}
