//! Decoder facing description of a track.

use time::Duration;

use crate::FourCC;

/// MIME types for the codecs recognized in sample entries.
pub mod mime_types {
    pub const VIDEO_H264: &str = "video/avc";
    pub const VIDEO_H265: &str = "video/hevc";
    pub const VIDEO_MP4V: &str = "video/mp4v-es";
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    pub const AUDIO_MPEG: &str = "audio/mpeg";
    pub const AUDIO_AC3: &str = "audio/ac3";
    pub const AUDIO_E_AC3: &str = "audio/eac3";
    pub const APPLICATION_UNKNOWN: &str = "application/octet-stream";
}

use mime_types::*;

/// MIME type for an MPEG-4 object type indication (`esds`).
pub fn mime_type_for_object_type(object_type: u8) -> Option<&'static str> {
    match object_type {
        0x20 => Some(VIDEO_MP4V),
        0x21 => Some(VIDEO_H264),
        0x23 => Some(VIDEO_H265),
        0x40 | 0x66 | 0x67 | 0x68 => Some(AUDIO_AAC),
        0x69 | 0x6B => Some(AUDIO_MPEG),
        0xA5 => Some(AUDIO_AC3),
        0xA6 => Some(AUDIO_E_AC3),
        _ => None,
    }
}

/// MIME type for a sample entry format, e.g. `avc1`.
pub(crate) fn mime_type_for_format(format: FourCC) -> Option<&'static str> {
    match format {
        FourCC::Avc1 | FourCC::Avc3 => Some(VIDEO_H264),
        FourCC::Hvc1 | FourCC::Hev1 => Some(VIDEO_H265),
        FourCC::Mp4v => Some(VIDEO_MP4V),
        FourCC::Mp4a => Some(AUDIO_AAC),
        FourCC::Ac3 => Some(AUDIO_AC3),
        FourCC::Ec3 => Some(AUDIO_E_AC3),
        _ => None,
    }
}

/// Format of a track's samples, handed to the decoder.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaFormat {
    pub mime_type: String,
    /// Largest sample in bytes, as delivered (i.e. after NAL rewriting).
    pub max_input_size: Option<u32>,
    pub duration_us: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Clockwise rotation, 0, 90, 180 or 270.
    pub rotation_degrees: u16,
    pub pixel_width_height_ratio: f32,
    pub channel_count: Option<u16>,
    pub sample_rate: Option<u32>,
    /// Codec specific data, e.g. SPS and PPS for H.264.
    pub initialization_data: Vec<Vec<u8>>,
    /// ISO-639-2/T language code.
    pub language: Option<String>,
}

impl MediaFormat {
    pub fn video(
        mime_type: &str,
        duration_us: Option<i64>,
        width: u32,
        height: u32,
        rotation_degrees: u16,
        initialization_data: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            mime_type: mime_type.to_owned(),
            duration_us,
            width: Some(width),
            height: Some(height),
            rotation_degrees,
            pixel_width_height_ratio: 1.0,
            initialization_data,
            ..Self::default()
        }
    }

    pub fn audio(
        mime_type: &str,
        duration_us: Option<i64>,
        channel_count: u16,
        sample_rate: u32,
        initialization_data: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            mime_type: mime_type.to_owned(),
            duration_us,
            channel_count: Some(channel_count),
            sample_rate: Some(sample_rate),
            pixel_width_height_ratio: 1.0,
            initialization_data,
            ..Self::default()
        }
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_us.map(Duration::microseconds)
    }

    pub fn with_max_input_size(self, max_input_size: u32) -> Self {
        Self {max_input_size: Some(max_input_size), ..self}
    }

    pub fn with_language(self, language: &str) -> Self {
        Self {language: Some(language.to_owned()), ..self}
    }
}
