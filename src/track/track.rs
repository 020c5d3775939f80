//! Immutable track model derived from a `trak` atom.
//! Built once per prepare, shared read-only with the loader thread.

use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

use crate::atom_types::ComponentType;

use super::MediaFormat;

/// Track media type from the handler (`hdlr`) sub type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// `vide`
    Video,
    /// `soun`
    Audio,
    /// `text`, `sbtl`, `subt`
    Text,
    /// `hint`
    Hint,
    /// `meta`
    Meta,
    /// `tmcd`
    TimeCode,
}

impl TrackKind {
    pub(crate) fn from_component(component: ComponentType) -> Option<Self> {
        match component {
            ComponentType::Video => Some(Self::Video),
            ComponentType::Sound => Some(Self::Audio),
            ComponentType::Text => Some(Self::Text),
            ComponentType::Hint => Some(Self::Hint),
            ComponentType::Meta => Some(Self::Meta),
            ComponentType::TimeCode => Some(Self::TimeCode),
            ComponentType::Unknown => None,
        }
    }

    /// Only audio and video tracks are demuxed.
    pub fn is_playable(&self) -> bool {
        matches!(self, Self::Video | Self::Audio)
    }
}

/// Default encryption parameters for one sample description (`tenc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEncryptionBox {
    pub is_encrypted: bool,
    pub iv_size: u8,
    pub key_id: [u8; 16],
}

#[derive(Debug, Clone)]
pub struct Track {
    /// Track ID from `tkhd`.
    pub(crate) id: u32,
    pub(crate) kind: TrackKind,
    /// Units per second for sample timestamps (`mdhd`).
    pub(crate) timescale: u32,
    pub(crate) duration_us: Option<i64>,
    pub(crate) format: MediaFormat,
    /// One per sample description in `stsd`, in order.
    pub(crate) encryption_boxes: Vec<Option<TrackEncryptionBox>>,
    /// Size of the NAL unit length prefix, if samples
    /// consist of length prefixed NAL units.
    pub(crate) nal_length_size: Option<u8>,
    pub(crate) creation_time: OffsetDateTime,
}

impl Track {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    pub fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_us.map(Duration::microseconds)
    }

    pub fn format(&self) -> &MediaFormat {
        &self.format
    }

    pub fn nal_length_size(&self) -> Option<u8> {
        self.nal_length_size
    }

    /// Encryption parameters for a 1-based sample description index.
    pub fn encryption_box(&self, sample_description_index: u32) -> Option<&TrackEncryptionBox> {
        let index = (sample_description_index as usize).checked_sub(1)?;
        self.encryption_boxes.get(index)?.as_ref()
    }

    pub fn creation_time(&self) -> OffsetDateTime {
        self.creation_time
    }

    /// Creation time as an RFC 3339 timestamp.
    pub fn creation_time_string(&self) -> String {
        self.creation_time.format(&Rfc3339)
            .unwrap_or_else(|_| self.creation_time.to_string())
    }
}
