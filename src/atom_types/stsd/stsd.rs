//! Sample description atom (`stsd`).
//!
//! Location: `moov/trak/mdia/minf/stbl/stsd`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/sample_description_atom>

use std::io::Cursor;

use binrw::{BinRead, BinReaderExt};
use log::warn;

use crate::{atom::ChildAtoms, FourCC, Mp4Error};

use super::{
    sinf::read_payload,
    AudioSampleEntry,
    Avcc,
    Esds,
    ProtectionInfo,
    VisualSampleEntry,
};

/// Version, flags and entry count preceding the sample entries.
#[derive(Debug, BinRead)]
#[br(big)]
struct StsdHeader {
    _version: u8,
    _flags: [u8; 3],
    no_of_entries: u32,
}

/// Bytes preceding the type specific fields in every sample entry:
/// 6 reserved bytes and a 16-bit data reference index.
const SAMPLE_ENTRY_PREFIX: usize = 8;

/// Sample description atom (`stsd`).
#[derive(Debug, Default)]
pub struct Stsd {
    entries: Vec<SampleEntry>
}

impl Stsd {
    /// Parses the data load (excluding header) of an `stsd` atom.
    pub fn parse(data: &[u8]) -> Result<Self, Mp4Error> {
        let mut cursor = Cursor::new(data);
        let header = cursor.read_be::<StsdHeader>()?;
        let start = cursor.position() as usize;

        let mut entries = Vec::new();
        for child in ChildAtoms::new(&data[start ..]).take(header.no_of_entries as usize) {
            let (hdr, payload) = child?;
            entries.push(SampleEntry::parse(hdr.name, payload)?);
        }

        Ok(Self {entries})
    }

    pub fn entries(&self) -> &[SampleEntry] {
        &self.entries
    }

    /// Sample entry for a 1-based sample description index,
    /// as listed in `stsc`.
    pub fn entry(&self, sample_description_index: u32) -> Option<&SampleEntry> {
        let index = (sample_description_index as usize).checked_sub(1)?;
        self.entries.get(index)
    }
}

/// Type specific fields of a sample entry.
#[derive(Debug)]
pub enum SampleEntryKind {
    Video(VisualSampleEntry),
    Audio(AudioSampleEntry),
    /// Text, metadata, timecode or unsupported entries.
    Other,
}

/// A single sample description (sample entry) in `stsd`.
#[derive(Debug)]
pub struct SampleEntry {
    /// Atom type of the entry, e.g. `avc1` or `encv`.
    pub(crate) format: FourCC,
    pub(crate) data_reference_index: u16,
    pub(crate) kind: SampleEntryKind,
    pub(crate) avcc: Option<Avcc>,
    pub(crate) esds: Option<Esds>,
    pub(crate) protection: Option<ProtectionInfo>,
}

impl SampleEntry {
    fn parse(format: FourCC, payload: &[u8]) -> Result<Self, Mp4Error> {
        let prefix = payload.get(.. SAMPLE_ENTRY_PREFIX)
            .ok_or(Mp4Error::UnexpectedAtomSize{name: format, len: payload.len() as u64, offset: 0})?;
        let data_reference_index = u16::from_be_bytes([prefix[6], prefix[7]]);
        let body = &payload[SAMPLE_ENTRY_PREFIX ..];

        let mut entry = Self {
            format,
            data_reference_index,
            kind: SampleEntryKind::Other,
            avcc: None,
            esds: None,
            protection: None,
        };

        let mut cursor = Cursor::new(body);
        entry.kind = match format {
            FourCC::Avc1 | FourCC::Avc3 | FourCC::Hvc1 | FourCC::Hev1 | FourCC::Mp4v | FourCC::Encv => {
                SampleEntryKind::Video(cursor.read_be::<VisualSampleEntry>()?)
            },
            FourCC::Mp4a | FourCC::Ac3 | FourCC::Ec3 | FourCC::Enca => {
                SampleEntryKind::Audio(cursor.read_be::<AudioSampleEntry>()?)
            },
            _ => return Ok(entry),
        };

        let extensions = &body[cursor.position() as usize ..];
        entry.parse_extensions(extensions)?;

        Ok(entry)
    }

    /// Picks up the extension atoms relevant for decoding.
    /// Unknown extensions are skipped.
    fn parse_extensions(&mut self, data: &[u8]) -> Result<(), Mp4Error> {
        for child in ChildAtoms::new(data) {
            let (hdr, payload) = match child {
                Ok(child) => child,
                Err(err) => {
                    // Some writers pad entries with garbage after the last atom
                    warn!("Skipping malformed '{}' extension: {err}", self.format);
                    break
                }
            };
            match hdr.name {
                FourCC::AvcC => self.avcc = Some(read_payload::<Avcc>(payload)?),
                FourCC::Esds => self.esds = Some(Esds::parse(payload)?),
                FourCC::Wave => {
                    for grandchild in ChildAtoms::new(payload) {
                        let (hdr, payload) = grandchild?;
                        if hdr.name == FourCC::Esds {
                            self.esds = Some(Esds::parse(payload)?);
                        }
                    }
                },
                FourCC::Sinf => self.protection = Some(ProtectionInfo::parse(payload)?),
                _ => (),
            }
        }
        Ok(())
    }

    /// Atom type of the entry, e.g. `encv`.
    pub fn format(&self) -> FourCC {
        self.format
    }

    /// Format of the unencrypted data, i.e. `frma` for
    /// protected entries, otherwise the entry type itself.
    pub fn original_format(&self) -> FourCC {
        self.protection.as_ref()
            .and_then(|p| p.original_format)
            .unwrap_or(self.format)
    }

    pub fn data_reference_index(&self) -> u16 {
        self.data_reference_index
    }

    pub fn kind(&self) -> &SampleEntryKind {
        &self.kind
    }

    pub fn video(&self) -> Option<&VisualSampleEntry> {
        match &self.kind {
            SampleEntryKind::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioSampleEntry> {
        match &self.kind {
            SampleEntryKind::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn avcc(&self) -> Option<&Avcc> {
        self.avcc.as_ref()
    }

    pub fn esds(&self) -> Option<&Esds> {
        self.esds.as_ref()
    }

    pub fn protection(&self) -> Option<&ProtectionInfo> {
        self.protection.as_ref()
    }
}
