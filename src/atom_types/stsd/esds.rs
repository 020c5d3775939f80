//! Elementary stream descriptor atom (`esds`).
//!
//! Location: `moov/trak/mdia/minf/stbl/stsd/mp4a/esds`
//! (or `.../mp4a/wave/esds` in QuickTime files)
//!
//! See: ISO/IEC 14496-1, 7.2.6.5

use std::io::{Cursor, Seek, SeekFrom};

use binrw::BinReaderExt;

use crate::Mp4Error;

const ES_DESCRIPTOR_TAG: u8 = 0x03;
const DECODER_CONFIG_DESCRIPTOR_TAG: u8 = 0x04;
const DECODER_SPECIFIC_INFO_TAG: u8 = 0x05;

/// Elementary stream descriptor (`esds`),
/// reduced to what a decoder needs.
#[derive(Debug, Clone, Default)]
pub struct Esds {
    /// MPEG-4 object type indication, e.g. `0x40` for AAC.
    pub(crate) object_type: u8,
    pub(crate) max_bitrate: u32,
    pub(crate) avg_bitrate: u32,
    /// Decoder specific info, e.g. the AAC AudioSpecificConfig.
    pub(crate) decoder_specific_info: Option<Vec<u8>>,
}

impl Esds {
    /// Parses the data load (excluding header) of an `esds` atom.
    pub fn parse(data: &[u8]) -> Result<Self, Mp4Error> {
        let mut cursor = Cursor::new(data);
        let _version_flags = cursor.read_be::<u32>()?;

        expect_tag(&mut cursor, ES_DESCRIPTOR_TAG)?;
        read_descriptor_size(&mut cursor)?;
        let _es_id = cursor.read_be::<u16>()?;
        let flags = cursor.read_be::<u8>()?;
        if flags & 0x80 != 0 {
            // stream dependence
            cursor.seek(SeekFrom::Current(2))?;
        }
        if flags & 0x40 != 0 {
            let url_len = cursor.read_be::<u8>()?;
            cursor.seek(SeekFrom::Current(url_len as i64))?;
        }
        if flags & 0x20 != 0 {
            // OCR stream
            cursor.seek(SeekFrom::Current(2))?;
        }

        expect_tag(&mut cursor, DECODER_CONFIG_DESCRIPTOR_TAG)?;
        read_descriptor_size(&mut cursor)?;
        let object_type = cursor.read_be::<u8>()?;
        // stream type (1) + buffer size db (3)
        cursor.seek(SeekFrom::Current(4))?;
        let max_bitrate = cursor.read_be::<u32>()?;
        let avg_bitrate = cursor.read_be::<u32>()?;

        let decoder_specific_info = match cursor.read_be::<u8>() {
            Ok(DECODER_SPECIFIC_INFO_TAG) => {
                let size = read_descriptor_size(&mut cursor)?;
                let start = cursor.position() as usize;
                let info = data.get(start .. start + size)
                    .ok_or(Mp4Error::UnexpectedEof{offset: start as u64})?;
                Some(info.to_vec())
            },
            _ => None
        };

        Ok(Self {object_type, max_bitrate, avg_bitrate, decoder_specific_info})
    }

    pub fn object_type(&self) -> u8 {
        self.object_type
    }

    /// Bits per second, 0 if unknown.
    pub fn max_bitrate(&self) -> u32 {
        self.max_bitrate
    }

    pub fn avg_bitrate(&self) -> u32 {
        self.avg_bitrate
    }

    pub fn decoder_specific_info(&self) -> Option<&[u8]> {
        self.decoder_specific_info.as_deref()
    }

    /// MIME type for the object type indication, if known.
    pub fn mime_type(&self) -> Option<&'static str> {
        crate::track::mime_type_for_object_type(self.object_type)
    }
}

fn expect_tag(cursor: &mut Cursor<&[u8]>, tag: u8) -> Result<(), Mp4Error> {
    let found = cursor.read_be::<u8>()?;
    if found != tag {
        return Err(Mp4Error::NoSuchAtom(format!("esds descriptor tag {tag:#04x}, found {found:#04x}")))
    }
    Ok(())
}

/// Expandable class size: up to four bytes,
/// seven bits each, high bit set if more follow.
fn read_descriptor_size(cursor: &mut Cursor<&[u8]>) -> Result<usize, Mp4Error> {
    let mut size = 0_usize;
    for _ in 0 .. 4 {
        let byte = cursor.read_be::<u8>()?;
        size = (size << 7) | (byte & 0x7f) as usize;
        if byte & 0x80 == 0 {
            break
        }
    }
    Ok(size)
}

/// Sample rate and channel count from an AAC AudioSpecificConfig.
///
/// See: ISO/IEC 14496-3, 1.6.2.1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sample_rate: u32,
    pub channel_count: u16,
}

const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

const AAC_CHANNEL_COUNTS: [u16; 8] = [0, 1, 2, 3, 4, 5, 6, 8];

impl AudioSpecificConfig {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut bits = BitReader::new(data);
        let mut object_type = bits.read(5)? as u8;
        if object_type == 31 {
            object_type = 32 + bits.read(6)? as u8;
        }
        let sample_rate = match bits.read(4)? {
            0xf => bits.read(24)?,
            index => *AAC_SAMPLE_RATES.get(index as usize)?,
        };
        let channel_config = bits.read(4)? as usize;
        let channel_count = *AAC_CHANNEL_COUNTS.get(channel_config)?;
        Some(Self {object_type, sample_rate, channel_count})
    }
}

/// Big endian bit reader over a byte slice.
struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {data, bit: 0}
    }

    fn read(&mut self, count: usize) -> Option<u32> {
        let mut value = 0_u32;
        for _ in 0 .. count {
            let byte = self.data.get(self.bit / 8)?;
            let bit = (byte >> (7 - self.bit % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.bit += 1;
        }
        Some(value)
    }
}
