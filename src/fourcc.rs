//! MP4 atom FourCC.
//! See <https://developer.apple.com/documentation/quicktime-file-format/atoms>.
//! Only atoms relevant to demuxing audio and video tracks get a named variant,
//! everything else is kept as raw bytes in `FourCC::Custom`.

use std::fmt;

use crate::consts::{CONTAINER, LEAF};

/// MP4 atom Four CC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FourCC {
    /// Movie Atom
    Moov,
    /// Movie Header Atom
    Mvhd,
    /// Track description
    Trak,
    Tkhd,
    Mdia,
    /// Media header
    Mdhd,
    Hdlr,
    Minf,
    Vmhd,
    Smhd,
    Stbl,
    /// Sample description
    Stsd,
    Stts,
    /// Composition offset atom
    Ctts,
    /// Sync samples
    Stss,
    Stsc,
    Stsz,
    /// Chunk offset, 32-bit values
    Stco,
    /// Chunk offset, 64-bit values
    Co64,
    Mdat,
    /// H.264 sample entry
    Avc1,
    Avc3,
    /// H.264 decoder configuration
    AvcC,
    /// H.265 sample entries
    Hvc1,
    Hev1,
    Mp4v,
    /// AAC sample entry
    Mp4a,
    Ac3,
    Ec3,
    /// Encrypted video sample entry
    Encv,
    /// Encrypted audio sample entry
    Enca,
    /// Elementary stream descriptor
    Esds,
    /// QuickTime audio extension
    Wave,
    /// Protection scheme info
    Sinf,
    /// Original format
    Frma,
    /// Scheme type
    Schm,
    /// Scheme information
    Schi,
    /// Track encryption
    Tenc,

    Custom([u8; 4])
}

impl FourCC {
    pub fn from_slice(fourcc: &[u8]) -> Self {
        match fourcc {
            b"moov" => Self::Moov,
            b"mvhd" => Self::Mvhd,
            b"trak" => Self::Trak,
            b"tkhd" => Self::Tkhd,
            b"mdia" => Self::Mdia,
            b"mdhd" => Self::Mdhd,
            b"hdlr" => Self::Hdlr,
            b"minf" => Self::Minf,
            b"vmhd" => Self::Vmhd,
            b"smhd" => Self::Smhd,
            b"stbl" => Self::Stbl,
            b"stsd" => Self::Stsd,
            b"stts" => Self::Stts,
            b"ctts" => Self::Ctts,
            b"stss" => Self::Stss,
            b"stsc" => Self::Stsc,
            b"stsz" => Self::Stsz,
            b"stco" => Self::Stco,
            b"co64" => Self::Co64,
            b"mdat" => Self::Mdat,

            // Sample entries and their children
            b"avc1" => Self::Avc1,
            b"avc3" => Self::Avc3,
            b"avcC" => Self::AvcC,
            b"hvc1" => Self::Hvc1,
            b"hev1" => Self::Hev1,
            b"mp4v" => Self::Mp4v,
            b"mp4a" => Self::Mp4a,
            b"ac-3" => Self::Ac3,
            b"ec-3" => Self::Ec3,
            b"encv" => Self::Encv,
            b"enca" => Self::Enca,
            b"esds" => Self::Esds,
            b"wave" => Self::Wave,
            b"sinf" => Self::Sinf,
            b"frma" => Self::Frma,
            b"schm" => Self::Schm,
            b"schi" => Self::Schi,
            b"tenc" => Self::Tenc,

            _ => {
                let mut raw = [0_u8; 4];
                for (dst, src) in raw.iter_mut().zip(fourcc) {
                    *dst = *src;
                }
                Self::Custom(raw)
            },
        }
    }

    pub fn from_u32(value: u32) -> Self {
        Self::from_slice(&value.to_be_bytes())
    }

    pub fn from_str(fourcc: &str) -> Self {
        Self::from_slice(fourcc.as_bytes())
    }

    /// Big endian integer representation, as stored in the atom header.
    pub fn to_u32(&self) -> u32 {
        match self {
            Self::Custom(raw) => u32::from_be_bytes(*raw),
            other => {
                let mut raw = [0_u8; 4];
                raw.copy_from_slice(other.to_str().as_bytes());
                u32::from_be_bytes(raw)
            }
        }
    }

    pub fn to_str(&self) -> &str {
        match self {
            Self::Moov => "moov",
            Self::Mvhd => "mvhd",
            Self::Trak => "trak",
            Self::Tkhd => "tkhd",
            Self::Mdia => "mdia",
            Self::Mdhd => "mdhd",
            Self::Hdlr => "hdlr",
            Self::Minf => "minf",
            Self::Vmhd => "vmhd",
            Self::Smhd => "smhd",
            Self::Stbl => "stbl",
            Self::Stsd => "stsd",
            Self::Stts => "stts",
            Self::Ctts => "ctts",
            Self::Stss => "stss",
            Self::Stsc => "stsc",
            Self::Stsz => "stsz",
            Self::Stco => "stco",
            Self::Co64 => "co64",
            Self::Mdat => "mdat",
            Self::Avc1 => "avc1",
            Self::Avc3 => "avc3",
            Self::AvcC => "avcC",
            Self::Hvc1 => "hvc1",
            Self::Hev1 => "hev1",
            Self::Mp4v => "mp4v",
            Self::Mp4a => "mp4a",
            Self::Ac3 => "ac-3",
            Self::Ec3 => "ec-3",
            Self::Encv => "encv",
            Self::Enca => "enca",
            Self::Esds => "esds",
            Self::Wave => "wave",
            Self::Sinf => "sinf",
            Self::Frma => "frma",
            Self::Schm => "schm",
            Self::Schi => "schi",
            Self::Tenc => "tenc",
            // non-utf8 codes, e.g. zero padding
            Self::Custom(raw) => std::str::from_utf8(raw).unwrap_or("????"),
        }
    }

    /// Container atom the parser descends into.
    pub fn is_container(&self) -> bool {
        CONTAINER.contains(&self.to_str())
    }

    /// Leaf atom whose payload is buffered in memory.
    pub fn is_leaf(&self) -> bool {
        LEAF.contains(&self.to_str())
    }
}

impl Default for FourCC {
    fn default() -> Self {
        Self::Custom([0; 4])
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_atoms() {
        assert!(FourCC::from_slice(b"moov").is_container());
        assert!(FourCC::from_slice(b"wave").is_container());
        assert!(FourCC::from_slice(b"stsz").is_leaf());
        assert!(FourCC::from_slice(b"avcC").is_leaf());
        let mdat = FourCC::from_slice(b"mdat");
        assert!(!mdat.is_container() && !mdat.is_leaf());
        let free = FourCC::from_slice(b"free");
        assert_eq!(free, FourCC::Custom(*b"free"));
        assert!(!free.is_leaf());
    }

    #[test]
    fn integer_representation() {
        let value = u32::from_be_bytes(*b"trak");
        assert_eq!(FourCC::from_u32(value), FourCC::Trak);
        assert_eq!(FourCC::Trak.to_u32(), value);
        assert_eq!(FourCC::from_str("udta").to_u32(), u32::from_be_bytes(*b"udta"));
    }
}
