//! Handler reference atom (`hdlr`).
//!
//! Location: `moov/trak[multiple]/mdia/hdlr`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/handler_reference_atom>

use binrw::BinRead;

use crate::support::chars_from_bytes;

/// Handler reference atom (`hdlr`)
///
/// See: <https://developer.apple.com/documentation/quicktime-file-format/handler_reference_atom>
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Hdlr {
    _version: u8,
    _flags: [u8; 3],
    /// `mhlr` in QuickTime files, zero in ISO files.
    #[br(map(|data: [u8; 4]| chars_from_bytes(data)))]
    pub(crate) component_type: [char; 4],
    /// Four CC for the type of media, e.g. `vide` or `soun`.
    pub(crate) component_sub_type: u32,
}

impl Hdlr {
    /// Returns component sub type as `String`,
    /// e.g. `vide` for video.
    pub fn component_sub_type(&self) -> String {
        self.component_sub_type.to_be_bytes().iter()
            .map(|n| *n as char)
            .collect()
    }

    pub fn component_type(&self) -> String {
        self.component_type.iter().collect()
    }

    pub fn media_type(&self) -> ComponentType {
        ComponentType::from(self.component_sub_type)
    }
}

/// Media type from the handler sub type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComponentType {
    Video,
    Sound,
    Text,
    Hint,
    Meta,
    TimeCode,
    #[default]
    Unknown
}

impl From<u32> for ComponentType {
    fn from(value: u32) -> Self {
        match &value.to_be_bytes() {
            b"vide" => Self::Video,
            b"soun" => Self::Sound,
            b"text" | b"sbtl" | b"subt" => Self::Text,
            b"hint" => Self::Hint,
            b"meta" => Self::Meta,
            b"tmcd" => Self::TimeCode,
            _ => Self::Unknown,
        }
    }
}
