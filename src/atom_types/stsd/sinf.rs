//! Protection scheme information (`sinf`) inside `encv`/`enca` sample entries.
//!
//! Location: `.../stsd/encv/sinf/{frma, schm, schi/tenc}`
//!
//! See: ISO/IEC 23001-7, 8.2

use binrw::BinRead;

use crate::{atom::ChildAtoms, FourCC, Mp4Error};

/// Original format atom (`frma`).
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Frma {
    pub(crate) data_format: u32,
}

/// Scheme type atom (`schm`).
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Schm {
    _version: u8,
    _flags: [u8; 3],
    /// E.g. `cenc`.
    pub(crate) scheme_type: u32,
    _scheme_version: u32,
}

/// Track encryption atom (`tenc`).
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Tenc {
    _version: u8,
    _flags: [u8; 3],
    _reserved: u16,
    #[br(map = |b: u8| b == 1)]
    pub(crate) is_protected: bool,
    pub(crate) iv_size: u8,
    pub(crate) key_id: [u8; 16],
}

impl Tenc {
    pub fn is_protected(&self) -> bool {
        self.is_protected
    }

    /// Per-sample IV size in bytes, 0 if a constant IV is used.
    pub fn iv_size(&self) -> u8 {
        self.iv_size
    }

    pub fn key_id(&self) -> [u8; 16] {
        self.key_id
    }
}

/// Protection details collected from `sinf`.
#[derive(Debug, Default)]
pub struct ProtectionInfo {
    pub(crate) original_format: Option<FourCC>,
    pub(crate) scheme_type: Option<FourCC>,
    pub(crate) tenc: Option<Tenc>,
}

impl ProtectionInfo {
    /// Sample entry type of the unencrypted data, from `frma`.
    pub fn original_format(&self) -> Option<FourCC> {
        self.original_format
    }

    /// Protection scheme, from `schm`.
    pub fn scheme_type(&self) -> Option<FourCC> {
        self.scheme_type
    }

    /// Default encryption parameters, from `schi/tenc`.
    pub fn tenc(&self) -> Option<&Tenc> {
        self.tenc.as_ref()
    }

    /// Parses the data load (excluding header) of a `sinf` atom.
    pub fn parse(data: &[u8]) -> Result<Self, Mp4Error> {
        let mut info = Self::default();
        for child in ChildAtoms::new(data) {
            let (hdr, payload) = child?;
            match hdr.name {
                FourCC::Frma => {
                    let frma = read_payload::<Frma>(payload)?;
                    info.original_format = Some(FourCC::from_u32(frma.data_format));
                },
                FourCC::Schm => {
                    let schm = read_payload::<Schm>(payload)?;
                    info.scheme_type = Some(FourCC::from_u32(schm.scheme_type));
                },
                FourCC::Schi => {
                    for grandchild in ChildAtoms::new(payload) {
                        let (hdr, payload) = grandchild?;
                        if hdr.name == FourCC::Tenc {
                            info.tenc = Some(read_payload::<Tenc>(payload)?);
                        }
                    }
                },
                _ => (),
            }
        }
        Ok(info)
    }
}

pub(crate) fn read_payload<T>(payload: &[u8]) -> Result<T, Mp4Error>
    where
        T: BinRead,
        <T as BinRead>::Args<'static>: Sized + Clone + Default
{
    use binrw::BinReaderExt;
    let mut cursor = std::io::Cursor::new(payload);
    Ok(cursor.read_be::<T>()?)
}
