use crate::{FourCC, Mp4Error};
use crate::consts::{HEADER_SIZE, LONG_HEADER_SIZE, LONG_SIZE_PREFIX};

/// Atom header.
/// 8 or 16 bytes in MP4, depending on whether
/// 32 or 64-bit sized.
/// ```text
/// | [X X X X] [Y Y Y Y] [Z Z Z Z Z Z Z Z] |
///    |         |         |
///    |         |         64bit size (optional, only if 32 bit size == 1)
///    |         FourCC
///    32bit size
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AtomHeader {
    /// Total size in bytes including 8/16 byte header.
    pub size: u64,
    /// FourCC
    pub name: FourCC,
    /// Absolute byte offset for start of atom in MP4,
    /// i.e. byte offset where atom size is specified.
    pub offset: u64,
    /// Size was read from the 64-bit extended size field.
    pub size_64bit: bool,
}

impl AtomHeader {
    /// Builds a header from its raw fields.
    ///
    /// `extended_size` must be set if, and only if, `size` is `1`.
    /// A `size` of `0` means "until `end`", which is only
    /// possible if the end of the enclosing range is known.
    pub(crate) fn new(
        size: u32,
        name: FourCC,
        extended_size: Option<u64>,
        offset: u64,
        end: Option<u64>,
    ) -> Result<Self, Mp4Error> {
        let (size, size_64bit) = match (size, extended_size) {
            (LONG_SIZE_PREFIX, Some(ext)) => (ext, true),
            (0, _) => match end {
                Some(end) if end >= offset => (end - offset, false),
                _ => return Err(Mp4Error::UnexpectedAtomSize{name, len: 0, offset}),
            },
            (size, _) => (size as u64, false),
        };

        let hdr = Self {size, name, offset, size_64bit};

        if hdr.size < hdr.header_size() {
            return Err(Mp4Error::UnexpectedAtomSize{name, len: size, offset})
        }

        Ok(hdr)
    }

    /// Reads a header at the start of `data`, located at absolute `offset`.
    pub(crate) fn from_slice(data: &[u8], offset: u64) -> Result<Self, Mp4Error> {
        if (data.len() as u64) < HEADER_SIZE {
            return Err(Mp4Error::UnexpectedEof{offset})
        }
        let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let name = FourCC::from_slice(&data[4 .. 8]);
        let extended_size = match size {
            LONG_SIZE_PREFIX => {
                let ext = data.get(8 .. 16)
                    .ok_or(Mp4Error::UnexpectedEof{offset: offset + HEADER_SIZE})?;
                let mut raw = [0_u8; 8];
                raw.copy_from_slice(ext);
                Some(u64::from_be_bytes(raw))
            },
            _ => None
        };
        Self::new(size, name, extended_size, offset, Some(offset + data.len() as u64))
    }

    /// Convenience method to check whether atom is
    /// a container or not.
    pub fn is_container(&self) -> bool {
        self.name.is_container()
    }

    /// Header size in bytes in MP4.
    /// Returns 8 or 16 bytes.
    pub fn header_size(&self) -> u64 {
        match self.size_64bit {
            true => LONG_HEADER_SIZE,
            false => HEADER_SIZE,
        }
    }

    /// Data load absolute offset
    /// (excludes header).
    pub fn data_offset(&self) -> u64 {
        self.offset + self.header_size()
    }

    /// Size of data load, adjusted for header size
    /// (excludes header size).
    pub fn data_size(&self) -> u64 {
        self.size - self.header_size()
    }

    /// Absolute offset to next atom.
    pub fn offset_next_abs(&self) -> u64 {
        self.offset + self.size
    }
}

/// Iterates over consecutive atoms packed in a buffered payload,
/// e.g. the sample entries in `stsd` and their extension atoms.
/// Yields each header together with its data load.
pub(crate) struct ChildAtoms<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ChildAtoms<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {data, pos: 0}
    }
}

impl<'a> Iterator for ChildAtoms<'a> {
    type Item = Result<(AtomHeader, &'a [u8]), Mp4Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = &self.data[self.pos ..];
        // Trailing padding shorter than a header is ignored
        if (remaining.len() as u64) < HEADER_SIZE {
            return None
        }
        let hdr = match AtomHeader::from_slice(remaining, self.pos as u64) {
            Ok(hdr) => hdr,
            Err(err) => {
                self.pos = self.data.len();
                return Some(Err(err))
            }
        };
        if hdr.size > remaining.len() as u64 {
            self.pos = self.data.len();
            return Some(Err(Mp4Error::UnexpectedAtomSize{
                name: hdr.name,
                len: hdr.size,
                offset: hdr.offset
            }))
        }
        let payload = &remaining[hdr.header_size() as usize .. hdr.size as usize];
        self.pos += hdr.size as usize;
        Some(Ok((hdr, payload)))
    }
}
