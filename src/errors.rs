//! Various MP4 demuxing errors.

use std::fmt;

use crate::FourCC;

/// Errors raised while parsing, loading or reading samples.
#[derive(Debug)]
pub enum Mp4Error {
    /// Converted `binrw` error from decoding a buffered atom payload.
    BinReadError(binrw::Error),
    /// IO error from the byte source.
    IOError(std::io::Error),
    /// Input ended in the middle of an atom or a sample.
    UnexpectedEof{offset: u64},
    /// Atom size inconsistent with its header,
    /// or with the container it lives in.
    UnexpectedAtomSize{name: FourCC, len: u64, offset: u64},
    /// Atom that must be buffered does not fit a 31-bit length.
    AtomTooLarge{name: FourCC, len: u64},
    /// No such atom.
    NoSuchAtom(String),
    /// Sample tables that disagree with each other.
    InvalidSampleTable(String),
    /// Input ended before the movie atom (`moov`) was complete.
    MissingMovie,
    /// Movie atom contained no audio or video track with samples.
    NoPlayableTracks,
    /// Track index out of range.
    NoSuchTrack(usize),
    /// Operation requires a prepared source.
    NotPrepared,
    /// Reading requires a selected track.
    NoTrackSelected,
    /// URI scheme without a byte source.
    UnsupportedUri(String),
    /// Cooperative cancellation was observed.
    Cancelled,
}

impl Mp4Error {
    /// Returns `true` for failures that may succeed if retried
    /// at the last known resume position.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::IOError(_))
    }

    /// Returns `true` if this is a cancellation, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl std::error::Error for Mp4Error {}

impl fmt::Display for Mp4Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mp4Error::BinReadError(err) => write!(f, "{err}"),
            Mp4Error::IOError(err) => write!(f, "IO error: {}", err),
            Mp4Error::UnexpectedEof{offset} => write!(f, "Unexpected end of input @ offset {offset}."),
            Mp4Error::UnexpectedAtomSize{name, len, offset} => write!(f, "Unexpected size of {len} bytes for '{}' atom @ offset {offset}.", name.to_str()),
            Mp4Error::AtomTooLarge{name, len} => write!(f, "Atom '{}' with {len} bytes is too large to buffer.", name.to_str()),
            Mp4Error::NoSuchAtom(name) => write!(f, "No such atom {name}."),
            Mp4Error::InvalidSampleTable(msg) => write!(f, "Invalid sample table: {msg}"),
            Mp4Error::MissingMovie => write!(f, "Input ended before the movie atom 'moov' was parsed."),
            Mp4Error::NoPlayableTracks => write!(f, "No audio or video tracks with samples."),
            Mp4Error::NoSuchTrack(index) => write!(f, "No track with index {index}."),
            Mp4Error::NotPrepared => write!(f, "Source is not prepared."),
            Mp4Error::NoTrackSelected => write!(f, "No track selected."),
            Mp4Error::UnsupportedUri(uri) => write!(f, "No byte source for URI '{uri}'."),
            Mp4Error::Cancelled => write!(f, "Load cancelled."),
        }
    }
}

/// Converts std::io::Error to Mp4Error
impl From<std::io::Error> for Mp4Error {
    fn from(err: std::io::Error) -> Self {
        Mp4Error::IOError(err)
    }
}

/// Converts Mp4Error to std::io::Error
impl From<Mp4Error> for std::io::Error {
    fn from(err: Mp4Error) -> Self {
        match err {
            Mp4Error::IOError(err) => err,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

/// Converts binrw::Error to Mp4Error
impl From<binrw::Error> for Mp4Error {
    fn from(err: binrw::Error) -> Mp4Error {
        Mp4Error::BinReadError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_recoverable() {
        let err = Mp4Error::from(std::io::Error::new(std::io::ErrorKind::Other, "gone"));
        assert!(err.is_recoverable());
        assert!(!Mp4Error::MissingMovie.is_recoverable());
        assert!(!Mp4Error::UnexpectedEof{offset: 3}.is_recoverable());
        assert!(Mp4Error::Cancelled.is_cancelled());
    }

    #[test]
    fn round_trips_io_error_kind() {
        let err = Mp4Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "x"));
        let io: std::io::Error = err.into();
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
    }
}
