//! An MP4 "track": media type, time scale, decoder format and
//! the sample table mapping each sample to its byte range and timestamp.

mod track;
mod format;
mod sample_table;
mod build;

pub use track::{Track, TrackKind, TrackEncryptionBox};
pub use format::{MediaFormat, mime_type_for_object_type, mime_types};
pub use sample_table::{SampleTable, SampleFlags};
pub(crate) use build::{parse_trak, parse_stbl};
