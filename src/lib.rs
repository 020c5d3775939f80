//! Streaming MP4 (ISO base media file) demuxer.
//! Does not and will not support any kind of video de/encoding.
//!
//! The movie atom (`moov`) is parsed into tracks and sample tables,
//! after which sample payloads are streamed into per-track buffers
//! backed by a shared, bounded block pool. Loading runs synchronously
//! until the pool's limit is reached, then continues on a background
//! thread that waits for the consumer to free blocks.
//!
//! Layouts follow
//! <https://developer.apple.com/library/archive/documentation/QuickTime/QTFF/QTFFPreface/qtffPreface.html>
//! and ISO/IEC 14496-12/14/15.
//!
//! ```rs
//! use mp4stream::{ReadResult, SampleHolder, Source, SourceConfig, TrackKind};
//!
//! fn main() -> Result<(), mp4stream::Mp4Error> {
//!     let mut source = Source::from_uri("VIDEO.MP4", SourceConfig::default());
//!     source.prepare(0)?;
//!
//!     for i in 0 .. source.track_count() {
//!         println!("{i}: {:?}", source.track_format(i));
//!     }
//!
//!     if let Some(video) = source.track_index_of(TrackKind::Video) {
//!         source.select_track(video)?;
//!         let mut holder = SampleHolder::new();
//!         loop {
//!             match source.read_sample(&mut holder)? {
//!                 ReadResult::Sample(size) => println!("{}us {size} bytes", holder.time_us),
//!                 ReadResult::SampleNotFound => std::thread::yield_now(),
//!                 ReadResult::EndOfStream => break,
//!             }
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod fourcc;
pub mod atom;
pub mod atom_types;
pub mod consts;
pub mod support;
pub mod config;
pub mod errors;
pub mod track;
pub mod input;
pub mod allocator;
pub mod rolling;
pub mod output;
pub mod parser;
pub mod loader;
pub mod source;

#[cfg(test)]
mod tests;

pub use fourcc::FourCC;
pub use atom::{Atom, AtomHeader, ContainerAtom, LeafAtom};
pub use consts::mp4_time_zero;
pub use support::CancelFlag;
pub use config::SourceConfig;
pub use errors::Mp4Error;
pub use track::{
    MediaFormat,
    SampleFlags,
    SampleTable,
    Track,
    TrackEncryptionBox,
    TrackKind,
};
pub use input::{BufferedInput, ByteSource, DataSpec, FileSource, MemorySource, UriSource};
pub use allocator::{Allocation, AllocatorPool};
pub use rolling::{RollingSampleBuffer, SampleDescriptor, SampleHolder};
pub use output::{ExtractorOutput, TrackOutput};
pub use parser::{AtomParser, ParseResult, SeekMode};
pub use loader::{Loadable, LoadMode, LoadOutcome, Loader, SharedSource};
pub use source::{ReadResult, Source};
