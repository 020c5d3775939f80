//! Binary layouts of the leaf atoms folded into tracks and sample tables.
//! All are decoded with `binrw` from buffered atom data loads.

mod mvhd;
mod tkhd;
mod mdhd;
mod hdlr;
mod stts;
mod ctts;
mod stss;
mod stsc;
mod stsz;
mod stco;
mod co64;
pub mod stsd;

pub use mvhd::Mvhd;
pub use tkhd::Tkhd;
pub use mdhd::Mdhd;
pub use hdlr::{Hdlr, ComponentType};
pub use stts::{Stts, TimeToSample};
pub use ctts::{Ctts, OffsetTableEntry};
pub use stss::Stss;
pub use stsc::{Stsc, SampleToChunk};
pub use stsz::Stsz;
pub use stco::Stco;
pub use co64::Co64;
pub use stsd::{Stsd, SampleEntry};

use binrw::{BinRead, BinResult};

/// Reads a time or duration field that is 64-bit
/// for version 1 atoms, 32-bit otherwise.
#[binrw::parser(reader, endian)]
pub(crate) fn versioned_u64(version: u8) -> BinResult<u64> {
    match version {
        1 => u64::read_options(reader, endian, ()),
        _ => u32::read_options(reader, endian, ()).map(u64::from),
    }
}
