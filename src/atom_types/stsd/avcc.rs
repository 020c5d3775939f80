//! AVC decoder configuration record (`avcC`).
//!
//! Location: `moov/trak/mdia/minf/stbl/stsd/avc1/avcC`
//!
//! See: ISO/IEC 14496-15, 5.2.4.1

use binrw::BinRead;

use crate::consts::NAL_START_CODE;

/// AVC decoder configuration record (`avcC`).
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Avcc {
    _configuration_version: u8,
    pub(crate) profile_indication: u8,
    _profile_compatibility: u8,
    pub(crate) level_indication: u8,
    /// Size in bytes of the NAL unit length prefix, 1, 2 or 4.
    #[br(map = |b: u8| (b & 0x3) + 1)]
    pub(crate) nal_length_size: u8,
    #[br(map = |b: u8| b & 0x1f)]
    _no_of_sps: u8,
    #[br(count = _no_of_sps)]
    pub(crate) sps: Vec<ParameterSet>,
    _no_of_pps: u8,
    #[br(count = _no_of_pps)]
    pub(crate) pps: Vec<ParameterSet>,
}

/// Length prefixed sequence or picture parameter set.
#[derive(Debug, BinRead)]
#[br(big)]
pub struct ParameterSet {
    _len: u16,
    #[br(count = _len)]
    pub(crate) data: Vec<u8>,
}

impl Avcc {
    pub fn nal_length_size(&self) -> u8 {
        self.nal_length_size
    }

    /// H.264 `profile_idc`, e.g. 100 for High.
    pub fn profile_indication(&self) -> u8 {
        self.profile_indication
    }

    pub fn level_indication(&self) -> u8 {
        self.level_indication
    }

    /// Parameter sets as decoder initialization data,
    /// SPS first, each prefixed with a start code.
    pub fn initialization_data(&self) -> Vec<Vec<u8>> {
        self.sps.iter()
            .chain(self.pps.iter())
            .map(|ps| {
                let mut data = Vec::with_capacity(NAL_START_CODE.len() + ps.data.len());
                data.extend_from_slice(&NAL_START_CODE);
                data.extend_from_slice(&ps.data);
                data
            })
            .collect()
    }
}
