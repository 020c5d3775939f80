//! Sample description atom (`stsd`) and the sample entries it holds.

mod stsd;
mod video;
mod audio;
mod avcc;
mod esds;
mod sinf;

pub use stsd::{Stsd, SampleEntry, SampleEntryKind};
pub use video::VisualSampleEntry;
pub use audio::AudioSampleEntry;
pub use avcc::{Avcc, ParameterSet};
pub use esds::{Esds, AudioSpecificConfig};
pub use sinf::{Frma, Schm, Tenc, ProtectionInfo};
