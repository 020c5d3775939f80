//! Sample to chunk atom (`stsc`)
//!
//! Location: `moov/trak[multiple]/mdia/minf/stbl/stsc`
//!
//! See:
//! - Sample to chunk atom: <https://developer.apple.com/documentation/quicktime-file-format/sample-to-chunk_atom>
//! - <https://github.com/essential61/mp4analyser/wiki/Understanding-The-Sample-Tables:-An-Example>

use binrw::BinRead;

/// Sample to chunk atom (`stsc`)
#[derive(Debug, BinRead)]
#[br(big)]
pub struct Stsc {
    _version: u8,
    _flags: [u8; 3],
    _no_of_entries: u32,
    #[br(count = _no_of_entries)]
    pub(crate) sample_to_chunk_table: Vec<SampleToChunk>,
}

impl Stsc {
    pub fn table(&self) -> &[SampleToChunk] {
        &self.sample_to_chunk_table
    }

    /// Expands the table to one entry per chunk,
    /// `(SAMPLES_IN_CHUNK, SAMPLE_DESCRIPTION_INDEX)`,
    /// for `chunk_count` chunks as listed in `stco`/`co64`.
    ///
    /// > Important: The `first_chunk` field in an `stsc`
    /// > atom starts on 1, the returned list is 0-based.
    pub fn chunks(&self, chunk_count: usize) -> Vec<(u32, u32)> {
        let mut chunks = Vec::with_capacity(chunk_count);
        let table = &self.sample_to_chunk_table;
        for (i, entry) in table.iter().enumerate() {
            // Runs until the next entry's first chunk,
            // the last entry runs until the final chunk.
            let end = table.get(i + 1)
                .map(|next| next.first_chunk.saturating_sub(1) as usize)
                .unwrap_or(chunk_count)
                .min(chunk_count);
            let start = (entry.first_chunk.saturating_sub(1) as usize).max(chunks.len());
            // Chunks without an entry of their own (malformed tables)
            // repeat the previous entry.
            while chunks.len() < start.min(end) {
                let fill = chunks.last().copied().unwrap_or((0, entry.sample_description_id));
                chunks.push(fill);
            }
            while chunks.len() < end {
                chunks.push((entry.samples_per_chunk, entry.sample_description_id));
            }
        }
        chunks
    }
}

#[derive(Debug, BinRead)]
#[br(big)]
pub struct SampleToChunk {
    /// 1-based index of first chunk
    /// that contains the number of
    /// samples specified in `samples_per_chunk`.
    /// The following chunks will all contain the
    /// same number of samples until the next
    /// sample to chunk entry.
    pub(crate) first_chunk: u32,
    /// Number of samples for chunk number
    /// specified by `first_chunk` and on,
    /// until the next sample to chunk entry.
    pub(crate) samples_per_chunk: u32,
    /// 1-based index into the `stsd` entries.
    pub(crate) sample_description_id: u32,
}
