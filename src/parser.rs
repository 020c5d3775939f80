//! Incremental atom parser.
//!
//! Reads atom headers and buffers the payloads of the leaves needed to
//! describe tracks until `moov` is complete, then streams sample payloads
//! into track outputs in file order.
//!
//! The parser never blocks on more than one atom header, one buffered leaf
//! or one sample at a time. Large gaps (opaque atoms, `mdat` before `moov`,
//! distant samples) are reported as `ParseResult::Seek` so that the caller
//! can reopen the source at the new position instead of reading through.

use std::sync::Arc;

use log::{debug, info, trace};
use rayon::prelude::*;

use crate::{
    atom::{Atom, AtomHeader, ContainerAtom, LeafAtom},
    atom_types::Mvhd,
    consts::{BUFFER_FRAGMENT_LENGTH, HEADER_SIZE, LONG_HEADER_SIZE, LONG_SIZE_PREFIX, NAL_START_CODE},
    input::BufferedInput,
    output::{ExtractorOutput, TrackOutput},
    track::{parse_stbl, parse_trak, SampleTable, Track},
    FourCC,
    Mp4Error,
};

/// Outcome of a single `AtomParser::read()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// Call `read()` again with the same input.
    Continue,
    /// Reopen the source at this absolute position, then call `read()` again.
    Seek(u64),
    /// No more atoms or samples.
    EndOfInput,
}

/// Which sample to position each track on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekMode {
    /// Keyframe at or before the target time.
    #[default]
    PreviousSync,
    /// Keyframe at or after the target time.
    NextSync,
    /// First sample at or after the target time, keyframe or not.
    NextClosest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    ReadingHeader,
    ReadingPayload,
    ReadingSamples,
}

/// Track with its sample table, output and read cursor.
#[derive(Debug)]
struct TrackState {
    track: Arc<Track>,
    table: Arc<SampleTable>,
    output: Arc<TrackOutput>,
    /// Next sample to stream.
    sample_index: usize,
}

/// Sample currently being streamed.
#[derive(Debug, Clone, Copy)]
struct SampleProgress {
    track: usize,
    /// Input bytes consumed.
    bytes_read: u32,
    /// Output bytes appended, differs from `bytes_read`
    /// when NAL length prefixes are rewritten.
    bytes_written: u32,
    /// Bytes left of the current NAL unit.
    nal_remaining: u32,
}

/// Atom parser state machine.
pub struct AtomParser {
    output: Arc<dyn ExtractorOutput>,
    reload_threshold: u64,
    state: ParserState,
    /// Header of the atom whose payload is being read.
    atom: Option<AtomHeader>,
    /// Buffered payload for leaves of interest.
    payload: Option<Vec<u8>>,
    /// Containers being parsed, innermost last.
    containers: Vec<ContainerAtom>,
    tracks: Vec<TrackState>,
    sample: Option<SampleProgress>,
    scratch: Vec<u8>,
}

impl std::fmt::Debug for AtomParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomParser")
            .field("state", &self.state)
            .field("atom", &self.atom)
            .field("containers", &self.containers.len())
            .field("tracks", &self.tracks)
            .field("sample", &self.sample)
            .finish()
    }
}

impl AtomParser {
    /// New parser. Payloads or gaps of at least `reload_threshold`
    /// bytes are reported as seeks instead of being read through.
    pub fn new(output: Arc<dyn ExtractorOutput>, reload_threshold: u64) -> Self {
        Self {
            output,
            reload_threshold,
            state: ParserState::ReadingHeader,
            atom: None,
            payload: None,
            containers: Vec::new(),
            tracks: Vec::new(),
            sample: None,
            scratch: Vec::new(),
        }
    }

    /// Returns `true` once `moov` has been parsed into tracks.
    pub fn is_prepared(&self) -> bool {
        self.state == ParserState::ReadingSamples
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Track and sample table for track `index`.
    pub fn track(&self, index: usize) -> Option<(Arc<Track>, Arc<SampleTable>)> {
        self.tracks.get(index)
            .map(|t| (t.track.clone(), t.table.clone()))
    }

    /// Next sample to be streamed for track `index`.
    pub fn sample_index(&self, index: usize) -> Option<usize> {
        self.tracks.get(index).map(|t| t.sample_index)
    }

    /// Advances the parser.
    ///
    /// Before `moov` is complete this consumes atoms until one of them
    /// requires a seek, input ends or `moov` is done.
    /// Afterwards every call streams at most one sample.
    /// `target_track` restricts streaming to one track,
    /// samples of other tracks are stepped over without being read.
    pub fn read(&mut self, input: &mut BufferedInput, target_track: Option<usize>) -> Result<ParseResult, Mp4Error> {
        loop {
            match self.state {
                ParserState::ReadingHeader => {
                    if !self.read_atom_header(input)? {
                        return Ok(ParseResult::EndOfInput)
                    }
                    if self.is_prepared() {
                        return Ok(ParseResult::Continue)
                    }
                },
                ParserState::ReadingPayload => {
                    if let Some(position) = self.read_atom_payload(input)? {
                        return Ok(ParseResult::Seek(position))
                    }
                    if self.is_prepared() {
                        return Ok(ParseResult::Continue)
                    }
                },
                ParserState::ReadingSamples => {
                    return match self.read_sample_data(input, target_track) {
                        Err(err) => {
                            self.abandon_sample();
                            Err(err)
                        },
                        ok => ok,
                    }
                },
            }
        }
    }

    /// Returns `false` at end of input between top level atoms.
    fn read_atom_header(&mut self, input: &mut BufferedInput) -> Result<bool, Mp4Error> {
        self.close_finished_containers(input.position())?;
        if self.is_prepared() {
            return Ok(true)
        }

        let offset = input.position();
        let mut raw = [0_u8; LONG_HEADER_SIZE as usize];
        if !input.read_fully(&mut raw[.. HEADER_SIZE as usize], true)? {
            if !self.containers.is_empty() {
                return Err(Mp4Error::UnexpectedEof{offset})
            }
            return Ok(false)
        }
        let size = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let name = FourCC::from_slice(&raw[4 .. 8]);
        let extended_size = match size {
            LONG_SIZE_PREFIX => {
                input.read_fully(&mut raw[HEADER_SIZE as usize ..], false)?;
                let mut ext = [0_u8; 8];
                ext.copy_from_slice(&raw[HEADER_SIZE as usize ..]);
                Some(u64::from_be_bytes(ext))
            },
            _ => None,
        };
        // size 0: atom runs until the end of its container, or the input
        let end = self.containers.last()
            .map(|c| c.end_offset())
            .or(input.length());
        let header = AtomHeader::new(size, name, extended_size, offset, end)?;

        if let Some(parent) = self.containers.last() {
            if header.offset_next_abs() > parent.end_offset() {
                return Err(Mp4Error::UnexpectedAtomSize{name, len: header.size, offset})
            }
        }

        if header.is_container() {
            debug!("Entering '{name}' @ {offset}, {} bytes", header.size);
            self.containers.push(ContainerAtom::new(name, header.offset_next_abs()));
            // empty containers end right away
            self.close_finished_containers(input.position())?;
            return Ok(true)
        }

        if name.is_leaf() {
            let len = header.data_size();
            if len >= i32::MAX as u64 {
                return Err(Mp4Error::AtomTooLarge{name, len})
            }
            trace!("Buffering '{name}' @ {offset}, {len} bytes");
            self.payload = Some(vec![0; len as usize]);
        } else {
            trace!("Skipping '{name}' @ {offset}, {} bytes", header.size);
            self.payload = None;
        }
        self.atom = Some(header);
        self.state = ParserState::ReadingPayload;
        Ok(true)
    }

    /// Reads or skips the current atom's payload.
    /// Returns a position to reopen at for large skips.
    fn read_atom_payload(&mut self, input: &mut BufferedInput) -> Result<Option<u64>, Mp4Error> {
        let Some(header) = self.atom.take() else {
            self.state = ParserState::ReadingHeader;
            return Ok(None)
        };
        self.state = ParserState::ReadingHeader;

        match self.payload.take() {
            Some(mut data) => {
                input.read_fully(&mut data, false)?;
                match self.containers.last_mut() {
                    Some(parent) => parent.add(Atom::Leaf(LeafAtom::new(header.name, data))),
                    None => debug!("Ignoring top level '{}'", header.name),
                }
            },
            None => {
                let remaining = header.offset_next_abs().saturating_sub(input.position());
                if remaining >= self.reload_threshold {
                    debug!("Seeking past '{}' to {}", header.name, header.offset_next_abs());
                    return Ok(Some(header.offset_next_abs()))
                }
                input.skip_fully(remaining)?;
            },
        }

        self.close_finished_containers(input.position())?;
        Ok(None)
    }

    /// Pops containers ending at `position` into their parents,
    /// and processes `moov` once complete.
    fn close_finished_containers(&mut self, position: u64) -> Result<(), Mp4Error> {
        while let Some(container) = self.containers.last() {
            if container.end_offset() > position {
                break
            }
            if container.end_offset() < position {
                return Err(Mp4Error::UnexpectedAtomSize{
                    name: container.name(),
                    len: position - container.end_offset(),
                    offset: container.end_offset(),
                })
            }
            let Some(container) = self.containers.pop() else {
                break
            };
            if container.name() == FourCC::Moov {
                self.containers.clear();
                return self.process_moov(&container)
            }
            match self.containers.last_mut() {
                Some(parent) => parent.add(Atom::Container(container)),
                None => debug!("Ignoring top level '{}'", container.name()),
            }
        }
        Ok(())
    }

    /// Builds tracks and sample tables, hands each track its output.
    fn process_moov(&mut self, moov: &ContainerAtom) -> Result<(), Mp4Error> {
        debug!("Processing 'moov'");
        let mvhd = moov.require_leaf(FourCC::Mvhd)?.read::<Mvhd>()?;

        let traks: Vec<&ContainerAtom> = moov.containers().iter()
            .filter(|c| c.name() == FourCC::Trak)
            .collect();

        // Tables are independent, order follows 'trak' order
        let built = traks.par_iter()
            .map(|trak| -> Result<Option<(Track, SampleTable)>, Mp4Error> {
                let Some(track) = parse_trak(trak, &mvhd)? else {
                    return Ok(None)
                };
                if !track.kind().is_playable() {
                    debug!("Skipping {:?} track {}", track.kind(), track.id());
                    return Ok(None)
                }
                let stbl = trak.require_container(FourCC::Mdia)?
                    .require_container(FourCC::Minf)?
                    .require_container(FourCC::Stbl)?;
                let table = parse_stbl(&track, stbl)?;
                if table.is_empty() {
                    debug!("Skipping track {} without samples", track.id());
                    return Ok(None)
                }
                Ok(Some((track, table)))
            })
            .collect::<Result<Vec<_>, Mp4Error>>()?;

        let mut tracks = Vec::new();
        for (mut track, table) in built.into_iter().flatten() {
            let index = tracks.len();
            track.format = track.format.with_max_input_size(table.max_size());
            let output = self.output.track_output(index);
            output.set_format(track.format.clone());
            info!(
                "Track {index} (id {}): {}, {} samples",
                track.id(), track.format().mime_type, table.len()
            );
            tracks.push(TrackState {
                track: Arc::new(track),
                table: Arc::new(table),
                output,
                sample_index: 0,
            });
        }

        if tracks.is_empty() {
            return Err(Mp4Error::NoPlayableTracks)
        }

        self.tracks = tracks;
        self.output.built_tracks();
        self.state = ParserState::ReadingSamples;
        Ok(())
    }

    /// Track holding the unread sample with the lowest offset.
    /// Ties go to the lower track index.
    fn next_track(&self) -> Option<usize> {
        let mut next: Option<(usize, u64)> = None;
        for (i, t) in self.tracks.iter().enumerate() {
            let Some(offset) = t.table.offset(t.sample_index) else {
                continue
            };
            if next.map_or(true, |(_, min)| offset < min) {
                next = Some((i, offset));
            }
        }
        next.map(|(i, _)| i)
    }

    fn read_sample_data(&mut self, input: &mut BufferedInput, target_track: Option<usize>) -> Result<ParseResult, Mp4Error> {
        let progress = match self.sample {
            Some(progress) => progress,
            None => {
                let Some(index) = self.next_track() else {
                    return Ok(ParseResult::EndOfInput)
                };
                if target_track.is_some_and(|target| target != index) {
                    self.tracks[index].sample_index += 1;
                    return Ok(ParseResult::Continue)
                }
                SampleProgress {
                    track: index,
                    bytes_read: 0,
                    bytes_written: 0,
                    nal_remaining: 0,
                }
            }
        };

        let t = &self.tracks[progress.track];
        let sample = t.sample_index;
        let (Some(offset), Some(size)) = (t.table.offset(sample), t.table.size(sample)) else {
            self.sample = None;
            return Ok(ParseResult::Continue)
        };

        // Continue where the sample was left, reopening if that is behind
        // the input or too far ahead
        let resume_at = offset + progress.bytes_read as u64;
        if resume_at < input.position() || resume_at - input.position() >= self.reload_threshold {
            debug!("Sample {sample} of track {} @ {resume_at}, reopening", progress.track);
            // bytes of an unfinished sample are rewritten from the start
            self.abandon_sample();
            return Ok(ParseResult::Seek(offset))
        }
        input.skip_fully(resume_at - input.position())?;
        self.sample = Some(progress);

        if self.scratch.len() < BUFFER_FRAGMENT_LENGTH {
            self.scratch.resize(BUFFER_FRAGMENT_LENGTH, 0);
        }

        let nal_length_size = t.track.nal_length_size();
        let output = t.output.clone();
        let mut progress = progress;
        match nal_length_size {
            Some(len_size) => self.stream_nal_units(input, &output, &mut progress, size, len_size as u32)?,
            None => self.stream_bytes(input, &output, &mut progress, size)?,
        }

        let t = &mut self.tracks[progress.track];
        let time_us = t.table.timestamp_us(sample).unwrap_or_default();
        let flags = t.table.sample_flags(sample).unwrap_or_default();
        let key_id = t.table.description(sample)
            .and_then(|d| t.track.encryption_box(d))
            .filter(|e| e.is_encrypted)
            .map(|e| e.key_id);
        t.output.commit_sample(time_us, flags, progress.bytes_written, 0, key_id);
        trace!(
            "Committed sample {sample} of track {} @ {time_us}us, {} bytes",
            progress.track, progress.bytes_written
        );
        t.sample_index += 1;
        self.sample = None;
        Ok(ParseResult::Continue)
    }

    fn stream_bytes(
        &mut self,
        input: &mut BufferedInput,
        output: &TrackOutput,
        progress: &mut SampleProgress,
        size: u32,
    ) -> Result<(), Mp4Error> {
        while progress.bytes_read < size {
            let len = ((size - progress.bytes_read) as usize).min(self.scratch.len());
            let n = input.read(&mut self.scratch[.. len])?;
            if n == 0 {
                return Err(Mp4Error::UnexpectedEof{offset: input.position()})
            }
            output.append_data(&self.scratch[.. n]);
            progress.bytes_read += n as u32;
            progress.bytes_written += n as u32;
            self.sample = Some(*progress);
        }
        Ok(())
    }

    /// Replaces each `len_size` byte NAL length prefix with a 4 byte start code.
    fn stream_nal_units(
        &mut self,
        input: &mut BufferedInput,
        output: &TrackOutput,
        progress: &mut SampleProgress,
        size: u32,
        len_size: u32,
    ) -> Result<(), Mp4Error> {
        while progress.bytes_read < size {
            if progress.nal_remaining == 0 {
                if size - progress.bytes_read < len_size {
                    return Err(Mp4Error::InvalidSampleTable(format!(
                        "truncated NAL length prefix @ {}", input.position()
                    )))
                }
                let mut prefix = [0_u8; 4];
                input.read_fully(&mut prefix[(4 - len_size as usize) ..], false)?;
                let nal_len = u32::from_be_bytes(prefix);
                progress.bytes_read += len_size;
                if nal_len > size - progress.bytes_read {
                    return Err(Mp4Error::InvalidSampleTable(format!(
                        "NAL unit of {nal_len} bytes overruns sample @ {}", input.position()
                    )))
                }
                output.append_data(&NAL_START_CODE);
                progress.bytes_written += NAL_START_CODE.len() as u32;
                progress.nal_remaining = nal_len;
            } else {
                let len = (progress.nal_remaining as usize).min(self.scratch.len());
                let n = input.read(&mut self.scratch[.. len])?;
                if n == 0 {
                    return Err(Mp4Error::UnexpectedEof{offset: input.position()})
                }
                output.append_data(&self.scratch[.. n]);
                progress.bytes_read += n as u32;
                progress.bytes_written += n as u32;
                progress.nal_remaining -= n as u32;
            }
            self.sample = Some(*progress);
        }
        Ok(())
    }

    /// Drops the bytes of a partially streamed sample,
    /// so that it is streamed again from its first byte.
    fn abandon_sample(&mut self) {
        if let Some(progress) = self.sample.take() {
            let output = &self.tracks[progress.track].output;
            output.discard_upstream_samples(output.write_index());
        }
    }

    /// Positions every track on the sample for `time_us` under `mode`.
    /// Returns the lowest offset among those samples, which is where
    /// loading should restart, or `None` if no track has such a sample.
    pub fn seek_position(&mut self, time_us: i64, mode: SeekMode) -> Option<u64> {
        self.seek_reset();
        let mut position: Option<u64> = None;
        for t in self.tracks.iter_mut() {
            let table = &t.table;
            let index = match mode {
                SeekMode::PreviousSync => table.floor_sync(time_us).or_else(|| table.ceil_sync(time_us)),
                SeekMode::NextSync => table.ceil_sync(time_us).or_else(|| table.floor_sync(time_us)),
                SeekMode::NextClosest => table.floor_closest(time_us).or_else(|| table.floor_sync(time_us)),
            };
            t.sample_index = index.unwrap_or(table.len());
            if let Some(offset) = index.and_then(|i| table.offset(i)) {
                position = Some(position.map_or(offset, |p| p.min(offset)));
            }
        }
        debug!("Seek to {time_us}us ({mode:?}) @ {position:?}");
        position
    }

    /// Forgets any partially streamed sample.
    /// Output contents are left to the caller.
    pub fn seek_reset(&mut self) {
        self.sample = None;
    }
}
