//! Demuxing facade: prepare, pick a track, read samples, seek.
//!
//! ```rs
//! use mp4stream::{ReadResult, SampleHolder, Source, SourceConfig, TrackKind};
//!
//! fn main() -> Result<(), mp4stream::Mp4Error> {
//!     let mut source = Source::from_uri("file:///path/to/VIDEO.MP4", SourceConfig::default());
//!     source.prepare(0)?;
//!     let video = source.track_index_of(TrackKind::Video).expect("no video track");
//!     source.select_track(video)?;
//!
//!     let mut holder = SampleHolder::new();
//!     loop {
//!         match source.read_sample(&mut holder)? {
//!             ReadResult::Sample(size) => println!("{}us: {size} bytes", holder.time_us),
//!             ReadResult::SampleNotFound => std::thread::yield_now(),
//!             ReadResult::EndOfStream => break,
//!         }
//!     }
//!     source.release();
//!     Ok(())
//! }
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::{
    allocator::AllocatorPool,
    config::SourceConfig,
    input::{ByteSource, BufferedInput, DataSpec, MemorySource, UriSource},
    loader::{Loader, SharedSource},
    output::{ExtractorOutput, TrackOutput},
    parser::{AtomParser, ParseResult, SeekMode},
    rolling::SampleHolder,
    track::{MediaFormat, SampleFlags, SampleTable, Track, TrackKind},
    Mp4Error,
};

/// Result of `Source::read_sample()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// A sample of this many bytes was read.
    Sample(usize),
    /// All samples of the selected track have been read.
    EndOfStream,
    /// The loader has not reached the next sample yet.
    SampleNotFound,
}

/// Track outputs, created as the parser asks for them.
#[derive(Debug)]
struct OutputSet {
    pool: Arc<AllocatorPool>,
    outputs: Mutex<Vec<Arc<TrackOutput>>>,
    built: AtomicBool,
}

impl OutputSet {
    fn new(pool: Arc<AllocatorPool>) -> Self {
        Self {
            pool,
            outputs: Mutex::new(Vec::new()),
            built: AtomicBool::new(false),
        }
    }

    fn get(&self, index: usize) -> Option<Arc<TrackOutput>> {
        self.outputs.lock().get(index).cloned()
    }

    fn clear_all(&self) {
        for output in self.outputs.lock().iter() {
            output.clear();
        }
    }

    /// Drops samples before `time_us` from every output but `keep`.
    fn discard_others_until(&self, keep: usize, time_us: i64) {
        for (i, output) in self.outputs.lock().iter().enumerate() {
            if i != keep {
                output.discard_until(time_us);
            }
        }
    }

    fn is_built(&self) -> bool {
        self.built.load(Ordering::Acquire)
    }
}

impl ExtractorOutput for OutputSet {
    fn track_output(&self, index: usize) -> Arc<TrackOutput> {
        let mut outputs = self.outputs.lock();
        while outputs.len() <= index {
            outputs.push(Arc::new(TrackOutput::new(self.pool.clone())));
        }
        outputs[index].clone()
    }

    fn built_tracks(&self) {
        self.built.store(true, Ordering::Release);
    }
}

/// Prepared state, dropped on release.
struct Prepared {
    parser: Arc<Mutex<AtomParser>>,
    loader: Loader,
    tracks: Vec<(Arc<Track>, Arc<SampleTable>)>,
}

/// Streaming MP4 demuxer over a byte source.
pub struct Source {
    uri: String,
    config: SourceConfig,
    source: SharedSource,
    pool: Arc<AllocatorPool>,
    outputs: Arc<OutputSet>,
    prepared: Option<Prepared>,
    selected: Option<usize>,
    loading_started: bool,
    /// Where loading restarts if not yet started.
    position_us: i64,
    seek_mode: SeekMode,
    retries: usize,
    /// Time and flags of the last read sample.
    last_sample: Option<(i64, SampleFlags)>,
}

impl Source {
    pub fn new(source: Box<dyn ByteSource>, uri: &str, config: SourceConfig) -> Self {
        let pool = Arc::new(AllocatorPool::new(config.block_size));
        Self {
            uri: uri.to_owned(),
            config,
            source: Arc::new(Mutex::new(source)),
            outputs: Arc::new(OutputSet::new(pool.clone())),
            pool,
            prepared: None,
            selected: None,
            loading_started: false,
            position_us: 0,
            seek_mode: SeekMode::PreviousSync,
            retries: 0,
            last_sample: None,
        }
    }

    /// Source for a `file://` URI or a path.
    pub fn from_uri(uri: &str, config: SourceConfig) -> Self {
        Self::new(Box::new(UriSource::new()), uri, config)
    }

    /// Source over bytes already in memory.
    pub fn from_memory(data: impl Into<Arc<[u8]>>, config: SourceConfig) -> Self {
        Self::new(Box::new(MemorySource::new(data)), "memory:", config)
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Pool shared by all track outputs.
    pub fn pool(&self) -> &Arc<AllocatorPool> {
        &self.pool
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    /// Parses the movie atom and, if a track is selected,
    /// starts loading at the keyframe before `position_us`.
    pub fn prepare(&mut self, position_us: i64) -> Result<(), Mp4Error> {
        if self.is_prepared() {
            return Ok(())
        }
        self.prepare_metadata_only()?;
        self.position_us = position_us;
        self.seek_mode = SeekMode::PreviousSync;
        if self.selected.is_some() || self.config.load_all_tracks {
            self.restart_loading(position_us, SeekMode::PreviousSync)?;
        }
        Ok(())
    }

    /// Parses the movie atom without loading any samples.
    /// I/O failures are retried from the start of the input.
    pub fn prepare_metadata_only(&mut self) -> Result<(), Mp4Error> {
        if self.is_prepared() {
            return Ok(())
        }
        let mut attempt = 0;
        let parser = loop {
            match self.parse_metadata() {
                Ok(parser) => break parser,
                Err(err) if err.is_recoverable() && attempt < self.config.max_load_retries => {
                    attempt += 1;
                    warn!("Prepare failed, retrying ({attempt}/{}): {err}", self.config.max_load_retries);
                },
                Err(err) => {
                    self.outputs = Arc::new(OutputSet::new(self.pool.clone()));
                    return Err(err)
                },
            }
        };

        let tracks: Vec<_> = (0 .. parser.track_count())
            .filter_map(|i| parser.track(i))
            .collect();
        info!("Prepared '{}' with {} track(s)", self.uri, tracks.len());

        let parser = Arc::new(Mutex::new(parser));
        let loader = Loader::new(
            self.source.clone(),
            &self.uri,
            parser.clone(),
            self.pool.clone(),
            self.config.buffer_limit_bytes,
        );
        self.prepared = Some(Prepared {parser, loader, tracks});
        Ok(())
    }

    /// Reads atoms from the start of the input until `moov` is parsed.
    fn parse_metadata(&mut self) -> Result<AtomParser, Mp4Error> {
        self.outputs = Arc::new(OutputSet::new(self.pool.clone()));
        let mut parser = AtomParser::new(self.outputs.clone(), self.config.reload_threshold);
        let mut position = 0;
        loop {
            let mut source = self.source.lock();
            let result = Self::parse_pass(&mut **source, &self.uri, position, &mut parser);
            let closed = source.close();
            drop(source);

            match result {
                Ok(next) => {
                    closed?;
                    match next {
                        Some(seek) => position = seek,
                        None => break,
                    }
                },
                Err(err) => {
                    if let Err(close_err) = closed {
                        warn!("Failed to close source after prepare error: {close_err}");
                    }
                    return Err(err)
                },
            }
        }

        match parser.is_prepared() && self.outputs.is_built() {
            true => Ok(parser),
            false => Err(Mp4Error::MissingMovie),
        }
    }

    /// One open/read/close pass. Returns a position to reopen at, if any.
    fn parse_pass(
        source: &mut dyn ByteSource,
        uri: &str,
        position: u64,
        parser: &mut AtomParser,
    ) -> Result<Option<u64>, Mp4Error> {
        let len = source.open(&DataSpec::new(uri, position))?;
        let mut input = BufferedInput::new(source, position, len, Default::default());
        loop {
            match parser.read(&mut input, None)? {
                ParseResult::Continue if parser.is_prepared() => return Ok(None),
                ParseResult::Continue => (),
                ParseResult::Seek(seek) => {
                    debug!("Prepare seeking to {seek}");
                    return Ok(Some(seek))
                },
                ParseResult::EndOfInput => return Ok(None),
            }
        }
    }

    fn prepared(&self) -> Result<&Prepared, Mp4Error> {
        self.prepared.as_ref().ok_or(Mp4Error::NotPrepared)
    }

    /// Track to load, `None` for all tracks.
    fn target_track(&self) -> Option<usize> {
        match self.config.load_all_tracks {
            true => None,
            false => self.selected,
        }
    }

    /// Stops loading, drops all buffered samples and restarts
    /// loading at the position for `time_us` under `mode`.
    fn restart_loading(&mut self, time_us: i64, mode: SeekMode) -> Result<(), Mp4Error> {
        let start = self.selected.is_some() || self.config.load_all_tracks;
        let target = self.target_track();
        let Some(prepared) = self.prepared.as_mut() else {
            return Err(Mp4Error::NotPrepared)
        };
        prepared.loader.stop_loading();
        let offset = prepared.parser.lock().seek_position(time_us, mode);
        self.outputs.clear_all();
        self.retries = 0;
        self.loading_started = start;
        if start {
            prepared.loader.start_loading_at(offset.unwrap_or_default(), target);
        }
        Ok(())
    }

    /// Number of audio and video tracks with samples.
    pub fn track_count(&self) -> usize {
        self.prepared.as_ref()
            .map(|p| p.tracks.len())
            .unwrap_or(0)
    }

    pub fn track_format(&self, index: usize) -> Option<&MediaFormat> {
        self.track(index).map(|(track, _)| track.format())
    }

    /// Track and its sample table.
    pub fn track(&self, index: usize) -> Option<(&Track, &SampleTable)> {
        let (track, table) = self.prepared.as_ref()?.tracks.get(index)?;
        Some((track.as_ref(), table.as_ref()))
    }

    /// Index of the first track of `kind`.
    pub fn track_index_of(&self, kind: TrackKind) -> Option<usize> {
        self.prepared.as_ref()?.tracks.iter()
            .position(|(track, _)| track.kind() == kind)
    }

    pub fn selected_track(&self) -> Option<usize> {
        self.selected
    }

    /// Selects the track `read_sample()` reads from,
    /// replacing any previous selection.
    pub fn select_track(&mut self, index: usize) -> Result<(), Mp4Error> {
        if index >= self.track_count() {
            return Err(Mp4Error::NoSuchTrack(index))
        }
        if self.selected == Some(index) {
            return Ok(())
        }
        debug!("Selecting track {index}");
        self.selected = Some(index);
        if self.loading_started && !self.config.load_all_tracks {
            self.restart_loading(self.position_us, SeekMode::PreviousSync)?;
        }
        Ok(())
    }

    pub fn deselect_track(&mut self, index: usize) {
        if self.selected != Some(index) {
            return
        }
        debug!("Deselecting track {index}");
        self.selected = None;
        if !self.config.load_all_tracks {
            if let Some(prepared) = self.prepared.as_mut() {
                prepared.loader.stop_loading();
            }
            self.outputs.clear_all();
            self.loading_started = false;
        }
    }

    /// Reads the next sample of the selected track into `holder`.
    ///
    /// A load that failed on I/O is restarted where it stopped,
    /// at most `max_load_retries` times in a row, before its error is returned.
    ///
    /// When all tracks are loaded, samples of the other tracks are dropped
    /// once the selected track has moved past them, and dropped entirely
    /// while they hold the pool at its limit.
    pub fn read_sample(&mut self, holder: &mut SampleHolder) -> Result<ReadResult, Mp4Error> {
        self.prepared()?;
        let index = self.selected.ok_or(Mp4Error::NoTrackSelected)?;
        if !self.loading_started {
            self.restart_loading(self.position_us, self.seek_mode)?;
        }

        let output = self.outputs.get(index).ok_or(Mp4Error::NoSuchTrack(index))?;
        // checked first, the last samples are committed before finishing
        let finished = self.prepared()?.loader.is_finished();
        if output.get_sample(holder) {
            self.position_us = holder.time_us;
            self.last_sample = Some((holder.time_us, holder.flags));
            self.retries = 0;
            if self.config.load_all_tracks {
                self.outputs.discard_others_until(index, holder.time_us);
            }
            return Ok(ReadResult::Sample(holder.size))
        }
        if finished {
            return Ok(ReadResult::EndOfStream)
        }
        if self.config.load_all_tracks && self.pool.exceeds(self.config.buffer_limit_bytes.saturating_sub(1)) {
            debug!("Pool at its limit without samples for track {index}, dropping other tracks");
            self.outputs.discard_others_until(index, i64::MAX);
        }

        let target = self.target_track();
        let max_retries = self.config.max_load_retries;
        let prepared = self.prepared.as_mut().ok_or(Mp4Error::NotPrepared)?;
        if let Some(err) = prepared.loader.take_error() {
            if !err.is_recoverable() || self.retries >= max_retries {
                return Err(err)
            }
            self.retries += 1;
            let position = prepared.loader.resume_position();
            warn!("Load failed, resuming @ {position} ({}/{max_retries}): {err}", self.retries);
            prepared.loader.start_loading_at(position, target);
        }
        Ok(ReadResult::SampleNotFound)
    }

    /// Presentation time of the last read sample.
    pub fn sample_time(&self) -> Option<i64> {
        self.last_sample.map(|(time_us, _)| time_us)
    }

    /// Flags of the last read sample.
    pub fn sample_flags(&self) -> Option<SampleFlags> {
        self.last_sample.map(|(_, flags)| flags)
    }

    /// Done with the last read sample.
    /// `read_sample()` already moves past it, so this only
    /// clears `sample_time()` and `sample_flags()`.
    pub fn advance(&mut self) {
        self.last_sample = None;
    }

    /// Seeks all tracks to `time_us`.
    ///
    /// With `SeekMode::PreviousSync` an already buffered keyframe
    /// is used if possible, otherwise loading restarts at the new position.
    pub fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<(), Mp4Error> {
        self.prepared()?;
        self.last_sample = None;
        self.position_us = time_us;
        self.seek_mode = mode;

        if mode == SeekMode::PreviousSync && self.loading_started {
            let skipped = self.selected
                .and_then(|i| self.outputs.get(i))
                .is_some_and(|output| output.skip_to_keyframe_before(time_us));
            if skipped {
                debug!("Seek to {time_us}us within buffered samples");
                return Ok(())
            }
        }
        self.restart_loading(time_us, mode)
    }

    /// Largest buffered timestamp of the selected track,
    /// or its duration once loading has finished.
    pub fn buffered_position_us(&self) -> Option<i64> {
        let index = self.selected?;
        let prepared = self.prepared.as_ref()?;
        let largest = self.outputs.get(index)?.largest_parsed_timestamp_us();
        match prepared.loader.is_finished() {
            true => prepared.tracks.get(index)
                .and_then(|(track, _)| track.duration_us())
                .or(largest),
            false => largest,
        }
    }

    /// Returns `true` while the loader runs in the background.
    pub fn is_loading(&self) -> bool {
        self.prepared.as_ref().is_some_and(|p| p.loader.is_loading())
    }

    /// Stops loading, frees buffered samples and returns
    /// to the unprepared state.
    pub fn release(&mut self) {
        if let Some(mut prepared) = self.prepared.take() {
            prepared.loader.stop_loading();
        }
        self.outputs.clear_all();
        self.pool.trim(0);
        self.selected = None;
        self.loading_started = false;
        self.position_us = 0;
        self.seek_mode = SeekMode::PreviousSync;
        self.retries = 0;
        self.last_sample = None;
        debug!("Released '{}'", self.uri);
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        if let Some(prepared) = self.prepared.as_mut() {
            prepared.loader.stop_loading();
        }
    }
}
