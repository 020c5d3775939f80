//! Loads sample data from the byte source into track outputs.
//!
//! A load starts with a synchronous pass on the caller's thread. If the
//! pool's limit stops it before input ends, a background thread continues
//! from where it stopped, waiting on the pool instead of stopping.
//! Both passes run the same loop.
//!
//! The source is closed after every pass, also on failure.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::{
    allocator::AllocatorPool,
    input::{BufferedInput, ByteSource, DataSpec},
    parser::{AtomParser, ParseResult},
    support::CancelFlag,
    Mp4Error,
};

/// Byte source shared between the facade and the loader thread.
pub type SharedSource = Arc<Mutex<Box<dyn ByteSource>>>;

/// How a pass reacts to the pool's limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Stop and report the resume position.
    Sync,
    /// Wait until blocks are released.
    Async,
}

/// How a pass ended, errors aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// All samples were streamed.
    Finished,
    /// Stopped by the pool's limit, resume at this position.
    Suspended(u64),
}

enum Step {
    Reopen(u64),
    Suspended,
    Finished,
}

/// A single unit of loading work, starting at a byte offset.
pub struct Loadable {
    source: SharedSource,
    uri: String,
    parser: Arc<Mutex<AtomParser>>,
    pool: Arc<AllocatorPool>,
    buffer_limit_bytes: usize,
    target_track: Option<usize>,
    position: u64,
    cancel: CancelFlag,
}

impl Loadable {
    pub fn new(
        source: SharedSource,
        uri: &str,
        parser: Arc<Mutex<AtomParser>>,
        pool: Arc<AllocatorPool>,
        buffer_limit_bytes: usize,
    ) -> Self {
        Self {
            source,
            uri: uri.to_owned(),
            parser,
            pool,
            buffer_limit_bytes,
            target_track: None,
            position: 0,
            cancel: CancelFlag::new(),
        }
    }

    /// Starts loading at `position`. `None` loads every track.
    pub fn at(self, position: u64, target_track: Option<usize>) -> Self {
        Self {position, target_track, ..self}
    }

    pub fn with_cancel(self, cancel: CancelFlag) -> Self {
        Self {cancel, ..self}
    }

    /// Current position, i.e. where a failed or suspended load resumes.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Runs until input ends, or the pass stops or fails.
    pub fn load(&mut self, mode: LoadMode) -> Result<LoadOutcome, Mp4Error> {
        let shared = self.source.clone();
        loop {
            let mut source = shared.lock();
            let step = self.load_once(&mut **source, mode);
            let closed = source.close();
            drop(source);

            match step {
                Ok(step) => {
                    closed?;
                    match step {
                        Step::Reopen(position) => self.position = position,
                        Step::Suspended => return Ok(LoadOutcome::Suspended(self.position)),
                        Step::Finished => return Ok(LoadOutcome::Finished),
                    }
                },
                Err(err) => {
                    if let Err(close_err) = closed {
                        warn!("Failed to close source after load error: {close_err}");
                    }
                    return Err(err)
                }
            }
        }
    }

    fn load_once(&mut self, source: &mut dyn ByteSource, mode: LoadMode) -> Result<Step, Mp4Error> {
        let len = source.open(&DataSpec::new(&self.uri, self.position))?;
        let mut input = BufferedInput::new(source, self.position, len, self.cancel.clone());
        // stop once the limit is reached, not only when passed
        let limit = self.buffer_limit_bytes.saturating_sub(1);
        loop {
            if self.cancel.is_cancelled() {
                return Err(Mp4Error::Cancelled)
            }
            match mode {
                LoadMode::Sync => if self.pool.exceeds(limit) {
                    return Ok(Step::Suspended)
                },
                LoadMode::Async => self.pool.block_until_at_or_below(limit, &self.cancel)?,
            }
            let result = self.parser.lock().read(&mut input, self.target_track);
            self.position = input.position();
            match result? {
                ParseResult::Continue => (),
                ParseResult::Seek(position) => return Ok(Step::Reopen(position)),
                ParseResult::EndOfInput => return Ok(Step::Finished),
            }
        }
    }
}

#[derive(Debug, Default)]
struct LoadState {
    /// Background pass in progress.
    running: bool,
    cancel_requested: bool,
    cancelled: bool,
    finished: bool,
    error: Option<Mp4Error>,
    resume_position: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<LoadState>,
    changed: Condvar,
}

/// Runs loads, at most one background pass at a time.
pub struct Loader {
    source: SharedSource,
    uri: String,
    parser: Arc<Mutex<AtomParser>>,
    pool: Arc<AllocatorPool>,
    buffer_limit_bytes: usize,
    shared: Arc<Shared>,
    cancel: CancelFlag,
    handle: Option<JoinHandle<()>>,
}

impl Loader {
    pub fn new(
        source: SharedSource,
        uri: &str,
        parser: Arc<Mutex<AtomParser>>,
        pool: Arc<AllocatorPool>,
        buffer_limit_bytes: usize,
    ) -> Self {
        Self {
            source,
            uri: uri.to_owned(),
            parser,
            pool,
            buffer_limit_bytes,
            shared: Arc::new(Shared::default()),
            cancel: CancelFlag::new(),
            handle: None,
        }
    }

    /// Stops any current load, then loads from `offset`.
    ///
    /// Errors are not returned but kept for `take_error()`,
    /// together with the position to resume at.
    pub fn start_loading_at(&mut self, offset: u64, target_track: Option<usize>) {
        self.stop_loading();
        self.cancel = CancelFlag::new();
        *self.shared.state.lock() = LoadState {
            resume_position: offset,
            ..LoadState::default()
        };

        debug!("Loading from {offset}, track {target_track:?}");
        let mut loadable = Loadable::new(
            self.source.clone(),
            &self.uri,
            self.parser.clone(),
            self.pool.clone(),
            self.buffer_limit_bytes,
        )
            .at(offset, target_track)
            .with_cancel(self.cancel.clone());

        match loadable.load(LoadMode::Sync) {
            Ok(LoadOutcome::Finished) => {
                debug!("Load finished synchronously");
                self.shared.state.lock().finished = true;
            },
            Ok(LoadOutcome::Suspended(position)) => {
                debug!("Load suspended @ {position}, continuing in background");
                self.spawn(loadable);
            },
            Err(err) => Self::finish(&self.shared, Err(err), loadable.position()),
        }
    }

    fn spawn(&mut self, mut loadable: Loadable) {
        {
            let mut state = self.shared.state.lock();
            state.running = true;
            state.resume_position = loadable.position();
        }
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("mp4stream-loader".to_owned())
            .spawn(move || {
                let result = loadable.load(LoadMode::Async);
                Self::finish(&shared, result, loadable.position());
            });
        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(err) => Self::finish(&self.shared, Err(err.into()), 0),
        }
    }

    /// Records the end of a pass and wakes `stop_loading()`.
    fn finish(shared: &Shared, result: Result<LoadOutcome, Mp4Error>, position: u64) {
        let mut state = shared.state.lock();
        state.running = false;
        state.resume_position = position;
        match result {
            Ok(LoadOutcome::Finished) => {
                debug!("Load finished");
                state.finished = true;
            },
            Ok(LoadOutcome::Suspended(_)) => (),
            Err(err) if err.is_cancelled() => {
                debug!("Load cancelled @ {position}");
                state.cancelled = true;
            },
            Err(err) => {
                warn!("Load failed @ {position}: {err}");
                state.error = Some(err);
            },
        }
        shared.changed.notify_all();
    }

    /// Cancels a background pass and waits for its thread to exit.
    /// Does nothing if no pass is running.
    pub fn stop_loading(&mut self) {
        let Some(handle) = self.handle.take() else {
            return
        };
        {
            let mut state = self.shared.state.lock();
            if state.running {
                debug!("Stopping load");
                state.cancel_requested = true;
                self.cancel.cancel();
                self.pool.interrupt_waiters();
                while state.running {
                    self.shared.changed.wait(&mut state);
                }
            }
        }
        if handle.join().is_err() {
            warn!("Loader thread panicked");
        }
    }

    /// Returns `true` while a background pass runs.
    pub fn is_loading(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Returns `true` once all samples were loaded.
    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().finished
    }

    /// Returns `true` if the last pass ended on a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.shared.state.lock().cancelled
    }

    /// Returns `true` if a stop was requested for the last pass.
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.state.lock().cancel_requested
    }

    /// Error that ended the last pass, if any.
    pub fn take_error(&self) -> Option<Mp4Error> {
        self.shared.state.lock().error.take()
    }

    /// Where the last pass stopped.
    pub fn resume_position(&self) -> u64 {
        self.shared.state.lock().resume_position
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.stop_loading()
    }
}
