//! Track outputs: the loader writes samples, the consumer reads them.
//!
//! One producer (loader thread) and one consumer per track.
//! The format is published once, before the first sample is committed.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
    OnceLock,
};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::{
    allocator::AllocatorPool,
    rolling::{RollingSampleBuffer, SampleHolder},
    track::{MediaFormat, SampleFlags},
};

/// Receives track outputs from the parser once the movie atom is parsed.
pub trait ExtractorOutput: Send + Sync {
    /// Returns the output for track `index`, creating it if needed.
    fn track_output(&self, index: usize) -> Arc<TrackOutput>;
    /// Called once all tracks have been handed their format.
    fn built_tracks(&self);
}

#[derive(Debug)]
struct ReadState {
    buffer: RollingSampleBuffer,
    /// Skip samples until a keyframe is found.
    need_keyframe: bool,
    last_read_time_us: i64,
    /// Samples at or after this time are never read.
    splice_out_time_us: i64,
}

/// Sample queue for a single track.
#[derive(Debug)]
pub struct TrackOutput {
    format: OnceLock<MediaFormat>,
    state: Mutex<ReadState>,
    largest_parsed_timestamp_us: AtomicI64,
}

impl TrackOutput {
    pub fn new(pool: Arc<AllocatorPool>) -> Self {
        Self {
            format: OnceLock::new(),
            state: Mutex::new(ReadState {
                buffer: RollingSampleBuffer::new(pool),
                need_keyframe: true,
                last_read_time_us: i64::MIN,
                splice_out_time_us: i64::MIN,
            }),
            largest_parsed_timestamp_us: AtomicI64::new(i64::MIN),
        }
    }

    /// Format, once published by the parser.
    pub fn format(&self) -> Option<&MediaFormat> {
        self.format.get()
    }

    pub fn has_format(&self) -> bool {
        self.format.get().is_some()
    }

    /// Largest committed timestamp, `None` if nothing was committed
    /// since the last clear.
    pub fn largest_parsed_timestamp_us(&self) -> Option<i64> {
        match self.largest_parsed_timestamp_us.load(Ordering::Acquire) {
            i64::MIN => None,
            ts => Some(ts),
        }
    }

    // Write side

    /// Publishes the format. Later calls are ignored.
    pub fn set_format(&self, format: MediaFormat) {
        if self.format.set(format).is_err() {
            debug!("Track output format already set");
        }
    }

    pub fn append_data(&self, data: &[u8]) {
        self.state.lock().buffer.append_data(data)
    }

    pub fn commit_sample(
        &self,
        time_us: i64,
        flags: SampleFlags,
        size: u32,
        offset_from_end: u64,
        key_id: Option<[u8; 16]>,
    ) {
        self.largest_parsed_timestamp_us.fetch_max(time_us, Ordering::AcqRel);
        self.state.lock().buffer.commit_sample(time_us, flags, size, offset_from_end, key_id)
    }

    /// Absolute index of the next sample to be committed.
    pub fn write_index(&self) -> u64 {
        self.state.lock().buffer.write_index()
    }

    /// Drops samples from `discard_from_index` on, as well as
    /// bytes appended for a sample that was never committed.
    pub fn discard_upstream_samples(&self, discard_from_index: u64) {
        let mut state = self.state.lock();
        state.buffer.discard_upstream(discard_from_index);
        let largest = state.buffer.largest_queued_time_us()
            .unwrap_or(i64::MIN)
            .max(state.last_read_time_us);
        self.largest_parsed_timestamp_us.store(largest, Ordering::Release);
    }

    // Read side

    /// Returns `true` if no sample is ready to be read.
    /// Drops non-keyframes while waiting for a keyframe.
    pub fn is_empty(&self) -> bool {
        !Self::advance_to_eligible_sample(&mut self.state.lock())
    }

    /// Reads the next eligible sample into `holder`.
    pub fn get_sample(&self, holder: &mut SampleHolder) -> bool {
        let mut state = self.state.lock();
        if !Self::advance_to_eligible_sample(&mut state) {
            return false
        }
        if !state.buffer.read(holder) {
            return false
        }
        state.need_keyframe = false;
        state.last_read_time_us = holder.time_us;
        trace!("Read sample @ {}us, {} bytes", holder.time_us, holder.size);
        true
    }

    /// Drops samples before `time_us` and waits for the next keyframe.
    pub fn discard_until(&self, time_us: i64) {
        let mut state = self.state.lock();
        while state.buffer.peek().is_some_and(|s| s.time_us < time_us) {
            state.buffer.skip();
        }
        state.need_keyframe = true;
        state.last_read_time_us = i64::MIN;
    }

    /// In-memory seek. Returns `false` if the keyframe before `time_us`
    /// is not buffered, in which case nothing changes.
    pub fn skip_to_keyframe_before(&self, time_us: i64) -> bool {
        self.state.lock().buffer.skip_to_keyframe_before(time_us)
    }

    /// Sets up a handover to `next`. Samples in `next` before its
    /// first keyframe at or after this output's read position are dropped,
    /// and reading from this output stops at that keyframe.
    ///
    /// Returns `false` if `next` holds no such keyframe yet.
    /// Once configured, further calls return `true`.
    pub fn configure_splice_to(&self, next: &TrackOutput) -> bool {
        if std::ptr::eq(self, next) {
            return false
        }
        let mut state = self.state.lock();
        if state.splice_out_time_us != i64::MIN {
            return true
        }
        let first_possible_splice_time = match state.buffer.peek() {
            Some(sample) => sample.time_us,
            None => state.last_read_time_us.saturating_add(1),
        };

        let mut next_state = next.state.lock();
        while let Some(sample) = next_state.buffer.peek() {
            if sample.time_us >= first_possible_splice_time && sample.flags.is_sync() {
                break
            }
            next_state.buffer.skip();
        }
        match next_state.buffer.peek() {
            Some(sample) => {
                state.splice_out_time_us = sample.time_us;
                debug!("Splice configured @ {}us", sample.time_us);
                true
            },
            None => false
        }
    }

    /// Frees all samples and bytes, and resets the read state.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.buffer.clear();
        state.need_keyframe = true;
        state.last_read_time_us = i64::MIN;
        state.splice_out_time_us = i64::MIN;
        self.largest_parsed_timestamp_us.store(i64::MIN, Ordering::Release);
    }

    fn advance_to_eligible_sample(state: &mut ReadState) -> bool {
        if state.need_keyframe {
            while state.buffer.peek().is_some_and(|s| !s.flags.is_sync()) {
                state.buffer.skip();
            }
        }
        match state.buffer.peek() {
            None => false,
            Some(sample) => state.splice_out_time_us == i64::MIN
                || sample.time_us < state.splice_out_time_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> (Arc<AllocatorPool>, TrackOutput) {
        let pool = Arc::new(AllocatorPool::new(16));
        let output = TrackOutput::new(pool.clone());
        (pool, output)
    }

    fn push(output: &TrackOutput, time_us: i64, sync: bool) {
        output.append_data(&[time_us as u8]);
        let flags = if sync {SampleFlags::SYNC} else {SampleFlags::NONE};
        output.commit_sample(time_us, flags, 1, 0, None);
    }

    #[test]
    fn keyframe_gate_before_first_read() {
        let (_pool, output) = output();
        push(&output, 0, false);
        push(&output, 1, false);
        assert!(output.is_empty());
        push(&output, 2, true);
        push(&output, 3, false);

        let mut holder = SampleHolder::new();
        assert!(output.get_sample(&mut holder));
        assert_eq!(holder.time_us, 2);
        // gate lifted after the first keyframe
        assert!(output.get_sample(&mut holder));
        assert_eq!(holder.time_us, 3);
    }

    #[test]
    fn discard_until_rearms_gate() {
        let (_pool, output) = output();
        for (t, sync) in [(0, true), (1, false), (2, false), (3, true), (4, false)] {
            push(&output, t, sync);
        }
        let mut holder = SampleHolder::new();
        assert!(output.get_sample(&mut holder));
        output.discard_until(2);
        assert!(output.get_sample(&mut holder));
        assert_eq!(holder.time_us, 3);
        assert!(holder.is_sync());
    }

    #[test]
    fn splices_into_next_queue() {
        let (pool, current) = output();
        let next = TrackOutput::new(pool);
        for t in 0 .. 4 {
            push(&current, t * 10, t == 0);
        }
        for (t, sync) in [(0, true), (10, false), (20, true), (30, false)] {
            push(&next, t, sync);
        }
        let mut holder = SampleHolder::new();
        assert!(current.get_sample(&mut holder));
        assert!(current.get_sample(&mut holder));
        assert_eq!(holder.time_us, 10);

        assert!(current.configure_splice_to(&next));
        // current stops before 20, next starts at its keyframe @ 20
        assert!(!current.get_sample(&mut holder));
        assert!(next.get_sample(&mut holder));
        assert_eq!(holder.time_us, 20);
        assert!(current.configure_splice_to(&next));
        assert!(!current.configure_splice_to(&current));
    }

    #[test]
    fn format_published_once() {
        let (_pool, output) = output();
        assert!(!output.has_format());
        output.set_format(MediaFormat::audio("audio/mp4a-latm", None, 2, 44100, vec![]));
        output.set_format(MediaFormat::audio("audio/ac3", None, 6, 48000, vec![]));
        assert_eq!(output.format().map(|f| f.mime_type.as_str()), Some("audio/mp4a-latm"));
    }

    #[test]
    fn clear_releases_blocks_and_timestamps() {
        let (pool, output) = output();
        push(&output, 5, true);
        push(&output, 9, true);
        assert_eq!(output.largest_parsed_timestamp_us(), Some(9));
        output.discard_upstream_samples(1);
        assert_eq!(output.largest_parsed_timestamp_us(), Some(5));
        output.clear();
        assert_eq!(output.largest_parsed_timestamp_us(), None);
        assert_eq!(pool.allocated_count(), 0);
    }
}
