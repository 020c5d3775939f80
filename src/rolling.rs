//! Per-track rolling buffer: sample bytes in a queue of pool blocks,
//! plus a queue of committed sample descriptors.
//!
//! Byte positions are absolute within the track's written stream,
//! i.e. the number of bytes appended since the last `clear()`.
//! Blocks are released back to the pool as soon as the reader
//! has moved past them.

use std::{collections::VecDeque, sync::Arc};

use crate::{
    allocator::{Allocation, AllocatorPool},
    track::SampleFlags,
};

/// Committed sample, waiting to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDescriptor {
    pub time_us: i64,
    pub flags: SampleFlags,
    pub size: u32,
    /// Absolute position of the first byte in the written stream.
    pub offset: u64,
    /// Key id for encrypted samples.
    pub key_id: Option<[u8; 16]>,
}

/// Destination for a read sample.
#[derive(Debug, Clone, Default)]
pub struct SampleHolder {
    /// Sample bytes, resized to `size` on read.
    pub data: Vec<u8>,
    pub size: usize,
    pub time_us: i64,
    pub flags: SampleFlags,
    pub key_id: Option<[u8; 16]>,
}

impl SampleHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sync(&self) -> bool {
        self.flags.is_sync()
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags.is_encrypted()
    }

    /// Sample bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[.. self.size]
    }
}

/// Rolling sample buffer for a single track.
/// Not synchronized, see `TrackOutput`.
#[derive(Debug)]
pub struct RollingSampleBuffer {
    pool: Arc<AllocatorPool>,
    block_size: usize,

    data_queue: VecDeque<Allocation>,
    /// Absolute position of the first byte in `data_queue`.
    total_bytes_dropped: u64,
    total_bytes_written: u64,
    /// Bytes used in the last block of `data_queue`.
    last_allocation_offset: usize,
    /// End of the last committed sample.
    committed_end: u64,

    samples: VecDeque<SampleDescriptor>,
    /// Absolute index of the first queued sample.
    read_index: u64,
}

impl RollingSampleBuffer {
    pub fn new(pool: Arc<AllocatorPool>) -> Self {
        let block_size = pool.block_size();
        Self {
            pool,
            block_size,
            data_queue: VecDeque::new(),
            total_bytes_dropped: 0,
            total_bytes_written: 0,
            last_allocation_offset: block_size,
            committed_end: 0,
            samples: VecDeque::new(),
            read_index: 0,
        }
    }

    // Write side

    /// Appends sample bytes, allocating blocks as needed.
    pub fn append_data(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.data_queue.is_empty() || self.last_allocation_offset == self.block_size {
                self.data_queue.push_back(self.pool.allocate());
                self.last_allocation_offset = 0;
            }
            let Some(block) = self.data_queue.back_mut() else {
                return
            };
            let start = block.translate_offset(self.last_allocation_offset);
            let len = data.len().min(self.block_size - self.last_allocation_offset);
            block.data_mut()[start .. start + len].copy_from_slice(&data[.. len]);
            self.last_allocation_offset += len;
            self.total_bytes_written += len as u64;
            data = &data[len ..];
        }
    }

    /// Queues a sample whose last byte was appended
    /// `offset_from_end` bytes before the current write position.
    pub fn commit_sample(
        &mut self,
        time_us: i64,
        flags: SampleFlags,
        size: u32,
        offset_from_end: u64,
        key_id: Option<[u8; 16]>,
    ) {
        let end = self.total_bytes_written.saturating_sub(offset_from_end);
        let offset = end.saturating_sub(size as u64);
        self.committed_end = end;
        self.samples.push_back(SampleDescriptor {time_us, flags, size, offset, key_id});
    }

    /// Absolute index of the next sample to be committed.
    pub fn write_index(&self) -> u64 {
        self.read_index + self.samples.len() as u64
    }

    /// Absolute index of the next sample to be read.
    pub fn read_index(&self) -> u64 {
        self.read_index
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    /// Drops every sample with absolute index `discard_from_index`
    /// and later, together with any uncommitted bytes.
    /// The write position moves back to the end of the kept samples.
    pub fn discard_upstream(&mut self, discard_from_index: u64) {
        let keep = discard_from_index.saturating_sub(self.read_index) as usize;
        let truncate_to = match self.samples.get(keep) {
            Some(first_discarded) => first_discarded.offset,
            None => self.committed_end,
        };
        self.samples.truncate(keep);
        self.committed_end = truncate_to.min(self.committed_end);
        self.truncate_data(truncate_to.max(self.total_bytes_dropped));
    }

    /// Releases blocks holding nothing but bytes at or after `position`.
    fn truncate_data(&mut self, position: u64) {
        if position >= self.total_bytes_written {
            return
        }
        let relative = (position - self.total_bytes_dropped) as usize;
        let blocks_needed = relative.div_ceil(self.block_size);
        let released: Vec<Allocation> = self.data_queue.drain(blocks_needed ..).collect();
        self.pool.release_all(released);
        self.total_bytes_written = position;
        self.last_allocation_offset = match relative % self.block_size {
            0 => self.block_size,
            rem => rem,
        };
    }

    // Read side

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Descriptor of the next sample to be read.
    pub fn peek(&self) -> Option<&SampleDescriptor> {
        self.samples.front()
    }

    /// Last committed sample.
    pub fn last(&self) -> Option<&SampleDescriptor> {
        self.samples.back()
    }

    /// Largest timestamp among queued samples.
    pub fn largest_queued_time_us(&self) -> Option<i64> {
        self.samples.iter().map(|s| s.time_us).max()
    }

    /// Skips the next sample without reading its bytes.
    pub fn skip(&mut self) -> Option<SampleDescriptor> {
        let sample = self.samples.pop_front()?;
        self.read_index += 1;
        self.drop_downstream_to(self.next_read_position(&sample));
        Some(sample)
    }

    /// Reads the next sample into `holder`.
    /// Returns `false` if no sample is queued.
    pub fn read(&mut self, holder: &mut SampleHolder) -> bool {
        let Some(sample) = self.samples.pop_front() else {
            return false
        };
        self.read_index += 1;

        holder.data.resize(sample.size as usize, 0);
        self.read_data(sample.offset, &mut holder.data[.. sample.size as usize]);
        holder.size = sample.size as usize;
        holder.time_us = sample.time_us;
        holder.flags = sample.flags;
        holder.key_id = sample.key_id;

        self.drop_downstream_to(self.next_read_position(&sample));
        true
    }

    /// Skips to the last keyframe at or before `time_us`, if that keyframe
    /// and `time_us` itself are covered by the queued samples.
    pub fn skip_to_keyframe_before(&mut self, time_us: i64) -> bool {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return false
        };
        if time_us < first.time_us || time_us > last.time_us {
            return false
        }
        let keyframe = self.samples.iter()
            .enumerate()
            .take_while(|(_, s)| s.time_us <= time_us)
            .filter(|(_, s)| s.flags.is_sync())
            .map(|(i, _)| i)
            .last();
        let Some(keyframe) = keyframe else {
            return false
        };
        self.samples.drain(.. keyframe);
        self.read_index += keyframe as u64;
        let position = self.samples.front()
            .map(|s| s.offset)
            .unwrap_or(self.committed_end);
        self.drop_downstream_to(position);
        true
    }

    /// Releases all blocks and forgets all samples.
    pub fn clear(&mut self) {
        let released: Vec<Allocation> = self.data_queue.drain(..).collect();
        self.pool.release_all(released);
        self.samples.clear();
        self.read_index = 0;
        self.total_bytes_dropped = 0;
        self.total_bytes_written = 0;
        self.committed_end = 0;
        self.last_allocation_offset = self.block_size;
    }

    /// Position the reader continues from after `sample`.
    fn next_read_position(&self, sample: &SampleDescriptor) -> u64 {
        match self.samples.front() {
            Some(next) => next.offset,
            None => sample.offset + sample.size as u64,
        }
    }

    /// Copies bytes starting at absolute `position` into `target`.
    fn read_data(&self, position: u64, target: &mut [u8]) {
        let mut relative = (position - self.total_bytes_dropped) as usize;
        let mut copied = 0;
        while copied < target.len() {
            let Some(block) = self.data_queue.get(relative / self.block_size) else {
                return
            };
            let within = relative % self.block_size;
            let start = block.translate_offset(within);
            let len = (target.len() - copied).min(self.block_size - within);
            target[copied .. copied + len].copy_from_slice(&block.data()[start .. start + len]);
            copied += len;
            relative += len;
        }
    }

    /// Releases blocks that lie entirely before `position`.
    /// Once everything written was read, the partially filled
    /// last block goes too and the next append starts a new one.
    fn drop_downstream_to(&mut self, position: u64) {
        let mut released = Vec::new();
        while position.saturating_sub(self.total_bytes_dropped) >= self.block_size as u64 {
            let Some(block) = self.data_queue.pop_front() else {
                break
            };
            released.push(block);
            self.total_bytes_dropped += self.block_size as u64;
        }
        if position == self.total_bytes_written && !self.data_queue.is_empty() {
            released.extend(self.data_queue.drain(..));
            self.total_bytes_dropped = position;
            self.last_allocation_offset = self.block_size;
        }
        if !released.is_empty() {
            self.pool.release_all(released);
        }
    }
}

impl Drop for RollingSampleBuffer {
    fn drop(&mut self) {
        self.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(block_size: usize) -> (Arc<AllocatorPool>, RollingSampleBuffer) {
        let pool = Arc::new(AllocatorPool::new(block_size));
        let buf = RollingSampleBuffer::new(pool.clone());
        (pool, buf)
    }

    fn commit(buf: &mut RollingSampleBuffer, bytes: &[u8], time_us: i64, sync: bool) {
        buf.append_data(bytes);
        let flags = if sync {SampleFlags::SYNC} else {SampleFlags::NONE};
        buf.commit_sample(time_us, flags, bytes.len() as u32, 0, None);
    }

    #[test]
    fn reads_samples_spanning_blocks() {
        let (pool, mut buf) = buffer(4);
        commit(&mut buf, &[1, 2, 3, 4, 5, 6], 0, true);
        commit(&mut buf, &[7, 8, 9], 10, false);
        assert_eq!(pool.allocated_count(), 3);
        assert_eq!(buf.write_index(), 2);

        let mut holder = SampleHolder::new();
        assert!(buf.read(&mut holder));
        assert_eq!(holder.bytes(), &[1, 2, 3, 4, 5, 6]);
        assert!(holder.is_sync());
        // first block fully read
        assert_eq!(pool.allocated_count(), 2);

        assert!(buf.read(&mut holder));
        assert_eq!(holder.bytes(), &[7, 8, 9]);
        assert_eq!(holder.time_us, 10);
        assert!(!buf.read(&mut holder));
        assert_eq!(buf.read_index(), 2);
        assert_eq!(pool.allocated_count(), 0);

        buf.clear();
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn drained_buffer_releases_partial_block() {
        let (pool, mut buf) = buffer(8);
        commit(&mut buf, &[1, 2, 3], 0, true);
        let mut holder = SampleHolder::new();
        assert!(buf.read(&mut holder));
        assert_eq!(pool.allocated_count(), 0);

        // appending continues in a fresh block
        commit(&mut buf, &[4, 5, 6, 7, 8, 9, 10], 1, true);
        commit(&mut buf, &[11, 12], 2, false);
        assert_eq!(pool.allocated_count(), 2);
        assert!(buf.read(&mut holder));
        assert_eq!(holder.bytes(), &[4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(pool.allocated_count(), 2);
        assert!(buf.read(&mut holder));
        assert_eq!(holder.bytes(), &[11, 12]);
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn uncommitted_bytes_keep_their_block() {
        let (pool, mut buf) = buffer(8);
        commit(&mut buf, &[1, 2], 0, true);
        buf.append_data(&[3]);
        let mut holder = SampleHolder::new();
        assert!(buf.read(&mut holder));
        assert_eq!(pool.allocated_count(), 1);

        buf.commit_sample(1, SampleFlags::SYNC, 1, 0, None);
        assert!(buf.read(&mut holder));
        assert_eq!(holder.bytes(), &[3]);
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn skips_without_copying() {
        let (pool, mut buf) = buffer(2);
        commit(&mut buf, &[1, 2], 0, true);
        commit(&mut buf, &[3, 4], 1, true);
        assert_eq!(buf.skip().map(|s| s.time_us), Some(0));
        assert_eq!(pool.allocated_count(), 1);
        assert_eq!(buf.peek().map(|s| s.offset), Some(2));
    }

    #[test]
    fn discards_upstream_samples_and_partial_bytes() {
        let (pool, mut buf) = buffer(4);
        commit(&mut buf, &[1, 2, 3], 0, true);
        commit(&mut buf, &[4, 5, 6], 1, false);
        commit(&mut buf, &[7, 8, 9], 2, true);
        // uncommitted tail
        buf.append_data(&[10, 11]);
        assert_eq!(pool.allocated_count(), 3);

        buf.discard_upstream(1);
        assert_eq!(buf.write_index(), 1);
        assert_eq!(buf.total_bytes_written(), 3);
        assert_eq!(pool.allocated_count(), 1);

        // writing resumes right after the kept sample
        commit(&mut buf, &[20, 21], 5, true);
        let mut holder = SampleHolder::new();
        assert!(buf.read(&mut holder));
        assert_eq!(holder.bytes(), &[1, 2, 3]);
        assert!(buf.read(&mut holder));
        assert_eq!(holder.bytes(), &[20, 21]);
    }

    #[test]
    fn discarding_nothing_drops_uncommitted_bytes() {
        let (pool, mut buf) = buffer(4);
        commit(&mut buf, &[1, 2, 3, 4], 0, true);
        buf.append_data(&[5, 6]);
        assert_eq!(pool.allocated_count(), 2);
        buf.discard_upstream(buf.write_index());
        assert_eq!(buf.total_bytes_written(), 4);
        assert_eq!(pool.allocated_count(), 1);
    }

    #[test]
    fn in_memory_keyframe_seek() {
        let (_pool, mut buf) = buffer(8);
        for (i, sync) in [true, false, false, true, false].iter().enumerate() {
            commit(&mut buf, &[i as u8], i as i64 * 10, *sync);
        }
        // outside the buffered range
        assert!(!buf.skip_to_keyframe_before(100));
        assert!(buf.skip_to_keyframe_before(35));
        assert_eq!(buf.peek().map(|s| s.time_us), Some(30));
        assert_eq!(buf.read_index(), 3);
        // before the first queued sample
        assert!(!buf.skip_to_keyframe_before(5));
    }
}
