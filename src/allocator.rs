//! Pool of fixed-size byte blocks shared by all track outputs.
//!
//! Blocks are owned either by the pool (recycled) or by exactly one
//! rolling buffer. The pool only counts the ones handed out.
//! Going over a limit never fails an allocation, the limit only
//! decides whether the loader may read further ahead.

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::{support::{ceil_divide, CancelFlag}, Mp4Error};

/// Fixed-size byte block handed out by `AllocatorPool`.
#[derive(Debug)]
pub struct Allocation {
    data: Box<[u8]>,
}

impl Allocation {
    fn new(len: usize) -> Self {
        Self {data: vec![0; len].into_boxed_slice()}
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Translates a zero-based offset within the block
    /// to an offset into `data()`.
    pub fn translate_offset(&self, offset: usize) -> usize {
        offset
    }
}

#[derive(Debug, Default)]
struct PoolState {
    /// Blocks currently handed out.
    allocated_count: usize,
    recycled: Vec<Allocation>,
}

/// Bounded pool of fixed-size blocks.
#[derive(Debug)]
pub struct AllocatorPool {
    block_size: usize,
    state: Mutex<PoolState>,
    released: Condvar,
}

impl AllocatorPool {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            state: Mutex::new(PoolState::default()),
            released: Condvar::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns a recycled block if there is one, otherwise a new one.
    pub fn allocate(&self) -> Allocation {
        let mut state = self.state.lock();
        state.allocated_count += 1;
        match state.recycled.pop() {
            Some(allocation) => allocation,
            None => Allocation::new(self.block_size),
        }
    }

    /// Returns a block to the pool and wakes blocked waiters.
    pub fn release(&self, allocation: Allocation) {
        self.release_all(std::iter::once(allocation))
    }

    /// Returns several blocks at once, waking waiters only once.
    pub fn release_all(&self, allocations: impl IntoIterator<Item = Allocation>) {
        let mut state = self.state.lock();
        for allocation in allocations {
            state.allocated_count = state.allocated_count.saturating_sub(1);
            state.recycled.push(allocation);
        }
        self.released.notify_all();
    }

    /// Drops recycled blocks so that recycled and handed out blocks
    /// together cover at most `target_bytes`.
    pub fn trim(&self, target_bytes: usize) {
        let mut state = self.state.lock();
        let target_count = ceil_divide(target_bytes, self.block_size);
        let keep = target_count.saturating_sub(state.allocated_count);
        if keep < state.recycled.len() {
            trace!("Trimming pool from {} to {keep} recycled blocks", state.recycled.len());
            state.recycled.truncate(keep);
        }
    }

    /// Bytes currently handed out.
    pub fn total_bytes_allocated(&self) -> usize {
        self.state.lock().allocated_count * self.block_size
    }

    pub fn allocated_count(&self) -> usize {
        self.state.lock().allocated_count
    }

    pub fn recycled_count(&self) -> usize {
        self.state.lock().recycled.len()
    }

    /// Returns `true` if more than `limit` bytes are handed out.
    pub fn exceeds(&self, limit: usize) -> bool {
        self.state.lock().allocated_count * self.block_size > limit
    }

    /// Blocks until at most `limit` bytes are handed out.
    ///
    /// Fails with `Mp4Error::Cancelled` if `cancel` is set
    /// before or while waiting. Use `interrupt_waiters()` after
    /// setting the flag to wake a blocked caller.
    pub fn block_until_at_or_below(&self, limit: usize, cancel: &CancelFlag) -> Result<(), Mp4Error> {
        let mut state = self.state.lock();
        loop {
            if cancel.is_cancelled() {
                return Err(Mp4Error::Cancelled)
            }
            if state.allocated_count * self.block_size <= limit {
                return Ok(())
            }
            self.released.wait(&mut state);
        }
    }

    /// Wakes every caller blocked in `block_until_at_or_below()`.
    pub fn interrupt_waiters(&self) {
        let _state = self.state.lock();
        self.released.notify_all();
    }
}
