//! Recycling pool of byte buffers for frame packets

use std::collections::VecDeque;
use std::fmt;

use tracing::debug;

use crate::error::{BridgeError, Result};

/// Stable identity of a pooled buffer, assigned once at allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u32);

impl BufferId {
    pub fn into_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Hands out monotonically increasing buffer ids.
#[derive(Debug, Default)]
pub(crate) struct IdAllocator(u32);

impl IdAllocator {
    pub(crate) fn next(&mut self) -> BufferId {
        let id = BufferId(self.0);
        self.0 = self.0.wrapping_add(1);
        id
    }
}

/// A heap buffer owned by exactly one of: a pool free list, a packet or
/// sample in flight, or the caller copying into it.
pub struct Buffer {
    id: BufferId,
    data: Vec<u8>,
}

impl Buffer {
    /// Allocate `len` zeroed bytes, reporting failure instead of aborting.
    pub(crate) fn allocate(id: BufferId, len: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| BridgeError::AllocationFailure { bytes: len })?;
        data.resize(len, 0);
        Ok(Self { id, data })
    }

    pub(crate) fn from_parts(id: BufferId, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    pub(crate) fn into_parts(self) -> (BufferId, Vec<u8>) {
        (self.id, self.data)
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fix the logical length. Never reallocates while `len <= capacity`.
    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.data.capacity());
        self.data.resize(len, 0);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("capacity", &self.data.capacity())
            .finish()
    }
}

/// Allocation counters of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated: u64,
    pub reused: u64,
    pub discarded: u64,
}

/// Find the most recently released buffer able to hold `min_size` bytes.
///
/// When none fits, the undersized top of the list is discarded so the free
/// list does not fill up with buffers of an old, smaller resolution.
pub(crate) fn take_lifo(free: &mut Vec<Buffer>, min_size: usize, stats: &mut PoolStats) -> Option<Buffer> {
    match free.iter().rposition(|b| b.capacity() >= min_size) {
        Some(idx) => {
            stats.reused += 1;
            Some(free.remove(idx))
        }
        None => {
            if free.pop().is_some() {
                stats.discarded += 1;
            }
            None
        }
    }
}

/// LIFO free list plus FIFO record of checked-out buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Vec<Buffer>,
    in_use: VecDeque<BufferId>,
    ids: IdAllocator,
    max_free: usize,
    stats: PoolStats,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_max_free(usize::MAX)
    }

    /// Pool that drops released buffers beyond `max_free` instead of keeping them.
    pub fn with_max_free(max_free: usize) -> Self {
        Self {
            free: Vec::new(),
            in_use: VecDeque::new(),
            ids: IdAllocator::default(),
            max_free,
            stats: PoolStats::default(),
        }
    }

    /// Check out a buffer whose logical length is `min_size`.
    pub fn checkout(&mut self, min_size: usize) -> Result<Buffer> {
        let mut buffer = match take_lifo(&mut self.free, min_size, &mut self.stats) {
            Some(buffer) => buffer,
            None => {
                let buffer = Buffer::allocate(self.ids.next(), min_size)?;
                self.stats.allocated += 1;
                debug!(id = %buffer.id(), bytes = min_size, "buffer pool grew");
                buffer
            }
        };
        buffer.set_len(min_size);
        self.in_use.push_back(buffer.id());
        Ok(buffer)
    }

    /// Return a buffer. Its capacity is kept as is.
    pub fn release(&mut self, buffer: Buffer) {
        // Oldest checkouts are usually released first.
        match self.in_use.iter().position(|id| *id == buffer.id()) {
            Some(idx) => {
                self.in_use.remove(idx);
            }
            None => debug_assert!(false, "{} released twice or to the wrong pool", buffer.id()),
        }
        if self.free.len() < self.max_free {
            self.free.push(buffer);
        } else {
            self.stats.discarded += 1;
        }
    }

    /// Free every pooled buffer and forget outstanding checkouts.
    pub fn drain(&mut self) -> usize {
        let freed = self.free.len();
        self.free.clear();
        self.in_use.clear();
        freed
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn in_use_len(&self) -> usize {
        self.in_use.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_release_checkout_reuses_same_buffer() {
        let mut pool = BufferPool::new();
        let buffer = pool.checkout(64).unwrap();
        let id = buffer.id();
        let ptr = buffer.as_slice().as_ptr();
        pool.release(buffer);

        let again = pool.checkout(64).unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(again.as_slice().as_ptr(), ptr);
        assert_eq!(pool.stats().allocated, 1);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn most_recent_release_wins() {
        let mut pool = BufferPool::new();
        let a = pool.checkout(16).unwrap();
        let b = pool.checkout(16).unwrap();
        let b_id = b.id();
        pool.release(a);
        pool.release(b);

        assert_eq!(pool.checkout(16).unwrap().id(), b_id);
    }

    #[test]
    fn never_allocates_while_a_free_buffer_fits() {
        let mut pool = BufferPool::new();
        let big = pool.checkout(128).unwrap();
        let small = pool.checkout(8).unwrap();
        let big_id = big.id();
        pool.release(big);
        pool.release(small);

        // top of the free list is too small, the one below fits
        let buffer = pool.checkout(100).unwrap();
        assert_eq!(buffer.id(), big_id);
        assert_eq!(buffer.len(), 100);
        assert_eq!(pool.stats().allocated, 2);
    }

    #[test]
    fn undersized_top_is_discarded_not_grown() {
        let mut pool = BufferPool::new();
        let small = pool.checkout(8).unwrap();
        let small_id = small.id();
        pool.release(small);

        let buffer = pool.checkout(32).unwrap();
        assert_ne!(buffer.id(), small_id);
        assert_eq!(pool.free_len(), 0);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn shrinking_reuses_capacity() {
        let mut pool = BufferPool::new();
        let buffer = pool.checkout(64).unwrap();
        pool.release(buffer);

        let buffer = pool.checkout(10).unwrap();
        assert_eq!(buffer.len(), 10);
        assert!(buffer.capacity() >= 64);
    }

    #[test]
    fn in_use_tracks_checkouts() {
        let mut pool = BufferPool::new();
        let a = pool.checkout(4).unwrap();
        let b = pool.checkout(4).unwrap();
        assert_eq!(pool.in_use_len(), 2);

        // release out of order
        pool.release(b);
        assert_eq!(pool.in_use_len(), 1);
        pool.release(a);
        assert_eq!(pool.in_use_len(), 0);
        assert_eq!(pool.free_len(), 2);
    }

    #[test]
    fn free_list_is_bounded() {
        let mut pool = BufferPool::with_max_free(1);
        let a = pool.checkout(4).unwrap();
        let b = pool.checkout(4).unwrap();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.free_len(), 1);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn drain_empties_everything() {
        let mut pool = BufferPool::new();
        let a = pool.checkout(4).unwrap();
        let _b = pool.checkout(4).unwrap();
        pool.release(a);

        assert_eq!(pool.drain(), 1);
        assert_eq!(pool.free_len(), 0);
        assert_eq!(pool.in_use_len(), 0);
    }
}
