//! Bounded queue of decoded frames waiting for the consumer

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use crate::capture::FramePacket;
use crate::error::Result;
use crate::pipeline::buffer_pool::{BufferPool, PoolStats};
use crate::utils::i420_size;

/// Ring of the most recent frames, backed by a packet buffer pool.
///
/// When full, pushing a new frame evicts the oldest one and recycles its
/// buffer.
pub struct ReadyQueue {
    ring: HeapRb<FramePacket>,
    pool: BufferPool,
}

impl ReadyQueue {
    /// `capacity` must be at least one.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
            pool: BufferPool::new(),
        }
    }

    /// Check out an empty packet sized for a `width x height` I420 frame.
    pub fn acquire(&mut self, width: u32, height: u32) -> Result<FramePacket> {
        let buffer = self.pool.checkout(i420_size(width, height))?;
        Ok(FramePacket::new(buffer, width, height))
    }

    /// Append a packet. Returns `true` when the oldest packet was evicted.
    pub fn push(&mut self, packet: FramePacket) -> bool {
        match self.ring.push_overwrite(packet) {
            Some(evicted) => {
                self.pool.release(evicted.into_buffer());
                true
            }
            None => false,
        }
    }

    /// Pop the oldest packet.
    pub fn pop(&mut self) -> Option<FramePacket> {
        self.ring.try_pop()
    }

    /// Give a packet's buffer back to the pool.
    pub fn recycle(&mut self, packet: FramePacket) {
        self.pool.release(packet.into_buffer());
    }

    /// Drop every queued packet and free the pool. Returns the number of
    /// queued frames discarded.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.ring.try_pop().is_some() {
            dropped += 1;
        }
        self.pool.drain();
        dropped
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn free_len(&self) -> usize {
        self.pool.free_len()
    }
}
