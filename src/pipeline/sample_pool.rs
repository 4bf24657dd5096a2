//! Consumer-facing output samples and their recycling pool.
//!
//! A sample's bytes are shared between the consumer and the pool's in-use
//! FIFO. When the consumer signals that a buffer was processed, the pool
//! reclaims that buffer and every buffer handed out before it, since some
//! consumers skip completion signals. A drained buffer the consumer still
//! references is left to be freed when the consumer drops it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::capture::{FramePacket, I420Frame};
use crate::error::Result;
use crate::pipeline::buffer_pool::{take_lifo, Buffer, BufferId, IdAllocator, PoolStats};

/// A frame handed to the consumer.
pub struct OutputSample {
    id: BufferId,
    data: Arc<Vec<u8>>,
    width: u32,
    height: u32,
    timestamp: Duration,
    duration: Duration,
}

impl OutputSample {
    /// Id to pass back through `on_processed` once the consumer is done.
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Presentation time derived from the output frame counter.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Tightly packed I420 bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn as_frame(&self) -> I420Frame<'_> {
        I420Frame::tight(self.width, self.height, &self.data)
    }
}

impl fmt::Debug for OutputSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSample")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

/// A checked-out sample buffer being filled, not yet visible to the consumer.
#[derive(Debug)]
pub struct SampleSlot {
    buffer: Buffer,
    timestamp: Duration,
    duration: Duration,
}

impl SampleSlot {
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Copy a packet's bytes in. The slot length was fixed at checkout.
    pub fn copy_from(&mut self, packet: &FramePacket) {
        self.buffer.as_mut_slice().copy_from_slice(packet.data());
    }
}

struct InFlight {
    id: BufferId,
    data: Arc<Vec<u8>>,
}

/// LIFO free list with FIFO in-use tracking and drain-up-to recycling.
pub struct OutputSamplePool {
    free: Vec<Buffer>,
    in_use: VecDeque<InFlight>,
    ids: IdAllocator,
    stats: PoolStats,
    orphaned: u64,
}

impl Default for OutputSamplePool {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSamplePool {
    pub fn new() -> Self {
        Self {
            free: Vec::new(),
            in_use: VecDeque::new(),
            ids: IdAllocator::default(),
            stats: PoolStats::default(),
            orphaned: 0,
        }
    }

    /// Check out a slot of exactly `byte_size` bytes stamped with `timestamp`.
    pub fn checkout(&mut self, byte_size: usize, timestamp: Duration, duration: Duration) -> Result<SampleSlot> {
        let mut buffer = match take_lifo(&mut self.free, byte_size, &mut self.stats) {
            Some(buffer) => buffer,
            None => {
                let buffer = Buffer::allocate(self.ids.next(), byte_size)?;
                self.stats.allocated += 1;
                debug!(id = %buffer.id(), bytes = byte_size, "sample pool grew");
                buffer
            }
        };
        // Length first: everything downstream derives from it.
        buffer.set_len(byte_size);
        Ok(SampleSlot {
            buffer,
            timestamp,
            duration,
        })
    }

    /// Publish a filled slot as a sample and start tracking it as in use.
    pub fn commit(&mut self, slot: SampleSlot, width: u32, height: u32) -> OutputSample {
        let (id, data) = slot.buffer.into_parts();
        let data = Arc::new(data);
        self.in_use.push_back(InFlight {
            id,
            data: Arc::clone(&data),
        });
        OutputSample {
            id,
            data,
            width,
            height,
            timestamp: slot.timestamp,
            duration: slot.duration,
        }
    }

    /// Recycle `id` and every buffer handed out before it.
    ///
    /// Returns how many in-use entries were retired; zero when `id` is not
    /// in use (already retired, or unknown).
    pub fn on_processed(&mut self, id: BufferId) -> usize {
        let Some(pos) = self.in_use.iter().position(|f| f.id == id) else {
            trace!(%id, "processed signal for a buffer not in use");
            return 0;
        };
        for entry in self.in_use.drain(..=pos) {
            match Arc::try_unwrap(entry.data) {
                Ok(data) => self.free.push(Buffer::from_parts(entry.id, data)),
                // consumer still holds it; freed when it drops the sample
                Err(_) => self.orphaned += 1,
            }
        }
        if pos > 0 {
            debug!(%id, skipped = pos, "recycled buffers with missed processed signals");
        }
        pos + 1
    }

    /// Take back a single sample that never reached the consumer.
    ///
    /// Unlike [`Self::on_processed`], earlier in-use entries are left alone.
    pub fn reclaim(&mut self, id: BufferId) -> bool {
        let Some(pos) = self.in_use.iter().position(|f| f.id == id) else {
            return false;
        };
        let Some(entry) = self.in_use.remove(pos) else {
            return false;
        };
        match Arc::try_unwrap(entry.data) {
            Ok(data) => self.free.push(Buffer::from_parts(entry.id, data)),
            Err(_) => self.orphaned += 1,
        }
        true
    }

    /// Free everything. Samples still held by the consumer stay valid.
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

    /// Drained buffers the consumer was still holding.
    pub fn orphaned(&self) -> u64 {
        self.orphaned
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}
