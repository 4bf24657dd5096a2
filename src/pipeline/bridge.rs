//! Frame bridge between a push-based producer and a pull-based consumer.
//!
//! The producer calls [`FrameBridge::on_frame`] from any thread at whatever
//! cadence frames arrive; the consumer calls [`FrameBridge::pull`] on its own
//! tick. Neither side ever waits on the other: a pull that finds nothing ready
//! is deferred and fulfilled by the next pushed frame, on the producer thread.
//!
//! One short-held lock guards the ready queue, the pending pull, both pools
//! and the rolling rates. Plane and sample copies always happen with the lock
//! released, and deferred samples are delivered after it is dropped.

use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::capture::{FramePacket, I420Frame};
use crate::error::{BridgeError, Result};
use crate::pipeline::buffer_pool::BufferId;
use crate::pipeline::ready_queue::ReadyQueue;
use crate::pipeline::sample_pool::{OutputSample, OutputSamplePool, SampleSlot};
use crate::pipeline::stats::{StatKind, Stats, StatsHandle, StatsSnapshot};
use crate::{BridgeConfig, StatsConfig};

/// Why a deferred pull ended without a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    /// A newer pull replaced this one.
    Superseded,
    /// The bridge shut down.
    Closed,
}

type Delivery = std::result::Result<OutputSample, Cancelled>;

/// Result of a pull.
#[derive(Debug)]
pub enum Pull {
    /// A frame was ready.
    Sample(OutputSample),
    /// Nothing was ready; the next pushed frame fulfills this.
    Deferred(DeferredSample),
}

/// Where a deferred pull stands.
#[derive(Debug)]
pub enum DeferredState {
    Ready(OutputSample),
    Waiting,
    Cancelled(Cancelled),
}

/// Consumer side of a deferred pull.
#[derive(Debug)]
pub struct DeferredSample {
    rx: flume::Receiver<Delivery>,
}

impl DeferredSample {
    /// Check without blocking.
    pub fn try_take(&self) -> DeferredState {
        match self.rx.try_recv() {
            Ok(delivery) => Self::settle(delivery),
            Err(flume::TryRecvError::Empty) => DeferredState::Waiting,
            Err(flume::TryRecvError::Disconnected) => DeferredState::Cancelled(Cancelled::Closed),
        }
    }

    /// Block the calling (consumer) thread for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> DeferredState {
        match self.rx.recv_timeout(timeout) {
            Ok(delivery) => Self::settle(delivery),
            Err(flume::RecvTimeoutError::Timeout) => DeferredState::Waiting,
            Err(flume::RecvTimeoutError::Disconnected) => DeferredState::Cancelled(Cancelled::Closed),
        }
    }

    /// Wait asynchronously until the pull is fulfilled or cancelled.
    pub async fn wait(self) -> std::result::Result<OutputSample, Cancelled> {
        self.rx.recv_async().await.unwrap_or(Err(Cancelled::Closed))
    }

    fn settle(delivery: Delivery) -> DeferredState {
        match delivery {
            Ok(sample) => DeferredState::Ready(sample),
            Err(reason) => DeferredState::Cancelled(reason),
        }
    }
}

/// What `on_frame` did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Queued for a later pull.
    Queued,
    /// Queued, and the oldest queued frame was evicted to make room.
    QueuedEvicting,
    /// Handed straight to a deferred pull.
    Served,
    /// Malformed frame, counted as skipped.
    Dropped,
}

struct PendingPull {
    tx: flume::Sender<Delivery>,
    since: Instant,
}

struct BridgeState {
    ready: ReadyQueue,
    samples: OutputSamplePool,
    pending: Option<PendingPull>,
    stats: Stats,
    frames_out: u64,
    closed: bool,
}

impl BridgeState {
    /// Stamp the next output frame and check out a sample slot for it.
    fn checkout_sample(&mut self, byte_size: usize, frame_period: Duration) -> Result<SampleSlot> {
        let count = u32::try_from(self.frames_out).unwrap_or(u32::MAX);
        let timestamp = frame_period.saturating_mul(count);
        let slot = self.samples.checkout(byte_size, timestamp, frame_period)?;
        self.frames_out += 1;
        Ok(slot)
    }

    /// Free everything. Returns the pending pull, if any, to be cancelled
    /// once the lock is released.
    fn close(&mut self) -> Option<PendingPull> {
        self.closed = true;
        let dropped = self.ready.drain();
        let freed = self.samples.drain();
        debug!(dropped, freed, "bridge pools drained");
        self.pending.take()
    }
}

/// Hands frames from a producer thread to a consumer thread.
pub struct FrameBridge {
    state: Mutex<BridgeState>,
    totals: StatsHandle,
    frame_period: Duration,
}

impl FrameBridge {
    pub fn new(config: &BridgeConfig, stats: &StatsConfig) -> Self {
        let stats = Stats::new(stats.window);
        let totals = stats.handle();
        let frame_period = Duration::try_from_secs_f64(1.0 / config.nominal_fps).unwrap_or(Duration::ZERO);
        info!(
            capacity = config.ready_capacity,
            fps = config.nominal_fps,
            "frame bridge created"
        );
        Self {
            state: Mutex::new(BridgeState {
                ready: ReadyQueue::new(config.ready_capacity),
                samples: OutputSamplePool::new(),
                pending: None,
                stats,
                frames_out: 0,
                closed: false,
            }),
            totals,
            frame_period,
        }
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, BridgeState>> {
        let state = self.state.lock();
        if state.closed {
            return Err(BridgeError::Closed);
        }
        Ok(state)
    }

    /// Shut down on allocation failure and hand the error back.
    fn fail(&self, mut state: MutexGuard<'_, BridgeState>, err: BridgeError) -> BridgeError {
        if matches!(err, BridgeError::AllocationFailure { .. }) {
            error!(%err, "frame bridge out of memory, shutting down");
            let pending = state.close();
            drop(state);
            cancel(pending, Cancelled::Closed);
        }
        err
    }

    /// Accept a decoded frame from the producer. Never waits on the consumer.
    pub fn on_frame(&self, frame: &I420Frame<'_>) -> Result<FrameOutcome> {
        if let Err(err) = frame.validate() {
            warn!(%err, "dropping malformed frame");
            debug_assert!(false, "malformed frame: {err}");
            let mut state = self.lock_open()?;
            let now = Instant::now();
            state.stats.record(StatKind::Load, now);
            state.stats.record(StatKind::Skip, now);
            return Ok(FrameOutcome::Dropped);
        }

        let mut packet = {
            let mut state = self.lock_open()?;
            let acquired = state.ready.acquire(frame.width, frame.height);
            match acquired {
                Ok(packet) => packet,
                Err(err) => return Err(self.fail(state, err)),
            }
        };

        // Validated above and sized by the pool, so this cannot fail.
        let path = packet.fill_from(frame)?;
        trace!(?path, width = frame.width, height = frame.height, "frame copied");

        let mut state = self.lock_open()?;
        let now = Instant::now();
        state.stats.record(StatKind::Load, now);

        let Some(pending) = state.pending.take() else {
            let evicted = state.ready.push(packet);
            if evicted {
                state.stats.record(StatKind::Skip, now);
                return Ok(FrameOutcome::QueuedEvicting);
            }
            return Ok(FrameOutcome::Queued);
        };

        let checked_out = state.checkout_sample(packet.byte_size(), self.frame_period);
        let slot = match checked_out {
            Ok(slot) => slot,
            Err(err) => return Err(self.fail(state, err)),
        };
        drop(state);

        let sample = self.finish_sample(slot, packet)?;
        let waited = pending.since.elapsed();
        metrics::histogram!("framebridge_deferred_wait_us").record(waited.as_micros() as f64);
        trace!(id = %sample.id(), ?waited, "deferred pull fulfilled");

        if let Err(flume::SendError(Ok(sample))) = pending.tx.send(Ok(sample)) {
            // Consumer dropped its deferred handle: take just this buffer back.
            let id = sample.id();
            drop(sample);
            self.reclaim(id);
        }
        Ok(FrameOutcome::Served)
    }

    /// Copy a packet into its sample slot, then recycle the packet and
    /// publish the sample.
    fn finish_sample(&self, mut slot: SampleSlot, packet: FramePacket) -> Result<OutputSample> {
        slot.copy_from(&packet);

        let (width, height) = (packet.width(), packet.height());
        let mut state = self.lock_open()?;
        state.ready.recycle(packet);
        let sample = state.samples.commit(slot, width, height);
        state.stats.record(StatKind::Present, Instant::now());
        Ok(sample)
    }

    /// Ask for the next frame.
    ///
    /// Returns the oldest ready frame, or a deferred handle that the next
    /// `on_frame` fulfills. An earlier deferred pull still outstanding is
    /// superseded and counted as skipped.
    pub fn pull(&self) -> Result<Pull> {
        let mut state = self.lock_open()?;
        let now = Instant::now();

        if let Some(packet) = state.ready.pop() {
            let checked_out = state.checkout_sample(packet.byte_size(), self.frame_period);
            let slot = match checked_out {
                Ok(slot) => slot,
                Err(err) => return Err(self.fail(state, err)),
            };
            drop(state);
            return self.finish_sample(slot, packet).map(Pull::Sample);
        }

        let (tx, rx) = flume::bounded(1);
        let superseded = state.pending.replace(PendingPull { tx, since: now });
        if superseded.is_some() {
            state.stats.record_superseded(now);
        }
        state.stats.record(StatKind::Late, now);
        drop(state);

        if superseded.is_some() {
            debug!("overlapping pull superseded an outstanding one");
        }
        cancel(superseded, Cancelled::Superseded);
        Ok(Pull::Deferred(DeferredSample { rx }))
    }

    /// The consumer finished with `id`; recycle it and everything before it.
    pub fn on_processed(&self, id: BufferId) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.samples.on_processed(id);
    }

    fn reclaim(&self, id: BufferId) {
        let mut state = self.state.lock();
        if !state.closed {
            state.samples.reclaim(id);
        }
    }

    /// Drain and free every pool. Idempotent.
    #[instrument(skip(self))]
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let pending = state.close();
        drop(state);
        cancel(pending, Cancelled::Closed);
        info!("frame bridge shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Frames produced per second over the rolling window.
    pub fn load_rate(&self) -> f64 {
        self.state.lock().stats.rate(StatKind::Load)
    }

    /// Frames handed to the consumer per second.
    pub fn present_rate(&self) -> f64 {
        self.state.lock().stats.rate(StatKind::Present)
    }

    pub fn skip_rate(&self) -> f64 {
        self.state.lock().stats.rate(StatKind::Skip)
    }

    pub fn late_rate(&self) -> f64 {
        self.state.lock().stats.rate(StatKind::Late)
    }

    /// Monotonic totals, read without taking the bridge lock.
    pub fn counts(&self) -> StatsSnapshot {
        self.totals.snapshot()
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Sample buffers handed out and not yet signalled as processed.
    pub fn samples_in_use(&self) -> usize {
        self.state.lock().samples.in_use_len()
    }

    pub fn free_samples(&self) -> usize {
        self.state.lock().samples.free_len()
    }
}

impl Drop for FrameBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn cancel(pending: Option<PendingPull>, reason: Cancelled) {
    if let Some(pending) = pending {
        // The consumer may already have dropped its side.
        let _ = pending.tx.send(Err(reason));
    }
}
