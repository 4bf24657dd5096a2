pub mod bridge;
pub mod buffer_pool;
pub mod ready_queue;
pub mod sample_pool;
pub mod stats;

pub use bridge::{Cancelled, DeferredSample, DeferredState, FrameBridge, FrameOutcome, Pull};
pub use buffer_pool::{Buffer, BufferId, BufferPool, PoolStats};
pub use ready_queue::ReadyQueue;
pub use sample_pool::{OutputSample, OutputSamplePool, SampleSlot};
pub use stats::{RollingRate, StatKind, Stats, StatsHandle, StatsSnapshot};
