//! Rolling frame statistics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::utils::CachePadded;

/// What happened to a frame, or to a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKind {
    /// A frame was produced.
    Load,
    /// A frame was handed to the consumer.
    Present,
    /// A frame (or a superseded pull) was dropped.
    Skip,
    /// The consumer pulled and nothing was ready.
    Late,
}

impl StatKind {
    fn metric_name(self) -> &'static str {
        match self {
            StatKind::Load => "framebridge_load_total",
            StatKind::Present => "framebridge_present_total",
            StatKind::Skip => "framebridge_skip_total",
            StatKind::Late => "framebridge_late_total",
        }
    }
}

/// Moving event rate over the last `window` events.
#[derive(Debug, Clone)]
pub struct RollingRate {
    events: VecDeque<Instant>,
    window: usize,
}

impl RollingRate {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            events: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn record(&mut self, at: Instant) {
        if self.events.len() == self.window {
            self.events.pop_front();
        }
        self.events.push_back(at);
    }

    /// Events per second between the oldest and newest event in the window.
    pub fn rate(&self) -> f64 {
        let (Some(first), Some(last)) = (self.events.front(), self.events.back()) else {
            return 0.0;
        };
        let span = last.saturating_duration_since(*first).as_secs_f64();
        if span <= 0.0 {
            return 0.0;
        }
        (self.events.len() - 1) as f64 / span
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Monotonic totals, readable from any thread without the bridge lock.
#[derive(Debug, Default)]
struct Totals {
    load: AtomicU64,
    present: AtomicU64,
    skip: AtomicU64,
    late: AtomicU64,
    superseded: AtomicU64,
}

/// Point-in-time copy of the totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub load: u64,
    pub present: u64,
    pub skip: u64,
    pub late: u64,
    /// Pulls replaced by a newer pull, also counted in `skip`.
    pub superseded: u64,
}

impl StatsSnapshot {
    /// Frames dropped, as opposed to superseded pulls.
    pub fn dropped_frames(&self) -> u64 {
        self.skip.saturating_sub(self.superseded)
    }
}

/// Shared read side of the totals.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle(Arc<CachePadded<Totals>>);

impl StatsHandle {
    pub fn snapshot(&self) -> StatsSnapshot {
        let totals = &self.0;
        StatsSnapshot {
            load: totals.load.load(Ordering::Relaxed),
            present: totals.present.load(Ordering::Relaxed),
            skip: totals.skip.load(Ordering::Relaxed),
            late: totals.late.load(Ordering::Relaxed),
            superseded: totals.superseded.load(Ordering::Relaxed),
        }
    }
}

/// Rolling rates (guarded by the bridge lock) plus lock-free totals.
#[derive(Debug)]
pub struct Stats {
    load: RollingRate,
    present: RollingRate,
    skip: RollingRate,
    late: RollingRate,
    totals: StatsHandle,
}

impl Stats {
    pub fn new(window: usize) -> Self {
        Self {
            load: RollingRate::new(window),
            present: RollingRate::new(window),
            skip: RollingRate::new(window),
            late: RollingRate::new(window),
            totals: StatsHandle::default(),
        }
    }

    pub fn record(&mut self, kind: StatKind, at: Instant) {
        let (rate, total) = match kind {
            StatKind::Load => (&mut self.load, &self.totals.0.load),
            StatKind::Present => (&mut self.present, &self.totals.0.present),
            StatKind::Skip => (&mut self.skip, &self.totals.0.skip),
            StatKind::Late => (&mut self.late, &self.totals.0.late),
        };
        rate.record(at);
        total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(kind.metric_name()).increment(1);
    }

    /// Count a pull replaced by a newer one.
    pub fn record_superseded(&mut self, at: Instant) {
        self.totals.0.superseded.fetch_add(1, Ordering::Relaxed);
        self.record(StatKind::Skip, at);
    }

    pub fn rate(&self, kind: StatKind) -> f64 {
        match kind {
            StatKind::Load => self.load.rate(),
            StatKind::Present => self.present.rate(),
            StatKind::Skip => self.skip.rate(),
            StatKind::Late => self.late.rate(),
        }
    }

    pub fn handle(&self) -> StatsHandle {
        self.totals.clone()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.totals.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rate_over_window() {
        let start = Instant::now();
        let mut rate = RollingRate::new(100);
        for i in 0..31 {
            rate.record(start + Duration::from_millis(i * 100));
        }
        // 30 intervals over 3 seconds
        assert!((rate.rate() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn window_forgets_old_events() {
        let start = Instant::now();
        let mut rate = RollingRate::new(3);
        rate.record(start);
        rate.record(start + Duration::from_secs(10));
        rate.record(start + Duration::from_secs(11));
        rate.record(start + Duration::from_secs(12));
        assert_eq!(rate.len(), 3);
        assert!((rate.rate() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_events_have_no_rate() {
        let mut rate = RollingRate::new(10);
        assert_eq!(rate.rate(), 0.0);
        rate.record(Instant::now());
        assert_eq!(rate.rate(), 0.0);
    }

    #[test]
    fn superseded_pulls_count_as_skips() {
        let mut stats = Stats::new(10);
        let now = Instant::now();
        stats.record(StatKind::Load, now);
        stats.record(StatKind::Skip, now);
        stats.record_superseded(now);

        let snap = stats.snapshot();
        assert_eq!(snap.load, 1);
        assert_eq!(snap.skip, 2);
        assert_eq!(snap.superseded, 1);
        assert_eq!(snap.dropped_frames(), 1);
    }
}
