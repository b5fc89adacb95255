use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::locks;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GalaxyMetricsSnapshot {
    pub tps: f32,
    pub tick_time_ms: f32,
    pub simulated_time: u64,
    pub speed_limited: bool,
    pub resolver_scans: u64,
}

#[derive(Clone, Debug)]
pub struct MetricsHandle {
    snapshot: Arc<RwLock<GalaxyMetricsSnapshot>>,
}

impl Default for MetricsHandle {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(GalaxyMetricsSnapshot::default())),
        }
    }
}

impl MetricsHandle {
    pub fn snapshot(&self) -> GalaxyMetricsSnapshot {
        *locks::read(&self.snapshot, "metrics")
    }

    pub(crate) fn publish(&self, snapshot: GalaxyMetricsSnapshot) {
        *locks::write(&self.snapshot, "metrics") = snapshot;
    }
}

#[derive(Debug)]
pub(crate) struct MetricsAccumulator {
    interval_start: Instant,
    interval: Duration,
    ticks: u32,
    tick_time_sum: Duration,
    speed_limited: bool,
}

impl MetricsAccumulator {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval_start: Instant::now(),
            interval,
            ticks: 0,
            tick_time_sum: Duration::ZERO,
            speed_limited: false,
        }
    }

    /// `speed_limited` marks a tick that took longer than its wall-clock budget.
    pub(crate) fn record_tick(&mut self, tick_time: Duration, speed_limited: bool) {
        self.ticks = self.ticks.saturating_add(1);
        self.tick_time_sum = self.tick_time_sum.saturating_add(tick_time);
        self.speed_limited |= speed_limited;
    }

    pub(crate) fn maybe_snapshot(
        &mut self,
        now: Instant,
        simulated_time: u64,
        resolver_scans: u64,
    ) -> Option<GalaxyMetricsSnapshot> {
        let elapsed = now.saturating_duration_since(self.interval_start);
        if elapsed < self.interval {
            return None;
        }

        let elapsed_seconds = elapsed.as_secs_f32().max(f32::EPSILON);
        let tick_time_ms = if self.ticks == 0 {
            0.0
        } else {
            (self.tick_time_sum.as_secs_f32() / self.ticks as f32) * 1000.0
        };

        let snapshot = GalaxyMetricsSnapshot {
            tps: self.ticks as f32 / elapsed_seconds,
            tick_time_ms,
            simulated_time,
            speed_limited: self.speed_limited,
            resolver_scans,
        };

        self.interval_start = now;
        self.ticks = 0;
        self.tick_time_sum = Duration::ZERO;
        self.speed_limited = false;

        Some(snapshot)
    }
}
