use std::time::Duration;

use tracing::debug;

use crate::config::GalaxyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockStep {
    /// Advance simulated time by `tick_size` seconds now.
    Tick { tick_size: u32 },
    /// Nothing due; sleep this long before asking again.
    Wait(Duration),
    Paused,
}

/// Fixed-step accumulator turning wall-clock progress into simulated ticks.
///
/// Pure arithmetic: the caller feeds elapsed wall time and the current speed
/// each iteration, so it can be driven without threads.
#[derive(Debug, Clone)]
pub struct GalaxyClock {
    accumulator: u64,
    last_speed: Option<u64>,
    paused: bool,
    min_tick: u32,
    max_tick: u32,
    reference_nanos: u64,
    backlog_ticks: u64,
}

impl GalaxyClock {
    pub fn new(config: &GalaxyConfig) -> Self {
        Self {
            accumulator: 0,
            last_speed: None,
            paused: false,
            min_tick: config.min_tick_seconds.max(1),
            max_tick: config.max_tick_seconds.max(config.min_tick_seconds.max(1)),
            reference_nanos: config.tick_size_reference_nanos.max(1),
            backlog_ticks: u64::from(config.backlog_ticks.max(1)),
        }
    }

    pub fn accumulator(&self) -> Duration {
        Duration::from_nanos(self.accumulator)
    }

    /// Simulated seconds per tick at `speed_nanos`: speeds at or above the
    /// reference tick once per second; faster speeds batch seconds instead.
    pub fn tick_size(&self, speed_nanos: u64) -> u32 {
        let raw = if speed_nanos >= self.reference_nanos {
            1
        } else {
            self.reference_nanos / speed_nanos.max(1)
        };
        raw.clamp(u64::from(self.min_tick), u64::from(self.max_tick)) as u32
    }

    /// Wall-clock nanoseconds one tick costs at `speed_nanos`.
    pub fn threshold(&self, speed_nanos: u64) -> u64 {
        speed_nanos.saturating_mul(u64::from(self.tick_size(speed_nanos)))
    }

    /// One scheduler iteration. `speed_nanos <= 0` means paused.
    pub fn advance(&mut self, elapsed: Duration, speed_nanos: i64) -> ClockStep {
        let paused = speed_nanos <= 0;
        if paused != self.paused {
            self.paused = paused;
            self.accumulator = 0;
            self.last_speed = None;
        }
        if paused {
            return ClockStep::Paused;
        }

        let speed = speed_nanos.unsigned_abs();
        match self.last_speed {
            Some(last) if last == speed => {
                let elapsed = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
                self.accumulator = self.accumulator.saturating_add(elapsed);
            }
            _ => {
                self.last_speed = Some(speed);
                self.accumulator = 0;
            }
        }

        let tick_size = self.tick_size(speed);
        let threshold = self.threshold(speed);
        let due = self.accumulator >= threshold;
        if due {
            self.accumulator -= threshold;
        }

        let cap = threshold.saturating_mul(self.backlog_ticks);
        if self.accumulator > cap {
            debug!(
                backlog_nanos = self.accumulator,
                cap_nanos = cap,
                "galaxy_backlog_clamped"
            );
            self.accumulator = cap;
        }

        if due {
            ClockStep::Tick { tick_size }
        } else {
            ClockStep::Wait(Duration::from_nanos(threshold - self.accumulator))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: u64 = 50_000_000;

    fn clock() -> GalaxyClock {
        GalaxyClock::new(&GalaxyConfig::default())
    }

    fn run_until_wait(clock: &mut GalaxyClock, first_elapsed: Duration) -> u32 {
        let mut ticks = 0;
        let mut elapsed = first_elapsed;
        loop {
            match clock.advance(elapsed, N as i64) {
                ClockStep::Tick { .. } => ticks += 1,
                ClockStep::Wait(_) => return ticks,
                ClockStep::Paused => panic!("clock paused unexpectedly"),
            }
            elapsed = Duration::ZERO;
        }
    }

    #[test]
    fn two_speed_periods_yield_exactly_two_ticks() {
        let mut clock = clock();
        assert_eq!(
            clock.advance(Duration::ZERO, N as i64),
            ClockStep::Wait(Duration::from_nanos(N))
        );
        assert_eq!(run_until_wait(&mut clock, Duration::from_nanos(2 * N)), 2);
        assert_eq!(clock.accumulator(), Duration::ZERO);
    }

    #[test]
    fn backlog_is_clamped_to_ten_thresholds() {
        let mut clock = clock();
        clock.advance(Duration::ZERO, N as i64);

        let step = clock.advance(Duration::from_nanos(25 * N), N as i64);
        assert_eq!(step, ClockStep::Tick { tick_size: 1 });
        assert_eq!(clock.accumulator(), Duration::from_nanos(10 * N));
    }

    #[test]
    fn speed_change_discards_partial_progress() {
        let mut clock = clock();
        clock.advance(Duration::ZERO, N as i64);
        clock.advance(Duration::from_nanos(N / 2), N as i64);
        assert_eq!(clock.accumulator(), Duration::from_nanos(N / 2));

        let step = clock.advance(Duration::from_nanos(N), (N / 2) as i64);
        assert_eq!(step, ClockStep::Wait(Duration::from_nanos(N / 2)));
        assert_eq!(clock.accumulator(), Duration::ZERO);
    }

    #[test]
    fn pause_toggle_resets_accumulator() {
        let mut clock = clock();
        clock.advance(Duration::ZERO, N as i64);
        clock.advance(Duration::from_nanos(N / 2), N as i64);

        assert_eq!(
            clock.advance(Duration::from_secs(5), -(N as i64)),
            ClockStep::Paused
        );
        assert_eq!(clock.accumulator(), Duration::ZERO);

        assert_eq!(
            clock.advance(Duration::from_secs(5), N as i64),
            ClockStep::Wait(Duration::from_nanos(N))
        );
    }

    #[test]
    fn tick_size_grows_for_fast_speeds_within_bounds() {
        let clock = clock();
        assert_eq!(clock.tick_size(1_000_000_000), 1);
        assert_eq!(clock.tick_size(1_000_000), 1);
        assert_eq!(clock.tick_size(100_000), 10);
        assert_eq!(clock.tick_size(1_000), 60);
        assert_eq!(clock.tick_size(1), 60);
        assert_eq!(clock.threshold(100_000), 1_000_000);
    }
}
