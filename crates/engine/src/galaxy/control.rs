use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::config::NANOS_PER_SECOND;
use crate::locks;

/// Simulated seconds per wall-clock second offered by `speed_up`/`slow_down`.
pub const SPEED_STEPS: [i64; 11] = [
    1, 4, 10, 50, 200, 1000, 5000, 25000, 60000, 180000, 500000,
];

/// Shared speed, pause and lifecycle flags for the scheduler thread.
///
/// Speed is wall-clock nanoseconds per simulated second; a negative value
/// keeps the magnitude while paused.
#[derive(Debug)]
pub struct SpeedControl {
    speed: AtomicI64,
    halted: AtomicBool,
    shutdown: AtomicBool,
    wake_generation: Mutex<u64>,
    wake: Condvar,
}

impl SpeedControl {
    pub fn new(initial_speed_nanos: i64) -> Self {
        let initial = if initial_speed_nanos == 0 {
            NANOS_PER_SECOND
        } else {
            initial_speed_nanos
        };
        Self {
            speed: AtomicI64::new(initial),
            halted: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            wake_generation: Mutex::new(0),
            wake: Condvar::new(),
        }
    }

    pub fn speed_nanos(&self) -> i64 {
        self.speed.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.speed_nanos() <= 0
    }

    /// Returns true if the galaxy was running.
    pub fn pause(&self) -> bool {
        let previous = self
            .speed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |speed| {
                (speed > 0).then_some(-speed)
            })
            .is_ok();
        self.notify();
        previous
    }

    /// Returns true if the galaxy was paused.
    pub(crate) fn resume(&self) -> bool {
        let resumed = self
            .speed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |speed| {
                (speed < 0).then_some(-speed)
            })
            .is_ok();
        self.notify();
        resumed
    }

    /// Changes the magnitude and keeps the pause state.
    pub fn set_speed(&self, nanos: u64) {
        let magnitude = i64::try_from(nanos).unwrap_or(i64::MAX).max(1);
        let _ = self
            .speed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |speed| {
                Some(if speed < 0 { -magnitude } else { magnitude })
            });
        self.notify();
    }

    /// Moves to the next faster step of `SPEED_STEPS`.
    pub fn speed_up(&self) -> u64 {
        let current = self.steps_per_second();
        let next = SPEED_STEPS
            .iter()
            .copied()
            .find(|step| *step > current)
            .unwrap_or(SPEED_STEPS[SPEED_STEPS.len() - 1]);
        self.set_speed((NANOS_PER_SECOND / next) as u64);
        self.speed_nanos().unsigned_abs()
    }

    /// Moves to the next slower step of `SPEED_STEPS`.
    pub fn slow_down(&self) -> u64 {
        let current = self.steps_per_second();
        let next = SPEED_STEPS
            .iter()
            .rev()
            .copied()
            .find(|step| *step < current)
            .unwrap_or(SPEED_STEPS[0]);
        self.set_speed((NANOS_PER_SECOND / next) as u64);
        self.speed_nanos().unsigned_abs()
    }

    fn steps_per_second(&self) -> i64 {
        NANOS_PER_SECOND / self.speed_nanos().abs().max(1)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::Release);
        self.pause();
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify();
    }

    /// Sleeps up to `duration`, returning early on any control change.
    pub(crate) fn sleep(&self, duration: Duration) {
        let guard = locks::lock(&self.wake_generation, "speed_control");
        let generation = *guard;
        let _ = self
            .wake
            .wait_timeout_while(guard, duration, |current| *current == generation);
    }

    fn notify(&self) {
        *locks::lock(&self.wake_generation, "speed_control") += 1;
        self.wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn pause_keeps_speed_magnitude() {
        let control = SpeedControl::new(250_000_000);
        assert!(control.pause());
        assert!(!control.pause());
        assert_eq!(control.speed_nanos(), -250_000_000);

        control.set_speed(100);
        assert_eq!(control.speed_nanos(), -100);
        assert!(control.resume());
        assert_eq!(control.speed_nanos(), 100);
        assert!(!control.resume());
    }

    #[test]
    fn speed_steps_walk_the_table() {
        let control = SpeedControl::new(NANOS_PER_SECOND);
        assert_eq!(control.speed_up(), (NANOS_PER_SECOND / 4) as u64);
        assert_eq!(control.speed_up(), (NANOS_PER_SECOND / 10) as u64);
        assert_eq!(control.slow_down(), (NANOS_PER_SECOND / 4) as u64);
        assert_eq!(control.slow_down(), NANOS_PER_SECOND as u64);
        assert_eq!(control.slow_down(), NANOS_PER_SECOND as u64);
    }

    #[test]
    fn halt_also_pauses() {
        let control = SpeedControl::new(NANOS_PER_SECOND);
        control.halt();
        assert!(control.is_halted());
        assert!(control.is_paused());
    }

    #[test]
    fn sleep_wakes_on_control_change() {
        let control = Arc::new(SpeedControl::new(NANOS_PER_SECOND));
        let sleeper = Arc::clone(&control);
        let started = Instant::now();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));

        while !handle.is_finished() {
            control.set_speed(NANOS_PER_SECOND as u64);
            thread::sleep(Duration::from_millis(5));
        }
        handle.join().expect("sleeper thread");
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
