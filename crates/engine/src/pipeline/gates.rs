/// Opens once per simulated day.
#[derive(Debug, Clone, Default)]
pub struct DailyGate {
    last_day: Option<u64>,
    run_next: bool,
}

impl DailyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time it is asked on a new day, or when forced.
    pub fn check(&mut self, day: u64) -> bool {
        let due = self.run_next || self.last_day.map_or(true, |last| day > last);
        if due {
            self.last_day = Some(day);
            self.run_next = false;
        }
        due
    }

    pub fn run_on_next_update(&mut self) {
        self.run_next = true;
    }
}

/// Opens when at least `interval` simulated seconds passed since it last
/// opened. The first check always opens.
#[derive(Debug, Clone)]
pub struct IntervalGate {
    interval: u64,
    last: Option<u64>,
    run_next: bool,
}

impl IntervalGate {
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            last: None,
            run_next: false,
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn check(&mut self, time: u64) -> bool {
        let due = self.run_next
            || self
                .last
                .map_or(true, |last| time.saturating_sub(last) >= self.interval);
        if due {
            self.last = Some(time);
            self.run_next = false;
        }
        due
    }

    pub fn run_on_next_update(&mut self) {
        self.run_next = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_gate_opens_once_per_day() {
        let mut gate = DailyGate::new();
        assert!(gate.check(0));
        assert!(!gate.check(0));
        assert!(gate.check(1));
        assert!(!gate.check(1));

        gate.run_on_next_update();
        assert!(gate.check(1));
        assert!(!gate.check(1));
    }

    #[test]
    fn interval_gate_waits_full_interval() {
        let mut gate = IntervalGate::new(10);
        assert!(gate.check(5));
        assert!(!gate.check(14));
        assert!(gate.check(15));
        assert!(!gate.check(16));

        gate.run_on_next_update();
        assert!(gate.check(17));
        assert!(!gate.check(26));
        assert!(gate.check(27));
    }
}
