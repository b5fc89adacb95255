pub const FINE_STEP_LIMIT: u32 = 100;

/// Splits one tick into the deltas the subsystem pipeline runs with.
///
/// Ticks up to `FINE_STEP_LIMIT` seconds, and every tick while combat is
/// active, run in one-second passes. Longer ticks use passes of
/// `1 + tick / FINE_STEP_LIMIT` seconds and finish the remainder one second
/// at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubstepPlan {
    coarse_delta: u32,
    coarse_passes: u32,
    fine_passes: u32,
}

impl SubstepPlan {
    pub fn new(tick_size: u32, fine_only: bool) -> Self {
        if tick_size <= FINE_STEP_LIMIT || fine_only {
            return Self {
                coarse_delta: 1,
                coarse_passes: 0,
                fine_passes: tick_size,
            };
        }
        let coarse_delta = 1 + tick_size / FINE_STEP_LIMIT;
        Self {
            coarse_delta,
            coarse_passes: tick_size / coarse_delta,
            fine_passes: tick_size % coarse_delta,
        }
    }

    pub fn pass_count(&self) -> u32 {
        self.coarse_passes + self.fine_passes
    }

    pub fn deltas(&self) -> impl Iterator<Item = u32> {
        let coarse = std::iter::repeat(self.coarse_delta).take(self.coarse_passes as usize);
        let fine = std::iter::repeat(1).take(self.fine_passes as usize);
        coarse.chain(fine)
    }
}
