use std::time::{Duration, Instant};

/// Step budget of one run. A step is one model call.
pub struct LoopController {
    step_limit: u32,
    steps_taken: u32,
    start_time: Instant,
}

impl LoopController {
    pub fn new(step_limit: u32) -> Self {
        Self {
            step_limit,
            steps_taken: 0,
            start_time: Instant::now(),
        }
    }

    /// Claim the next step. Returns its 1-based number, or `None` once the
    /// budget is spent.
    pub fn begin_step(&mut self) -> Option<u32> {
        if self.should_stop() {
            return None;
        }
        self.steps_taken += 1;
        Some(self.steps_taken)
    }

    pub fn should_stop(&self) -> bool {
        self.steps_taken >= self.step_limit
    }

    pub fn steps_taken(&self) -> u32 {
        self.steps_taken
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_counts_steps() {
        let mut ctrl = LoopController::new(2);
        assert_eq!(ctrl.begin_step(), Some(1));
        assert_eq!(ctrl.begin_step(), Some(2));
        assert!(ctrl.should_stop());
        assert_eq!(ctrl.begin_step(), None);
        assert_eq!(ctrl.steps_taken(), 2);
    }

    #[test]
    fn zero_budget_never_starts() {
        let mut ctrl = LoopController::new(0);
        assert_eq!(ctrl.begin_step(), None);
    }
}
