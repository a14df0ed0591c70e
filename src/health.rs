//! Session-scoped engine health. One value per workflow run, owned by the
//! orchestrator and shared only between that run's workers, so parallel runs
//! (and parallel tests) see independent health states.

/// Tracks consecutive engine failures and flips the run into degraded
/// fallback mode once the streak reaches the limit.
#[derive(Debug)]
pub struct EngineHealth {
    fallback_after: u32,
    consecutive_failures: u32,
    total_failures: u32,
    degraded: bool,
}

impl Default for EngineHealth {
    fn default() -> Self {
        Self::new(3)
    }
}

impl EngineHealth {
    pub fn new(fallback_after: u32) -> Self {
        Self {
            fallback_after,
            consecutive_failures: 0,
            total_failures: 0,
            degraded: false,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.total_failures += 1;
        if !self.degraded && self.consecutive_failures >= self.fallback_after {
            self.degraded = true;
            log::warn!(
                "embedding engine failed {} times in a row; switching to degraded fallback extraction",
                self.consecutive_failures
            );
        }
    }

    /// Once degraded, a run stays degraded: a flapping engine should not
    /// alternate between real and placeholder evidence.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    pub fn total_failures(&self) -> u32 {
        self.total_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_the_streak() {
        let mut health = EngineHealth::new(3);
        health.record_failure();
        health.record_failure();
        health.record_success();
        health.record_failure();
        assert!(!health.degraded());
        assert_eq!(health.total_failures(), 3);
    }

    #[test]
    fn streak_of_three_degrades() {
        let mut health = EngineHealth::new(3);
        for _ in 0..3 {
            health.record_failure();
        }
        assert!(health.degraded());
        // And stays degraded.
        health.record_success();
        assert!(health.degraded());
    }
}
