//! Simulated production time between stage iterations.

use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::types::StageKind;

/// Pause taken by a worker after each unit; never called with a lock held.
pub trait Delay: Send + Sync {
    fn pause(&self, stage: StageKind);
}

/// No pause at all; used by tests and benchmarks.
pub struct NoDelay;

impl Delay for NoDelay {
    fn pause(&self, _stage: StageKind) {}
}

/// Sleep for a fixed duration after every unit.
pub struct FixedDelay(pub Duration);

impl FixedDelay {
    pub fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }
}

impl Delay for FixedDelay {
    fn pause(&self, _stage: StageKind) {
        if !self.0.is_zero() {
            thread::sleep(self.0);
        }
    }
}

/// Random pause in `[0, max]` to shake up thread interleavings.
pub struct JitterDelay {
    max: Duration,
}

impl JitterDelay {
    pub fn new(max: Duration) -> Self {
        Self { max }
    }

    pub fn from_micros(us: u64) -> Self {
        Self::new(Duration::from_micros(us))
    }
}

impl Delay for JitterDelay {
    fn pause(&self, _stage: StageKind) {
        let max_us = self.max.as_micros() as u64;
        let mut rng = rand::thread_rng();
        // Roughly a third of the pauses only yield, so short and long gaps mix.
        if max_us == 0 || rng.gen_range(0..3) == 0 {
            thread::yield_now();
            return;
        }
        thread::sleep(Duration::from_micros(rng.gen_range(0..=max_us)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn fixed_delay_sleeps_at_least_the_duration() {
        let delay = FixedDelay::from_millis(15);
        let start = Instant::now();
        delay.pause(StageKind::Milk);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn jitter_delay_stays_bounded() {
        let delay = JitterDelay::from_micros(200);
        let start = Instant::now();
        for _ in 0..20 {
            delay.pause(StageKind::Cheese);
        }
        // 20 pauses of at most 200us, with generous slack for the scheduler.
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
