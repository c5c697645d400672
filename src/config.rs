//! Worker counts, composition ratios and buffer sizes for a run.

use std::time::Duration;

use crate::error::ConfigError;
use crate::types::StageKind;

pub const MILK_WORKERS: usize = 3;
pub const CHEESE_WORKERS: usize = 2;
/// Milk units consumed per cheese unit.
pub const MILK_PER_CHEESE: usize = 3;
/// Cheese units consumed per burger.
pub const CHEESE_PER_BURGER: usize = 2;
pub const MILK_BUFFER_CAPACITY: usize = 9;
pub const CHEESE_BUFFER_CAPACITY: usize = 2;
/// Pause after each unit in interactive runs.
pub const DEFAULT_DELAY_MS: u64 = 100;

/// Shape of one pipeline run.
///
/// Per-worker iteration counts are derived from the target and the ratios,
/// so resizing a stage never requires touching the worker loops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub target_burgers: usize,
    pub milk_workers: usize,
    pub cheese_workers: usize,
    pub milk_per_cheese: usize,
    pub cheese_per_burger: usize,
    pub milk_capacity: usize,
    pub cheese_capacity: usize,
    /// Upper bound on any single put/take wait; `None` blocks indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl PipelineConfig {
    /// Default shape for `target_burgers`, validated.
    pub fn new(target_burgers: usize) -> Result<Self, ConfigError> {
        let config = Self::unchecked(target_burgers);
        config.validate()?;
        Ok(config)
    }

    /// Default shape without validation; call [`validate`](Self::validate)
    /// after adjusting fields.
    pub fn unchecked(target_burgers: usize) -> Self {
        Self {
            target_burgers,
            milk_workers: MILK_WORKERS,
            cheese_workers: CHEESE_WORKERS,
            milk_per_cheese: MILK_PER_CHEESE,
            cheese_per_burger: CHEESE_PER_BURGER,
            milk_capacity: MILK_BUFFER_CAPACITY,
            cheese_capacity: CHEESE_BUFFER_CAPACITY,
            acquire_timeout: None,
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn with_workers(mut self, milk: usize, cheese: usize) -> Self {
        self.milk_workers = milk;
        self.cheese_workers = cheese;
        self
    }

    /// Reject shapes that would hang or overflow once launched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_burgers == 0 {
            return Err(ConfigError::ZeroTarget);
        }
        if self.milk_workers == 0 {
            return Err(ConfigError::ZeroWorkers {
                stage: StageKind::Milk,
            });
        }
        if self.cheese_workers == 0 {
            return Err(ConfigError::ZeroWorkers {
                stage: StageKind::Cheese,
            });
        }
        if self.milk_per_cheese == 0 {
            return Err(ConfigError::ZeroBatch {
                stage: StageKind::Cheese,
            });
        }
        if self.cheese_per_burger == 0 {
            return Err(ConfigError::ZeroBatch {
                stage: StageKind::Burger,
            });
        }
        if self.milk_per_cheese > self.milk_capacity {
            return Err(ConfigError::BatchExceedsCapacity {
                stage: StageKind::Cheese,
                batch: self.milk_per_cheese,
                capacity: self.milk_capacity,
            });
        }
        if self.cheese_per_burger > self.cheese_capacity {
            return Err(ConfigError::BatchExceedsCapacity {
                stage: StageKind::Burger,
                batch: self.cheese_per_burger,
                capacity: self.cheese_capacity,
            });
        }

        let total_milk = self.checked_total_milk()?;
        let total_cheese = self.checked_total_cheese()?;
        if total_milk % self.milk_workers != 0 {
            return Err(ConfigError::Unbalanced {
                stage: StageKind::Milk,
                total: total_milk,
                workers: self.milk_workers,
            });
        }
        if total_cheese % self.cheese_workers != 0 {
            return Err(ConfigError::Unbalanced {
                stage: StageKind::Cheese,
                total: total_cheese,
                workers: self.cheese_workers,
            });
        }
        Ok(())
    }

    fn checked_total_cheese(&self) -> Result<usize, ConfigError> {
        self.target_burgers
            .checked_mul(self.cheese_per_burger)
            .ok_or(ConfigError::Overflow {
                target: self.target_burgers,
            })
    }

    fn checked_total_milk(&self) -> Result<usize, ConfigError> {
        self.checked_total_cheese()?
            .checked_mul(self.milk_per_cheese)
            .ok_or(ConfigError::Overflow {
                target: self.target_burgers,
            })
    }

    /// Cheese units the whole run produces.
    pub fn total_cheese(&self) -> usize {
        self.target_burgers * self.cheese_per_burger
    }

    /// Milk units the whole run produces.
    pub fn total_milk(&self) -> usize {
        self.total_cheese() * self.milk_per_cheese
    }

    /// Loop count of each milk worker.
    pub fn milk_iterations(&self) -> usize {
        self.total_milk() / self.milk_workers
    }

    /// Loop count of each cheese worker.
    pub fn cheese_iterations(&self) -> usize {
        self.total_cheese() / self.cheese_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shape_matches_reference_ratios() {
        let config = PipelineConfig::new(5).expect("valid config");
        assert_eq!(config.total_milk(), 30);
        assert_eq!(config.total_cheese(), 10);
        // Each milk worker runs 2N times, each cheese worker N times.
        assert_eq!(config.milk_iterations(), 10);
        assert_eq!(config.cheese_iterations(), 5);
        assert_eq!(config.acquire_timeout, None);
    }

    #[test]
    fn zero_target_is_rejected() {
        assert_eq!(PipelineConfig::new(0), Err(ConfigError::ZeroTarget));
    }

    #[test]
    fn unbalanced_worker_counts_are_rejected() {
        // 1 burger -> 2 cheese, which 3 cheese workers cannot share evenly.
        let config = PipelineConfig::unchecked(1).with_workers(3, 3);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Unbalanced {
                stage: StageKind::Cheese,
                total: 2,
                workers: 3,
            })
        );

        // 1 burger -> 6 milk, which 4 milk workers cannot share evenly.
        let config = PipelineConfig::unchecked(1).with_workers(4, 2);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Unbalanced {
                stage: StageKind::Milk,
                ..
            })
        ));
    }

    #[test]
    fn resized_stages_derive_new_iteration_counts() {
        let config = PipelineConfig::unchecked(2).with_workers(4, 1);
        config.validate().expect("12 milk over 4 workers is balanced");
        assert_eq!(config.milk_iterations(), 3);
        assert_eq!(config.cheese_iterations(), 4);
    }

    #[test]
    fn batch_larger_than_buffer_is_rejected() {
        let mut config = PipelineConfig::unchecked(1);
        config.cheese_capacity = 1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::BatchExceedsCapacity {
                stage: StageKind::Burger,
                batch: 2,
                capacity: 1,
            })
        );
    }

    #[test]
    fn zero_workers_are_rejected() {
        let config = PipelineConfig::unchecked(1).with_workers(0, 2);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroWorkers {
                stage: StageKind::Milk
            })
        );
    }

    #[test]
    fn huge_targets_overflow_cleanly() {
        let config = PipelineConfig::unchecked(usize::MAX);
        assert!(matches!(config.validate(), Err(ConfigError::Overflow { .. })));
    }

    #[test]
    fn targets_with_seven_digit_milk_ids_validate() {
        let config = PipelineConfig::new(166_667).expect("valid config");
        assert_eq!(config.total_milk(), 1_000_002);
    }
}
