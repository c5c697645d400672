//! Error types for the buffers, the configuration and a pipeline run.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::types::{StageKind, WorkerId};

/// Failure of a blocking buffer operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer closed")]
    Closed,
    #[error("timed out after {waited:?}")]
    TimedOut { waited: Duration },
}

/// Rejected pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("target burger count must be > 0")]
    ZeroTarget,
    #[error("{stage} stage needs at least one worker")]
    ZeroWorkers { stage: StageKind },
    #[error("{stage} stage batch size must be > 0")]
    ZeroBatch { stage: StageKind },
    #[error("{stage} stage takes {batch} units but its input buffer holds only {capacity}")]
    BatchExceedsCapacity {
        stage: StageKind,
        batch: usize,
        capacity: usize,
    },
    #[error("{total} {stage} units cannot be split evenly across {workers} workers")]
    Unbalanced {
        stage: StageKind,
        total: usize,
        workers: usize,
    },
    #[error("unit totals overflow for target {target}")]
    Overflow { target: usize },
}

/// Failure of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{stage} worker {worker} starved after waiting {waited:?}")]
    Starvation {
        stage: StageKind,
        worker: WorkerId,
        waited: Duration,
    },
    #[error("{stage} worker {worker} stopped because the run was aborted")]
    Aborted { stage: StageKind, worker: WorkerId },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("worker thread {name} panicked")]
    WorkerPanicked { name: String },
    #[error("pipeline already started")]
    AlreadyStarted,
}

impl PipelineError {
    /// Map a buffer failure seen by a worker to a run failure.
    pub fn from_buffer(err: BufferError, stage: StageKind, worker: WorkerId) -> Self {
        match err {
            BufferError::Closed => PipelineError::Aborted { stage, worker },
            BufferError::TimedOut { waited } => PipelineError::Starvation {
                stage,
                worker,
                waited,
            },
        }
    }

    /// Secondary failures caused by another worker aborting the run.
    pub fn is_aborted(&self) -> bool {
        matches!(self, PipelineError::Aborted { .. })
    }
}

/// Rejected answer to the burger-count prompt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Please enter a valid integer.")]
    NotAnInteger,
    #[error("Please enter a positive number.")]
    NotPositive,
}
