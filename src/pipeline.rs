//! Wires the buffers and stages together and runs them to completion.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::bounded_buffer::BoundedBuffer;
use crate::config::PipelineConfig;
use crate::delay::Delay;
use crate::error::{ConfigError, PipelineError};
use crate::id_generator::IdentifierGenerator;
use crate::stages::{BurgerStage, CheeseStage, MilkStage, Stage, StageContext};
use crate::types::{
    BurgerUnit, CheeseUnit, CompositeId, MilkId, MilkUnit, WorkerId, concat_digits,
};

/// Lifecycle of a single run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    /// Milk and cheese workers are done; the burger worker is finishing.
    Draining,
    Completed,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress of a run, readable from other threads while it executes.
pub struct PipelineStatus {
    state: Mutex<PipelineState>,
    burgers_completed: Arc<AtomicUsize>,
}

impl PipelineStatus {
    fn new() -> Self {
        Self {
            state: Mutex::new(PipelineState::Idle),
            burgers_completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn burgers_completed(&self) -> usize {
        self.burgers_completed.load(Ordering::SeqCst)
    }

    fn transition(&self, next: PipelineState) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("[PIPELINE] {} -> {}", *guard, next);
        *guard = next;
    }

    /// Move from `Idle` to `Running`; false if the run already started.
    fn start(&self) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard != PipelineState::Idle {
            return false;
        }
        *guard = PipelineState::Running;
        true
    }
}

/// Everything a finished run produced, for reporting and auditing.
#[derive(Debug)]
pub struct PipelineReport {
    pub config: PipelineConfig,
    pub milk: Vec<MilkUnit>,
    pub cheese: Vec<CheeseUnit>,
    pub burgers: Vec<BurgerUnit>,
    pub max_milk_occupancy: usize,
    pub max_cheese_occupancy: usize,
    pub leftover_milk: usize,
    pub leftover_cheese: usize,
    pub ids_issued: u64,
    pub elapsed: Duration,
}

/// Result of checking a report against the pipeline invariants.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Audit {
    /// Produced totals differ from the configured totals.
    pub count_mismatch: bool,
    /// A milk id was issued twice or out of sequence.
    pub duplicate_milk: bool,
    /// A composite id, batch size or constituent does not line up.
    pub composition_mismatch: bool,
    /// Some unit was consumed twice or never.
    pub consumption_mismatch: bool,
    pub occupancy_violation: bool,
    pub leftover_units: usize,
}

impl Audit {
    pub fn is_clean(&self) -> bool {
        *self == Audit::default()
    }
}

impl PipelineReport {
    /// Check counts, uniqueness, exactly-once consumption and occupancy.
    pub fn audit(&self) -> Audit {
        let config = &self.config;
        let mut audit = Audit {
            leftover_units: self.leftover_milk + self.leftover_cheese,
            ..Audit::default()
        };

        audit.count_mismatch = self.milk.len() != config.total_milk()
            || self.cheese.len() != config.total_cheese()
            || self.burgers.len() != config.target_burgers;

        // Ids come from one counter: sorted they must be exactly 1..=n.
        let mut ids: Vec<MilkId> = self.milk.iter().map(|unit| unit.id).collect();
        ids.sort_unstable();
        let contiguous = ids.iter().zip(1u64..).all(|(&id, expected)| id == expected);
        let mut per_worker: HashMap<WorkerId, MilkId> = HashMap::new();
        let mut monotonic = true;
        for unit in &self.milk {
            if let Some(prev) = per_worker.insert(unit.producer, unit.id) {
                monotonic &= unit.id > prev;
            }
        }
        audit.duplicate_milk = !contiguous || !monotonic || ids.len() as u64 != self.ids_issued;

        let produced_milk: HashSet<MilkId> = ids.iter().copied().collect();
        let mut consumed_milk = HashSet::new();
        for cheese in &self.cheese {
            if cheese.milk.len() != config.milk_per_cheese
                || concat_digits(&cheese.milk, Some(cheese.producer)) != cheese.id
            {
                audit.composition_mismatch = true;
            }
            for id in &cheese.milk {
                if !produced_milk.contains(id) || !consumed_milk.insert(*id) {
                    audit.consumption_mismatch = true;
                }
            }
        }
        if consumed_milk.len() != produced_milk.len() {
            audit.consumption_mismatch = true;
        }

        // Composite ids are not guaranteed unique, so compare as multisets.
        let mut cheese_balance: HashMap<CompositeId, i64> = HashMap::new();
        for cheese in &self.cheese {
            *cheese_balance.entry(cheese.id.clone()).or_default() += 1;
        }
        for burger in &self.burgers {
            if burger.cheese.len() != config.cheese_per_burger
                || concat_digits(&burger.cheese, None) != burger.id
            {
                audit.composition_mismatch = true;
            }
            for id in &burger.cheese {
                *cheese_balance.entry(id.clone()).or_default() -= 1;
            }
        }
        if cheese_balance.values().any(|&balance| balance != 0) {
            audit.consumption_mismatch = true;
        }

        audit.occupancy_violation = self.max_milk_occupancy > config.milk_capacity
            || self.max_cheese_occupancy > config.cheese_capacity;
        audit
    }
}

type StageHandle<T> = JoinHandle<Result<Vec<T>, PipelineError>>;

#[derive(Default)]
struct Handles {
    milk: Vec<StageHandle<MilkUnit>>,
    cheese: Vec<StageHandle<CheeseUnit>>,
    burger: Option<StageHandle<BurgerUnit>>,
}

/// Closes the buffers if a worker unwinds, so its peers do not block forever.
struct AbortOnPanic(StageContext);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

fn spawn_stage<S: Stage>(
    stage: S,
    ctx: StageContext,
) -> Result<StageHandle<S::Output>, PipelineError> {
    let name = format!("{}-{}", stage.kind(), stage.worker());
    let handle = thread::Builder::new().name(name).spawn(move || {
        let guard = AbortOnPanic(ctx);
        let (kind, worker) = (stage.kind(), stage.worker());
        let result = stage.run();
        if let Err(err) = &result {
            if !err.is_aborted() {
                warn!("[PIPELINE] {kind} worker {worker} failed: {err}");
            }
            guard.0.abort();
        }
        result
    })?;
    Ok(handle)
}

fn join_stage<T>(handle: StageHandle<T>, errors: &mut Vec<PipelineError>) -> Vec<T> {
    let name = handle.thread().name().unwrap_or("unnamed").to_string();
    match handle.join() {
        Ok(Ok(units)) => units,
        Ok(Err(err)) => {
            errors.push(err);
            Vec::new()
        }
        Err(_) => {
            errors.push(PipelineError::WorkerPanicked { name });
            Vec::new()
        }
    }
}

/// Prefer the failure that caused an abort over the aborts it triggered.
fn root_cause(mut errors: Vec<PipelineError>) -> Option<PipelineError> {
    match errors.iter().position(|err| !err.is_aborted()) {
        Some(index) => Some(errors.swap_remove(index)),
        None => errors.into_iter().next(),
    }
}

/// Coordinates one run of the milk -> cheese -> burger pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    delay: Arc<dyn Delay>,
    status: Arc<PipelineStatus>,
}

impl Pipeline {
    /// Validate `config` up front so an unbalanced shape never launches.
    pub fn new(config: PipelineConfig, delay: Arc<dyn Delay>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            delay,
            status: Arc::new(PipelineStatus::new()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Shared handle for observing progress from another thread.
    pub fn status(&self) -> Arc<PipelineStatus> {
        Arc::clone(&self.status)
    }

    fn launch(&self, ctx: &StageContext, handles: &mut Handles) -> Result<(), PipelineError> {
        let config = &self.config;
        let mut next_worker: WorkerId = 1;
        for _ in 0..config.milk_workers {
            let stage = MilkStage::new(ctx.clone(), next_worker, config.milk_iterations());
            handles.milk.push(spawn_stage(stage, ctx.clone())?);
            next_worker += 1;
        }
        for _ in 0..config.cheese_workers {
            let stage = CheeseStage::new(
                ctx.clone(),
                next_worker,
                config.cheese_iterations(),
                config.milk_per_cheese,
            );
            handles.cheese.push(spawn_stage(stage, ctx.clone())?);
            next_worker += 1;
        }
        let stage = BurgerStage::new(
            ctx.clone(),
            next_worker,
            config.target_burgers,
            config.cheese_per_burger,
            Arc::clone(&self.status.burgers_completed),
        );
        handles.burger = Some(spawn_stage(stage, ctx.clone())?);
        Ok(())
    }

    /// Run every worker and block until all of them have joined.
    pub fn run(&self) -> Result<PipelineReport, PipelineError> {
        if !self.status.start() {
            return Err(PipelineError::AlreadyStarted);
        }
        let config = &self.config;
        debug!(
            "[PIPELINE] start target={} milk_workers={} cheese_workers={}",
            config.target_burgers, config.milk_workers, config.cheese_workers
        );

        let ctx = StageContext {
            milk: Arc::new(BoundedBuffer::new(config.milk_capacity)),
            cheese: Arc::new(BoundedBuffer::new(config.cheese_capacity)),
            ids: Arc::new(IdentifierGenerator::new()),
            delay: Arc::clone(&self.delay),
            acquire_timeout: config.acquire_timeout,
        };

        let start = Instant::now();
        let mut errors = Vec::new();
        let mut handles = Handles::default();
        if let Err(err) = self.launch(&ctx, &mut handles) {
            error!("[PIPELINE] launch failed: {err}");
            ctx.abort();
            errors.push(err);
        }

        let mut milk = Vec::with_capacity(config.total_milk());
        for handle in handles.milk {
            milk.extend(join_stage(handle, &mut errors));
        }
        let mut cheese = Vec::with_capacity(config.total_cheese());
        for handle in handles.cheese {
            cheese.extend(join_stage(handle, &mut errors));
        }
        if errors.is_empty() {
            self.status.transition(PipelineState::Draining);
        }
        let burgers = handles
            .burger
            .map(|handle| join_stage(handle, &mut errors))
            .unwrap_or_default();

        if let Some(err) = root_cause(errors) {
            self.status.transition(PipelineState::Failed);
            return Err(err);
        }
        self.status.transition(PipelineState::Completed);

        Ok(PipelineReport {
            config: config.clone(),
            milk,
            cheese,
            burgers,
            max_milk_occupancy: ctx.milk.high_water(),
            max_cheese_occupancy: ctx.cheese.high_water(),
            leftover_milk: ctx.milk.len(),
            leftover_cheese: ctx.cheese.len(),
            ids_issued: ctx.ids.issued(),
            elapsed: start.elapsed(),
        })
    }
}
