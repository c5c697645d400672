//! The three worker loops: milk source, cheese transform, burger sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, info};

use crate::bounded_buffer::BoundedBuffer;
use crate::delay::Delay;
use crate::error::PipelineError;
use crate::id_generator::IdentifierGenerator;
use crate::types::{BurgerUnit, CheeseUnit, MilkUnit, StageKind, WorkerId};

/// Resources shared by every worker of one run.
#[derive(Clone)]
pub struct StageContext {
    pub milk: Arc<BoundedBuffer<MilkUnit>>,
    pub cheese: Arc<BoundedBuffer<CheeseUnit>>,
    pub ids: Arc<IdentifierGenerator>,
    pub delay: Arc<dyn Delay>,
    pub acquire_timeout: Option<Duration>,
}

impl StageContext {
    /// Close both buffers so every blocked worker returns.
    pub fn abort(&self) {
        self.milk.close();
        self.cheese.close();
    }
}

/// A repeatable unit of work run on its own thread.
pub trait Stage: Send + 'static {
    type Output: Send + 'static;

    fn kind(&self) -> StageKind;

    fn worker(&self) -> WorkerId;

    /// Run the loop to completion and return every unit produced.
    fn run(self) -> Result<Vec<Self::Output>, PipelineError>;
}

/// Source stage: draws ids and fills the milk buffer.
pub struct MilkStage {
    ctx: StageContext,
    worker: WorkerId,
    iterations: usize,
}

impl MilkStage {
    pub fn new(ctx: StageContext, worker: WorkerId, iterations: usize) -> Self {
        Self {
            ctx,
            worker,
            iterations,
        }
    }
}

impl Stage for MilkStage {
    type Output = MilkUnit;

    fn kind(&self) -> StageKind {
        StageKind::Milk
    }

    fn worker(&self) -> WorkerId {
        self.worker
    }

    fn run(self) -> Result<Vec<MilkUnit>, PipelineError> {
        let mut produced = Vec::with_capacity(self.iterations);
        for _ in 0..self.iterations {
            let unit = MilkUnit {
                id: self.ctx.ids.next(),
                producer: self.worker,
            };
            self.ctx
                .milk
                .put_within(unit, self.ctx.acquire_timeout)
                .map_err(|err| PipelineError::from_buffer(err, self.kind(), self.worker))?;
            info!("Milk producer {} added milk {}.", self.worker, unit.id);
            produced.push(unit);
            self.ctx.delay.pause(StageKind::Milk);
        }
        Ok(produced)
    }
}

/// Transform stage: three milk units in, one cheese unit out.
pub struct CheeseStage {
    ctx: StageContext,
    worker: WorkerId,
    iterations: usize,
    batch: usize,
}

impl CheeseStage {
    pub fn new(ctx: StageContext, worker: WorkerId, iterations: usize, batch: usize) -> Self {
        Self {
            ctx,
            worker,
            iterations,
            batch,
        }
    }
}

impl Stage for CheeseStage {
    type Output = CheeseUnit;

    fn kind(&self) -> StageKind {
        StageKind::Cheese
    }

    fn worker(&self) -> WorkerId {
        self.worker
    }

    fn run(self) -> Result<Vec<CheeseUnit>, PipelineError> {
        let mut produced = Vec::with_capacity(self.iterations);
        for _ in 0..self.iterations {
            // The milk lock is released before the cheese buffer is touched.
            let inputs = self
                .ctx
                .milk
                .take_batch_within(self.batch, self.ctx.acquire_timeout)
                .map_err(|err| PipelineError::from_buffer(err, self.kind(), self.worker))?;
            let unit = CheeseUnit::compose(&inputs, self.worker);
            self.ctx
                .cheese
                .put_within(unit.clone(), self.ctx.acquire_timeout)
                .map_err(|err| PipelineError::from_buffer(err, self.kind(), self.worker))?;
            info!(
                "Cheese producer {} created cheese slice {}.",
                self.worker, unit.id
            );
            produced.push(unit);
            self.ctx.delay.pause(StageKind::Cheese);
        }
        Ok(produced)
    }
}

/// Terminal stage: two cheese units in, one burger counted.
pub struct BurgerStage {
    ctx: StageContext,
    worker: WorkerId,
    target: usize,
    batch: usize,
    completed: Arc<AtomicUsize>,
}

impl BurgerStage {
    pub fn new(
        ctx: StageContext,
        worker: WorkerId,
        target: usize,
        batch: usize,
        completed: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            ctx,
            worker,
            target,
            batch,
            completed,
        }
    }
}

impl Stage for BurgerStage {
    type Output = BurgerUnit;

    fn kind(&self) -> StageKind {
        StageKind::Burger
    }

    fn worker(&self) -> WorkerId {
        self.worker
    }

    fn run(self) -> Result<Vec<BurgerUnit>, PipelineError> {
        let mut produced = Vec::with_capacity(self.target);
        // Single consumer: nobody else moves the counter between check and add.
        while self.completed.load(Ordering::SeqCst) < self.target {
            let inputs = self
                .ctx
                .cheese
                .take_batch_within(self.batch, self.ctx.acquire_timeout)
                .map_err(|err| PipelineError::from_buffer(err, self.kind(), self.worker))?;
            let unit = BurgerUnit::compose(&inputs);
            let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Cheeseburger producer created cheeseburger {}.", unit.id);
            debug!("burgers completed {done}/{}", self.target);
            produced.push(unit);
            self.ctx.delay.pause(StageKind::Burger);
        }
        Ok(produced)
    }
}
