// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The pipeline engine with a type-state–enforced four-phase contract.
//!
//! ```text
//! PipelineEngine<Idle>
//!     │  .configure(formats, shape)        hw_configure on every stage
//!     ▼
//! PipelineEngine<Configured>  ◄── .reconfigure(formats)
//!     │  .init(op)                          mop_init on every stage
//!     ▼                    ▲
//! PipelineEngine<Ready>    │ .uninit()
//!     │  .run(params, jobs)  (any number of times)
//!     ▼
//!   RunOutput
//! ```
//!
//! `run` drives the three stages as concurrent blocking tasks that only
//! talk to each other through the semaphores, the mailboxes and the
//! register files of the shared [`HwContext`]. A watchdog bounds the run.

use crate::stage::{dest_max_tiles, MathUnit, Packer, Unpacker};
use crate::watchdog::supervise;
use crate::{
    Formats, KernelSetup, Operation, PipelineConfig, PipelineError, PipelineMetrics, RuntimeParams,
    StageKernel, StageMetrics, TileJob,
};
use hw_context::{HwConfig, HwContext, HwError, HwEvent, SemaphoreId, StageId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tile_core::TileShape;

// ── Type-state markers ─────────────────────────────────────────

/// No stage has been configured.
#[derive(Debug)]
pub struct Idle;

/// Every stage has run `hw_configure`.
#[derive(Debug)]
pub struct Configured;

/// Every stage has a MOP programmed for one operation.
#[derive(Debug)]
pub struct Ready;

/// Sealed trait for engine states.
pub trait EngineState: std::fmt::Debug + sealed::Sealed {}
impl EngineState for Idle {}
impl EngineState for Configured {}
impl EngineState for Ready {}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Idle {}
    impl Sealed for super::Configured {}
    impl Sealed for super::Ready {}
}

// ── Run output ─────────────────────────────────────────────────

/// The result of one pipeline run.
#[derive(Debug)]
pub struct RunOutput {
    /// Per-stage and overall metrics.
    pub metrics: PipelineMetrics,
    /// Hardware events recorded during the run. Empty unless
    /// `trace_events` is set.
    pub events: Vec<HwEvent>,
}

// ── Engine ─────────────────────────────────────────────────────

fn lock<K>(stage: &Mutex<K>) -> MutexGuard<'_, K> {
    stage.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The three stages sharing one hardware context.
#[derive(Debug)]
struct Stages {
    unpack: Arc<Mutex<Unpacker>>,
    math: Arc<Mutex<MathUnit>>,
    pack: Arc<Mutex<Packer>>,
}

impl Stages {
    fn new(hw: &HwContext, sanitize: bool) -> Self {
        Self {
            unpack: Arc::new(Mutex::new(Unpacker::new(hw.clone(), sanitize))),
            math: Arc::new(Mutex::new(MathUnit::new(hw.clone(), sanitize))),
            pack: Arc::new(Mutex::new(Packer::new(hw.clone(), sanitize))),
        }
    }

    /// Runs `f` on every stage in unpack, math, pack order.
    fn each(
        &self,
        mut f: impl FnMut(&mut dyn StageKernel) -> Result<(), PipelineError>,
    ) -> Result<(), PipelineError> {
        f(&mut *lock(&self.unpack))?;
        f(&mut *lock(&self.math))?;
        f(&mut *lock(&self.pack))
    }

    fn reset(&self) {
        lock(&self.unpack).reset();
        lock(&self.math).reset();
        lock(&self.pack).reset();
    }
}

/// Drives the unpack, math and pack stages of one core.
///
/// `S` is a type-state marker: an engine cannot run before an operation
/// has been initialised, and cannot be reconfigured while one is.
///
/// # Example
/// ```no_run
/// use pipeline::{Formats, Operation, PipelineConfig, PipelineEngine, RuntimeParams};
/// use tile_core::{DataFormat, TileShape};
///
/// # async fn example(jobs: Vec<pipeline::TileJob>) -> Result<(), pipeline::PipelineError> {
/// let engine = PipelineEngine::new(PipelineConfig::default())?
///     .configure(Formats::uniform(DataFormat::Float16B), TileShape::TILE_32X32)?
///     .init(Operation::Datacopy)?;
/// let output = engine.run(&RuntimeParams::new(jobs.len() as u32, 4), &jobs).await?;
/// println!("{}", output.metrics.summary());
/// # Ok(())
/// # }
/// ```
pub struct PipelineEngine<S: EngineState = Idle> {
    config: PipelineConfig,
    hw: HwContext,
    stages: Stages,
    setup: Option<KernelSetup>,
    op: Option<Operation>,
    _state: std::marker::PhantomData<S>,
}

impl<S: EngineState> PipelineEngine<S> {
    fn into_state<T: EngineState>(self) -> PipelineEngine<T> {
        PipelineEngine {
            config: self.config,
            hw: self.hw,
            stages: self.stages,
            setup: self.setup,
            op: self.op,
            _state: std::marker::PhantomData,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The shared hardware context.
    pub fn hw(&self) -> &HwContext {
        &self.hw
    }

    /// Core reset: clears every register, semaphore and mailbox, drops
    /// the halt line and forgets all stage state. L1 contents survive.
    pub fn reset(mut self) -> PipelineEngine<Idle> {
        self.hw.reset();
        self.stages.reset();
        self.setup = None;
        self.op = None;
        tracing::info!("engine reset");
        self.into_state()
    }
}

// ── Idle → Configured ──────────────────────────────────────────

impl PipelineEngine<Idle> {
    /// Creates an engine with a fresh hardware context.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let hw = HwContext::new(HwConfig {
            region: config.region()?,
            trace_events: config.trace_events,
        });
        tracing::info!(
            dest_sync = %config.dest_sync,
            fp32_dest = config.fp32_dest_acc,
            fidelity = %config.math_fidelity,
            "engine created"
        );
        Ok(Self::with_context(config, hw))
    }

    /// Creates an engine on an existing hardware context.
    pub fn with_context(config: PipelineConfig, hw: HwContext) -> Self {
        Self {
            stages: Stages::new(&hw, config.sanitize),
            config,
            hw,
            setup: None,
            op: None,
            _state: std::marker::PhantomData,
        }
    }

    /// Runs `hw_configure` on every stage and sets up the math/pack
    /// handoff. Transitions to `Configured`.
    pub fn configure(
        self,
        formats: Formats,
        shape: TileShape,
    ) -> Result<PipelineEngine<Configured>, PipelineError> {
        let setup = KernelSetup {
            fp32_dest: self.config.fp32_dest_acc,
            fidelity: self.config.math_fidelity,
            dest_sync: self.config.dest_sync,
            unpack_contexts: self.config.unpack_contexts,
            ..KernelSetup::new(formats, shape)
        };
        self.stages.each(|stage| stage.hw_configure(&setup, false))?;
        lock(&self.stages.math).pack_sync_init(setup.dest_sync)?;
        lock(&self.stages.pack).dest_init(setup.dest_sync);
        tracing::info!(
            src_a = %formats.src_a,
            src_b = %formats.src_b,
            dst = %formats.dst,
            %shape,
            "pipeline configured"
        );

        let mut engine = self.into_state::<Configured>();
        engine.setup = Some(setup);
        Ok(engine)
    }
}

// ── Configured ─────────────────────────────────────────────────

impl PipelineEngine<Configured> {
    fn kernel_setup(&self) -> Result<KernelSetup, PipelineError> {
        self.setup
            .ok_or_else(|| PipelineError::Config("engine has no kernel setup".into()))
    }

    /// The setup every stage was configured with.
    pub fn setup(&self) -> Option<&KernelSetup> {
        self.setup.as_ref()
    }

    /// Switches operand formats between operations. Geometry and dest
    /// mode stay as configured.
    pub fn reconfigure(&mut self, formats: Formats) -> Result<(), PipelineError> {
        let setup = KernelSetup {
            formats,
            ..self.kernel_setup()?
        };
        self.stages.each(|stage| stage.hw_configure(&setup, true))?;
        self.setup = Some(setup);
        tracing::info!(dst = %formats.dst, "pipeline reconfigured");
        Ok(())
    }

    /// Programs every stage for `op`. Transitions to `Ready`.
    pub fn init(self, op: Operation) -> Result<PipelineEngine<Ready>, PipelineError> {
        let setup = self.kernel_setup()?;
        self.stages.each(|stage| stage.mop_init(op, &setup))?;
        tracing::info!(op = op.name(), broadcast = %op.broadcast(), "operation initialised");

        let mut engine = self.into_state::<Ready>();
        engine.op = Some(op);
        Ok(engine)
    }
}

// ── Ready: run ─────────────────────────────────────────────────

/// Runs one stage loop under its lock and times it. A failure other than
/// a halted wait asserts the halt line so the other stages do not spin on
/// a partner that is gone.
fn run_stage<K>(
    hw: &HwContext,
    stage: &Mutex<K>,
    body: impl FnOnce(&mut K) -> Result<(), PipelineError>,
    take_metrics: fn(&mut K) -> StageMetrics,
) -> Result<StageMetrics, PipelineError> {
    let mut kernel = lock(stage);
    let start = Instant::now();
    let result = body(&mut kernel);
    let mut metrics = take_metrics(&mut kernel);
    metrics.busy = start.elapsed();
    if let Err(e) = &result {
        if !e.is_halt() {
            tracing::error!(stage = %metrics.stage, error = %e, "stage failed");
            hw.halt();
        }
    }
    result.map(|()| metrics)
}

fn total_spins(hw: &HwContext) -> u64 {
    SemaphoreId::ALL
        .iter()
        .map(|id| hw.semaphores().stats(*id).spins)
        .sum()
}

impl PipelineEngine<Ready> {
    /// The initialised operation.
    pub fn op(&self) -> Option<Operation> {
        self.op
    }

    pub fn setup(&self) -> Option<&KernelSetup> {
        self.setup.as_ref()
    }

    /// Largest `tiles_per_section` the configured dest mode allows.
    pub fn max_tiles_per_section(&self) -> u32 {
        match &self.setup {
            Some(s) => dest_max_tiles(s.dest_sync, s.fp32_dest, &s.shape),
            None => 0,
        }
    }

    /// Pushes `jobs` through unpack, math and pack.
    ///
    /// Returns the first stage error, or `SynchronizationStall` if the
    /// watchdog had to halt the core. A halted core stays halted until
    /// [`reset`](PipelineEngine::reset).
    pub async fn run(
        &self,
        params: &RuntimeParams,
        jobs: &[TileJob],
    ) -> Result<RunOutput, PipelineError> {
        if self.hw.is_halted() {
            return Err(HwError::Halted {
                waiting_on: "run start",
            }
            .into());
        }
        params.validate(self.max_tiles_per_section(), jobs.len())?;
        tracing::debug!(
            tiles = params.tile_count,
            per_section = params.tiles_per_section,
            sections = params.sections(),
            "starting run"
        );

        self.hw.events().drain();
        let spins_before = total_spins(&self.hw);
        let jobs: Arc<[TileJob]> = jobs.into();
        let params = *params;

        let unpack = {
            let (hw, stage, jobs) = (self.hw.clone(), Arc::clone(&self.stages.unpack), Arc::clone(&jobs));
            tokio::task::spawn_blocking(move || {
                run_stage(&hw, &stage, |u| u.process(&jobs), Unpacker::take_metrics)
            })
        };
        let math = {
            let (hw, stage) = (self.hw.clone(), Arc::clone(&self.stages.math));
            tokio::task::spawn_blocking(move || {
                run_stage(&hw, &stage, |m| m.process(&params), MathUnit::take_metrics)
            })
        };
        let pack = {
            let (hw, stage, jobs) = (self.hw.clone(), Arc::clone(&self.stages.pack), Arc::clone(&jobs));
            tokio::task::spawn_blocking(move || {
                run_stage(&hw, &stage, |p| p.process(&params, &jobs), Packer::take_metrics)
            })
        };

        let limit = Duration::from_millis(self.config.watchdog_ms);
        let supervised = supervise(
            &self.hw,
            limit,
            vec![
                (StageId::Unpack, unpack),
                (StageId::Math, math),
                (StageId::Pack, pack),
            ],
        )
        .await;

        let mut metrics = PipelineMetrics::new(params.tile_count as u64);
        let mut failure: Option<PipelineError> = None;
        let mut halted: Option<PipelineError> = None;
        for (stage, joined) in supervised.results {
            match joined {
                Ok(Ok(stage_metrics)) => metrics.record_stage(stage_metrics),
                Ok(Err(e)) if e.is_halt() => {
                    halted.get_or_insert(e);
                }
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(join) => {
                    failure.get_or_insert(PipelineError::TaskFailed {
                        stage,
                        detail: join.to_string(),
                    });
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if supervised.tripped {
            return Err(PipelineError::SynchronizationStall {
                waited_ms: limit.as_millis() as u64,
            });
        }
        if let Some(e) = halted {
            return Err(e);
        }

        for id in SemaphoreId::ALL {
            let left = self.hw.semaphores().read(id);
            if left != 0 {
                tracing::warn!(semaphore = id.name(), value = left, "semaphore not drained after run");
            }
        }

        metrics.finalise(
            supervised.elapsed,
            total_spins(&self.hw).saturating_sub(spins_before),
        );
        tracing::info!("{}", metrics.summary());
        Ok(RunOutput {
            metrics,
            events: self.hw.events().drain(),
        })
    }

    /// Drops every stage's MOP. Transitions back to `Configured`.
    pub fn uninit(self) -> Result<PipelineEngine<Configured>, PipelineError> {
        self.stages.each(|stage| stage.uninit())?;
        tracing::info!("operation uninitialised");
        let mut engine = self.into_state::<Configured>();
        engine.op = None;
        Ok(engine)
    }
}

impl<S: EngineState> std::fmt::Debug for PipelineEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("state", &std::any::type_name::<S>())
            .field("dest_sync", &self.config.dest_sync)
            .field("op", &self.op.map(|op| op.name()))
            .field("halted", &self.hw.is_halted())
            .finish()
    }
}
