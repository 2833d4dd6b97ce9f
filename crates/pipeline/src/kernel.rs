// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The four-phase contract every operation follows on every stage.
//!
//! ```text
//!   hw_configure ──► mop_init(op) ──► execute(tile)* ──► section_done / uninit
//!   (once, or        (per operation     (per tile)
//!    reconfigure)     shape)
//! ```

use crate::config::{DestSync, MathFidelity};
use crate::{Formats, PipelineError};
use hw_context::StageId;
use l1_memory::L1Address;
use mop::{Broadcast, EltwiseOp};
use tile_core::TileShape;

/// The operation a run computes. Selected once at init; every stage
/// dispatches on it when programming its MOP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// `out = a <op> b`, with `b` optionally broadcast.
    EltwiseBinary { op: EltwiseOp, broadcast: Broadcast },
    /// `out = a`.
    Datacopy,
}

impl Operation {
    pub fn eltwise(op: EltwiseOp) -> Self {
        Operation::EltwiseBinary {
            op,
            broadcast: Broadcast::None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::EltwiseBinary { op: EltwiseOp::Add, .. } => "eltwise_add",
            Operation::EltwiseBinary { op: EltwiseOp::Sub, .. } => "eltwise_sub",
            Operation::EltwiseBinary { op: EltwiseOp::Mul, .. } => "eltwise_mul",
            Operation::Datacopy => "datacopy",
        }
    }

    /// Reads srcB.
    pub fn is_binary(&self) -> bool {
        matches!(self, Operation::EltwiseBinary { .. })
    }

    pub fn broadcast(&self) -> Broadcast {
        match self {
            Operation::EltwiseBinary { broadcast, .. } => *broadcast,
            Operation::Datacopy => Broadcast::None,
        }
    }

    /// Host reference for one element.
    pub fn reference(&self, a: f32, b: f32) -> f32 {
        match self {
            Operation::EltwiseBinary { op: EltwiseOp::Add, .. } => a + b,
            Operation::EltwiseBinary { op: EltwiseOp::Sub, .. } => a - b,
            Operation::EltwiseBinary { op: EltwiseOp::Mul, .. } => a * b,
            Operation::Datacopy => a,
        }
    }
}

/// Everything a stage needs to configure itself for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSetup {
    pub formats: Formats,
    pub shape: TileShape,
    pub fp32_dest: bool,
    pub fidelity: MathFidelity,
    pub dest_sync: DestSync,
    /// Unpacker config contexts allowed in flight.
    pub unpack_contexts: u32,
}

impl KernelSetup {
    pub fn new(formats: Formats, shape: TileShape) -> Self {
        Self {
            formats,
            shape,
            fp32_dest: false,
            fidelity: MathFidelity::HiFi4,
            dest_sync: DestSync::Half,
            unpack_contexts: 2,
        }
    }

    /// Fidelity phases `op` takes per row chunk. Only multiplies repeat.
    pub fn phases_for(&self, op: &Operation) -> u32 {
        match op {
            Operation::EltwiseBinary { op: EltwiseOp::Mul, .. } => self.fidelity.phases(),
            _ => 1,
        }
    }
}

/// L1 addresses of one tile's operands and result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TileJob {
    pub addr_a: L1Address,
    pub addr_b: L1Address,
    pub addr_out: L1Address,
}

/// Per-workload parameters handed over by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeParams {
    pub tile_count: u32,
    /// Tiles math fills before handing a dest section to pack.
    pub tiles_per_section: u32,
}

impl RuntimeParams {
    pub fn new(tile_count: u32, tiles_per_section: u32) -> Self {
        Self {
            tile_count,
            tiles_per_section,
        }
    }

    /// Checks the parameters against the dest capacity and the job list.
    pub fn validate(&self, max_tiles_per_section: u32, jobs: usize) -> Result<(), PipelineError> {
        if self.tile_count == 0 {
            return Err(PipelineError::InvalidParams("tile_count must be positive".into()));
        }
        if self.tiles_per_section == 0 || self.tiles_per_section > max_tiles_per_section {
            return Err(PipelineError::InvalidParams(format!(
                "tiles_per_section {} outside 1..={max_tiles_per_section}",
                self.tiles_per_section
            )));
        }
        if jobs != self.tile_count as usize {
            return Err(PipelineError::InvalidParams(format!(
                "{jobs} tile jobs for tile_count {}",
                self.tile_count
            )));
        }
        Ok(())
    }

    /// Number of dest sections the run fills.
    pub fn sections(&self) -> u32 {
        self.tile_count.div_ceil(self.tiles_per_section.max(1))
    }
}

/// The collaborator interface every stage exposes to operations.
pub trait StageKernel {
    fn stage(&self) -> StageId;

    /// Programs format and geometry registers. Once, or again with
    /// `reconfigure`.
    fn hw_configure(&mut self, setup: &KernelSetup, reconfigure: bool) -> Result<(), PipelineError>;

    /// Programs address modifiers and the MOP for `op`.
    fn mop_init(&mut self, op: Operation, setup: &KernelSetup) -> Result<(), PipelineError>;

    /// Processes one tile. `slot` is the tile's index inside the current
    /// dest section.
    fn execute(&mut self, job: &TileJob, slot: u32) -> Result<(), PipelineError>;

    /// Hands a finished dest section on. A no-op for stages without one.
    fn section_done(&mut self) -> Result<(), PipelineError>;

    /// Drops the operation's MOP.
    fn uninit(&mut self) -> Result<(), PipelineError>;

    /// Forgets configuration, operation and section state after a core
    /// reset. Registers are cleared by the reset itself.
    fn reset(&mut self);
}
