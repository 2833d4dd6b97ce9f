// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # pipeline
//!
//! The three-stage compute pipeline of one tensor core and the sync engine
//! that keeps it coherent.
//!
//! Every operation runs as three cooperating programs, one per stage:
//!
//! ```text
//!         L1 ──unpack──► srcA / srcB ──math──► dest ──pack──► L1
//!              │                          │            │
//!   UNPACK_SYNC (config contexts)    MATH_PACK (dest sections)
//!   UNPACK_OPERAND_SYNC + mailbox
//! ```
//!
//! The stages share nothing but the [`hw_context::HwContext`]: semaphores,
//! mailboxes, register files and the configuration space. Each stage
//! flips only its own context or offset bit, at points its semaphore makes
//! safe.
//!
//! # Key Components
//! - [`PipelineEngine`]: type-state driver of the four-phase contract
//!   (`hw_configure → mop_init → execute* → uninit`).
//! - [`Unpacker`], [`MathUnit`], [`Packer`]: the stage kernels, each
//!   implementing [`StageKernel`].
//! - [`StateTracker`]: optional runtime check of the contract.
//! - [`PipelineConfig`]: TOML-loadable run configuration.
//! - [`PipelineMetrics`]: per-stage counters and timing of a run.

mod config;
mod engine;
mod error;
mod formats;
mod kernel;
mod metrics;
mod sanitizer;
mod stage;
mod watchdog;

pub use config::{DestSync, MathFidelity, PipelineConfig};
pub use engine::{Configured, EngineState, Idle, PipelineEngine, Ready, RunOutput};
pub use error::PipelineError;
pub use formats::{dest_format, src_register_format, Formats};
pub use kernel::{KernelSetup, Operation, RuntimeParams, StageKernel, TileJob};
pub use metrics::{PipelineMetrics, StageMetrics};
pub use sanitizer::{Field, StateTracker};
pub use stage::{dest_max_tiles, fidelity_product, DestSection, MathUnit, Packer, Unpacker};
pub use watchdog::{supervise, Supervised};
