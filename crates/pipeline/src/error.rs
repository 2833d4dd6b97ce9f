// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the compute pipeline.

use hw_context::StageId;

/// Errors that can occur while configuring or running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Tile geometry or format error.
    #[error("tile error: {0}")]
    Tile(#[from] tile_core::TileError),

    /// An L1 address outside the valid window.
    #[error("memory error: {0}")]
    Memory(#[from] l1_memory::MemoryError),

    /// Register surface error, including a halted wait.
    #[error("hardware error: {0}")]
    Hw(#[from] hw_context::HwError),

    /// Micro-op program misuse.
    #[error("mop error: {0}")]
    Mop(#[from] mop::MopError),

    /// A four-phase contract call out of order, or arguments that disagree
    /// with the configured state. Raised by the state tracker.
    #[error("{stage} protocol violation: {detail}")]
    ProtocolViolation { stage: StageId, detail: String },

    /// A semaphore wait never resolved and the watchdog halted the core.
    #[error("synchronization stall: watchdog fired after {waited_ms} ms")]
    SynchronizationStall { waited_ms: u64 },

    /// Runtime parameters that do not fit the configured pipeline.
    #[error("invalid runtime parameters: {0}")]
    InvalidParams(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A stage task panicked or was cancelled.
    #[error("{stage} task failed: {detail}")]
    TaskFailed { stage: StageId, detail: String },
}

impl PipelineError {
    /// Returns `true` if the error is a spin-wait that exited on halt.
    pub fn is_halt(&self) -> bool {
        matches!(self, PipelineError::Hw(hw_context::HwError::Halted { .. }))
    }

    pub(crate) fn violation(stage: StageId, detail: impl Into<String>) -> Self {
        PipelineError::ProtocolViolation {
            stage,
            detail: detail.into(),
        }
    }
}
