// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for micro-op programs.

use hw_context::StageId;

/// Errors from building or running a micro-op program.
#[derive(Debug, thiserror::Error)]
pub enum MopError {
    /// A loop count outside `1..=65535`.
    #[error("invalid {which} loop count {count} (must be 1..=65535)")]
    InvalidLoopCount { which: &'static str, count: u32 },

    /// `arm()` or `run()` with no program loaded.
    #[error("{stage} MOP has no program")]
    NotProgrammed { stage: StageId },

    /// `program()` while the previous program is still running.
    #[error("{stage} MOP reprogrammed while running")]
    ReprogramWhileRunning { stage: StageId },

    /// `run()` without arming first.
    #[error("{stage} MOP run before arm")]
    NotArmed { stage: StageId },

    /// An instruction string that does not parse.
    #[error("cannot parse {what}: '{input}'")]
    Parse { what: &'static str, input: String },
}
