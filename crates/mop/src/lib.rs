// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # mop
//!
//! Micro-op programs: compact nested loops that replay a short
//! instruction body across the faces and rows of a tile without
//! per-instruction dispatch.
//!
//! # Key Components
//!
//! - [`Instr`]: the primitive instruction set.
//! - [`MopTemplate`]: an `outer × inner` loop with up to two body
//!   instructions and optional boundary instructions.
//! - [`MopExpander`]: one per stage; holds the loaded template and enforces
//!   the program → arm → run lifecycle.
//! - [`InstrSink`]: the execution unit a run issues into.
//!
//! # Example
//! ```
//! use mop::{Instr, MopTemplate};
//!
//! let t = MopTemplate::new(2, 3, Instr::Nop).unwrap().with_last_outer(Instr::ZeroAcc);
//! assert_eq!(t.issue_count(), 7);
//! ```

mod error;
mod expander;
mod instr;
mod template;

pub use error::MopError;
pub use expander::{MopExpander, MopState};
pub use instr::{Broadcast, EltwiseOp, Instr, SrcClear};
pub use template::{InstrSink, MopTemplate, MAX_LOOP_COUNT};
