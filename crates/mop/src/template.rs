// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Nested-loop micro-op templates.
//!
//! A template replays one or two body instructions over an
//! `outer × inner` loop. Boundary instructions are issued in addition to
//! the body at fixed points:
//!
//! ```text
//! for o in 0..outer
//!     start_op
//!     for i in 0..inner
//!         first_inner              (i == 0)
//!         op0, op1
//!         last_inner               (i == inner - 1)
//!         last_outer               (i == inner - 1 and o == outer - 1)
//!     end_ops[0], end_ops[1]
//! ```

use crate::{Instr, MopError};

/// Largest loop count the template registers hold.
pub const MAX_LOOP_COUNT: u32 = 0xFFFF;

/// Receives the instructions a template issues.
pub trait InstrSink {
    type Error;

    fn issue(&mut self, instr: &Instr) -> Result<(), Self::Error>;
}

/// Collects issued instructions in order.
impl InstrSink for Vec<Instr> {
    type Error = MopError;

    fn issue(&mut self, instr: &Instr) -> Result<(), Self::Error> {
        self.push(*instr);
        Ok(())
    }
}

/// A compiled two-level loop program.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MopTemplate {
    outer: u32,
    inner: u32,
    op0: Instr,
    op1: Option<Instr>,
    start_op: Option<Instr>,
    end_ops: [Option<Instr>; 2],
    first_inner: Option<Instr>,
    last_inner: Option<Instr>,
    last_outer: Option<Instr>,
}

fn check_count(which: &'static str, count: u32) -> Result<u32, MopError> {
    if (1..=MAX_LOOP_COUNT).contains(&count) {
        Ok(count)
    } else {
        Err(MopError::InvalidLoopCount { which, count })
    }
}

impl MopTemplate {
    pub fn new(outer: u32, inner: u32, op0: Instr) -> Result<Self, MopError> {
        Ok(Self {
            outer: check_count("outer", outer)?,
            inner: check_count("inner", inner)?,
            op0,
            op1: None,
            start_op: None,
            end_ops: [None, None],
            first_inner: None,
            last_inner: None,
            last_outer: None,
        })
    }

    pub fn with_op1(mut self, op1: Instr) -> Self {
        self.op1 = Some(op1);
        self
    }

    pub fn with_start_op(mut self, op: Instr) -> Self {
        self.start_op = Some(op);
        self
    }

    pub fn with_end_op(mut self, op: Instr) -> Self {
        self.end_ops = [Some(op), None];
        self
    }

    pub fn with_end_ops(mut self, first: Instr, second: Instr) -> Self {
        self.end_ops = [Some(first), Some(second)];
        self
    }

    pub fn with_first_inner(mut self, op: Instr) -> Self {
        self.first_inner = Some(op);
        self
    }

    pub fn with_last_inner(mut self, op: Instr) -> Self {
        self.last_inner = Some(op);
        self
    }

    pub fn with_last_outer(mut self, op: Instr) -> Self {
        self.last_outer = Some(op);
        self
    }

    pub fn outer(&self) -> u32 {
        self.outer
    }

    pub fn inner(&self) -> u32 {
        self.inner
    }

    /// Instructions one run issues, boundary instructions included.
    pub fn issue_count(&self) -> u64 {
        let body = 1 + self.op1.is_some() as u64;
        let per_inner = self.inner as u64 * body
            + self.first_inner.is_some() as u64
            + self.last_inner.is_some() as u64;
        let per_outer = self.start_op.is_some() as u64
            + per_inner
            + self.end_ops.iter().flatten().count() as u64;
        self.outer as u64 * per_outer + self.last_outer.is_some() as u64
    }

    /// Issues the whole program into `sink`. Returns the instruction count.
    pub fn expand_into<S: InstrSink>(&self, sink: &mut S) -> Result<u64, S::Error> {
        let mut issued = 0u64;
        let mut emit = |sink: &mut S, instr: &Option<Instr>| -> Result<(), S::Error> {
            if let Some(i) = instr {
                sink.issue(i)?;
                issued += 1;
            }
            Ok(())
        };

        for o in 0..self.outer {
            emit(sink, &self.start_op)?;
            for i in 0..self.inner {
                if i == 0 {
                    emit(sink, &self.first_inner)?;
                }
                emit(sink, &Some(self.op0))?;
                emit(sink, &self.op1)?;
                if i == self.inner - 1 {
                    emit(sink, &self.last_inner)?;
                    if o == self.outer - 1 {
                        emit(sink, &self.last_outer)?;
                    }
                }
            }
            for op in &self.end_ops {
                emit(sink, op)?;
            }
        }
        Ok(issued)
    }

    /// The full issue order as a vector.
    pub fn expand(&self) -> Vec<Instr> {
        let mut out = Vec::with_capacity(self.issue_count() as usize);
        // The Vec sink never fails.
        let _ = self.expand_into(&mut out);
        out
    }
}
