// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-stage MOP expander and its lifecycle.
//!
//! ```text
//!   Uninitialized ──program──► Configured ──arm──► Armed ──run──► Running
//!         ▲                                          ▲              │
//!         │                                          └──────────────┘
//!         └───────────────────── uninit ────────────────────────────
//! ```
//!
//! `run()` always replays the most recently programmed template.
//! Programming while `Running` is refused; a run that failed part way
//! leaves the expander `Running` until `uninit`.

use crate::{InstrSink, MopError, MopTemplate};
use hw_context::{HwContext, HwEvent, StageId};
use tracing::trace;

/// Lifecycle state of a stage's MOP expander.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum MopState {
    Uninitialized,
    Configured,
    Armed,
    Running,
}

/// One stage's hardware-resident MOP.
#[derive(Debug)]
pub struct MopExpander {
    stage: StageId,
    hw: HwContext,
    state: MopState,
    template: Option<MopTemplate>,
    runs: u64,
    issued: u64,
}

impl MopExpander {
    pub fn new(stage: StageId, hw: HwContext) -> Self {
        Self {
            stage,
            hw,
            state: MopState::Uninitialized,
            template: None,
            runs: 0,
            issued: 0,
        }
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn state(&self) -> MopState {
        self.state
    }

    pub fn template(&self) -> Option<&MopTemplate> {
        self.template.as_ref()
    }

    /// Completed runs since construction.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Instructions issued since construction.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Loads `template`, overwriting any previous program.
    pub fn program(&mut self, template: MopTemplate) -> Result<(), MopError> {
        if self.state == MopState::Running {
            return Err(MopError::ReprogramWhileRunning { stage: self.stage });
        }
        self.template = Some(template);
        self.state = MopState::Configured;
        Ok(())
    }

    /// Readies the program for the next tile.
    pub fn arm(&mut self) -> Result<(), MopError> {
        match self.state {
            MopState::Uninitialized => Err(MopError::NotProgrammed { stage: self.stage }),
            MopState::Running => Err(MopError::ReprogramWhileRunning { stage: self.stage }),
            MopState::Configured | MopState::Armed => {
                self.state = MopState::Armed;
                Ok(())
            }
        }
    }

    /// Replays the loaded program into `sink`.
    pub fn run<S>(&mut self, sink: &mut S) -> Result<u64, S::Error>
    where
        S: InstrSink,
        S::Error: From<MopError>,
    {
        let template = match (self.state, &self.template) {
            (MopState::Armed, Some(t)) => t,
            (MopState::Uninitialized, _) | (_, None) => {
                return Err(MopError::NotProgrammed { stage: self.stage }.into())
            }
            _ => return Err(MopError::NotArmed { stage: self.stage }.into()),
        };
        self.state = MopState::Running;
        let issued = template.expand_into(sink)?;
        self.state = MopState::Armed;
        self.runs += 1;
        self.issued += issued;
        trace!(stage = %self.stage, issued, "mop run");
        self.hw.events().record(HwEvent::MopRun {
            stage: self.stage,
            issued,
        });
        Ok(issued)
    }

    /// Drops the program.
    pub fn uninit(&mut self) {
        self.template = None;
        self.state = MopState::Uninitialized;
    }
}
