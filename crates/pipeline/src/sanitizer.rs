// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-stage shadow state that catches four-phase contract misuse.
//!
//! ```text
//!   (unconfigured) ──hw_configure──► configured ──init(op)──► op active
//!                    ◄─reconfigure─┘      ▲                     │ execute(op)*
//!                                         └────── uninit(op) ───┘
//! ```
//!
//! Each call compares its arguments against what was recorded earlier
//! and reports the first field that disagrees. A disabled tracker accepts
//! everything.

use crate::PipelineError;
use hw_context::StageId;

/// A named register-level value recorded by the tracker.
pub type Field = (&'static str, u32);

#[derive(Debug, Clone)]
struct ActiveOp {
    name: String,
    args: Vec<Field>,
}

/// Shadow configuration and operation state for one stage.
#[derive(Debug, Clone)]
pub struct StateTracker {
    stage: StageId,
    enabled: bool,
    configured: Option<Vec<Field>>,
    active: Option<ActiveOp>,
}

impl StateTracker {
    pub fn new(stage: StageId, enabled: bool) -> Self {
        Self {
            stage,
            enabled,
            configured: None,
            active: None,
        }
    }

    /// Name of the operation between `init` and `uninit`, if any.
    pub fn active_op(&self) -> Option<&str> {
        self.active.as_ref().map(|op| op.name.as_str())
    }

    fn violation(&self, detail: String) -> PipelineError {
        PipelineError::violation(self.stage, detail)
    }

    /// Records a configure call.
    ///
    /// A second configure needs `reconfigure`; a reconfigure needs an
    /// earlier configure. Reconfigured fields overwrite the recorded ones.
    pub fn hw_configure(&mut self, reconfigure: bool, fields: &[Field]) -> Result<(), PipelineError> {
        if !self.enabled {
            return Ok(());
        }
        match (self.configured.is_some(), reconfigure) {
            (true, false) => {
                return Err(self.violation(
                    "hw_configure called twice without reconfigure".into(),
                ))
            }
            (false, true) => {
                return Err(self.violation(
                    "reconfigure called before the initial hw_configure".into(),
                ))
            }
            _ => {}
        }
        match &mut self.configured {
            None => {
                self.configured = Some(fields.to_vec());
                Ok(())
            }
            Some(recorded) => {
                for &(name, value) in fields {
                    match recorded.iter_mut().find(|(n, _)| *n == name) {
                        Some(slot) => slot.1 = value,
                        None => recorded.push((name, value)),
                    }
                }
                Ok(())
            }
        }
    }

    /// Checks operand-dependent fields against the configured state.
    pub fn operand_check(&self, fields: &[Field]) -> Result<(), PipelineError> {
        if !self.enabled {
            return Ok(());
        }
        let recorded = self
            .configured
            .as_ref()
            .ok_or_else(|| self.violation("operand used before hw_configure".into()))?;
        for &(name, value) in fields {
            if let Some(&(_, want)) = recorded.iter().find(|(n, _)| *n == name) {
                if want != value {
                    return Err(self.violation(format!(
                        "{name} mismatch: configured {want}, got {value}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn init(&mut self, op_name: &str, args: &[Field]) -> Result<(), PipelineError> {
        if !self.enabled {
            return Ok(());
        }
        if self.configured.is_none() {
            return Err(self.violation(format!("init({op_name}) before hw_configure")));
        }
        if let Some(active) = &self.active {
            if active.name != op_name {
                return Err(self.violation(format!(
                    "init({op_name}) while {} is still initialised",
                    active.name
                )));
            }
        }
        self.active = Some(ActiveOp {
            name: op_name.to_string(),
            args: args.to_vec(),
        });
        Ok(())
    }

    pub fn execute(&self, op_name: &str, args: &[Field]) -> Result<(), PipelineError> {
        if !self.enabled {
            return Ok(());
        }
        if self.configured.is_none() {
            return Err(self.violation(format!("execute({op_name}) before hw_configure")));
        }
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| self.violation(format!("execute({op_name}) before init")))?;
        if active.name != op_name {
            return Err(self.violation(format!(
                "execute({op_name}) but {} is initialised",
                active.name
            )));
        }
        for &(name, value) in args {
            if let Some(&(_, want)) = active.args.iter().find(|(n, _)| *n == name) {
                if want != value {
                    return Err(self.violation(format!(
                        "{name} mismatch: init {want}, execute {value}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn uninit(&mut self, op_name: &str) -> Result<(), PipelineError> {
        if !self.enabled {
            return Ok(());
        }
        match &self.active {
            Some(active) if active.name == op_name => {
                self.active = None;
                Ok(())
            }
            Some(active) => Err(self.violation(format!(
                "uninit({op_name}) but {} is initialised",
                active.name
            ))),
            None => Err(self.violation(format!("uninit({op_name}) without init"))),
        }
    }

    /// Forgets everything, as after a core reset.
    pub fn reset(&mut self) {
        self.configured = None;
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> StateTracker {
        StateTracker::new(StageId::Unpack, true)
    }

    fn detail(err: PipelineError) -> String {
        match err {
            PipelineError::ProtocolViolation { detail, .. } => detail,
            other => panic!("expected protocol violation, got {other}"),
        }
    }

    #[test]
    fn test_configure_twice_rejected() {
        let mut t = tracker();
        t.hw_configure(false, &[("src_a_format", 5)]).unwrap();
        let err = t.hw_configure(false, &[("src_a_format", 5)]).unwrap_err();
        assert!(detail(err).contains("twice"));
        t.hw_configure(true, &[("src_a_format", 1)]).unwrap();
        assert!(t.operand_check(&[("src_a_format", 1)]).is_ok());
    }

    #[test]
    fn test_reconfigure_before_configure_rejected() {
        let mut t = tracker();
        let err = t.hw_configure(true, &[]).unwrap_err();
        assert!(detail(err).contains("before the initial"));
    }

    #[test]
    fn test_operand_check_names_field() {
        let mut t = tracker();
        t.hw_configure(false, &[("src_a_format", 5), ("face_rows", 16)])
            .unwrap();
        let err = t.operand_check(&[("face_rows", 8)]).unwrap_err();
        assert_eq!(detail(err), "face_rows mismatch: configured 16, got 8");
    }

    #[test]
    fn test_phase_order() {
        let mut t = tracker();
        assert!(t.init("eltwise_add", &[]).is_err());
        t.hw_configure(false, &[]).unwrap();
        assert!(t.execute("eltwise_add", &[]).is_err());

        t.init("eltwise_add", &[("num_faces", 4)]).unwrap();
        t.execute("eltwise_add", &[("num_faces", 4)]).unwrap();
        let err = t.execute("eltwise_add", &[("num_faces", 2)]).unwrap_err();
        assert!(detail(err).contains("num_faces"));
        assert!(t.execute("datacopy", &[]).is_err());
        assert!(t.init("datacopy", &[]).is_err());

        assert!(t.uninit("datacopy").is_err());
        t.uninit("eltwise_add").unwrap();
        assert_eq!(t.active_op(), None);
        assert!(t.uninit("eltwise_add").is_err());
    }

    #[test]
    fn test_disabled_accepts_everything() {
        let mut t = StateTracker::new(StageId::Math, false);
        assert!(t.hw_configure(true, &[]).is_ok());
        assert!(t.execute("anything", &[]).is_ok());
        assert!(t.uninit("anything").is_ok());
    }
}
