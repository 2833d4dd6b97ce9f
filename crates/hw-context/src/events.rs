// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Hardware event trace.
//!
//! When enabled, every semaphore transition, context flip, MOP run and
//! mailbox transfer is appended in the order it took effect. Tests use the
//! trace to check protocol ordering across stages.

use crate::{SemaphoreId, StageId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// One observable hardware transition.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HwEvent {
    SemaphoreInit { id: SemaphoreId, max: u32 },
    SemaphorePost { id: SemaphoreId, value: u32 },
    SemaphoreGet { id: SemaphoreId, value: u32 },
    ConfigContextSwitch { stage: StageId, context: u8 },
    DestOffsetFlip { stage: StageId, id: u8 },
    MopRun { stage: StageId, issued: u64 },
    MailboxWrite { to: StageId, value: u32 },
    MailboxRead { at: StageId, value: u32 },
    Halt,
}

/// Append-only event log.
#[derive(Debug, Default)]
pub struct EventLog {
    enabled: AtomicBool,
    events: Mutex<Vec<HwEvent>>,
}

impl EventLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn record(&self, event: HwEvent) {
        if !self.is_enabled() {
            return;
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn snapshot(&self) -> Vec<HwEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Takes every recorded event, leaving the log empty.
    pub fn drain(&self) -> Vec<HwEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Counts events matching `pred`.
    pub fn count(&self, pred: impl Fn(&HwEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_log_records_nothing() {
        let log = EventLog::new(false);
        log.record(HwEvent::Halt);
        assert!(log.snapshot().is_empty());
        log.set_enabled(true);
        log.record(HwEvent::Halt);
        assert_eq!(log.count(|e| matches!(e, HwEvent::Halt)), 1);
    }

    #[test]
    fn test_drain_empties() {
        let log = EventLog::new(true);
        log.record(HwEvent::MopRun { stage: StageId::Math, issued: 4 });
        assert_eq!(log.drain().len(), 1);
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn test_serializes_tagged() {
        let json = serde_json::to_string(&HwEvent::DestOffsetFlip {
            stage: StageId::Pack,
            id: 1,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"dest_offset_flip","stage":"Pack","id":1}"#);
    }
}
