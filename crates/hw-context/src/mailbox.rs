// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Single-slot, single-producer/single-consumer mailboxes, one per
//! receiving stage.

use crate::events::{EventLog, HwEvent};
use crate::spin::{spin_until, HaltLine};
use crate::{HwError, StageId};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Mailbox {
    slot: AtomicU32,
    full: AtomicBool,
}

/// The per-stage mailbox bank.
#[derive(Debug)]
pub struct MailboxBank {
    boxes: [Mailbox; 3],
    halt: Arc<HaltLine>,
    events: Arc<EventLog>,
}

impl MailboxBank {
    pub fn new(halt: Arc<HaltLine>, events: Arc<EventLog>) -> Self {
        Self {
            boxes: std::array::from_fn(|_| Mailbox::default()),
            halt,
            events,
        }
    }

    /// Non-blocking write into `to`'s mailbox.
    ///
    /// Fails if the previous message has not been read.
    pub fn write(&self, to: StageId, value: u32) -> Result<(), HwError> {
        let mb = &self.boxes[to.index()];
        if mb.full.load(Ordering::Acquire) {
            return Err(HwError::MailboxOverflow {
                stage: to,
                pending: mb.slot.load(Ordering::Relaxed),
            });
        }
        mb.slot.store(value, Ordering::Relaxed);
        mb.full.store(true, Ordering::Release);
        self.events.record(HwEvent::MailboxWrite { to, value });
        Ok(())
    }

    /// Blocking read of `at`'s own mailbox. Spins while empty.
    pub fn read(&self, at: StageId) -> Result<u32, HwError> {
        let mb = &self.boxes[at.index()];
        spin_until(&self.halt, "mailbox", || mb.full.load(Ordering::Acquire))?;
        let value = mb.slot.load(Ordering::Relaxed);
        mb.full.store(false, Ordering::Release);
        self.events.record(HwEvent::MailboxRead { at, value });
        Ok(value)
    }

    pub fn is_full(&self, at: StageId) -> bool {
        self.boxes[at.index()].full.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        for mb in &self.boxes {
            mb.full.store(false, Ordering::SeqCst);
            mb.slot.store(0, Ordering::SeqCst);
        }
    }
}
