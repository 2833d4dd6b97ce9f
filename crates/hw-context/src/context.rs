// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The hardware context: every piece of shared core state behind one
//! handle.
//!
//! A [`HwContext`] is cheap to clone and is handed to each stage. All
//! interior state is atomics or short critical sections, so the three
//! stage threads can hit it concurrently without an outer lock.

use crate::events::{EventLog, HwEvent};
use crate::mailbox::MailboxBank;
use crate::regfile::{DestRegister, SrcOperand, SrcRegister};
use crate::regs::{cfg, ConfigSpace, ThreadConfig};
use crate::semaphore::SemaphoreBank;
use crate::spin::HaltLine;
use crate::StageId;
use l1_memory::{L1Memory, L1Region};
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Construction parameters for a [`HwContext`].
#[derive(Debug, Clone, Default)]
pub struct HwConfig {
    /// Valid L1 tile-data window.
    pub region: L1Region,
    /// Record every hardware transition into the event log.
    pub trace_events: bool,
}

struct HwInner {
    cfg: ConfigSpace,
    threads: [ThreadConfig; 3],
    semaphores: SemaphoreBank,
    mailboxes: MailboxBank,
    src: [SrcRegister; 2],
    dest: DestRegister,
    l1: L1Memory,
    events: Arc<EventLog>,
    halt: Arc<HaltLine>,
}

/// Shared handle to the core's control surface and register files.
#[derive(Clone)]
pub struct HwContext {
    inner: Arc<HwInner>,
}

impl HwContext {
    pub fn new(config: HwConfig) -> Self {
        let halt = Arc::new(HaltLine::new());
        let events = Arc::new(EventLog::new(config.trace_events));
        Self {
            inner: Arc::new(HwInner {
                cfg: ConfigSpace::new(),
                threads: std::array::from_fn(|_| ThreadConfig::new()),
                semaphores: SemaphoreBank::new(Arc::clone(&halt), Arc::clone(&events)),
                mailboxes: MailboxBank::new(Arc::clone(&halt), Arc::clone(&events)),
                src: [
                    SrcRegister::new(SrcOperand::A, Arc::clone(&halt)),
                    SrcRegister::new(SrcOperand::B, Arc::clone(&halt)),
                ],
                dest: DestRegister::new(),
                l1: L1Memory::new(config.region),
                events,
                halt,
            }),
        }
    }

    pub fn cfg(&self) -> &ConfigSpace {
        &self.inner.cfg
    }

    /// `stage`'s private thread registers.
    pub fn thread(&self, stage: StageId) -> &ThreadConfig {
        &self.inner.threads[stage.index()]
    }

    pub fn semaphores(&self) -> &SemaphoreBank {
        &self.inner.semaphores
    }

    pub fn mailboxes(&self) -> &MailboxBank {
        &self.inner.mailboxes
    }

    pub fn src(&self, operand: SrcOperand) -> &SrcRegister {
        &self.inner.src[operand.index()]
    }

    pub fn dest(&self) -> &DestRegister {
        &self.inner.dest
    }

    pub fn l1(&self) -> &L1Memory {
        &self.inner.l1
    }

    pub fn events(&self) -> &EventLog {
        &self.inner.events
    }

    pub fn halt_line(&self) -> &Arc<HaltLine> {
        &self.inner.halt
    }

    /// Asserts the halt line. Every spin-wait in every stage exits with
    /// `HwError::Halted`.
    pub fn halt(&self) {
        warn!("halt line asserted");
        self.inner.halt.assert();
        self.inner.events.record(HwEvent::Halt);
    }

    pub fn is_halted(&self) -> bool {
        self.inner.halt.is_asserted()
    }

    /// Core reset: releases the halt line and clears all registers,
    /// semaphores, mailboxes and register files. L1 contents survive.
    pub fn reset(&self) {
        debug!("hardware context reset");
        let inner = &self.inner;
        inner.cfg.clear();
        for t in &inner.threads {
            t.clear();
        }
        inner.semaphores.reset();
        inner.mailboxes.reset();
        for s in &inner.src {
            s.reset();
        }
        inner.dest.reset();
        inner.dest.set_fp32(false);
        inner.halt.release();
    }

    /// Store-then-load barrier. Configuration written before the barrier
    /// is visible to every stage before any instruction issued after it.
    pub fn barrier(&self) {
        fence(Ordering::SeqCst);
        let scratch = self.inner.cfg.read(cfg::SYNC_SCRATCH);
        self.inner.cfg.write(cfg::SYNC_SCRATCH, scratch.wrapping_add(1));
        let _ = self.inner.cfg.read(cfg::SYNC_SCRATCH);
        fence(Ordering::SeqCst);
    }
}

impl std::fmt::Debug for HwContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwContext")
            .field("region", &self.inner.l1.region())
            .field("halted", &self.is_halted())
            .field("trace_events", &self.inner.events.is_enabled())
            .finish()
    }
}
