// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Bounded hardware semaphores for cross-stage handoff.
//!
//! Every blocking operation is a spin over the counter with no timeout.
//! Posting past the maximum is a hard error here, where the hardware would
//! silently saturate.

use crate::events::{EventLog, HwEvent};
use crate::spin::{spin_until, HaltLine};
use crate::HwError;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Semaphores in the bank.
pub const NUM_SEMAPHORES: usize = 8;

/// Named semaphores and their fixed hardware indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum SemaphoreId {
    /// Math has filled a dest section that pack may drain.
    MathPack = 1,
    /// Unpack writes straight to dest.
    UnpackToDest = 2,
    /// Unpack has published a tile's operands to math.
    UnpackOperandSync = 3,
    PackDone = 4,
    /// Unpack config contexts in flight.
    UnpackSync = 5,
    UnpackMathDone = 6,
    MathDone = 7,
}

impl SemaphoreId {
    pub const ALL: [SemaphoreId; 7] = [
        SemaphoreId::MathPack,
        SemaphoreId::UnpackToDest,
        SemaphoreId::UnpackOperandSync,
        SemaphoreId::PackDone,
        SemaphoreId::UnpackSync,
        SemaphoreId::UnpackMathDone,
        SemaphoreId::MathDone,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Bit mask form used by multi-semaphore wait instructions.
    pub fn mask(self) -> u32 {
        1 << (self as u32)
    }

    pub fn name(self) -> &'static str {
        match self {
            SemaphoreId::MathPack => "MATH_PACK",
            SemaphoreId::UnpackToDest => "UNPACK_TO_DEST",
            SemaphoreId::UnpackOperandSync => "UNPACK_OPERAND_SYNC",
            SemaphoreId::PackDone => "PACK_DONE",
            SemaphoreId::UnpackSync => "UNPACK_SYNC",
            SemaphoreId::UnpackMathDone => "UNPACK_MATH_DONE",
            SemaphoreId::MathDone => "MATH_DONE",
        }
    }
}

impl fmt::Display for SemaphoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Post/get/spin counters of one semaphore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SemaphoreStats {
    pub posts: u64,
    pub gets: u64,
    pub spins: u64,
}

#[derive(Debug, Default)]
struct Semaphore {
    value: AtomicU32,
    max: AtomicU32,
    posts: AtomicU64,
    gets: AtomicU64,
    spins: AtomicU64,
}

impl Semaphore {
    fn reset(&self) {
        self.value.store(0, Ordering::SeqCst);
        self.max.store(0, Ordering::SeqCst);
        self.posts.store(0, Ordering::Relaxed);
        self.gets.store(0, Ordering::Relaxed);
        self.spins.store(0, Ordering::Relaxed);
    }

    fn add_spins(&self, spins: u64) {
        self.spins.fetch_add(spins, Ordering::Relaxed);
    }
}

/// The semaphore bank shared by all stages.
#[derive(Debug)]
pub struct SemaphoreBank {
    sems: [Semaphore; NUM_SEMAPHORES],
    halt: Arc<HaltLine>,
    events: Arc<EventLog>,
}

impl SemaphoreBank {
    pub fn new(halt: Arc<HaltLine>, events: Arc<EventLog>) -> Self {
        Self {
            sems: std::array::from_fn(|_| Semaphore::default()),
            halt,
            events,
        }
    }

    fn sem(&self, id: SemaphoreId) -> &Semaphore {
        &self.sems[id.index()]
    }

    /// Sets the maximum and zeroes the counter.
    pub fn init(&self, id: SemaphoreId, max: u32) {
        let sem = self.sem(id);
        sem.max.store(max, Ordering::SeqCst);
        sem.value.store(0, Ordering::SeqCst);
        self.events.record(HwEvent::SemaphoreInit { id, max });
    }

    pub fn read(&self, id: SemaphoreId) -> u32 {
        self.sem(id).value.load(Ordering::Acquire)
    }

    pub fn max(&self, id: SemaphoreId) -> u32 {
        self.sem(id).max.load(Ordering::Acquire)
    }

    /// Increments the counter. Fails if it is already at its maximum.
    pub fn post(&self, id: SemaphoreId) -> Result<u32, HwError> {
        let sem = self.sem(id);
        let max = sem.max.load(Ordering::Acquire);
        let prev = sem
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (v < max).then_some(v + 1)
            })
            .map_err(|_| HwError::SemaphoreOverflow { id, max })?;
        sem.posts.fetch_add(1, Ordering::Relaxed);
        self.events.record(HwEvent::SemaphorePost { id, value: prev + 1 });
        Ok(prev + 1)
    }

    /// Decrements the counter if it is positive.
    pub fn try_get(&self, id: SemaphoreId) -> Option<u32> {
        let sem = self.sem(id);
        let prev = sem
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1))
            .ok()?;
        sem.gets.fetch_add(1, Ordering::Relaxed);
        self.events.record(HwEvent::SemaphoreGet { id, value: prev - 1 });
        Some(prev - 1)
    }

    /// Blocking decrement: spins while the counter is zero.
    pub fn get(&self, id: SemaphoreId) -> Result<u32, HwError> {
        let mut value = 0;
        let spins = spin_until(&self.halt, id.name(), || match self.try_get(id) {
            Some(v) => {
                value = v;
                true
            }
            None => false,
        })?;
        self.sem(id).add_spins(spins);
        Ok(value)
    }

    /// Spins while the counter is zero, without consuming it.
    pub fn wait_on_zero(&self, id: SemaphoreId) -> Result<(), HwError> {
        let sem = self.sem(id);
        let spins = spin_until(&self.halt, id.name(), || sem.value.load(Ordering::Acquire) != 0)?;
        sem.add_spins(spins);
        Ok(())
    }

    /// Spins while the counter sits at its maximum.
    pub fn wait_on_max(&self, id: SemaphoreId) -> Result<(), HwError> {
        let sem = self.sem(id);
        let spins = spin_until(&self.halt, id.name(), || {
            sem.value.load(Ordering::Acquire) < sem.max.load(Ordering::Acquire)
        })?;
        sem.add_spins(spins);
        Ok(())
    }

    /// Spins while the counter is at least `n`.
    pub fn wait_while_at_least(&self, id: SemaphoreId, n: u32) -> Result<(), HwError> {
        let sem = self.sem(id);
        let spins = spin_until(&self.halt, id.name(), || sem.value.load(Ordering::Acquire) < n)?;
        sem.add_spins(spins);
        Ok(())
    }

    pub fn stats(&self, id: SemaphoreId) -> SemaphoreStats {
        let sem = self.sem(id);
        SemaphoreStats {
            posts: sem.posts.load(Ordering::Relaxed),
            gets: sem.gets.load(Ordering::Relaxed),
            spins: sem.spins.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter and maximum.
    pub fn reset(&self) {
        for sem in &self.sems {
            sem.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn bank() -> Arc<SemaphoreBank> {
        Arc::new(SemaphoreBank::new(
            Arc::new(HaltLine::new()),
            Arc::new(EventLog::new(true)),
        ))
    }

    #[test]
    fn test_post_past_max_fails() {
        let b = bank();
        b.init(SemaphoreId::MathPack, 1);
        assert_eq!(b.post(SemaphoreId::MathPack).unwrap(), 1);
        let err = b.post(SemaphoreId::MathPack).unwrap_err();
        assert!(matches!(
            err,
            HwError::SemaphoreOverflow { id: SemaphoreId::MathPack, max: 1 }
        ));
        assert_eq!(b.read(SemaphoreId::MathPack), 1);
    }

    #[test]
    fn test_try_get_on_zero() {
        let b = bank();
        b.init(SemaphoreId::UnpackSync, 2);
        assert!(b.try_get(SemaphoreId::UnpackSync).is_none());
        assert_eq!(b.stats(SemaphoreId::UnpackSync).gets, 0);
    }

    #[test]
    fn test_get_blocks_until_post() {
        let b = bank();
        b.init(SemaphoreId::MathPack, 1);
        let consumer = {
            let b = Arc::clone(&b);
            std::thread::spawn(move || b.get(SemaphoreId::MathPack))
        };
        std::thread::sleep(Duration::from_millis(10));
        assert!(!consumer.is_finished());
        b.post(SemaphoreId::MathPack).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_wait_on_max_releases_after_get() {
        let b = bank();
        b.init(SemaphoreId::MathPack, 2);
        b.post(SemaphoreId::MathPack).unwrap();
        b.post(SemaphoreId::MathPack).unwrap();
        let waiter = {
            let b = Arc::clone(&b);
            std::thread::spawn(move || b.wait_on_max(SemaphoreId::MathPack))
        };
        std::thread::sleep(Duration::from_millis(10));
        assert!(!waiter.is_finished());
        b.get(SemaphoreId::MathPack).unwrap();
        waiter.join().unwrap().unwrap();
        assert_eq!(b.read(SemaphoreId::MathPack), 1);
    }

    #[test]
    fn test_wait_on_zero_does_not_consume() {
        let b = bank();
        b.init(SemaphoreId::MathPack, 1);
        b.post(SemaphoreId::MathPack).unwrap();
        b.wait_on_zero(SemaphoreId::MathPack).unwrap();
        assert_eq!(b.read(SemaphoreId::MathPack), 1);
    }

    #[test]
    fn test_halt_releases_stuck_get() {
        let b = bank();
        b.init(SemaphoreId::PackDone, 1);
        let halt = Arc::clone(&b.halt);
        let stuck = {
            let b = Arc::clone(&b);
            std::thread::spawn(move || b.get(SemaphoreId::PackDone))
        };
        std::thread::sleep(Duration::from_millis(10));
        halt.assert();
        let err = stuck.join().unwrap().unwrap_err();
        assert!(matches!(err, HwError::Halted { waiting_on: "PACK_DONE" }));
    }

    #[test]
    fn test_events_recorded() {
        let b = bank();
        b.init(SemaphoreId::UnpackSync, 2);
        b.post(SemaphoreId::UnpackSync).unwrap();
        b.get(SemaphoreId::UnpackSync).unwrap();
        let events = b.events.snapshot();
        assert_eq!(
            events,
            vec![
                HwEvent::SemaphoreInit { id: SemaphoreId::UnpackSync, max: 2 },
                HwEvent::SemaphorePost { id: SemaphoreId::UnpackSync, value: 1 },
                HwEvent::SemaphoreGet { id: SemaphoreId::UnpackSync, value: 0 },
            ]
        );
    }

    #[test]
    fn test_mask() {
        assert_eq!(SemaphoreId::MathPack.mask(), 0b10);
        assert_eq!(SemaphoreId::UnpackSync.mask(), 0b10_0000);
    }

    proptest! {
        #[test]
        fn prop_post_get_round_trip(max in 1u32..16, start in 0u32..16, n in 0u32..16) {
            let start = start % max;
            let n = n % (max - start + 1);
            let b = bank();
            b.init(SemaphoreId::MathPack, max);
            for _ in 0..start {
                b.post(SemaphoreId::MathPack).unwrap();
            }
            for _ in 0..n {
                b.post(SemaphoreId::MathPack).unwrap();
            }
            for _ in 0..n {
                b.get(SemaphoreId::MathPack).unwrap();
            }
            prop_assert_eq!(b.read(SemaphoreId::MathPack), start);
            prop_assert_eq!(b.stats(SemaphoreId::MathPack).spins, 0);
        }
    }
}
