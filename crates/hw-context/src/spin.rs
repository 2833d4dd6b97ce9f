// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Busy-wait polling, the only blocking primitive in the engine.
//!
//! There is no timeout, yield or back-off. A wait that never resolves
//! keeps spinning until an external agent asserts the [`HaltLine`], which
//! models a core reset; the wait then returns [`HwError::Halted`].

use crate::HwError;
use std::sync::atomic::{AtomicBool, Ordering};

/// The core-wide halt (reset) line.
#[derive(Debug, Default)]
pub struct HaltLine {
    asserted: AtomicBool,
}

impl HaltLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asserts the line. Every spinning stage exits its wait.
    pub fn assert(&self) {
        self.asserted.store(true, Ordering::SeqCst);
    }

    /// Releases the line after a reset.
    pub fn release(&self) {
        self.asserted.store(false, Ordering::SeqCst);
    }

    pub fn is_asserted(&self) -> bool {
        self.asserted.load(Ordering::Acquire)
    }
}

/// Spins until `ready()` holds. Returns the number of polls that failed.
pub fn spin_until(
    halt: &HaltLine,
    waiting_on: &'static str,
    mut ready: impl FnMut() -> bool,
) -> Result<u64, HwError> {
    let mut spins = 0u64;
    while !ready() {
        if halt.is_asserted() {
            return Err(HwError::Halted { waiting_on });
        }
        std::hint::spin_loop();
        spins += 1;
    }
    Ok(spins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn test_ready_immediately() {
        let halt = HaltLine::new();
        assert_eq!(spin_until(&halt, "nothing", || true).unwrap(), 0);
    }

    #[test]
    fn test_waits_for_other_thread() {
        let halt = Arc::new(HaltLine::new());
        let flag = Arc::new(AtomicU32::new(0));
        let setter = {
            let flag = Arc::clone(&flag);
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                flag.store(1, Ordering::Release);
            })
        };
        spin_until(&halt, "flag", || flag.load(Ordering::Acquire) == 1).unwrap();
        setter.join().unwrap();
    }

    #[test]
    fn test_halt_breaks_wait() {
        let halt = Arc::new(HaltLine::new());
        let trigger = {
            let halt = Arc::clone(&halt);
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                halt.assert();
            })
        };
        let err = spin_until(&halt, "forever", || false).unwrap_err();
        assert!(matches!(err, HwError::Halted { waiting_on: "forever" }));
        trigger.join().unwrap();
        halt.release();
        assert!(!halt.is_asserted());
    }
}
