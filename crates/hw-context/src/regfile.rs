// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operand and destination register files.
//!
//! ```text
//!   unpack ──produce──► srcA/srcB bank 0 ─┐
//!                       srcA/srcB bank 1 ─┴─► math ──► dest half 0 ─┐
//!                                                      dest half 1 ─┴─► pack
//! ```
//!
//! Source registers are double-banked with a data-valid bit per bank: the
//! producer spins while its write bank is still valid, the consumer spins
//! while its read bank is not. The destination register has no handshake
//! of its own; the semaphore protocol decides who may touch which half.

use crate::spin::{spin_until, HaltLine};
use crate::HwError;
use ndarray::{s, Array2, ArrayViewMut2};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Rows in one source-register bank.
pub const SRC_ROWS: usize = 64;

/// Datums per register row.
pub const REG_COLS: usize = 16;

/// Destination rows in 16-bit mode.
pub const DEST_ROWS_16B: usize = 1024;

/// Destination rows in fp32 mode.
pub const DEST_ROWS_32B: usize = 512;

/// Selects one of the two source operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SrcOperand {
    A,
    B,
}

impl SrcOperand {
    pub fn index(self) -> usize {
        match self {
            SrcOperand::A => 0,
            SrcOperand::B => 1,
        }
    }
}

impl fmt::Display for SrcOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SrcOperand::A => f.write_str("srcA"),
            SrcOperand::B => f.write_str("srcB"),
        }
    }
}

#[derive(Debug)]
struct SrcBank {
    data: Mutex<Array2<f32>>,
    valid: AtomicBool,
}

/// A double-banked source operand register.
#[derive(Debug)]
pub struct SrcRegister {
    operand: SrcOperand,
    banks: [SrcBank; 2],
    write_bank: AtomicUsize,
    read_bank: AtomicUsize,
    halt: Arc<HaltLine>,
}

impl SrcRegister {
    pub fn new(operand: SrcOperand, halt: Arc<HaltLine>) -> Self {
        Self {
            operand,
            banks: std::array::from_fn(|_| SrcBank {
                data: Mutex::new(Array2::zeros((SRC_ROWS, REG_COLS))),
                valid: AtomicBool::new(false),
            }),
            write_bank: AtomicUsize::new(0),
            read_bank: AtomicUsize::new(0),
            halt,
        }
    }

    pub fn operand(&self) -> SrcOperand {
        self.operand
    }

    /// Producer side: waits for the write bank to drain, fills it, marks it
    /// valid and moves to the other bank. Returns the spin count.
    pub fn produce(&self, fill: impl FnOnce(ArrayViewMut2<'_, f32>)) -> Result<u64, HwError> {
        let idx = self.write_bank.load(Ordering::Acquire);
        let bank = &self.banks[idx];
        let spins = spin_until(&self.halt, self.wait_label(), || {
            !bank.valid.load(Ordering::Acquire)
        })?;
        {
            let mut data = bank.data.lock().unwrap_or_else(PoisonError::into_inner);
            fill(data.view_mut());
        }
        bank.valid.store(true, Ordering::Release);
        self.write_bank.store(idx ^ 1, Ordering::Release);
        Ok(spins)
    }

    /// Consumer side: spins until the read bank holds valid data.
    pub fn wait_valid(&self) -> Result<u64, HwError> {
        let bank = &self.banks[self.read_bank.load(Ordering::Acquire)];
        spin_until(&self.halt, self.wait_label(), || {
            bank.valid.load(Ordering::Acquire)
        })
    }

    /// Runs `f` over the current read bank.
    pub fn with_read<R>(&self, f: impl FnOnce(&Array2<f32>) -> R) -> R {
        let bank = &self.banks[self.read_bank.load(Ordering::Acquire)];
        let data = bank.data.lock().unwrap_or_else(PoisonError::into_inner);
        f(&data)
    }

    /// Consumer side: clears the read bank's valid bit and moves on.
    pub fn release(&self) {
        let idx = self.read_bank.load(Ordering::Acquire);
        self.banks[idx].valid.store(false, Ordering::Release);
        self.read_bank.store(idx ^ 1, Ordering::Release);
    }

    /// Number of banks currently holding unconsumed data.
    pub fn valid_banks(&self) -> usize {
        self.banks
            .iter()
            .filter(|b| b.valid.load(Ordering::Acquire))
            .count()
    }

    pub fn reset(&self) {
        for bank in &self.banks {
            bank.valid.store(false, Ordering::SeqCst);
            bank.data
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .fill(0.0);
        }
        self.write_bank.store(0, Ordering::SeqCst);
        self.read_bank.store(0, Ordering::SeqCst);
    }

    fn wait_label(&self) -> &'static str {
        match self.operand {
            SrcOperand::A => "srcA data valid",
            SrcOperand::B => "srcB data valid",
        }
    }
}

/// The destination (accumulator) register file.
#[derive(Debug)]
pub struct DestRegister {
    data: Mutex<Array2<f32>>,
    fp32: AtomicBool,
}

impl DestRegister {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Array2::zeros((DEST_ROWS_16B, REG_COLS))),
            fp32: AtomicBool::new(false),
        }
    }

    /// Switches between 16-bit (1024 rows) and fp32 (512 rows) mode.
    pub fn set_fp32(&self, fp32: bool) {
        self.fp32.store(fp32, Ordering::Release);
    }

    pub fn is_fp32(&self) -> bool {
        self.fp32.load(Ordering::Acquire)
    }

    /// Addressable rows in the current mode.
    pub fn rows(&self) -> u32 {
        if self.is_fp32() {
            DEST_ROWS_32B as u32
        } else {
            DEST_ROWS_16B as u32
        }
    }

    /// Rows in one double-buffering half.
    pub fn half_rows(&self) -> u32 {
        self.rows() / 2
    }

    fn check(&self, start: u32, n: u32) -> Result<(), HwError> {
        let rows = self.rows();
        match start.checked_add(n) {
            Some(end) if end <= rows => Ok(()),
            _ => Err(HwError::DestOutOfRange {
                start,
                end: start.saturating_add(n),
                rows,
            }),
        }
    }

    /// Copies out rows `start..start + n`.
    pub fn read_rows(&self, start: u32, n: u32) -> Result<Array2<f32>, HwError> {
        self.check(start, n)?;
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let (a, b) = (start as usize, (start + n) as usize);
        Ok(data.slice(s![a..b, ..]).to_owned())
    }

    /// Runs `f` over rows `start..start + n`.
    pub fn with_rows_mut<R>(
        &self,
        start: u32,
        n: u32,
        f: impl FnOnce(ArrayViewMut2<'_, f32>) -> R,
    ) -> Result<R, HwError> {
        self.check(start, n)?;
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let (a, b) = (start as usize, (start + n) as usize);
        Ok(f(data.slice_mut(s![a..b, ..])))
    }

    pub fn zero_rows(&self, start: u32, n: u32) -> Result<(), HwError> {
        self.with_rows_mut(start, n, |mut rows| rows.fill(0.0))
    }

    pub fn reset(&self) {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill(0.0);
    }
}

impl Default for DestRegister {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_banks_alternate() {
        let reg = SrcRegister::new(SrcOperand::A, Arc::new(HaltLine::new()));
        reg.produce(|mut bank| bank[[0, 0]] = 1.0).unwrap();
        reg.produce(|mut bank| bank[[0, 0]] = 2.0).unwrap();
        assert_eq!(reg.valid_banks(), 2);

        reg.wait_valid().unwrap();
        assert_eq!(reg.with_read(|b| b[[0, 0]]), 1.0);
        reg.release();
        assert_eq!(reg.with_read(|b| b[[0, 0]]), 2.0);
        reg.release();
        assert_eq!(reg.valid_banks(), 0);
    }

    #[test]
    fn test_producer_blocks_on_full_banks() {
        let reg = Arc::new(SrcRegister::new(SrcOperand::B, Arc::new(HaltLine::new())));
        reg.produce(|_| {}).unwrap();
        reg.produce(|_| {}).unwrap();
        let producer = {
            let reg = Arc::clone(&reg);
            std::thread::spawn(move || reg.produce(|mut b| b.fill(3.0)))
        };
        std::thread::sleep(Duration::from_millis(10));
        assert!(!producer.is_finished());
        reg.release();
        producer.join().unwrap().unwrap();
        reg.release();
        assert_eq!(reg.with_read(|b| b[[5, 5]]), 3.0);
    }

    #[test]
    fn test_consumer_halted() {
        let halt = Arc::new(HaltLine::new());
        let reg = SrcRegister::new(SrcOperand::A, Arc::clone(&halt));
        halt.assert();
        assert!(matches!(
            reg.wait_valid(),
            Err(HwError::Halted { waiting_on: "srcA data valid" })
        ));
    }

    #[test]
    fn test_dest_modes_and_bounds() {
        let dest = DestRegister::new();
        assert_eq!(dest.half_rows(), 512);
        dest.set_fp32(true);
        assert_eq!(dest.rows(), 512);
        assert_eq!(dest.half_rows(), 256);
        assert!(matches!(
            dest.read_rows(500, 16),
            Err(HwError::DestOutOfRange { start: 500, end: 516, rows: 512 })
        ));
    }

    #[test]
    fn test_dest_write_read_zero() {
        let dest = DestRegister::new();
        dest.with_rows_mut(64, 2, |mut rows| rows.fill(4.5)).unwrap();
        let rows = dest.read_rows(63, 4).unwrap();
        assert_eq!(rows[[0, 0]], 0.0);
        assert_eq!(rows[[1, 15]], 4.5);
        assert_eq!(rows[[3, 0]], 0.0);
        dest.zero_rows(64, 2).unwrap();
        assert!(dest.read_rows(64, 2).unwrap().iter().all(|&v| v == 0.0));
    }
}
