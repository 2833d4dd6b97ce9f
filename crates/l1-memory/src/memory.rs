// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The flat on-chip memory image.
//!
//! [`L1Memory`] models the single L1 SRAM that every stage reads tiles
//! from and writes tiles to. Every access is bounds-checked against the
//! [`L1Region`] window, so a bad address surfaces as
//! `MemoryError::OutOfRangeAddress` at the point it is used.
//!
//! # Thread Safety
//! `L1Memory` is cheap to clone (`Arc` inside) and `Send + Sync`; the
//! unpacker and packer share one image. Accesses are serialized by a
//! mutex, which stands in for the single-ported SRAM arbiter; no ordering
//! between stages is implied by it.

use crate::{AccessStats, L1Address, L1Region, MemoryError};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared state behind every clone of an [`L1Memory`].
struct MemoryInner {
    region: L1Region,
    bytes: Mutex<Vec<u8>>,
    stats: Mutex<AccessStats>,
}

/// A bounds-checked, shared L1 image.
///
/// # Example
/// ```
/// use l1_memory::{L1Memory, L1Region};
///
/// let l1 = L1Memory::new(L1Region::default());
/// l1.write(0x8000, &[1, 2, 3, 4]).unwrap();
/// assert_eq!(l1.read(0x8000, 4).unwrap(), vec![1, 2, 3, 4]);
///
/// // The reserved area below the tile window is refused.
/// assert!(l1.read(0x100, 4).is_err());
/// ```
#[derive(Clone)]
pub struct L1Memory {
    inner: Arc<MemoryInner>,
}

impl L1Memory {
    /// Creates a zero-filled L1 image covering `[0, region.end())`.
    pub fn new(region: L1Region) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                region,
                bytes: Mutex::new(vec![0u8; region.end() as usize]),
                stats: Mutex::new(AccessStats::default()),
            }),
        }
    }

    /// The valid tile-data window.
    pub fn region(&self) -> L1Region {
        self.inner.region
    }

    /// Reads `len` bytes at byte address `addr`.
    pub fn read(&self, addr: u32, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut out = vec![0u8; len];
        self.read_into(addr, &mut out)?;
        Ok(out)
    }

    /// Reads into `out` starting at byte address `addr`.
    pub fn read_into(&self, addr: u32, out: &mut [u8]) -> Result<(), MemoryError> {
        self.checked(addr, out.len())?;
        let start = addr as usize;
        {
            let bytes = self.inner.bytes.lock().unwrap_or_else(PoisonError::into_inner);
            out.copy_from_slice(&bytes[start..start + out.len()]);
        }
        if let Ok(mut stats) = self.inner.stats.lock() {
            stats.record_read(out.len());
        }
        Ok(())
    }

    /// Writes `data` at byte address `addr`.
    pub fn write(&self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.checked(addr, data.len())?;
        let start = addr as usize;
        {
            let mut bytes = self.inner.bytes.lock().unwrap_or_else(PoisonError::into_inner);
            bytes[start..start + data.len()].copy_from_slice(data);
        }
        if let Ok(mut stats) = self.inner.stats.lock() {
            stats.record_write(data.len());
        }
        Ok(())
    }

    /// Reads from a transformed address.
    pub fn read_at(&self, addr: L1Address, len: usize) -> Result<Vec<u8>, MemoryError> {
        self.check_address(addr, len)?;
        self.read(addr.byte_addr(), len)
    }

    /// Writes to a transformed address.
    pub fn write_at(&self, addr: L1Address, data: &[u8]) -> Result<(), MemoryError> {
        self.check_address(addr, data.len())?;
        self.write(addr.byte_addr(), data)
    }

    /// The bounds check applied when an address is programmed into a
    /// base-address register.
    pub fn check_address(&self, addr: L1Address, len: usize) -> Result<(), MemoryError> {
        self.inner.region.check_address(addr, len).inspect_err(|_| {
            if let Ok(mut stats) = self.inner.stats.lock() {
                stats.record_rejected();
            }
        })
    }

    /// Returns a snapshot of the access counters.
    pub fn stats(&self) -> AccessStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn checked(&self, addr: u32, len: usize) -> Result<(), MemoryError> {
        self.inner.region.check(addr, len).inspect_err(|_| {
            if let Ok(mut stats) = self.inner.stats.lock() {
                stats.record_rejected();
            }
        })
    }
}

impl std::fmt::Debug for L1Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L1Memory")
            .field("region", &self.inner.region)
            .field("stats", &self.stats())
            .finish()
    }
}
