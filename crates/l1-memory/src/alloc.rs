// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Bump allocation of tile buffers inside the L1 window.

use crate::{L1Address, L1Region, MemoryError};
use std::sync::atomic::{AtomicU32, Ordering};
use tile_core::{DataFormat, TileShape};

/// L1 word size; every buffer starts on a 16-byte boundary.
pub const L1_ALIGN: u32 = 16;

/// A placed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBuffer {
    /// Transformed base address, ready for a base-address register.
    pub addr: L1Address,
    /// Size in bytes.
    pub len: usize,
}

/// Hands out 16-byte-aligned buffers from the bottom of the L1 window
/// upwards. There is no free; [`TileAllocator::reset`] drops everything.
#[derive(Debug)]
pub struct TileAllocator {
    region: L1Region,
    next: AtomicU32,
}

impl TileAllocator {
    pub fn new(region: L1Region) -> Self {
        Self {
            region,
            next: AtomicU32::new(region.start()),
        }
    }

    /// Allocates `len` bytes, rounded up to a 16-byte multiple.
    pub fn alloc(&self, len: usize) -> Result<TileBuffer, MemoryError> {
        let rounded = (len as u64).div_ceil(L1_ALIGN as u64) * L1_ALIGN as u64;
        let end = self.region.end() as u64;
        let claimed = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                let new_end = cur as u64 + rounded;
                (new_end <= end).then_some(new_end as u32)
            })
            .map_err(|cur| MemoryError::RegionExhausted {
                requested_bytes: len,
                available_bytes: (end - cur as u64) as usize,
            })?;
        Ok(TileBuffer {
            addr: L1Address::from_byte_addr(claimed)?,
            len,
        })
    }

    /// Allocates room for `count` tiles of the given shape and format,
    /// back to back, and returns one buffer per tile.
    pub fn alloc_tiles(
        &self,
        shape: &TileShape,
        format: DataFormat,
        count: usize,
    ) -> Result<Vec<TileBuffer>, MemoryError> {
        let size = shape.size_bytes(format);
        (0..count).map(|_| self.alloc(size)).collect()
    }

    /// Bytes still available.
    pub fn remaining(&self) -> u32 {
        self.region.end() - self.next.load(Ordering::Acquire)
    }

    /// Forgets every allocation.
    pub fn reset(&self) {
        self.next.store(self.region.start(), Ordering::Release);
    }
}
