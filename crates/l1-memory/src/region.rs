// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The valid tile-data window of L1 and size-string parsing.

use crate::{L1Address, MemoryError};
use std::fmt;

/// End of the reserved low area (firmware, mailboxes, counters, routing
/// tables). Tile data starts here.
pub const MEM_MAP_END: u32 = 0x79F0;

/// Total L1 size: 1464 KiB.
pub const MEM_L1_SIZE: u32 = 1464 * 1024;

/// The byte window `[start, end)` that tile buffers may live in.
///
/// # Parsing
/// [`L1Region::with_size`] accepts human-readable sizes for the top of the
/// window, e.g. `"1464K"`, `"1M"`, or a plain byte count.
///
/// # Examples
/// ```
/// use l1_memory::{L1Address, L1Region};
///
/// let r = L1Region::default();
/// assert!(r.is_valid_l1_address(L1Address::new(0x1000)));
/// assert!(!r.is_valid_l1_address(L1Address::new(0x10)));
///
/// let small = L1Region::with_size("64K").unwrap();
/// assert_eq!(small.end(), 64 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct L1Region {
    start: u32,
    end: u32,
}

impl L1Region {
    /// Creates a region from explicit byte bounds.
    pub fn new(start: u32, end: u32) -> Result<Self, MemoryError> {
        if start >= end {
            return Err(MemoryError::InvalidRegion(format!(
                "start {start:#x} must be below end {end:#x}"
            )));
        }
        if start % 16 != 0 || end % 16 != 0 {
            return Err(MemoryError::InvalidRegion(format!(
                "bounds {start:#x}..{end:#x} must be 16-byte aligned"
            )));
        }
        Ok(Self { start, end })
    }

    /// The default window above the reserved area, with the top of L1
    /// given as a human-readable size.
    pub fn with_size(size: &str) -> Result<Self, MemoryError> {
        let end = parse_size(size)?;
        Self::new(MEM_MAP_END, end)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Bytes available for tile data.
    pub fn size(&self) -> u32 {
        self.end - self.start
    }

    /// Returns `true` if `[addr, addr + len)` lies inside the window.
    pub fn contains(&self, addr: u32, len: usize) -> bool {
        let end = addr as u64 + len as u64;
        addr >= self.start && end <= self.end as u64
    }

    /// Fails with `OutOfRangeAddress` unless `[addr, addr + len)` lies
    /// inside the window.
    pub fn check(&self, addr: u32, len: usize) -> Result<(), MemoryError> {
        if self.contains(addr, len) {
            Ok(())
        } else {
            Err(MemoryError::OutOfRangeAddress {
                addr,
                len,
                start: self.start,
                end: self.end,
            })
        }
    }

    /// Transformed-address check: `address` must satisfy
    /// `L1_ADDRESS(start) <= address < L1_ADDRESS(end)`.
    pub fn is_valid_l1_address(&self, address: L1Address) -> bool {
        let lo = (self.start >> 4).saturating_sub(1);
        let hi = (self.end >> 4).saturating_sub(1);
        address.raw() >= lo && address.raw() < hi
    }

    /// Checks a transformed address and the `len` bytes behind it.
    pub fn check_address(&self, address: L1Address, len: usize) -> Result<(), MemoryError> {
        if !self.is_valid_l1_address(address) {
            return Err(MemoryError::OutOfRangeAddress {
                addr: address.byte_addr(),
                len,
                start: self.start,
                end: self.end,
            });
        }
        self.check(address.byte_addr(), len)
    }
}

impl Default for L1Region {
    fn default() -> Self {
        Self {
            start: MEM_MAP_END,
            end: MEM_L1_SIZE,
        }
    }
}

impl fmt::Display for L1Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x}..{:#x} ({:.1} KB)",
            self.start,
            self.end,
            self.size() as f64 / 1024.0
        )
    }
}

/// Parses a human-readable byte size.
///
/// Accepted formats: `"1464K"`, `"1464KB"`, `"1M"`, `"1MB"`, or a plain
/// byte count. Case-insensitive.
pub fn parse_size(s: &str) -> Result<u32, MemoryError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(MemoryError::InvalidRegion("empty size string".into()));
    }

    let upper = s.to_uppercase();
    let (num_str, multiplier) = if upper.ends_with("MB") {
        (&s[..s.len() - 2], 1024 * 1024)
    } else if upper.ends_with('M') {
        (&s[..s.len() - 1], 1024 * 1024)
    } else if upper.ends_with("KB") {
        (&s[..s.len() - 2], 1024)
    } else if upper.ends_with('K') {
        (&s[..s.len() - 1], 1024)
    } else if upper.ends_with('B') {
        (&s[..s.len() - 1], 1)
    } else {
        (s, 1)
    };

    let value: u32 = num_str.trim().parse().map_err(|_| {
        MemoryError::InvalidRegion(format!(
            "invalid size '{s}': expected a number followed by an optional suffix (K, M)"
        ))
    })?;

    let bytes = value
        .checked_mul(multiplier)
        .ok_or_else(|| MemoryError::InvalidRegion(format!("size overflow: '{s}'")))?;
    if bytes == 0 {
        return Err(MemoryError::InvalidRegion(format!("zero size: '{s}'")));
    }
    Ok(bytes)
}
