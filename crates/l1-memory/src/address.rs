// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The 16-byte-unit addresses the engine receives.

use crate::MemoryError;
use std::fmt;

/// An L1 address in the transformed form used by every engine entry point:
/// `(byte_addr >> 4) - 1`.
///
/// The minus one mirrors what the unpacker and packer base-address
/// registers expect; the conversion is done once by the caller so that
/// per-tile code only moves raw register values.
///
/// ```
/// use l1_memory::L1Address;
/// let a = L1Address::from_byte_addr(0x10010).unwrap();
/// assert_eq!(a.raw(), 0x1000);
/// assert_eq!(a.byte_addr(), 0x10010);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct L1Address(u32);

impl L1Address {
    /// Wraps an already-transformed address.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Transforms a 16-byte-aligned byte address.
    pub fn from_byte_addr(byte_addr: u32) -> Result<Self, MemoryError> {
        if byte_addr % 16 != 0 || byte_addr == 0 {
            return Err(MemoryError::Misaligned { addr: byte_addr });
        }
        Ok(Self((byte_addr >> 4) - 1))
    }

    /// The transformed value, as written into base-address registers.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The physical byte address.
    pub const fn byte_addr(self) -> u32 {
        (self.0 + 1) << 4
    }
}

impl fmt::Display for L1Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} (byte {:#x})", self.0, self.byte_addr())
    }
}

impl From<u32> for L1Address {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_roundtrip() {
        for byte in [0x10u32, 0x79F0, 0x10010, 0x16DFF0] {
            let a = L1Address::from_byte_addr(byte).unwrap();
            assert_eq!(a.byte_addr(), byte);
        }
    }

    #[test]
    fn test_rejects_misaligned() {
        assert!(L1Address::from_byte_addr(0x1001).is_err());
        assert!(L1Address::from_byte_addr(0).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(L1Address::new(0x1000).to_string(), "0x1000 (byte 0x10010)");
    }
}
