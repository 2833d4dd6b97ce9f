// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Register map and the two register spaces.
//!
//! ```text
//! ConfigSpace (shared, 32-bit words)      ThreadConfig (one per stage, 16-bit)
//! 0x00-0x06  unpacker A (srcA)            0x00  CFG_CONTEXT_OFFSET
//! 0x10-0x16  unpacker B (srcB)            0x01  DEST_TARGET_OFFSET
//! 0x20-0x22  ALU / fidelity               0x08  ADDR_MOD_SRC[0..8]
//! 0x30-0x33  packer                       0x10  ADDR_MOD_DEST[0..8]
//! 0x3F       sync scratch                 0x18  ADDR_MOD_BIAS[0..8]
//!                                         0x20  ADDR_MOD_PACK[0..4]
//! ```
//!
//! Both spaces are plain atomics: last writer wins, and nothing here
//! arbitrates between stages. Ownership of each register is a call-site
//! convention documented next to its offset.

use crate::addrmod::{AddrModSlot, PackAddrModSlot};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

/// Words in the shared configuration space.
pub const CFG_WORDS: usize = 0x40;

/// Words in each per-stage thread configuration space.
pub const THREAD_CFG_WORDS: usize = 0x28;

/// A word offset into [`ConfigSpace`]. Constants are range-checked at
/// compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CfgAddr(u16);

impl CfgAddr {
    pub const fn new(addr: u16) -> Self {
        assert!((addr as usize) < CFG_WORDS, "config address out of range");
        Self(addr)
    }

    pub const fn offset(self) -> u16 {
        self.0
    }
}

/// A register offset into a [`ThreadConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadReg(u16);

impl ThreadReg {
    pub const fn new(addr: u16) -> Self {
        assert!((addr as usize) < THREAD_CFG_WORDS, "thread register out of range");
        Self(addr)
    }

    pub const fn offset(self) -> u16 {
        self.0
    }

    /// Source-counter half of an ALU address-modifier slot.
    pub fn addr_mod_src(slot: AddrModSlot) -> Self {
        Self(thread::ADDR_MOD_SRC_BASE.0 + slot.index() as u16)
    }

    /// Destination/fidelity half of an ALU address-modifier slot.
    pub fn addr_mod_dest(slot: AddrModSlot) -> Self {
        Self(thread::ADDR_MOD_DEST_BASE.0 + slot.index() as u16)
    }

    /// Bias counter of an ALU address-modifier slot.
    pub fn addr_mod_bias(slot: AddrModSlot) -> Self {
        Self(thread::ADDR_MOD_BIAS_BASE.0 + slot.index() as u16)
    }

    /// Packer address-modifier slot.
    pub fn addr_mod_pack(slot: PackAddrModSlot) -> Self {
        Self(thread::ADDR_MOD_PACK_BASE.0 + slot.index() as u16)
    }
}

/// Word offsets of one unpacker's register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackRegs {
    /// Tile descriptor, low word (format, x_dim).
    pub tile_desc_lo: CfgAddr,
    /// Tile descriptor, high word (y_dim, z_dim).
    pub tile_desc_hi: CfgAddr,
    /// Unpack output config (format, throttle).
    pub config: CfgAddr,
    /// Byte stride between faces in the source register.
    pub z_stride: CfgAddr,
    /// Last datum index of a row per unpack.
    pub x_end: CfgAddr,
    /// L1 base address, one per config context.
    pub base_addr: [CfgAddr; 2],
}

/// Shared configuration space offsets.
pub mod cfg {
    use super::{CfgAddr, UnpackRegs};

    // ── Unpackers ─────────────────────────────────────────────

    /// Unpacker 0 feeds srcA. Written by the unpack stage.
    pub const UNPACK_A: UnpackRegs = UnpackRegs {
        tile_desc_lo: CfgAddr::new(0x00),
        tile_desc_hi: CfgAddr::new(0x01),
        config: CfgAddr::new(0x02),
        z_stride: CfgAddr::new(0x03),
        x_end: CfgAddr::new(0x04),
        base_addr: [CfgAddr::new(0x05), CfgAddr::new(0x06)],
    };

    /// Unpacker 1 feeds srcB. Written by the unpack stage.
    pub const UNPACK_B: UnpackRegs = UnpackRegs {
        tile_desc_lo: CfgAddr::new(0x10),
        tile_desc_hi: CfgAddr::new(0x11),
        config: CfgAddr::new(0x12),
        z_stride: CfgAddr::new(0x13),
        x_end: CfgAddr::new(0x14),
        base_addr: [CfgAddr::new(0x15), CfgAddr::new(0x16)],
    };

    // ── Math ──────────────────────────────────────────────────

    /// Source and destination formats seen by the ALU. Written by math.
    pub const ALU_FORMAT_SPEC: CfgAddr = CfgAddr::new(0x20);
    /// Accumulation control (fp32 dest, int8 math). Written by math.
    pub const ALU_ACC_CTRL: CfgAddr = CfgAddr::new(0x21);
    /// Fidelity phase count and increment. Written by math.
    pub const MATH_FIDELITY: CfgAddr = CfgAddr::new(0x22);

    // ── Packer ────────────────────────────────────────────────

    /// Packer input/output formats. Written by pack.
    pub const PACK_CONFIG: CfgAddr = CfgAddr::new(0x30);
    /// Face height and face count of packed tiles. Written by pack.
    pub const PACK_TILE_DIMS: CfgAddr = CfgAddr::new(0x31);
    /// L1 destination of the next packed tile (transformed). Written by pack.
    pub const PACK_L1_BASE: CfgAddr = CfgAddr::new(0x32);
    /// Destination-register row the packer reads from. Written by pack.
    pub const PACK_DEST_BASE: CfgAddr = CfgAddr::new(0x33);

    // ── Sync ──────────────────────────────────────────────────

    /// Scratch word for the store-then-load barrier.
    pub const SYNC_SCRATCH: CfgAddr = CfgAddr::new(0x3F);
}

/// Per-stage thread register offsets.
pub mod thread {
    use super::ThreadReg;

    /// Selects which unpacker config context the hardware reads:
    /// `0x0000` for context 0, `0x0101` for context 1. Unpack stage only.
    pub const CFG_CONTEXT_OFFSET: ThreadReg = ThreadReg::new(0x00);
    /// Destination-register row the math stage writes the current tile
    /// to (section base plus tile offset). Math stage only.
    pub const DEST_TARGET_OFFSET: ThreadReg = ThreadReg::new(0x01);

    pub const ADDR_MOD_SRC_BASE: ThreadReg = ThreadReg::new(0x08);
    pub const ADDR_MOD_DEST_BASE: ThreadReg = ThreadReg::new(0x10);
    pub const ADDR_MOD_BIAS_BASE: ThreadReg = ThreadReg::new(0x18);
    pub const ADDR_MOD_PACK_BASE: ThreadReg = ThreadReg::new(0x20);
}

/// The shared 32-bit configuration register space.
#[derive(Debug)]
pub struct ConfigSpace {
    words: [AtomicU32; CFG_WORDS],
    rmw: Mutex<()>,
}

impl ConfigSpace {
    pub fn new() -> Self {
        Self {
            words: std::array::from_fn(|_| AtomicU32::new(0)),
            rmw: Mutex::new(()),
        }
    }

    pub fn read(&self, addr: CfgAddr) -> u32 {
        self.words[addr.0 as usize].load(Ordering::Acquire)
    }

    pub fn write(&self, addr: CfgAddr, value: u32) {
        self.words[addr.0 as usize].store(value, Ordering::Release);
    }

    /// Read-modify-write of the `mask`-wide field at `shift`.
    ///
    /// Serialized across stages, since two stages may own different
    /// fields of one word.
    pub fn rmw(&self, addr: CfgAddr, shift: u32, mask: u32, value: u32) {
        let _guard = self.rmw.lock().unwrap_or_else(PoisonError::into_inner);
        let word = self.read(addr);
        let updated = (word & !(mask << shift)) | ((value & mask) << shift);
        self.write(addr, updated);
    }

    /// Zeroes every register.
    pub fn clear(&self) {
        for w in &self.words {
            w.store(0, Ordering::Release);
        }
    }
}

impl Default for ConfigSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// One stage's 16-bit thread registers, written with `setc16`.
#[derive(Debug)]
pub struct ThreadConfig {
    regs: [AtomicU32; THREAD_CFG_WORDS],
}

impl ThreadConfig {
    pub fn new() -> Self {
        Self {
            regs: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Writes the low 16 bits of `value`.
    pub fn setc16(&self, reg: ThreadReg, value: u32) {
        self.regs[reg.0 as usize].store(value & 0xFFFF, Ordering::Release);
    }

    pub fn read(&self, reg: ThreadReg) -> u32 {
        self.regs[reg.0 as usize].load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        for r in &self.regs {
            r.store(0, Ordering::Release);
        }
    }
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self::new()
    }
}
