// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Address modifiers: per-instruction stride programs for the operand
//! read/write counters.
//!
//! An ALU slot is three 16-bit thread registers:
//!
//! ```text
//! SRC   [15:8] srcB  [7:0] srcA       each: [7] clr [6] cr [5:0] incr
//! DEST  [15:13] fidelity [12:0] dest  dest: [12] c_to_cr [11] clr [10] cr [9:0] incr
//!                                     fid:  [2] clr [1:0] incr
//! BIAS  [4] clr [3:0] incr
//! ```
//!
//! Slots are shared hardware state. Nothing arbitrates between two
//! programs that pick the same slot; each operation documents the slots it
//! owns.

use crate::layout::{extract, field};
use crate::regs::ThreadReg;
use crate::{HwContext, HwError, StageId};

/// Slots in the ALU address-modifier bank.
pub const ADDR_MOD_SLOTS: u8 = 8;

/// Slots in the packer address-modifier bank.
pub const PACK_ADDR_MOD_SLOTS: u8 = 4;

/// Index into the ALU address-modifier bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct AddrModSlot(u8);

impl AddrModSlot {
    pub const MOD0: AddrModSlot = AddrModSlot(0);
    pub const MOD1: AddrModSlot = AddrModSlot(1);
    pub const MOD2: AddrModSlot = AddrModSlot(2);
    pub const MOD3: AddrModSlot = AddrModSlot(3);
    pub const MOD4: AddrModSlot = AddrModSlot(4);
    pub const MOD5: AddrModSlot = AddrModSlot(5);
    pub const MOD6: AddrModSlot = AddrModSlot(6);
    pub const MOD7: AddrModSlot = AddrModSlot(7);

    pub fn new(slot: u8) -> Result<Self, HwError> {
        if slot < ADDR_MOD_SLOTS {
            Ok(Self(slot))
        } else {
            Err(HwError::InvalidSlot {
                slot,
                bank_size: ADDR_MOD_SLOTS,
            })
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index into the packer address-modifier bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct PackAddrModSlot(u8);

impl PackAddrModSlot {
    pub const MOD0: PackAddrModSlot = PackAddrModSlot(0);
    pub const MOD1: PackAddrModSlot = PackAddrModSlot(1);
    pub const MOD2: PackAddrModSlot = PackAddrModSlot(2);
    pub const MOD3: PackAddrModSlot = PackAddrModSlot(3);

    pub fn new(slot: u8) -> Result<Self, HwError> {
        if slot < PACK_ADDR_MOD_SLOTS {
            Ok(Self(slot))
        } else {
            Err(HwError::InvalidSlot {
                slot,
                bank_size: PACK_ADDR_MOD_SLOTS,
            })
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ── Field encodings ───────────────────────────────────────────

/// Largest increment the 6-bit source field holds.
pub const SRC_INCR_MAX: u8 = 0x3F;

/// Range of the 10-bit two's-complement dest field.
pub const DEST_INCR_RANGE: std::ops::RangeInclusive<i16> = -512..=511;

/// Source-operand counter update (6-bit increment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SrcIncr {
    pub incr: u8,
    pub clr: bool,
    pub cr: bool,
}

impl SrcIncr {
    pub const fn incr(incr: u8) -> Self {
        Self { incr, clr: false, cr: false }
    }

    /// Like [`SrcIncr::incr`], but rejects increments the field cannot hold.
    pub fn checked(incr: u8) -> Result<Self, HwError> {
        if incr > SRC_INCR_MAX {
            return Err(HwError::IncrementOutOfRange {
                field: "src",
                incr: incr as i32,
                bits: 6,
            });
        }
        Ok(Self::incr(incr))
    }

    pub const fn clear() -> Self {
        Self { incr: 0, clr: true, cr: false }
    }

    pub const fn encode(&self) -> u32 {
        debug_assert!(self.incr <= SRC_INCR_MAX, "src increment does not fit 6 bits");
        field(self.incr as u32, 0, 6) | field(self.cr as u32, 6, 1) | field(self.clr as u32, 7, 1)
    }

    pub const fn decode(bits: u32) -> Self {
        Self {
            incr: extract(bits, 0, 6) as u8,
            cr: extract(bits, 6, 1) != 0,
            clr: extract(bits, 7, 1) != 0,
        }
    }
}

/// Destination counter update (10-bit two's-complement increment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DestIncr {
    pub incr: i16,
    pub clr: bool,
    pub cr: bool,
    pub c_to_cr: bool,
}

impl DestIncr {
    pub const fn incr(incr: i16) -> Self {
        Self { incr, clr: false, cr: false, c_to_cr: false }
    }

    pub const fn clear() -> Self {
        Self { incr: 0, clr: true, cr: false, c_to_cr: false }
    }

    pub const fn carriage_return(incr: i16) -> Self {
        Self { incr, clr: false, cr: true, c_to_cr: false }
    }

    /// Like [`DestIncr::incr`], but rejects increments the 10-bit field
    /// would wrap.
    pub fn checked(incr: i16) -> Result<Self, HwError> {
        if !DEST_INCR_RANGE.contains(&incr) {
            return Err(HwError::IncrementOutOfRange {
                field: "dest",
                incr: incr as i32,
                bits: 10,
            });
        }
        Ok(Self::incr(incr))
    }

    pub const fn encode(&self) -> u32 {
        debug_assert!(
            self.incr >= -512 && self.incr <= 511,
            "dest increment does not fit 10 bits"
        );
        field(self.incr as u16 as u32, 0, 10)
            | field(self.cr as u32, 10, 1)
            | field(self.clr as u32, 11, 1)
            | field(self.c_to_cr as u32, 12, 1)
    }

    pub const fn decode(bits: u32) -> Self {
        let raw = extract(bits, 0, 10) as u16;
        Self {
            incr: ((raw << 6) as i16) >> 6,
            cr: extract(bits, 10, 1) != 0,
            clr: extract(bits, 11, 1) != 0,
            c_to_cr: extract(bits, 12, 1) != 0,
        }
    }
}

/// Fidelity-phase counter update (2-bit increment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FidelityIncr {
    pub incr: u8,
    pub clr: bool,
}

impl FidelityIncr {
    pub const fn encode(&self) -> u32 {
        field(self.incr as u32, 0, 2) | field(self.clr as u32, 2, 1)
    }

    pub const fn decode(bits: u32) -> Self {
        Self {
            incr: extract(bits, 0, 2) as u8,
            clr: extract(bits, 2, 1) != 0,
        }
    }
}

/// Bias counter update (4-bit increment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BiasIncr {
    pub incr: u8,
    pub clr: bool,
}

impl BiasIncr {
    pub const fn encode(&self) -> u32 {
        field(self.incr as u32, 0, 4) | field(self.clr as u32, 4, 1)
    }

    pub const fn decode(bits: u32) -> Self {
        Self {
            incr: extract(bits, 0, 4) as u8,
            clr: extract(bits, 4, 1) != 0,
        }
    }
}

// ── ALU address modifier ──────────────────────────────────────

/// One ALU address-modifier program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrMod {
    pub srca: SrcIncr,
    pub srcb: SrcIncr,
    pub dest: DestIncr,
    pub fidelity: FidelityIncr,
    pub bias: BiasIncr,
}

impl AddrMod {
    /// Value of the SRC register.
    pub const fn src_value(&self) -> u32 {
        self.srca.encode() | (self.srcb.encode() << 8)
    }

    /// Value of the DEST register (destination plus fidelity).
    pub const fn dest_value(&self) -> u32 {
        self.dest.encode() | (self.fidelity.encode() << 13)
    }

    pub const fn bias_value(&self) -> u32 {
        self.bias.encode()
    }

    /// Programs `slot` in `stage`'s bank: three `setc16` writes.
    pub fn set(&self, hw: &HwContext, stage: StageId, slot: AddrModSlot) {
        let thread = hw.thread(stage);
        thread.setc16(ThreadReg::addr_mod_src(slot), self.src_value());
        thread.setc16(ThreadReg::addr_mod_dest(slot), self.dest_value());
        thread.setc16(ThreadReg::addr_mod_bias(slot), self.bias_value());
    }

    /// Decodes the program currently held in `slot`.
    pub fn read(hw: &HwContext, stage: StageId, slot: AddrModSlot) -> Self {
        let thread = hw.thread(stage);
        let src = thread.read(ThreadReg::addr_mod_src(slot));
        let dest = thread.read(ThreadReg::addr_mod_dest(slot));
        let bias = thread.read(ThreadReg::addr_mod_bias(slot));
        Self {
            srca: SrcIncr::decode(extract(src, 0, 8)),
            srcb: SrcIncr::decode(extract(src, 8, 8)),
            dest: DestIncr::decode(extract(dest, 0, 13)),
            fidelity: FidelityIncr::decode(extract(dest, 13, 3)),
            bias: BiasIncr::decode(bias),
        }
    }
}

// ── Packer address modifier ───────────────────────────────────

/// Packer row counter update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackYIncr {
    pub incr: u8,
    pub cr: bool,
    pub clr: bool,
}

impl PackYIncr {
    pub const fn encode(&self) -> u32 {
        field(self.incr as u32, 0, 4) | field(self.cr as u32, 4, 1) | field(self.clr as u32, 5, 1)
    }

    pub const fn decode(bits: u32) -> Self {
        Self {
            incr: extract(bits, 0, 4) as u8,
            cr: extract(bits, 4, 1) != 0,
            clr: extract(bits, 5, 1) != 0,
        }
    }
}

/// Packer face counter update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackZIncr {
    pub incr: u8,
    pub clr: bool,
}

impl PackZIncr {
    pub const fn encode(&self) -> u32 {
        field(self.incr as u32, 0, 1) | field(self.clr as u32, 1, 1)
    }

    pub const fn decode(bits: u32) -> Self {
        Self {
            incr: extract(bits, 0, 1) as u8,
            clr: extract(bits, 1, 1) != 0,
        }
    }
}

/// One packer address-modifier program, a single 16-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackAddrMod {
    pub y_src: PackYIncr,
    pub y_dst: PackYIncr,
    pub z_src: PackZIncr,
    pub z_dst: PackZIncr,
}

impl PackAddrMod {
    pub const fn value(&self) -> u32 {
        self.y_src.encode()
            | (self.y_dst.encode() << 6)
            | (self.z_src.encode() << 12)
            | (self.z_dst.encode() << 14)
    }

    pub fn set(&self, hw: &HwContext, slot: PackAddrModSlot) {
        hw.thread(StageId::Pack)
            .setc16(ThreadReg::addr_mod_pack(slot), self.value());
    }

    pub fn read(hw: &HwContext, slot: PackAddrModSlot) -> Self {
        let v = hw.thread(StageId::Pack).read(ThreadReg::addr_mod_pack(slot));
        Self {
            y_src: PackYIncr::decode(extract(v, 0, 6)),
            y_dst: PackYIncr::decode(extract(v, 6, 6)),
            z_src: PackZIncr::decode(extract(v, 12, 2)),
            z_dst: PackZIncr::decode(extract(v, 14, 2)),
        }
    }
}

// ── Counters ──────────────────────────────────────────────────

const SRC_COUNTER_MASK: u32 = 0x3F;
const DEST_COUNTER_MASK: u32 = 0x3FF;
const Z_COUNTER_MASK: u32 = 0xF;

fn step_unsigned(counter: &mut u32, base: &mut u32, incr: u32, clr: bool, cr: bool, mask: u32) {
    if clr {
        *counter = 0;
        *base = 0;
    } else if cr {
        *base = base.wrapping_add(incr) & mask;
        *counter = *base;
    } else {
        *counter = counter.wrapping_add(incr) & mask;
    }
}

/// The read/write counters an execution unit advances after every
/// instruction that names an address modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RwCounters {
    pub srca: u32,
    pub srcb: u32,
    pub dest: u32,
    pub fidelity: u32,
    pub bias: u32,
    pub srca_cr: u32,
    pub srcb_cr: u32,
    pub dest_cr: u32,
}

impl RwCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Applies one address-modifier program.
    pub fn apply(&mut self, m: &AddrMod) {
        step_unsigned(
            &mut self.srca,
            &mut self.srca_cr,
            m.srca.incr as u32,
            m.srca.clr,
            m.srca.cr,
            SRC_COUNTER_MASK,
        );
        step_unsigned(
            &mut self.srcb,
            &mut self.srcb_cr,
            m.srcb.incr as u32,
            m.srcb.clr,
            m.srcb.cr,
            SRC_COUNTER_MASK,
        );

        if m.dest.clr {
            self.dest = 0;
            self.dest_cr = 0;
        } else if m.dest.cr {
            self.dest_cr = self.dest_cr.wrapping_add_signed(m.dest.incr as i32) & DEST_COUNTER_MASK;
            self.dest = self.dest_cr;
        } else {
            self.dest = self.dest.wrapping_add_signed(m.dest.incr as i32) & DEST_COUNTER_MASK;
        }
        if m.dest.c_to_cr {
            self.dest_cr = self.dest;
        }

        self.fidelity = if m.fidelity.clr {
            0
        } else {
            (self.fidelity + m.fidelity.incr as u32) & 0x3
        };
        self.bias = if m.bias.clr {
            0
        } else {
            (self.bias + m.bias.incr as u32) & 0xF
        };
    }
}

/// Packer-side counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackCounters {
    pub y_src: u32,
    pub y_dst: u32,
    pub z_src: u32,
    pub z_dst: u32,
    pub y_src_cr: u32,
    pub y_dst_cr: u32,
}

impl PackCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn apply(&mut self, m: &PackAddrMod) {
        step_unsigned(
            &mut self.y_src,
            &mut self.y_src_cr,
            m.y_src.incr as u32,
            m.y_src.clr,
            m.y_src.cr,
            SRC_COUNTER_MASK,
        );
        step_unsigned(
            &mut self.y_dst,
            &mut self.y_dst_cr,
            m.y_dst.incr as u32,
            m.y_dst.clr,
            m.y_dst.cr,
            SRC_COUNTER_MASK,
        );
        self.z_src = if m.z_src.clr {
            0
        } else {
            (self.z_src + m.z_src.incr as u32) & Z_COUNTER_MASK
        };
        self.z_dst = if m.z_dst.clr {
            0
        } else {
            (self.z_dst + m.z_dst.incr as u32) & Z_COUNTER_MASK
        };
    }
}
