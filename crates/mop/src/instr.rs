// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The primitive instructions a micro-op program replays.
//!
//! Each stage's execution unit understands a subset: the unpacker takes
//! `Unpack` / `SetUnpackZ`, math takes `Elw` / `MovA2D` / `IncRwc` /
//! `ClearSrc`, the packer takes `Pack` / `ZeroAcc`. `Nop` is accepted
//! everywhere.

use crate::MopError;
use hw_context::{AddrModSlot, PackAddrModSlot, SrcOperand};
use std::fmt;
use std::str::FromStr;

/// Elementwise binary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EltwiseOp {
    Add,
    Sub,
    Mul,
}

impl EltwiseOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            EltwiseOp::Add => "ELWADD",
            EltwiseOp::Sub => "ELWSUB",
            EltwiseOp::Mul => "ELWMUL",
        }
    }
}

impl FromStr for EltwiseOp {
    type Err = MopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(EltwiseOp::Add),
            "sub" => Ok(EltwiseOp::Sub),
            "mul" => Ok(EltwiseOp::Mul),
            _ => Err(MopError::Parse {
                what: "eltwise op",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for EltwiseOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EltwiseOp::Add => f.write_str("add"),
            EltwiseOp::Sub => f.write_str("sub"),
            EltwiseOp::Mul => f.write_str("mul"),
        }
    }
}

/// How srcB is broadcast against srcA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Broadcast {
    /// Element for element.
    #[default]
    None,
    /// Column 0 of B is broadcast across each row.
    Col,
    /// Row 0 of B is broadcast down each column.
    Row,
    /// B[0][0] is broadcast everywhere.
    Scalar,
}

impl FromStr for Broadcast {
    type Err = MopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Broadcast::None),
            "col" | "column" => Ok(Broadcast::Col),
            "row" => Ok(Broadcast::Row),
            "scalar" => Ok(Broadcast::Scalar),
            _ => Err(MopError::Parse {
                what: "broadcast",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Broadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Broadcast::None => f.write_str("none"),
            Broadcast::Col => f.write_str("col"),
            Broadcast::Row => f.write_str("row"),
            Broadcast::Scalar => f.write_str("scalar"),
        }
    }
}

/// Which source registers a `ClearSrc` releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum SrcClear {
    A,
    B,
    AB,
}

impl SrcClear {
    pub fn clears(self, operand: SrcOperand) -> bool {
        matches!(
            (self, operand),
            (SrcClear::AB, _) | (SrcClear::A, SrcOperand::A) | (SrcClear::B, SrcOperand::B)
        )
    }
}

/// One primitive instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "instr")]
pub enum Instr {
    /// Unpack the face at `src`'s face counter from L1 into its register,
    /// hand the bank to math, then advance the counter by `z_incr`.
    Unpack { src: SrcOperand, z_incr: u8 },
    /// Point `src`'s face counter at `face`.
    SetUnpackZ { src: SrcOperand, face: u8 },
    /// Elementwise op over `rows` rows, then apply `addr_mod`.
    Elw {
        op: EltwiseOp,
        bcast: Broadcast,
        rows: u8,
        addr_mod: AddrModSlot,
    },
    /// Copy `rows` rows of srcA into dest, then apply `addr_mod`.
    MovA2D { rows: u8, addr_mod: AddrModSlot },
    /// Apply `addr_mod` without touching data.
    IncRwc { addr_mod: AddrModSlot },
    /// Release source banks, then apply `addr_mod`.
    ClearSrc { which: SrcClear, addr_mod: AddrModSlot },
    /// Zero the dest section the packer just drained.
    ZeroAcc,
    /// Pack `faces` faces from dest to L1, then apply `addr_mod`.
    Pack { faces: u8, addr_mod: PackAddrModSlot },
    Nop,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Unpack { src, z_incr: 0 } => write!(f, "UNPACR {src}"),
            Instr::Unpack { src, z_incr } => write!(f, "UNPACR {src} z+={z_incr}"),
            Instr::SetUnpackZ { src, face } => write!(f, "SETADCZW {src} z={face}"),
            Instr::Elw {
                op,
                bcast,
                rows,
                addr_mod,
            } => {
                write!(f, "{} rows={rows} MOD{}", op.mnemonic(), addr_mod.index())?;
                if *bcast != Broadcast::None {
                    write!(f, " bcast={bcast}")?;
                }
                Ok(())
            }
            Instr::MovA2D { rows, addr_mod } => {
                write!(f, "MOVA2D rows={rows} MOD{}", addr_mod.index())
            }
            Instr::IncRwc { addr_mod } => write!(f, "INCRWC MOD{}", addr_mod.index()),
            Instr::ClearSrc { which, addr_mod } => {
                write!(f, "CLEARDVALID {which:?} MOD{}", addr_mod.index())
            }
            Instr::ZeroAcc => f.write_str("ZEROACC"),
            Instr::Pack { faces, addr_mod } => {
                write!(f, "PACR faces={faces} MOD{}", addr_mod.index())
            }
            Instr::Nop => f.write_str("NOP"),
        }
    }
}
