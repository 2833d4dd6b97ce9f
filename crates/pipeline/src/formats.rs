// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operand and output formats, and the formats each register file holds
//! them in.

use tile_core::DataFormat;

/// L1 formats of the two operands and the output tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Formats {
    pub src_a: DataFormat,
    pub src_b: DataFormat,
    pub dst: DataFormat,
}

impl Formats {
    pub fn new(src_a: DataFormat, src_b: DataFormat, dst: DataFormat) -> Self {
        Self { src_a, src_b, dst }
    }

    /// Same format everywhere.
    pub fn uniform(format: DataFormat) -> Self {
        Self::new(format, format, format)
    }

    /// Either operand or the output is an integer format.
    pub fn is_integer(&self) -> bool {
        self.src_a.is_integer() || self.src_b.is_integer() || self.dst.is_integer()
    }
}

impl Default for Formats {
    fn default() -> Self {
        Self::uniform(DataFormat::Float16B)
    }
}

/// Format the unpacker writes into a source register for an L1 format.
///
/// Source registers are 19 bits wide: fp32 lands as tf32 and block
/// floats are expanded to the 16-bit format of their exponent family.
pub fn src_register_format(l1: DataFormat) -> DataFormat {
    match l1 {
        DataFormat::Float32 => DataFormat::Tf32,
        f if f.is_bfp() && f.is_exp_b() => DataFormat::Float16B,
        f if f.is_bfp() => DataFormat::Float16,
        f => f,
    }
}

/// Format math accumulates in for a given output format.
pub fn dest_format(dst: DataFormat, fp32_dest: bool) -> DataFormat {
    if dst.is_integer() {
        DataFormat::Int32
    } else if fp32_dest {
        DataFormat::Float32
    } else if dst.is_exp_b() || dst == DataFormat::Float32 {
        DataFormat::Float16B
    } else {
        DataFormat::Float16
    }
}
