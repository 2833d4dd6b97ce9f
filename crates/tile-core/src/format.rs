// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Numeric data formats understood by the unpacker, math unit and packer.

use crate::{TileError, TileShape};
use std::fmt;
use std::str::FromStr;

/// Enumerates the numeric formats a tile can be stored in.
///
/// The discriminants are the 4/5-bit codes written into the format fields
/// of the tile-descriptor, ALU and packer configuration registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum DataFormat {
    Float32 = 0,
    Float16 = 1,
    Bfp8 = 2,
    Bfp4 = 3,
    Tf32 = 4,
    #[serde(rename = "Float16_b")]
    Float16B = 5,
    #[serde(rename = "Bfp8_b")]
    Bfp8B = 6,
    #[serde(rename = "Bfp4_b")]
    Bfp4B = 7,
    Int32 = 8,
    UInt16 = 9,
    Lf8 = 10,
    Bfp2 = 11,
    Int8 = 14,
    #[serde(rename = "Bfp2_b")]
    Bfp2B = 15,
    UInt8 = 30,
}

const ALL_FORMATS: [DataFormat; 15] = [
    DataFormat::Float32,
    DataFormat::Float16,
    DataFormat::Bfp8,
    DataFormat::Bfp4,
    DataFormat::Tf32,
    DataFormat::Float16B,
    DataFormat::Bfp8B,
    DataFormat::Bfp4B,
    DataFormat::Int32,
    DataFormat::UInt16,
    DataFormat::Lf8,
    DataFormat::Bfp2,
    DataFormat::Int8,
    DataFormat::Bfp2B,
    DataFormat::UInt8,
];

impl DataFormat {
    /// Returns the hardware format code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Looks up a format by its hardware code.
    pub fn from_code(code: u32) -> Result<Self, TileError> {
        ALL_FORMATS
            .iter()
            .copied()
            .find(|f| f.code() == code)
            .ok_or(TileError::UnsupportedFormat { code })
    }

    /// Returns every known format, in code order.
    pub fn all() -> &'static [DataFormat] {
        &ALL_FORMATS
    }

    /// Bits per datum in L1, excluding shared BFP exponents.
    pub fn datum_bits(self) -> u32 {
        match self {
            DataFormat::Float32 | DataFormat::Int32 | DataFormat::Tf32 => 32,
            DataFormat::Float16 | DataFormat::Float16B | DataFormat::UInt16 => 16,
            DataFormat::Bfp8
            | DataFormat::Bfp8B
            | DataFormat::Int8
            | DataFormat::UInt8
            | DataFormat::Lf8 => 8,
            DataFormat::Bfp4 | DataFormat::Bfp4B => 4,
            DataFormat::Bfp2 | DataFormat::Bfp2B => 2,
        }
    }

    /// Returns `true` for block floating point formats (shared exponent per
    /// 16 datums).
    pub fn is_bfp(self) -> bool {
        matches!(
            self,
            DataFormat::Bfp8
                | DataFormat::Bfp8B
                | DataFormat::Bfp4
                | DataFormat::Bfp4B
                | DataFormat::Bfp2
                | DataFormat::Bfp2B
        )
    }

    /// Returns `true` for the 8-bit-exponent ("b") family.
    pub fn is_exp_b(self) -> bool {
        matches!(
            self,
            DataFormat::Float16B
                | DataFormat::Bfp8B
                | DataFormat::Bfp4B
                | DataFormat::Bfp2B
                | DataFormat::Float32
                | DataFormat::Tf32
        )
    }

    /// Returns `true` for integer formats.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataFormat::Int32 | DataFormat::UInt16 | DataFormat::Int8 | DataFormat::UInt8
        )
    }

    /// Datum stride in bytes of the unpacker output written to the source
    /// registers: 4 for Float32, 2 for Float16, 1 otherwise.
    ///
    /// Only the low two code bits select the stride, matching the register
    /// encoding, so Int32 and Tf32 land on 1 as well.
    pub fn x_stride(self) -> u32 {
        match self.code() & 0x3 {
            0 => 4,
            1 => 2,
            _ => 1,
        }
    }

    /// Size of a headerless tile in L1, in 16-byte units.
    ///
    /// BFP formats carry one shared exponent byte per 16 datums, stored in
    /// a separate section ahead of the mantissas.
    pub fn tile_size_16b(self, shape: &TileShape) -> u32 {
        let elements = shape.num_elements() as u32;
        let data_bytes = elements * self.datum_bits() / 8;
        let exp_bytes = if self.is_bfp() { elements / 16 } else { 0 };
        (data_bytes + exp_bytes).div_ceil(16)
    }

    /// Size of a headerless tile in L1, in bytes.
    pub fn tile_size_bytes(self, shape: &TileShape) -> usize {
        self.tile_size_16b(shape) as usize * 16
    }

    /// Returns a human-readable label for this format.
    pub fn as_str(self) -> &'static str {
        match self {
            DataFormat::Float32 => "Float32",
            DataFormat::Float16 => "Float16",
            DataFormat::Bfp8 => "Bfp8",
            DataFormat::Bfp4 => "Bfp4",
            DataFormat::Tf32 => "Tf32",
            DataFormat::Float16B => "Float16_b",
            DataFormat::Bfp8B => "Bfp8_b",
            DataFormat::Bfp4B => "Bfp4_b",
            DataFormat::Int32 => "Int32",
            DataFormat::UInt16 => "UInt16",
            DataFormat::Lf8 => "Lf8",
            DataFormat::Bfp2 => "Bfp2",
            DataFormat::Int8 => "Int8",
            DataFormat::Bfp2B => "Bfp2_b",
            DataFormat::UInt8 => "UInt8",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive; accepts both `Float16_b` and `bf16`-style aliases.
impl FromStr for DataFormat {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let alias = match key.as_str() {
            "fp32" | "f32" => Some(DataFormat::Float32),
            "fp16" | "f16" => Some(DataFormat::Float16),
            "bf16" | "fp16_b" => Some(DataFormat::Float16B),
            "i32" => Some(DataFormat::Int32),
            "u16" => Some(DataFormat::UInt16),
            "i8" => Some(DataFormat::Int8),
            "u8" => Some(DataFormat::UInt8),
            _ => None,
        };
        if let Some(f) = alias {
            return Ok(f);
        }
        ALL_FORMATS
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(&key))
            .ok_or_else(|| TileError::ParseFormat(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for &f in DataFormat::all() {
            assert_eq!(DataFormat::from_code(f.code()).unwrap(), f);
        }
        assert!(DataFormat::from_code(12).is_err());
    }

    #[test]
    fn test_full_tile_sizes() {
        let t = TileShape::TILE_32X32;
        assert_eq!(DataFormat::Float32.tile_size_16b(&t), 4096 >> 4);
        assert_eq!(DataFormat::Int32.tile_size_16b(&t), 4096 >> 4);
        assert_eq!(DataFormat::Float16.tile_size_16b(&t), 2048 >> 4);
        assert_eq!(DataFormat::Float16B.tile_size_16b(&t), 2048 >> 4);
        assert_eq!(DataFormat::Bfp8B.tile_size_16b(&t), (1024 >> 4) + (64 >> 4));
        assert_eq!(DataFormat::Bfp4.tile_size_16b(&t), (512 >> 4) + 4);
        assert_eq!(DataFormat::Bfp2B.tile_size_16b(&t), (256 >> 4) + 4);
        assert_eq!(DataFormat::Int8.tile_size_16b(&t), 1024 >> 4);
        assert_eq!(DataFormat::Lf8.tile_size_16b(&t), 1024 >> 4);
    }

    #[test]
    fn test_partial_tile_size_rounds_up() {
        let t = TileShape::new(1, 16, 1, 1).unwrap();
        // 16 bfp8 datums + 1 exponent byte = 17 bytes -> two 16B units.
        assert_eq!(DataFormat::Bfp8.tile_size_16b(&t), 2);
    }

    #[test]
    fn test_x_stride() {
        assert_eq!(DataFormat::Float32.x_stride(), 4);
        assert_eq!(DataFormat::Float16.x_stride(), 2);
        assert_eq!(DataFormat::Float16B.x_stride(), 1);
        assert_eq!(DataFormat::Bfp8.x_stride(), 1);
    }

    #[test]
    fn test_parse() {
        assert_eq!("float16_b".parse::<DataFormat>().unwrap(), DataFormat::Float16B);
        assert_eq!("bf16".parse::<DataFormat>().unwrap(), DataFormat::Float16B);
        assert_eq!("Bfp8_b".parse::<DataFormat>().unwrap(), DataFormat::Bfp8B);
        assert_eq!("fp32".parse::<DataFormat>().unwrap(), DataFormat::Float32);
        assert!("float64".parse::<DataFormat>().is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        for &f in DataFormat::all() {
            assert_eq!(f.to_string().parse::<DataFormat>().unwrap(), f);
        }
    }

    #[test]
    fn test_families() {
        assert!(DataFormat::Bfp4B.is_bfp());
        assert!(!DataFormat::Float16B.is_bfp());
        assert!(DataFormat::Float16B.is_exp_b());
        assert!(!DataFormat::Float16.is_exp_b());
        assert!(DataFormat::UInt8.is_integer());
    }
}
