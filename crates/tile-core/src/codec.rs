// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host-side conversion between `f32` datums and L1 byte images.
//!
//! The pipeline computes on `f32` internally; these codecs are what the
//! unpacker and packer use to move datums in and out of L1 in the
//! configured format. Integer formats saturate.

use crate::{DataFormat, TileError};
use half::{bf16, f16};

/// Bytes per datum for formats with a host codec.
pub fn datum_bytes(format: DataFormat) -> Result<usize, TileError> {
    match format {
        DataFormat::Float32 | DataFormat::Int32 => Ok(4),
        DataFormat::Float16 | DataFormat::Float16B | DataFormat::UInt16 => Ok(2),
        DataFormat::Int8 | DataFormat::UInt8 => Ok(1),
        other => Err(TileError::NoCodec { format: other }),
    }
}

/// Returns `true` if datums can be moved in and out of `format`.
pub fn has_codec(format: DataFormat) -> bool {
    datum_bytes(format).is_ok()
}

/// Encodes `values` into `out` (little-endian), appending.
pub fn encode(format: DataFormat, values: &[f32], out: &mut Vec<u8>) -> Result<(), TileError> {
    let width = datum_bytes(format)?;
    out.reserve(values.len() * width);
    for &v in values {
        match format {
            DataFormat::Float32 => out.extend_from_slice(&v.to_le_bytes()),
            DataFormat::Int32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
            DataFormat::Float16 => out.extend_from_slice(&f16::from_f32(v).to_le_bytes()),
            DataFormat::Float16B => out.extend_from_slice(&bf16::from_f32(v).to_le_bytes()),
            DataFormat::UInt16 => out.extend_from_slice(&(v as u16).to_le_bytes()),
            DataFormat::Int8 => out.push((v as i8) as u8),
            DataFormat::UInt8 => out.push(v as u8),
            other => return Err(TileError::NoCodec { format: other }),
        }
    }
    Ok(())
}

/// Decodes a byte image into `f32` datums.
pub fn decode(format: DataFormat, bytes: &[u8]) -> Result<Vec<f32>, TileError> {
    let width = datum_bytes(format)?;
    if bytes.len() % width != 0 {
        return Err(TileError::BufferSizeMismatch {
            expected: bytes.len() / width * width,
            actual: bytes.len(),
        });
    }
    let values = bytes
        .chunks_exact(width)
        .map(|c| match format {
            DataFormat::Float32 => f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
            DataFormat::Int32 => i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32,
            DataFormat::Float16 => f16::from_le_bytes([c[0], c[1]]).to_f32(),
            DataFormat::Float16B => bf16::from_le_bytes([c[0], c[1]]).to_f32(),
            DataFormat::UInt16 => u16::from_le_bytes([c[0], c[1]]) as f32,
            DataFormat::Int8 => (c[0] as i8) as f32,
            // Only UInt8 is left after `datum_bytes`.
            _ => c[0] as f32,
        })
        .collect();
    Ok(values)
}

/// Rounds a value through `format` and back, giving what the hardware
/// would hold after a store.
pub fn quantize(format: DataFormat, v: f32) -> Result<f32, TileError> {
    let mut buf = Vec::with_capacity(4);
    encode(format, &[v], &mut buf)?;
    Ok(decode(format, &buf)?[0])
}

/// Absolute tolerance for comparing a computed value against an `f32`
/// reference of magnitude `reference` after a store in `format`.
pub fn tolerance(format: DataFormat, reference: f32) -> f32 {
    let rel = match format {
        DataFormat::Float32 | DataFormat::Tf32 => 1e-6,
        DataFormat::Float16 => 1e-3,
        DataFormat::Float16B => 8e-3,
        _ => 0.0,
    };
    if format.is_integer() {
        1.0
    } else {
        (reference.abs() * rel).max(rel)
    }
}
