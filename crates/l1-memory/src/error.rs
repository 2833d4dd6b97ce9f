// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for on-chip memory access.

/// Errors that can occur when addressing or allocating L1.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The access falls outside the valid tile-data window.
    #[error("out of range L1 address: {len} bytes at {addr:#x} outside [{start:#x}, {end:#x})")]
    OutOfRangeAddress {
        addr: u32,
        len: usize,
        start: u32,
        end: u32,
    },

    /// The address is not aligned to a 16-byte L1 word.
    #[error("misaligned L1 address {addr:#x}: must be 16-byte aligned")]
    Misaligned { addr: u32 },

    /// The tile allocator has no room left for the request.
    #[error("L1 region exhausted: requested {requested_bytes} bytes, {available_bytes} available")]
    RegionExhausted {
        requested_bytes: usize,
        available_bytes: usize,
    },

    /// A region or size string is malformed.
    #[error("invalid L1 region: {0}")]
    InvalidRegion(String),
}
