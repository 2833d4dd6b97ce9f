// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tile geometry and numeric formats.

use crate::DataFormat;

/// Errors raised by tile geometry validation and tile codecs.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    /// A tile or face dimension falls outside the legal hardware set.
    #[error("geometry violation: {field} = {value}, allowed {allowed}")]
    GeometryViolation {
        field: &'static str,
        value: u32,
        allowed: &'static str,
    },

    /// A raw format code does not name any known numeric format.
    #[error("unsupported data format code {code}")]
    UnsupportedFormat { code: u32 },

    /// The format can be sized and programmed, but the host codec cannot
    /// move datums in or out of it.
    #[error("no host codec for data format {format}")]
    NoCodec { format: DataFormat },

    /// A byte or datum buffer does not match the expected face/tile size.
    #[error("buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// A format name could not be parsed.
    #[error("cannot parse data format '{0}'")]
    ParseFormat(String),
}
