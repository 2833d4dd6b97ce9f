// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tile-core
//!
//! Tile geometry and numeric formats for the tensor core pipeline.
//!
//! This crate provides:
//! - [`TileShape`]: how a tile decomposes into 16-column faces, with
//!   validation against the legal hardware geometry.
//! - [`DstTileShape`]: the destination-register slot a tile occupies.
//! - [`DataFormat`]: the numeric formats understood by the unpacker, math
//!   unit and packer, with their register codes and L1 tile sizes.
//! - [`codec`]: host conversion between `f32` datums and L1 byte images.
//! - [`tilize`] / [`untilize`]: row-major tile ↔ face order.
//!
//! Everything here is pure data and validation; nothing touches hardware
//! state.

pub mod codec;
mod error;
mod format;
mod shape;
mod tilize;

pub use error::TileError;
pub use format::DataFormat;
pub use shape::{DstTileShape, TileShape, FACE_C_DIM, FACE_R_DIM, LEGAL_FACE_ROWS};
pub use tilize::{tilize, untilize};
