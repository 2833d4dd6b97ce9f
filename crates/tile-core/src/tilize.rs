// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Conversion between row-major tiles and face order.
//!
//! The hardware stores a tile face by face. A 32x32 tile in face order is
//! face 0 (rows 0-15, cols 0-15), face 1 (rows 0-15, cols 16-31), face 2,
//! face 3; each face row-major.

use crate::{TileError, TileShape};
use ndarray::{s, Array2, ArrayView2};

/// Flattens a row-major tile into face order.
pub fn tilize(shape: &TileShape, tile: ArrayView2<'_, f32>) -> Result<Vec<f32>, TileError> {
    let (rows, cols) = (shape.total_rows() as usize, shape.total_cols() as usize);
    if tile.dim() != (rows, cols) {
        return Err(TileError::BufferSizeMismatch {
            expected: rows * cols,
            actual: tile.len(),
        });
    }
    let (fr, fc) = (shape.face_rows() as usize, shape.face_cols() as usize);
    let mut out = Vec::with_capacity(rows * cols);
    for face_row in 0..shape.faces_per_col() as usize {
        for face_col in 0..shape.faces_per_row() as usize {
            let face = tile.slice(s![
                face_row * fr..(face_row + 1) * fr,
                face_col * fc..(face_col + 1) * fc
            ]);
            out.extend(face.iter().copied());
        }
    }
    Ok(out)
}

/// Rebuilds a row-major tile from face-ordered datums.
pub fn untilize(shape: &TileShape, faces: &[f32]) -> Result<Array2<f32>, TileError> {
    let (rows, cols) = (shape.total_rows() as usize, shape.total_cols() as usize);
    if faces.len() != rows * cols {
        return Err(TileError::BufferSizeMismatch {
            expected: rows * cols,
            actual: faces.len(),
        });
    }
    let (fr, fc) = (shape.face_rows() as usize, shape.face_cols() as usize);
    let mut tile = Array2::<f32>::zeros((rows, cols));
    for (idx, chunk) in faces.chunks_exact(shape.face_elements()).enumerate() {
        let face_row = idx / shape.faces_per_row() as usize;
        let face_col = idx % shape.faces_per_row() as usize;
        let face = ArrayView2::from_shape((fr, fc), chunk).map_err(|_| {
            TileError::BufferSizeMismatch {
                expected: fr * fc,
                actual: chunk.len(),
            }
        })?;
        tile.slice_mut(s![
            face_row * fr..(face_row + 1) * fr,
            face_col * fc..(face_col + 1) * fc
        ])
        .assign(&face);
    }
    Ok(tile)
}
