// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tile and face geometry.

use crate::{DataFormat, TileError};
use std::fmt;

/// Hardware-fixed face width in datums.
pub const FACE_C_DIM: u8 = 16;

/// Largest face height in rows.
pub const FACE_R_DIM: u8 = 16;

/// Legal face heights.
pub const LEGAL_FACE_ROWS: [u8; 5] = [1, 2, 4, 8, 16];

/// Describes how a tile decomposes into faces.
///
/// A tile is a `faces_per_col × faces_per_row` grid of faces, each
/// `face_rows × face_cols` datums. Faces are stored in L1 and in the
/// destination register back to back, row-major over the face grid.
///
/// ```text
///   32x32 tile               32x16 tile        16x32 tile
///  ┌────────┬────────┐      ┌────────┐        ┌────────┬────────┐
///  │ face 0 │ face 1 │      │ face 0 │        │ face 0 │ face 1 │
///  ├────────┼────────┤      ├────────┤        └────────┴────────┘
///  │ face 2 │ face 3 │      │ face 1 │
///  └────────┴────────┘      └────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TileShape {
    face_rows: u8,
    face_cols: u8,
    faces_per_row: u8,
    faces_per_col: u8,
}

impl TileShape {
    /// Four 16x16 faces.
    pub const TILE_32X32: TileShape = TileShape::unchecked(16, 2, 2);
    /// Two 16x16 faces stacked vertically.
    pub const TILE_32X16: TileShape = TileShape::unchecked(16, 1, 2);
    /// Two 16x16 faces side by side.
    pub const TILE_16X32: TileShape = TileShape::unchecked(16, 2, 1);
    /// A single 16x16 face.
    pub const TILE_16X16: TileShape = TileShape::unchecked(16, 1, 1);

    const fn unchecked(face_rows: u8, faces_per_row: u8, faces_per_col: u8) -> Self {
        Self {
            face_rows,
            face_cols: FACE_C_DIM,
            faces_per_row,
            faces_per_col,
        }
    }

    /// Creates and validates a tile shape.
    ///
    /// # Examples
    /// ```
    /// use tile_core::TileShape;
    /// let t = TileShape::new(16, 16, 2, 2).unwrap();
    /// assert_eq!(t.num_faces(), 4);
    /// assert_eq!((t.total_rows(), t.total_cols()), (32, 32));
    ///
    /// assert!(TileShape::new(3, 16, 2, 2).is_err());
    /// ```
    pub fn new(
        face_rows: u8,
        face_cols: u8,
        faces_per_row: u8,
        faces_per_col: u8,
    ) -> Result<Self, TileError> {
        let shape = Self {
            face_rows,
            face_cols,
            faces_per_row,
            faces_per_col,
        };
        shape.validate()?;
        Ok(shape)
    }

    /// Builds a shape from a face height and a total face count, laying the
    /// faces out the way the hardware does: one face per row of the face
    /// grid unless the tile is four faces.
    pub fn from_faces(face_rows: u8, num_faces: u8) -> Result<Self, TileError> {
        let (per_row, per_col) = match num_faces {
            1 => (1, 1),
            2 => (1, 2),
            4 => (2, 2),
            other => {
                return Err(TileError::GeometryViolation {
                    field: "num_faces",
                    value: other as u32,
                    allowed: "{1, 2, 4}",
                })
            }
        };
        Self::new(face_rows, FACE_C_DIM, per_row, per_col)
    }

    /// Checks every geometry field against the legal hardware sets.
    ///
    /// Must be called by anything that programs hardware from this shape;
    /// constructors already call it, but a shape can also arrive through
    /// deserialization.
    pub fn validate(&self) -> Result<(), TileError> {
        if !LEGAL_FACE_ROWS.contains(&self.face_rows) {
            return Err(TileError::GeometryViolation {
                field: "face_rows",
                value: self.face_rows as u32,
                allowed: "{1, 2, 4, 8, 16}",
            });
        }
        if self.face_cols != FACE_C_DIM {
            return Err(TileError::GeometryViolation {
                field: "face_cols",
                value: self.face_cols as u32,
                allowed: "{16}",
            });
        }
        if self.faces_per_row == 0 || self.faces_per_col == 0 {
            return Err(TileError::GeometryViolation {
                field: "faces_per_row/faces_per_col",
                value: 0,
                allowed: "positive",
            });
        }
        let faces = self.num_faces();
        if !matches!(faces, 1 | 2 | 4) {
            return Err(TileError::GeometryViolation {
                field: "num_faces",
                value: faces,
                allowed: "{1, 2, 4}",
            });
        }
        Ok(())
    }

    pub fn face_rows(&self) -> u32 {
        self.face_rows as u32
    }

    pub fn face_cols(&self) -> u32 {
        self.face_cols as u32
    }

    pub fn faces_per_row(&self) -> u32 {
        self.faces_per_row as u32
    }

    pub fn faces_per_col(&self) -> u32 {
        self.faces_per_col as u32
    }

    /// Total number of faces.
    pub fn num_faces(&self) -> u32 {
        self.faces_per_row as u32 * self.faces_per_col as u32
    }

    /// Total tile rows.
    pub fn total_rows(&self) -> u32 {
        self.face_rows as u32 * self.faces_per_col as u32
    }

    /// Total tile columns.
    pub fn total_cols(&self) -> u32 {
        self.face_cols as u32 * self.faces_per_row as u32
    }

    /// Datums per face.
    pub fn face_elements(&self) -> usize {
        self.face_rows as usize * self.face_cols as usize
    }

    /// Datums per tile.
    pub fn num_elements(&self) -> usize {
        self.total_rows() as usize * self.total_cols() as usize
    }

    /// A narrow tile is a single face wide.
    pub fn is_narrow(&self) -> bool {
        self.faces_per_row == 1
    }

    /// A partial face is shorter than 16 rows.
    pub fn is_partial_face(&self) -> bool {
        self.face_rows < FACE_R_DIM
    }

    /// Byte offset of face `face` inside an L1 tile of the given format.
    ///
    /// For BFP formats this is the offset into the mantissa section.
    pub fn face_offset_bytes(&self, face: u32, format: DataFormat) -> usize {
        face as usize * self.face_elements() * format.datum_bits() as usize / 8
    }

    /// Memory footprint of the tile in L1 for a given format.
    pub fn size_bytes(&self, format: DataFormat) -> usize {
        format.tile_size_bytes(self)
    }

    /// Matching destination-register slot layout.
    pub fn dst_tile_shape(&self) -> DstTileShape {
        match self.num_faces() {
            4 => DstTileShape::Tile32x32,
            2 => DstTileShape::Tile32x16,
            _ => DstTileShape::Tile16x16,
        }
    }
}

impl Default for TileShape {
    fn default() -> Self {
        Self::TILE_32X32
    }
}

impl fmt::Display for TileShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} ({} face{} of {}x{})",
            self.total_rows(),
            self.total_cols(),
            self.num_faces(),
            if self.num_faces() == 1 { "" } else { "s" },
            self.face_rows,
            self.face_cols,
        )
    }
}

/// Layout of one tile slot in the destination register file.
///
/// Slots are always sized for full 16-row faces, so a partial-face tile
/// still occupies a whole slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DstTileShape {
    Tile32x32,
    Tile32x16,
    Tile16x16,
}

impl DstTileShape {
    /// log2 of destination rows per tile slot.
    pub fn rows_log2(self) -> u32 {
        match self {
            DstTileShape::Tile32x32 => 6,
            DstTileShape::Tile32x16 => 5,
            DstTileShape::Tile16x16 => 4,
        }
    }

    /// Destination rows per tile slot.
    pub fn rows(self) -> u32 {
        1 << self.rows_log2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_named_shapes_are_valid() {
        for t in [
            TileShape::TILE_32X32,
            TileShape::TILE_32X16,
            TileShape::TILE_16X32,
            TileShape::TILE_16X16,
        ] {
            t.validate().unwrap();
        }
        assert_eq!(TileShape::TILE_32X16.total_rows(), 32);
        assert_eq!(TileShape::TILE_32X16.total_cols(), 16);
        assert_eq!(TileShape::TILE_16X32.total_cols(), 32);
    }

    #[test]
    fn test_rejects_three_faces() {
        let err = TileShape::new(16, 16, 3, 1).unwrap_err();
        assert!(matches!(
            err,
            TileError::GeometryViolation { field: "num_faces", value: 3, .. }
        ));
    }

    #[test]
    fn test_rejects_face_rows_three() {
        let err = TileShape::new(3, 16, 2, 2).unwrap_err();
        assert!(matches!(
            err,
            TileError::GeometryViolation { field: "face_rows", value: 3, .. }
        ));
    }

    #[test]
    fn test_rejects_face_cols() {
        let err = TileShape::new(16, 8, 2, 2).unwrap_err();
        assert!(matches!(
            err,
            TileError::GeometryViolation { field: "face_cols", value: 8, .. }
        ));
    }

    #[test]
    fn test_rejects_zero_faces() {
        assert!(TileShape::new(16, 16, 0, 2).is_err());
    }

    #[test]
    fn test_from_faces() {
        let t = TileShape::from_faces(8, 2).unwrap();
        assert_eq!(t.faces_per_row(), 1);
        assert_eq!(t.faces_per_col(), 2);
        assert!(t.is_narrow());
        assert!(t.is_partial_face());
        assert!(TileShape::from_faces(16, 3).is_err());
    }

    #[test]
    fn test_face_offsets() {
        let t = TileShape::TILE_32X32;
        assert_eq!(t.face_offset_bytes(0, DataFormat::Float16B), 0);
        assert_eq!(t.face_offset_bytes(1, DataFormat::Float16B), 512);
        assert_eq!(t.face_offset_bytes(3, DataFormat::Float32), 3 * 1024);
    }

    #[test]
    fn test_dst_tile_shape() {
        assert_eq!(TileShape::TILE_32X32.dst_tile_shape().rows(), 64);
        assert_eq!(TileShape::TILE_32X16.dst_tile_shape().rows_log2(), 5);
        let tiny = TileShape::from_faces(1, 1).unwrap();
        assert_eq!(tiny.dst_tile_shape(), DstTileShape::Tile16x16);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            TileShape::TILE_32X32.to_string(),
            "32x32 (4 faces of 16x16)"
        );
        assert_eq!(
            TileShape::TILE_16X16.to_string(),
            "16x16 (1 face of 16x16)"
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let t = TileShape::new(8, 16, 2, 2).unwrap();
        let json = serde_json::to_string(&t).unwrap();
        let back: TileShape = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn test_deserialized_shape_can_be_invalid() {
        let json = r#"{"face_rows":3,"face_cols":16,"faces_per_row":2,"faces_per_col":2}"#;
        let t: TileShape = serde_json::from_str(json).unwrap();
        assert!(t.validate().is_err());
    }

    fn legal_shape() -> impl Strategy<Value = TileShape> {
        (
            prop::sample::select(LEGAL_FACE_ROWS.to_vec()),
            prop::sample::select(vec![(1u8, 1u8), (1, 2), (2, 1), (2, 2)]),
        )
            .prop_map(|(rows, (per_row, per_col))| {
                TileShape::new(rows, FACE_C_DIM, per_row, per_col).unwrap()
            })
    }

    proptest! {
        #[test]
        fn prop_valid_shape_invariants(t in legal_shape()) {
            prop_assert!(matches!(t.num_faces(), 1 | 2 | 4));
            let product = t.face_rows() * t.face_cols() * t.faces_per_row() * t.faces_per_col();
            prop_assert_eq!(t.total_rows() * t.total_cols(), product);
            prop_assert_eq!(t.num_elements(), product as usize);
        }

        #[test]
        fn prop_invalid_shapes_rejected(
            rows in 0u8..=32,
            cols in 0u8..=32,
            per_row in 0u8..=4,
            per_col in 0u8..=4,
        ) {
            let legal = LEGAL_FACE_ROWS.contains(&rows)
                && cols == FACE_C_DIM
                && matches!(per_row as u32 * per_col as u32, 1 | 2 | 4);
            let result = TileShape::new(rows, cols, per_row, per_col);
            prop_assert_eq!(result.is_ok(), legal);
            if let Err(e) = result {
                prop_assert!(matches!(e, TileError::GeometryViolation { .. }), "unexpected error kind");
            }
        }
    }
}
