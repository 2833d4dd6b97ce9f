// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Packed register layouts.
//!
//! Each type mirrors one physical register (or register pair) bit for bit.
//! Fields are stored unpacked; `to_word(s)` and `from_word(s)` do the
//! packing with masks computed at compile time.
//!
//! ```text
//! TileDescriptor word 0:  [31:16] x_dim  [11:8] blobs_per_xy_plane
//!                         [4] uncompressed  [3:0] in_format
//! TileDescriptor word 1:  [31:16] z_dim  [15:0] y_dim
//! ```

/// A mask of `width` low bits.
pub const fn mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

/// Places `value` into a `width`-bit field at `shift`, truncating.
pub const fn field(value: u32, shift: u32, width: u32) -> u32 {
    (value & mask(width)) << shift
}

/// Extracts the `width`-bit field at `shift`.
pub const fn extract(word: u32, shift: u32, width: u32) -> u32 {
    (word >> shift) & mask(width)
}

/// Unpacker tile descriptor, two 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileDescriptor {
    pub in_format: u32,
    pub uncompressed: bool,
    pub blobs_per_xy_plane: u32,
    pub x_dim: u32,
    pub y_dim: u32,
    pub z_dim: u32,
}

impl TileDescriptor {
    pub const fn to_words(&self) -> [u32; 2] {
        [
            field(self.in_format, 0, 4)
                | field(self.uncompressed as u32, 4, 1)
                | field(self.blobs_per_xy_plane, 8, 4)
                | field(self.x_dim, 16, 16),
            field(self.y_dim, 0, 16) | field(self.z_dim, 16, 16),
        ]
    }

    pub const fn from_words(words: [u32; 2]) -> Self {
        Self {
            in_format: extract(words[0], 0, 4),
            uncompressed: extract(words[0], 4, 1) != 0,
            blobs_per_xy_plane: extract(words[0], 8, 4),
            x_dim: extract(words[0], 16, 16),
            y_dim: extract(words[1], 0, 16),
            z_dim: extract(words[1], 16, 16),
        }
    }
}

/// Unpacker output configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnpackConfig {
    pub out_format: u32,
    pub throttle: u32,
    pub context_count: u32,
    pub haloize: bool,
    pub tileize: bool,
}

impl UnpackConfig {
    pub const fn to_word(&self) -> u32 {
        field(self.out_format, 0, 4)
            | field(self.throttle, 4, 2)
            | field(self.context_count, 6, 2)
            | field(self.haloize as u32, 8, 1)
            | field(self.tileize as u32, 9, 1)
    }

    pub const fn from_word(word: u32) -> Self {
        Self {
            out_format: extract(word, 0, 4),
            throttle: extract(word, 4, 2),
            context_count: extract(word, 6, 2),
            haloize: extract(word, 8, 1) != 0,
            tileize: extract(word, 9, 1) != 0,
        }
    }
}

/// ALU source/destination format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AluConfig {
    pub srca_format: u32,
    pub srcb_format: u32,
    pub dst_format: u32,
    pub fp32_dest: bool,
    pub int8_math: bool,
}

impl AluConfig {
    pub const fn to_word(&self) -> u32 {
        field(self.srca_format, 0, 4)
            | field(self.srcb_format, 4, 4)
            | field(self.dst_format, 8, 4)
            | field(self.fp32_dest as u32, 12, 1)
            | field(self.int8_math as u32, 13, 1)
    }

    pub const fn from_word(word: u32) -> Self {
        Self {
            srca_format: extract(word, 0, 4),
            srcb_format: extract(word, 4, 4),
            dst_format: extract(word, 8, 4),
            fp32_dest: extract(word, 12, 1) != 0,
            int8_math: extract(word, 13, 1) != 0,
        }
    }
}

/// Packer format configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackConfig {
    pub in_format: u32,
    pub out_format: u32,
    pub l1_acc: bool,
}

impl PackConfig {
    pub const fn to_word(&self) -> u32 {
        field(self.in_format, 0, 4) | field(self.out_format, 4, 4) | field(self.l1_acc as u32, 8, 1)
    }

    pub const fn from_word(word: u32) -> Self {
        Self {
            in_format: extract(word, 0, 4),
            out_format: extract(word, 4, 4),
            l1_acc: extract(word, 8, 1) != 0,
        }
    }
}

/// Packer tile geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackTileDims {
    pub face_rows: u32,
    pub num_faces: u32,
    pub narrow: bool,
}

impl PackTileDims {
    pub const fn to_word(&self) -> u32 {
        field(self.face_rows, 0, 8) | field(self.num_faces, 8, 8) | field(self.narrow as u32, 16, 1)
    }

    pub const fn from_word(word: u32) -> Self {
        Self {
            face_rows: extract(word, 0, 8),
            num_faces: extract(word, 8, 8),
            narrow: extract(word, 16, 1) != 0,
        }
    }
}

/// Math fidelity control: how many multiply passes a phase sweep takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FidelityConfig {
    pub phases: u32,
    pub increment: bool,
}

impl FidelityConfig {
    pub const fn to_word(&self) -> u32 {
        field(self.phases, 0, 3) | field(self.increment as u32, 3, 1)
    }

    pub const fn from_word(word: u32) -> Self {
        Self {
            phases: extract(word, 0, 3),
            increment: extract(word, 3, 1) != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_and_field() {
        assert_eq!(mask(4), 0xF);
        assert_eq!(mask(32), u32::MAX);
        assert_eq!(field(0x1F, 4, 4), 0xF0);
        assert_eq!(extract(0xABCD, 4, 8), 0xBC);
    }

    #[test]
    fn test_tile_descriptor_bit_positions() {
        let desc = TileDescriptor {
            in_format: 5,
            uncompressed: true,
            blobs_per_xy_plane: 0,
            x_dim: 256,
            y_dim: 1,
            z_dim: 4,
        };
        let words = desc.to_words();
        assert_eq!(words[0], 0x0100_0015);
        assert_eq!(words[1], 0x0004_0001);
        assert_eq!(TileDescriptor::from_words(words), desc);
    }

    #[test]
    fn test_unpack_config_truncates_wide_fields() {
        let cfg = UnpackConfig {
            out_format: 0x15,
            throttle: 2,
            context_count: 1,
            haloize: false,
            tileize: true,
        };
        let word = cfg.to_word();
        assert_eq!(word, 0x5 | (2 << 4) | (1 << 6) | (1 << 9));
        assert_eq!(UnpackConfig::from_word(word).out_format, 0x5);
    }

    #[test]
    fn test_alu_config_flags() {
        let cfg = AluConfig {
            srca_format: 14,
            srcb_format: 14,
            dst_format: 8,
            fp32_dest: false,
            int8_math: true,
        };
        let word = cfg.to_word();
        assert_eq!(word >> 13, 1);
        assert_eq!(AluConfig::from_word(word), cfg);
    }

    #[test]
    fn test_pack_and_fidelity_words() {
        let dims = PackTileDims {
            face_rows: 16,
            num_faces: 2,
            narrow: true,
        };
        assert_eq!(dims.to_word(), 0x0001_0210);
        let fid = FidelityConfig {
            phases: 4,
            increment: true,
        };
        assert_eq!(fid.to_word(), 0xC);
        assert_eq!(FidelityConfig::from_word(0xC), fid);
        let pack = PackConfig {
            in_format: 0,
            out_format: 5,
            l1_acc: false,
        };
        assert_eq!(PackConfig::from_word(pack.to_word()), pack);
    }
}
