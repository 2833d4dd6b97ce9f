// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The three execution stages and the dest-register section bookkeeping
//! math and pack share.

mod math;
mod pack;
mod unpack;

pub use math::{fidelity_product, MathUnit};
pub use pack::Packer;
pub use unpack::Unpacker;

use crate::config::DestSync;
use hw_context::{HwContext, HwEvent, StageId, DEST_ROWS_16B, DEST_ROWS_32B};
use tile_core::TileShape;
use tracing::trace;

/// One stage's view of which dest half it is on.
///
/// Math and pack each hold their own copy and flip it independently, at
/// the points the math/pack semaphore makes safe. Under `Full` sync the
/// id never moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestSection {
    id: u8,
    sync: DestSync,
}

impl DestSection {
    pub fn new(sync: DestSync) -> Self {
        Self { id: 0, sync }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn sync(&self) -> DestSync {
        self.sync
    }

    /// First dest row of the current section.
    pub fn base(&self, hw: &HwContext) -> u32 {
        match self.sync {
            DestSync::Half => self.id as u32 * hw.dest().half_rows(),
            DestSync::Full => 0,
        }
    }

    /// Rows in one section.
    pub fn rows(&self, hw: &HwContext) -> u32 {
        match self.sync {
            DestSync::Half => hw.dest().half_rows(),
            DestSync::Full => hw.dest().rows(),
        }
    }

    /// Moves to the other half under `Half` sync. Returns `true` if the id
    /// changed.
    pub fn flip(&mut self, hw: &HwContext, stage: StageId) -> bool {
        if self.sync != DestSync::Half {
            return false;
        }
        self.id ^= 1;
        trace!(%stage, id = self.id, "dest offset flip");
        hw.events().record(HwEvent::DestOffsetFlip { stage, id: self.id });
        true
    }

    pub fn reset(&mut self) {
        self.id = 0;
    }
}

/// Tiles one dest section holds for the given mode and tile shape.
pub fn dest_max_tiles(sync: DestSync, fp32_dest: bool, shape: &TileShape) -> u32 {
    let rows = (if fp32_dest { DEST_ROWS_32B } else { DEST_ROWS_16B }) as u32;
    let section = match sync {
        DestSync::Half => rows / 2,
        DestSync::Full => rows,
    };
    section / shape.dst_tile_shape().rows()
}

/// Dest rows reserved per tile slot.
pub(crate) fn slot_rows(shape: &TileShape) -> u32 {
    shape.dst_tile_shape().rows()
}
