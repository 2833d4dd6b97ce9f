// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # l1-memory
//!
//! The flat on-chip memory that tiles are unpacked from and packed into.
//!
//! # Key Components
//!
//! - [`L1Address`]: the transformed `(byte >> 4) - 1` address form that
//!   every engine entry point takes.
//! - [`L1Region`]: the valid tile-data window above the reserved
//!   firmware area, with human-readable size parsing (`"1464K"`).
//! - [`L1Memory`]: a shared, bounds-checked byte image. Any access outside
//!   the window fails with `MemoryError::OutOfRangeAddress`.
//! - [`TileAllocator`]: bump placement of tile buffers for drivers and
//!   tests.
//! - [`AccessStats`]: read/write/reject counters.
//!
//! # Address Forms
//!
//! ```text
//!   byte address     0x10010 ──(>>4)-1──►  0x1000   transformed
//!                    ▲                       │
//!                    └──────(+1)<<4──────────┘
//! ```

mod address;
mod alloc;
mod error;
mod memory;
mod region;
mod stats;

pub use address::L1Address;
pub use alloc::{TileAllocator, TileBuffer, L1_ALIGN};
pub use error::MemoryError;
pub use memory::L1Memory;
pub use region::{parse_size, L1Region, MEM_L1_SIZE, MEM_MAP_END};
pub use stats::AccessStats;
