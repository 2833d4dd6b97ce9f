// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # hw-context
//!
//! The register-mapped control surface shared by the unpack, math and pack
//! stages, modelled as one explicit [`HwContext`] handle instead of
//! process-wide globals.
//!
//! # Key Components
//!
//! - [`ConfigSpace`] / [`ThreadConfig`]: the shared 32-bit configuration
//!   registers and each stage's private 16-bit registers. Offsets live in
//!   [`regs::cfg`] and [`regs::thread`].
//! - [`layout`]: bit-exact packed register values (tile descriptors,
//!   unpack/ALU/pack configuration, fidelity).
//! - [`AddrMod`] / [`PackAddrMod`]: address-modifier slot programs and the
//!   [`RwCounters`] they drive.
//! - [`SemaphoreBank`]: bounded counters with spin-only blocking.
//! - [`MailboxBank`]: single-slot per-stage message boxes.
//! - [`SrcRegister`] / [`DestRegister`]: operand and accumulator files.
//! - [`HaltLine`]: the external reset line that breaks stuck spins.
//! - [`EventLog`]: an ordered trace of hardware transitions.
//!
//! # Ownership Discipline
//!
//! ```text
//!   register                     single writer
//!   ─────────────────────────    ──────────────
//!   CFG_CONTEXT_OFFSET           unpack
//!   unpacker cfg block A/B       unpack
//!   ALU format / fidelity        math
//!   DEST_TARGET_OFFSET (math)    math
//!   pack config / PACK_*         pack
//!   address-modifier slots       owning stage, per operation slot map
//! ```
//!
//! Nothing enforces this table at runtime; last writer wins.

pub mod addrmod;
mod context;
mod error;
mod events;
pub mod layout;
mod mailbox;
mod regfile;
pub mod regs;
mod semaphore;
mod spin;
mod stage;

pub use addrmod::{
    AddrMod, AddrModSlot, BiasIncr, DestIncr, FidelityIncr, PackAddrMod, PackAddrModSlot,
    PackCounters, PackYIncr, PackZIncr, RwCounters, SrcIncr,
};
pub use context::{HwConfig, HwContext};
pub use error::HwError;
pub use events::{EventLog, HwEvent};
pub use mailbox::MailboxBank;
pub use regfile::{
    DestRegister, SrcOperand, SrcRegister, DEST_ROWS_16B, DEST_ROWS_32B, REG_COLS, SRC_ROWS,
};
pub use regs::{CfgAddr, ConfigSpace, ThreadConfig, ThreadReg};
pub use semaphore::{SemaphoreBank, SemaphoreId, SemaphoreStats};
pub use spin::{spin_until, HaltLine};
pub use stage::StageId;
