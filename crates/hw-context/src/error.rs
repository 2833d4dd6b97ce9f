// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the hardware context.

use crate::{SemaphoreId, StageId};

/// Errors raised by the register-mapped control surface.
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    /// `post()` on a semaphore already at its maximum.
    #[error("semaphore {id:?} overflow: post past max {max}")]
    SemaphoreOverflow { id: SemaphoreId, max: u32 },

    /// `write()` into a mailbox whose previous message was never read.
    #[error("mailbox for {stage} overflow: pending message {pending:#x} not consumed")]
    MailboxOverflow { stage: StageId, pending: u32 },

    /// A spin-wait observed the halt line. The wait it was in never
    /// resolved on its own.
    #[error("core halted while waiting on {waiting_on}")]
    Halted { waiting_on: &'static str },

    /// An address-modifier slot index outside the bank.
    #[error("address-modifier slot {slot} out of range (bank has {bank_size})")]
    InvalidSlot { slot: u8, bank_size: u8 },

    /// A destination-register access past the end of the register file.
    #[error("destination rows {start}..{end} out of range ({rows} rows)")]
    DestOutOfRange { start: u32, end: u32, rows: u32 },

    /// A source-register access past the end of a bank.
    #[error("source rows {start}..{end} out of range ({rows} rows)")]
    SrcOutOfRange { start: u32, end: u32, rows: u32 },

    /// An address-modifier increment wider than its register field.
    #[error("{field} increment {incr} does not fit a {bits}-bit field")]
    IncrementOutOfRange { field: &'static str, incr: i32, bits: u8 },
}
