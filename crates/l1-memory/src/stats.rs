// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Access statistics for L1.

/// Cumulative counters for L1 traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct AccessStats {
    /// Successful reads.
    pub reads: u64,
    /// Successful writes.
    pub writes: u64,
    /// Bytes returned by reads.
    pub bytes_read: u64,
    /// Bytes stored by writes.
    pub bytes_written: u64,
    /// Accesses refused by the bounds check.
    pub rejected: u64,
}

impl AccessStats {
    pub(crate) fn record_read(&mut self, len: usize) {
        self.reads += 1;
        self.bytes_read += len as u64;
    }

    pub(crate) fn record_write(&mut self, len: usize) {
        self.writes += 1;
        self.bytes_written += len as u64;
    }

    pub(crate) fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "L1: {} reads ({:.1} KB), {} writes ({:.1} KB), {} rejected",
            self.reads,
            self.bytes_read as f64 / 1024.0,
            self.writes,
            self.bytes_written as f64 / 1024.0,
            self.rejected,
        )
    }
}
