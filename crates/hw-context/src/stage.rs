// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use std::fmt;

/// The three execution stages. The discriminant is the thread id used to
/// index per-stage registers and mailboxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum StageId {
    Unpack = 0,
    Math = 1,
    Pack = 2,
}

impl StageId {
    pub const ALL: [StageId; 3] = [StageId::Unpack, StageId::Math, StageId::Pack];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Unpack => "unpack",
            StageId::Math => "math",
            StageId::Pack => "pack",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
