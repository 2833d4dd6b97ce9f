// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Stall supervision for the three stage tasks.
//!
//! Stage loops spin on semaphores and never time out by themselves. The
//! watchdog gives the whole run one deadline; past it, the halt line is
//! asserted, every pending spin exits with `HwError::Halted`, and the
//! stage tasks wind down on their own.

use hw_context::{HwContext, StageId};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tracing::warn;

/// What supervising a set of stage tasks produced.
#[derive(Debug)]
pub struct Supervised<T> {
    /// Per-task results in the order the tasks were given.
    pub results: Vec<(StageId, Result<T, JoinError>)>,
    /// The deadline expired and the halt line was asserted.
    pub tripped: bool,
    /// Time from the start of supervision until the last task finished.
    pub elapsed: Duration,
}

/// Awaits `tasks`, halting `hw` if they have not all finished within
/// `limit`.
pub async fn supervise<T>(
    hw: &HwContext,
    limit: Duration,
    tasks: Vec<(StageId, JoinHandle<T>)>,
) -> Supervised<T> {
    let start = Instant::now();
    let deadline = start + limit;
    let mut tripped = false;
    let mut results = Vec::with_capacity(tasks.len());

    for (stage, mut handle) in tasks {
        let result = if tripped {
            handle.await
        } else {
            match timeout_at(deadline, &mut handle).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        %stage,
                        limit_ms = limit.as_millis() as u64,
                        "stage did not finish in time, halting core"
                    );
                    tripped = true;
                    hw.halt();
                    handle.await
                }
            }
        };
        results.push((stage, result));
    }

    Supervised {
        results,
        tripped,
        elapsed: start.elapsed(),
    }
}
