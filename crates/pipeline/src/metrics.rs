// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pipeline run metrics.
//!
//! Each stage counts its own work in a [`StageMetrics`]; the engine
//! gathers the three into a [`PipelineMetrics`] per run.

use hw_context::StageId;
use std::time::Duration;

/// Work done by one stage during a run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StageMetrics {
    pub stage: StageId,
    /// Tiles the stage finished.
    pub tiles: u64,
    /// MOP replays.
    pub mop_runs: u64,
    /// Instructions issued by MOP replays and directly.
    pub instructions: u64,
    /// Faces moved or computed.
    pub faces: u64,
    /// Semaphore posts made by this stage.
    pub sem_posts: u64,
    /// Semaphore gets made by this stage.
    pub sem_gets: u64,
    /// Config-context or dest-offset flips made by this stage.
    pub context_flips: u64,
    /// Wall-clock time inside the stage loop, spins included.
    pub busy: Duration,
}

impl StageMetrics {
    pub fn new(stage: StageId) -> Self {
        Self {
            stage,
            tiles: 0,
            mop_runs: 0,
            instructions: 0,
            faces: 0,
            sem_posts: 0,
            sem_gets: 0,
            context_flips: 0,
            busy: Duration::ZERO,
        }
    }

    pub(crate) fn record_run(&mut self, issued: u64) {
        self.mop_runs += 1;
        self.instructions += issued;
    }
}

/// Aggregate metrics for one engine run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineMetrics {
    /// Tiles pushed through all three stages.
    pub tile_count: u64,
    /// Wall-clock time of the whole run.
    pub total_duration: Duration,
    /// Spin iterations summed over every semaphore.
    pub semaphore_spins: u64,
    /// Per-stage metrics in unpack, math, pack order.
    pub stages: Vec<StageMetrics>,
}

impl PipelineMetrics {
    pub fn new(tile_count: u64) -> Self {
        Self {
            tile_count,
            total_duration: Duration::ZERO,
            semaphore_spins: 0,
            stages: Vec::with_capacity(3),
        }
    }

    pub fn record_stage(&mut self, metrics: StageMetrics) {
        self.stages.push(metrics);
        self.stages.sort_by_key(|m| m.stage.index());
    }

    pub fn finalise(&mut self, total: Duration, semaphore_spins: u64) {
        self.total_duration = total;
        self.semaphore_spins = semaphore_spins;
    }

    pub fn stage(&self, stage: StageId) -> Option<&StageMetrics> {
        self.stages.iter().find(|m| m.stage == stage)
    }

    /// Returns tile throughput.
    pub fn tiles_per_second(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs <= 0.0 || self.tile_count == 0 {
            return 0.0;
        }
        self.tile_count as f64 / secs
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Pipeline: {:.2}ms total, {} tiles ({:.1} tiles/s), {} semaphore spins",
            self.total_duration.as_secs_f64() * 1000.0,
            self.tile_count,
            self.tiles_per_second(),
            self.semaphore_spins,
        );
        for m in &self.stages {
            out.push_str(&format!(
                "\n  {:<6} {:>4} tiles, {:>4} mop runs, {:>6} instrs, {:>5} faces, \
                 {} posts / {} gets, {} flips, busy {:.2}ms",
                m.stage.as_str(),
                m.tiles,
                m.mop_runs,
                m.instructions,
                m.faces,
                m.sem_posts,
                m.sem_gets,
                m.context_flips,
                m.busy.as_secs_f64() * 1000.0,
            ));
        }
        out
    }
}
