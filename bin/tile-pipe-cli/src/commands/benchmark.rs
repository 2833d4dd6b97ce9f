// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `tile-pipe benchmark` command: compare dest sync modes and fidelities.
//!
//! Every combination gets a fresh engine and one staged workload; the
//! workload is then run `iterations` times and the mean wall time kept.

use super::{ready_engine, resolve, Resolved, Workload};
use crate::OpArgs;
use pipeline::{DestSync, MathFidelity, PipelineConfig, RuntimeParams};
use std::time::Duration;

struct BenchResult {
    sync: DestSync,
    fidelity: MathFidelity,
    per_section: u32,
    mean: Duration,
    tiles_per_sec: f64,
    instructions: u64,
    spins: u64,
}

pub async fn execute(
    config: PipelineConfig,
    args: OpArgs,
    tiles: u32,
    sweep_sync: String,
    sweep_fidelity: String,
    iterations: u32,
) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             tile-pipe · Benchmark Suite             ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let syncs: Vec<DestSync> = sweep_sync
        .split(',')
        .map(|s| s.trim().parse())
        .collect::<Result<_, _>>()?;
    let fidelities: Vec<MathFidelity> = sweep_fidelity
        .split(',')
        .map(|s| s.trim().parse())
        .collect::<Result<_, _>>()?;
    let base = resolve(config, &args)?;
    let iterations = iterations.max(1);

    println!("  Operation:  {} (broadcast {})", base.op.name(), base.op.broadcast());
    println!("  Tile:       {}", base.shape);
    println!("  Tiles:      {tiles} x {iterations} iteration(s)");
    println!();

    println!(
        "  {:<6} {:<8} {:>8} {:>10} {:>12} {:>10} {:>10}",
        "Sync", "Fidelity", "Tiles/s", "Mean", "Per section", "Instrs", "Spins",
    );
    println!("  {}", "-".repeat(80));

    let mut results = Vec::new();
    for &sync in &syncs {
        for &fidelity in &fidelities {
            let mut config = base.config.clone();
            config.dest_sync = sync;
            config.math_fidelity = fidelity;
            config.trace_events = false;
            let resolved = Resolved { config, ..base };

            match run_single(&resolved, tiles, iterations).await {
                Ok(r) => {
                    println!(
                        "  {:<6} {:<8} {:>8.0} {:>8.2}ms {:>12} {:>10} {:>10}",
                        r.sync.to_string(),
                        r.fidelity.to_string(),
                        r.tiles_per_sec,
                        r.mean.as_secs_f64() * 1000.0,
                        r.per_section,
                        r.instructions,
                        r.spins,
                    );
                    results.push(r);
                }
                Err(e) => {
                    println!(
                        "  {:<6} {:<8} {:>8}     FAILED: {e}",
                        sync.to_string(),
                        fidelity.to_string(),
                        "-",
                    );
                }
            }
        }
    }
    println!();

    // ── Summary ────────────────────────────────────────────────
    let Some(fastest) = results
        .iter()
        .max_by(|a, b| a.tiles_per_sec.total_cmp(&b.tiles_per_sec))
    else {
        println!("  No successful benchmark runs.");
        return Ok(());
    };
    let quietest = results.iter().min_by_key(|r| r.spins).unwrap_or(fastest);

    println!("  Summary:");
    println!(
        "   Fastest:        {} sync, {} ({:.0} tiles/s)",
        fastest.sync, fastest.fidelity, fastest.tiles_per_sec,
    );
    println!(
        "   Fewest spins:   {} sync, {} ({} spins)",
        quietest.sync, quietest.fidelity, quietest.spins,
    );
    println!();

    Ok(())
}

async fn run_single(r: &Resolved, tiles: u32, iterations: u32) -> anyhow::Result<BenchResult> {
    let engine = ready_engine(r)?;
    let per_section = engine.max_tiles_per_section();
    let params = RuntimeParams::new(tiles, per_section);
    let workload = Workload::stage(&engine, r.formats, r.shape, tiles)?;

    let mut total = Duration::ZERO;
    let mut instructions = 0;
    let mut spins = 0;
    for _ in 0..iterations {
        let output = engine.run(&params, &workload.jobs).await?;
        total += output.metrics.total_duration;
        instructions = output.metrics.stages.iter().map(|s| s.instructions).sum();
        spins += output.metrics.semaphore_spins;
    }

    let check = workload.verify(&engine, r.op)?;
    if check.wrong > 0 {
        anyhow::bail!("{} elements outside tolerance", check.wrong);
    }

    let mean = total / iterations;
    let secs = mean.as_secs_f64();
    Ok(BenchResult {
        sync: r.config.dest_sync,
        fidelity: r.config.math_fidelity,
        per_section,
        mean,
        tiles_per_sec: if secs > 0.0 { tiles as f64 / secs } else { 0.0 },
        instructions,
        spins: spins / iterations as u64,
    })
}
