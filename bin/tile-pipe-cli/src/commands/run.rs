// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `tile-pipe run` command: push a synthetic workload through the pipeline.
//!
//! ```text
//! PipelineEngine<Idle> → configure → <Configured> → init → <Ready> → run
//! ```

use super::{ready_engine, resolve, Workload};
use crate::OpArgs;
use pipeline::{PipelineConfig, RuntimeParams};

pub async fn execute(
    config: PipelineConfig,
    args: OpArgs,
    tiles: u32,
    per_section: Option<u32>,
    events: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut resolved = resolve(config, &args)?;
    resolved.config.trace_events |= events;

    let engine = ready_engine(&resolved)?;
    let max = engine.max_tiles_per_section();
    let params = RuntimeParams::new(tiles, per_section.unwrap_or(max).min(max));
    let workload = Workload::stage(&engine, resolved.formats, resolved.shape, tiles)?;
    tracing::debug!(tiles, per_section = params.tiles_per_section, "workload staged");

    let output = engine.run(&params, &workload.jobs).await?;
    let check = workload.verify(&engine, resolved.op)?;

    if json {
        let report = serde_json::json!({
            "op": resolved.op,
            "formats": resolved.formats,
            "shape": resolved.shape,
            "params": params,
            "metrics": output.metrics,
            "mismatches": check.wrong,
            "events": output.events,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║              tile-pipe · Pipeline Run               ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    println!("  Config:");
    println!("   Operation:   {} (broadcast {})", resolved.op.name(), resolved.op.broadcast());
    println!(
        "   Formats:     {} , {} → {}",
        resolved.formats.src_a, resolved.formats.src_b, resolved.formats.dst
    );
    println!("   Tile:        {}", resolved.shape);
    println!(
        "   Dest:        {} sync, fp32 {}, {} tiles/section (max {max})",
        resolved.config.dest_sync, resolved.config.fp32_dest_acc, params.tiles_per_section
    );
    println!("   Fidelity:    {}", resolved.config.math_fidelity);
    println!("   Contexts:    {}", resolved.config.unpack_contexts);
    println!();

    if events {
        println!("  Events:");
        for (i, event) in output.events.iter().enumerate() {
            println!("   {i:>5}  {event:?}");
        }
        println!();
    }

    println!("  Verification:");
    println!(
        "   {} elements checked, {} outside tolerance, max error {:.4}",
        check.checked, check.wrong, check.max_error
    );
    println!();

    println!("  {}", output.metrics.summary());
    println!();

    if check.wrong > 0 {
        anyhow::bail!("{} output elements differ from the reference", check.wrong);
    }
    Ok(())
}
