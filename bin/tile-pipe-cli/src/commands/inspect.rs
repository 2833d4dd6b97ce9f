// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `tile-pipe inspect` command: show what each stage programs for an
//! operation without running it.
//!
//! The three stage kernels are configured and initialised on a private
//! hardware context; the command then decodes the configuration space,
//! the address modifiers and the MOP program of every stage.

use super::resolve;
use crate::OpArgs;
use hw_context::layout::{AluConfig, FidelityConfig, PackConfig, PackTileDims, TileDescriptor};
use hw_context::regs::{cfg, thread};
use hw_context::{
    AddrMod, AddrModSlot, HwConfig, HwContext, PackAddrMod, PackAddrModSlot, StageId,
};
use pipeline::{
    dest_max_tiles, DestSync, KernelSetup, MathUnit, Packer, PipelineConfig, StageKernel, Unpacker,
};

pub async fn execute(config: PipelineConfig, args: OpArgs) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             tile-pipe · Kernel Inspector            ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let r = resolve(config, &args)?;
    let setup = KernelSetup {
        fp32_dest: r.config.fp32_dest_acc,
        fidelity: r.config.math_fidelity,
        dest_sync: r.config.dest_sync,
        unpack_contexts: r.config.unpack_contexts,
        ..KernelSetup::new(r.formats, r.shape)
    };

    let hw = HwContext::new(HwConfig {
        region: r.config.region()?,
        trace_events: false,
    });
    let mut unpack = Unpacker::new(hw.clone(), r.config.sanitize);
    let mut math = MathUnit::new(hw.clone(), r.config.sanitize);
    let mut pack = Packer::new(hw.clone(), r.config.sanitize);
    {
        let stages: [&mut dyn StageKernel; 3] = [&mut unpack, &mut math, &mut pack];
        for stage in stages {
            stage.hw_configure(&setup, false)?;
            stage.mop_init(r.op, &setup)?;
        }
    }

    // ── Summary ────────────────────────────────────────────────
    println!("  Operation: {} (broadcast {})", r.op.name(), r.op.broadcast());
    println!("  Tile:      {}", r.shape);
    println!(
        "  Formats:   {} , {} → {}",
        r.formats.src_a, r.formats.src_b, r.formats.dst
    );
    println!(
        "  Fidelity:  {} ({} phase(s) per row chunk)",
        setup.fidelity,
        setup.phases_for(&r.op)
    );
    println!();

    // ── Dest capacity ──────────────────────────────────────────
    println!("  Dest capacity (tiles per section):");
    println!("   {:<8} {:>8} {:>8}", "Sync", "16-bit", "fp32");
    println!("   {}", "-".repeat(26));
    for sync in [DestSync::Half, DestSync::Full] {
        println!(
            "   {:<8} {:>8} {:>8}",
            sync.to_string(),
            dest_max_tiles(sync, false, &r.shape),
            dest_max_tiles(sync, true, &r.shape),
        );
    }
    println!();

    // ── Configuration space ────────────────────────────────────
    println!("  Configuration registers:");
    for (name, regs) in [("unpack A", cfg::UNPACK_A), ("unpack B", cfg::UNPACK_B)] {
        let desc = TileDescriptor::from_words([
            hw.cfg().read(regs.tile_desc_lo),
            hw.cfg().read(regs.tile_desc_hi),
        ]);
        println!(
            "   {name}: format {} x_dim {} y_dim {} z_dim {}, z_stride {:#x}, x_end {}",
            desc.in_format,
            desc.x_dim,
            desc.y_dim,
            desc.z_dim,
            hw.cfg().read(regs.z_stride),
            hw.cfg().read(regs.x_end),
        );
    }
    println!("   alu:      {:?}", AluConfig::from_word(hw.cfg().read(cfg::ALU_FORMAT_SPEC)));
    println!("   fidelity: {:?}", FidelityConfig::from_word(hw.cfg().read(cfg::MATH_FIDELITY)));
    println!("   pack:     {:?}", PackConfig::from_word(hw.cfg().read(cfg::PACK_CONFIG)));
    println!("   dims:     {:?}", PackTileDims::from_word(hw.cfg().read(cfg::PACK_TILE_DIMS)));
    println!(
        "   context offset {:#06x}, dest target offset {}",
        hw.thread(StageId::Unpack).read(thread::CFG_CONTEXT_OFFSET),
        hw.thread(StageId::Math).read(thread::DEST_TARGET_OFFSET),
    );
    println!();

    // ── Address modifiers ──────────────────────────────────────
    println!("  Math address modifiers:");
    for slot in [AddrModSlot::MOD0, AddrModSlot::MOD1, AddrModSlot::MOD2, AddrModSlot::MOD3] {
        let m = AddrMod::read(&hw, StageId::Math, slot);
        if m != AddrMod::default() {
            println!("   MOD{}: {m:?}", slot.index());
        }
    }
    println!("  Pack address modifiers:");
    for slot in [PackAddrModSlot::MOD0, PackAddrModSlot::MOD1] {
        let m = PackAddrMod::read(&hw, slot);
        if m != PackAddrMod::default() {
            println!("   MOD{}: {m:?}", slot.index());
        }
    }
    println!();

    // ── MOP programs ───────────────────────────────────────────
    let programs = [
        (StageId::Unpack, unpack.mop().template().cloned()),
        (StageId::Math, math.mop().template().cloned()),
        (StageId::Pack, pack.mop().template().cloned()),
    ];
    for (stage, template) in programs {
        let Some(template) = template else {
            println!("  {stage}: no MOP programmed");
            continue;
        };
        println!(
            "  {stage} MOP: {} outer x {} inner, {} instructions per run",
            template.outer(),
            template.inner(),
            template.issue_count(),
        );
        println!("  {}", "-".repeat(60));
        for (i, instr) in template.expand().iter().enumerate() {
            println!("   {i:>4}  {instr}");
        }
        println!();
    }

    Ok(())
}
