// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The pack stage: moves finished tiles from the dest register to L1.
//!
//! Pack consumes dest sections in the order math filled them:
//!
//! ```text
//!   wait MATH_PACK != 0 ─► pack each tile of the section
//!        ─► zero the section ─► get(MATH_PACK) ─► flip offset
//! ```
//!
//! Zeroing happens before the get, so math never sees stale rows in a
//! section it has just been handed back.

use super::{slot_rows, DestSection};
use crate::config::DestSync;
use crate::formats::dest_format;
use crate::kernel::{KernelSetup, Operation, StageKernel, TileJob};
use crate::metrics::StageMetrics;
use crate::sanitizer::{Field, StateTracker};
use crate::{PipelineError, RuntimeParams};
use hw_context::layout::{PackConfig, PackTileDims};
use hw_context::regs::cfg;
use hw_context::{
    HwContext, PackAddrMod, PackAddrModSlot, PackCounters, PackZIncr, SemaphoreId, StageId,
};
use l1_memory::L1Address;
use mop::{Instr, InstrSink, MopExpander, MopTemplate};
use tile_core::{codec, DataFormat, TileShape};
use tracing::{debug, info, trace};

/// Dest rows between consecutive faces of one tile.
const DEST_FACE_STRIDE: u32 = 16;

#[derive(Debug, Clone, Copy)]
struct PackSetup {
    out_format: DataFormat,
    dest_format: DataFormat,
    shape: TileShape,
}

/// The pack stage.
#[derive(Debug)]
pub struct Packer {
    hw: HwContext,
    mop: MopExpander,
    tracker: StateTracker,
    setup: Option<PackSetup>,
    op: Option<Operation>,
    section: DestSection,
    counters: PackCounters,
    metrics: StageMetrics,
}

impl Packer {
    pub fn new(hw: HwContext, sanitize: bool) -> Self {
        Self {
            mop: MopExpander::new(StageId::Pack, hw.clone()),
            tracker: StateTracker::new(StageId::Pack, sanitize),
            hw,
            setup: None,
            op: None,
            section: DestSection::new(DestSync::Half),
            counters: PackCounters::new(),
            metrics: StageMetrics::new(StageId::Pack),
        }
    }

    pub fn section(&self) -> &DestSection {
        &self.section
    }

    pub fn mop(&self) -> &MopExpander {
        &self.mop
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    pub(crate) fn take_metrics(&mut self) -> StageMetrics {
        std::mem::replace(&mut self.metrics, StageMetrics::new(StageId::Pack))
    }

    fn setup(&self) -> Result<PackSetup, PipelineError> {
        self.setup
            .ok_or_else(|| PipelineError::violation(StageId::Pack, "used before hw_configure"))
    }

    fn tracked_fields(setup: &PackSetup) -> [Field; 3] {
        [
            ("dst_format", setup.out_format.code() & 0xF),
            ("face_rows", setup.shape.face_rows()),
            ("num_faces", setup.shape.num_faces()),
        ]
    }

    /// The tracked fields as currently held in the packer registers.
    fn programmed_fields(&self) -> [Field; 3] {
        let cfg_space = self.hw.cfg();
        let config = PackConfig::from_word(cfg_space.read(cfg::PACK_CONFIG));
        let dims = PackTileDims::from_word(cfg_space.read(cfg::PACK_TILE_DIMS));
        [
            ("dst_format", config.out_format),
            ("face_rows", dims.face_rows),
            ("num_faces", dims.num_faces),
        ]
    }

    fn configure_addrmod(&self) {
        let step = PackAddrMod {
            z_src: PackZIncr { incr: 1, clr: false },
            z_dst: PackZIncr { incr: 1, clr: false },
            ..PackAddrMod::default()
        };
        step.set(&self.hw, PackAddrModSlot::MOD0);
    }

    /// Changes the L1 output format without touching geometry.
    pub fn reconfig_data_format(&mut self, format: DataFormat) -> Result<(), PipelineError> {
        let mut setup = self.setup()?;
        self.tracker
            .hw_configure(true, &[("dst_format", format.code() & 0xF)])?;
        self.hw
            .cfg()
            .rmw(cfg::PACK_CONFIG, 4, 0xF, format.code());
        self.hw.barrier();
        setup.out_format = format;
        self.setup = Some(setup);
        debug!(%format, "packer data format reconfigured");
        Ok(())
    }

    // ── Dest synchronisation ───────────────────────────────────

    /// Sets up pack's view of the dest sections for `sync`.
    pub fn dest_init(&mut self, sync: DestSync) {
        self.section = DestSection::new(sync);
        self.hw.cfg().write(cfg::PACK_DEST_BASE, 0);
        debug!(%sync, "pack dest sync initialised");
    }

    /// Spins until math has handed over a section.
    pub fn wait_for_math_done(&self) -> Result<(), PipelineError> {
        self.hw.semaphores().wait_on_zero(SemaphoreId::MathPack)?;
        Ok(())
    }

    /// Clears the packed section and hands it back to math.
    pub fn dest_section_done(&mut self) -> Result<(), PipelineError> {
        let start = self.section.base(&self.hw);
        let rows = self.section.rows(&self.hw);
        let mut unit = PackUnit {
            hw: &self.hw,
            counters: &mut self.counters,
            dest_base: start,
            l1_base: L1Address::new(0),
            out_format: DataFormat::Float32,
            face_rows: 0,
            section: (start, rows),
            faces: 0,
        };
        unit.issue(&Instr::ZeroAcc)?;
        self.metrics.instructions += 1;

        self.hw.semaphores().get(SemaphoreId::MathPack)?;
        self.metrics.sem_gets += 1;
        if self.section.flip(&self.hw, StageId::Pack) {
            self.metrics.context_flips += 1;
        }
        trace!(section = self.section.id(), "pack section done");
        Ok(())
    }

    // ── Per tile ───────────────────────────────────────────────

    /// Packs the tile in dest slot `slot` of the current section to
    /// `addr_out`.
    pub fn execute(&mut self, slot: u32, addr_out: L1Address) -> Result<(), PipelineError> {
        let setup = self.setup()?;
        let op = self
            .op
            .ok_or_else(|| PipelineError::violation(StageId::Pack, "execute before init"))?;
        self.tracker
            .execute(op.name(), &[("num_faces", setup.shape.num_faces())])?;
        self.tracker.operand_check(&self.programmed_fields())?;
        self.hw
            .l1()
            .check_address(addr_out, setup.out_format.tile_size_bytes(&setup.shape))?;

        let dest_base = self.section.base(&self.hw) + slot * slot_rows(&setup.shape);
        let cfg_space = self.hw.cfg();
        cfg_space.write(cfg::PACK_L1_BASE, addr_out.raw());
        cfg_space.write(cfg::PACK_DEST_BASE, dest_base);

        self.mop.arm()?;
        self.counters.reset();
        let mut unit = PackUnit {
            hw: &self.hw,
            counters: &mut self.counters,
            dest_base: cfg_space.read(cfg::PACK_DEST_BASE),
            l1_base: L1Address::new(cfg_space.read(cfg::PACK_L1_BASE)),
            out_format: setup.out_format,
            face_rows: setup.shape.face_rows(),
            section: (self.section.base(&self.hw), self.section.rows(&self.hw)),
            faces: 0,
        };
        let issued = self.mop.run(&mut unit)?;
        let faces = unit.faces;
        self.metrics.record_run(issued);
        self.metrics.faces += faces;
        self.metrics.tiles += 1;
        trace!(slot, %addr_out, issued, "packed tile");
        Ok(())
    }

    /// Runs the pack side of a workload.
    pub fn process(&mut self, params: &RuntimeParams, jobs: &[TileJob]) -> Result<(), PipelineError> {
        let per_section = params.tiles_per_section.max(1) as usize;
        for section in jobs.chunks(per_section) {
            self.wait_for_math_done()?;
            for (slot, job) in section.iter().enumerate() {
                self.execute(slot as u32, job.addr_out)?;
            }
            self.dest_section_done()?;
        }
        Ok(())
    }
}

impl StageKernel for Packer {
    fn stage(&self) -> StageId {
        StageId::Pack
    }

    fn hw_configure(&mut self, setup: &KernelSetup, reconfigure: bool) -> Result<(), PipelineError> {
        setup.shape.validate()?;
        let next = PackSetup {
            out_format: setup.formats.dst,
            dest_format: dest_format(setup.formats.dst, setup.fp32_dest),
            shape: setup.shape,
        };
        self.tracker.hw_configure(reconfigure, &Self::tracked_fields(&next))?;

        let config = PackConfig {
            in_format: next.dest_format.code() & 0xF,
            out_format: next.out_format.code() & 0xF,
            l1_acc: false,
        };
        let dims = PackTileDims {
            face_rows: next.shape.face_rows(),
            num_faces: next.shape.num_faces(),
            narrow: next.shape.is_narrow(),
        };
        let cfg_space = self.hw.cfg();
        cfg_space.write(cfg::PACK_CONFIG, config.to_word());
        cfg_space.write(cfg::PACK_TILE_DIMS, dims.to_word());
        self.configure_addrmod();
        self.hw.barrier();

        self.setup = Some(next);
        info!(
            dest_format = %next.dest_format,
            out_format = %next.out_format,
            shape = %next.shape,
            reconfigure,
            "packer configured"
        );
        Ok(())
    }

    fn mop_init(&mut self, op: Operation, setup: &KernelSetup) -> Result<(), PipelineError> {
        setup.shape.validate()?;
        self.tracker
            .init(op.name(), &[("num_faces", setup.shape.num_faces())])?;
        let template = MopTemplate::new(
            1,
            setup.shape.num_faces(),
            Instr::Pack {
                faces: 1,
                addr_mod: PackAddrModSlot::MOD0,
            },
        )?;
        self.mop.program(template)?;
        self.op = Some(op);
        debug!(op = op.name(), "packer mop programmed");
        Ok(())
    }

    fn execute(&mut self, job: &TileJob, slot: u32) -> Result<(), PipelineError> {
        Packer::execute(self, slot, job.addr_out)
    }

    fn section_done(&mut self) -> Result<(), PipelineError> {
        self.dest_section_done()
    }

    fn reset(&mut self) {
        self.tracker.reset();
        self.mop.uninit();
        self.section.reset();
        self.counters.reset();
        self.setup = None;
        self.op = None;
        self.metrics = StageMetrics::new(StageId::Pack);
    }

    fn uninit(&mut self) -> Result<(), PipelineError> {
        if let Some(op) = self.op.take() {
            self.tracker.uninit(op.name())?;
        }
        self.mop.uninit();
        Ok(())
    }
}

// ── Execution unit ─────────────────────────────────────────────

/// Executes pack instructions.
struct PackUnit<'a> {
    hw: &'a HwContext,
    counters: &'a mut PackCounters,
    dest_base: u32,
    l1_base: L1Address,
    out_format: DataFormat,
    face_rows: u32,
    /// First row and row count of the section `ZeroAcc` clears.
    section: (u32, u32),
    faces: u64,
}

impl PackUnit<'_> {
    /// Packs dest face `z_src` into L1 face slot `z_dst`.
    fn pack_face(&mut self, z_src: u32, z_dst: u32) -> Result<(), PipelineError> {
        let rows = self
            .hw
            .dest()
            .read_rows(self.dest_base + z_src * DEST_FACE_STRIDE, self.face_rows)?;
        let values: Vec<f32> = rows.iter().copied().collect();
        let mut bytes = Vec::new();
        codec::encode(self.out_format, &values, &mut bytes)?;
        let addr = self.l1_base.byte_addr() + z_dst * bytes.len() as u32;
        self.hw.l1().write(addr, &bytes)?;
        self.faces += 1;
        Ok(())
    }
}

impl InstrSink for PackUnit<'_> {
    type Error = PipelineError;

    fn issue(&mut self, instr: &Instr) -> Result<(), PipelineError> {
        match *instr {
            Instr::Pack { faces, addr_mod } => {
                let (z_src, z_dst) = (self.counters.z_src, self.counters.z_dst);
                for f in 0..faces as u32 {
                    self.pack_face(z_src + f, z_dst + f)?;
                }
                let m = PackAddrMod::read(self.hw, addr_mod);
                self.counters.apply(&m);
            }
            Instr::ZeroAcc => {
                let (start, rows) = self.section;
                self.hw.dest().zero_rows(start, rows)?;
            }
            Instr::Nop => {}
            other => {
                return Err(PipelineError::violation(
                    StageId::Pack,
                    format!("packer cannot issue {other}"),
                ))
            }
        }
        Ok(())
    }
}
