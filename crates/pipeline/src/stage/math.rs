// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The math stage: computes source operands into the dest register.
//!
//! # Address-modifier slot map
//!
//! Slots are a manual contract. Math programs only these four; fused
//! kernels may use MOD4..MOD7.
//!
//! ```text
//!   MOD0  row step      src +rows, dest +rows, fidelity clear
//!   MOD1  hold          nothing moves
//!   MOD2  fidelity step fidelity +1
//!   MOD3  face return   src clear, dest carriage return +16, fidelity clear
//! ```
//!
//! # Dest handoff
//!
//! Math owns its dest-offset bit. It waits for room on `MATH_PACK` before
//! the first tile of a section, and posts once the section is full.

use super::{slot_rows, DestSection};
use crate::config::{DestSync, MathFidelity};
use crate::formats::{dest_format, src_register_format};
use crate::kernel::{KernelSetup, Operation, StageKernel, TileJob};
use crate::metrics::StageMetrics;
use crate::sanitizer::{Field, StateTracker};
use crate::{PipelineError, RuntimeParams};
use hw_context::layout::{AluConfig, FidelityConfig};
use hw_context::regs::{cfg, thread};
use hw_context::{
    AddrMod, AddrModSlot, DestIncr, FidelityIncr, HwContext, HwError, RwCounters, SemaphoreId,
    SrcIncr, SrcOperand, StageId, REG_COLS, SRC_ROWS,
};
use mop::{Broadcast, EltwiseOp, Instr, InstrSink, MopExpander, MopTemplate, SrcClear};
use ndarray::{s, Array2};
use tile_core::{codec, DataFormat, TileShape};
use tracing::{debug, info, trace};

/// Rows one math instruction covers.
const MAX_ROWS_PER_INSTR: u32 = 8;

/// Cumulative mantissa bits of srcB seen after each fidelity phase.
const FIDELITY_MANTISSA_BITS: [u32; 4] = [4, 7, 10, 23];

fn truncate_mantissa(v: f32, bits: u32) -> f32 {
    let dropped = 23 - bits.min(23);
    f32::from_bits(v.to_bits() & !((1u32 << dropped) - 1))
}

/// The part of `b` multiplied in during fidelity phase `phase`.
pub(crate) fn fidelity_slice(b: f32, phase: u32) -> f32 {
    let phase = (phase as usize).min(FIDELITY_MANTISSA_BITS.len() - 1);
    let hi = truncate_mantissa(b, FIDELITY_MANTISSA_BITS[phase]);
    if phase == 0 {
        hi
    } else {
        hi - truncate_mantissa(b, FIDELITY_MANTISSA_BITS[phase - 1])
    }
}

/// `a * b` as a multiply at `fidelity` computes it.
pub fn fidelity_product(a: f32, b: f32, fidelity: MathFidelity) -> f32 {
    (0..fidelity.phases()).map(|p| a * fidelity_slice(b, p)).sum()
}

#[derive(Debug, Clone, Copy)]
struct MathSetup {
    formats: crate::Formats,
    shape: TileShape,
    fp32_dest: bool,
}

impl MathSetup {
    fn dest_format(&self) -> DataFormat {
        dest_format(self.formats.dst, self.fp32_dest)
    }
}

/// The math stage.
#[derive(Debug)]
pub struct MathUnit {
    hw: HwContext,
    mop: MopExpander,
    tracker: StateTracker,
    setup: Option<MathSetup>,
    op: Option<Operation>,
    section: DestSection,
    counters: RwCounters,
    metrics: StageMetrics,
}

impl MathUnit {
    pub fn new(hw: HwContext, sanitize: bool) -> Self {
        Self {
            mop: MopExpander::new(StageId::Math, hw.clone()),
            tracker: StateTracker::new(StageId::Math, sanitize),
            hw,
            setup: None,
            op: None,
            section: DestSection::new(DestSync::Half),
            counters: RwCounters::new(),
            metrics: StageMetrics::new(StageId::Math),
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
        std::mem::replace(&mut self.metrics, StageMetrics::new(StageId::Math))
    }

    fn setup(&self) -> Result<MathSetup, PipelineError> {
        self.setup
            .ok_or_else(|| PipelineError::violation(StageId::Math, "used before hw_configure"))
    }

    fn tracked_fields(setup: &MathSetup) -> [Field; 4] {
        [
            ("src_a_format", setup.formats.src_a.code()),
            ("src_b_format", setup.formats.src_b.code()),
            ("dst_format", setup.formats.dst.code()),
            ("fp32_dest", setup.fp32_dest as u32),
        ]
    }

    // ── Dest synchronisation ───────────────────────────────────

    /// Sets up the math/pack handoff for `sync`. Waits for pack to have
    /// drained everything first.
    pub fn pack_sync_init(&mut self, sync: DestSync) -> Result<(), PipelineError> {
        let sems = self.hw.semaphores();
        sems.wait_while_at_least(SemaphoreId::MathPack, 1)?;
        sems.init(SemaphoreId::MathPack, sync.sections());
        self.section = DestSection::new(sync);
        self.set_dest_target(0);
        debug!(%sync, "math dest sync initialised");
        Ok(())
    }

    /// Spins until pack has left a free dest section.
    pub fn wait_for_dest_available(&self) -> Result<(), PipelineError> {
        self.hw.semaphores().wait_on_max(SemaphoreId::MathPack)?;
        Ok(())
    }

    /// Flips math's dest-offset bit. Only safe after the section was
    /// handed to pack.
    pub fn update_dest_offset_id(&mut self) {
        if self.section.flip(&self.hw, StageId::Math) {
            self.metrics.context_flips += 1;
        }
    }

    /// Hands the filled section to pack and moves on to the other half.
    pub fn dest_section_done(&mut self) -> Result<(), PipelineError> {
        self.hw.semaphores().post(SemaphoreId::MathPack)?;
        self.metrics.sem_posts += 1;
        self.update_dest_offset_id();
        self.set_dest_target(0);
        Ok(())
    }

    fn set_dest_target(&self, row: u32) {
        let base = self.section.base(&self.hw) + row;
        self.hw
            .thread(StageId::Math)
            .setc16(thread::DEST_TARGET_OFFSET, base);
    }

    // ── Tile handoff from unpack ───────────────────────────────

    /// Takes the next tile announcement from the unpacker.
    pub fn get_tile(&mut self) -> Result<u32, PipelineError> {
        let index = self.hw.mailboxes().read(StageId::Math)?;
        self.hw.semaphores().get(SemaphoreId::UnpackOperandSync)?;
        self.metrics.sem_gets += 1;
        Ok(index)
    }

    /// Gives the tile's config context back to the unpacker.
    pub fn release_tile(&mut self) -> Result<(), PipelineError> {
        self.hw.semaphores().get(SemaphoreId::UnpackSync)?;
        self.metrics.sem_gets += 1;
        Ok(())
    }

    // ── Per tile ───────────────────────────────────────────────

    /// Computes one tile into dest slot `dst_index` of the current section.
    pub fn execute(&mut self, dst_index: u32) -> Result<(), PipelineError> {
        let setup = self.setup()?;
        let op = self
            .op
            .ok_or_else(|| PipelineError::violation(StageId::Math, "execute before init"))?;
        let shape = setup.shape;
        self.tracker
            .execute(op.name(), &[("num_faces", shape.num_faces())])?;

        self.set_dest_target(dst_index * slot_rows(&shape));
        self.mop.arm()?;
        self.counters.reset();

        let faces = shape.num_faces();
        // Faces that share one srcB bank before it is released.
        let b_group = match op.broadcast() {
            Broadcast::Scalar if op.is_binary() => Some(faces),
            Broadcast::Col if op.is_binary() => Some(shape.faces_per_row()),
            _ => None,
        };

        let mut unit = MathUnit::exec_unit(&self.hw, &mut self.counters, &setup);
        for face in 0..faces {
            let issued = self.mop.run(&mut unit)?;
            self.metrics.record_run(issued);
            self.metrics.faces += 1;
            if let Some(group) = b_group {
                if (face + 1) % group == 0 {
                    unit.issue(&Instr::ClearSrc {
                        which: SrcClear::B,
                        addr_mod: AddrModSlot::MOD1,
                    })?;
                    self.metrics.instructions += 1;
                }
            }
        }
        self.metrics.tiles += 1;
        trace!(dst_index, "math tile done");
        Ok(())
    }

    fn exec_unit<'a>(hw: &'a HwContext, counters: &'a mut RwCounters, setup: &MathSetup) -> MathExec<'a> {
        MathExec {
            hw,
            counters,
            dest_base: hw.thread(StageId::Math).read(thread::DEST_TARGET_OFFSET),
            dest_format: setup.dest_format(),
        }
    }

    /// Runs the math side of a workload.
    pub fn process(&mut self, params: &RuntimeParams) -> Result<(), PipelineError> {
        let per_section = params.tiles_per_section;
        for i in 0..params.tile_count {
            let slot = i % per_section;
            if slot == 0 {
                self.wait_for_dest_available()?;
            }
            let index = self.get_tile()?;
            if index != i {
                return Err(PipelineError::violation(
                    StageId::Math,
                    format!("expected tile {i}, unpacker announced {index}"),
                ));
            }
            self.execute(slot)?;
            self.release_tile()?;
            if slot == per_section - 1 || i == params.tile_count - 1 {
                self.dest_section_done()?;
            }
        }
        Ok(())
    }

    // ── Programming ────────────────────────────────────────────

    fn program_addr_mods(&self, rows: u8) -> Result<(), PipelineError> {
        let hw = &self.hw;
        let row_step = AddrMod {
            srca: SrcIncr::checked(rows)?,
            srcb: SrcIncr::checked(rows)?,
            dest: DestIncr::checked(rows as i16)?,
            fidelity: FidelityIncr { incr: 0, clr: true },
            ..AddrMod::default()
        };
        let fidelity_step = AddrMod {
            fidelity: FidelityIncr { incr: 1, clr: false },
            ..AddrMod::default()
        };
        let face_return = AddrMod {
            srca: SrcIncr::clear(),
            srcb: SrcIncr::clear(),
            dest: DestIncr::carriage_return(16),
            fidelity: FidelityIncr { incr: 0, clr: true },
            ..AddrMod::default()
        };
        row_step.set(hw, StageId::Math, AddrModSlot::MOD0);
        AddrMod::default().set(hw, StageId::Math, AddrModSlot::MOD1);
        fidelity_step.set(hw, StageId::Math, AddrModSlot::MOD2);
        face_return.set(hw, StageId::Math, AddrModSlot::MOD3);
        Ok(())
    }

    fn build_mop(op: &Operation, shape: &TileShape, phases: u32) -> Result<MopTemplate, PipelineError> {
        let rows = shape.face_rows().min(MAX_ROWS_PER_INSTR);
        let chunks = shape.face_rows() / rows;
        let rows = rows as u8;
        let template = match *op {
            Operation::EltwiseBinary { op, broadcast } => {
                let clear = match broadcast {
                    Broadcast::None | Broadcast::Row => SrcClear::AB,
                    Broadcast::Scalar | Broadcast::Col => SrcClear::A,
                };
                MopTemplate::new(
                    chunks,
                    phases,
                    Instr::Elw {
                        op,
                        bcast: broadcast,
                        rows,
                        addr_mod: AddrModSlot::MOD2,
                    },
                )?
                .with_last_inner(Instr::IncRwc {
                    addr_mod: AddrModSlot::MOD0,
                })
                .with_last_outer(Instr::ClearSrc {
                    which: clear,
                    addr_mod: AddrModSlot::MOD3,
                })
            }
            Operation::Datacopy => MopTemplate::new(
                1,
                chunks,
                Instr::MovA2D {
                    rows,
                    addr_mod: AddrModSlot::MOD0,
                },
            )?
            .with_last_outer(Instr::ClearSrc {
                which: SrcClear::A,
                addr_mod: AddrModSlot::MOD3,
            }),
        };
        Ok(template)
    }
}

impl StageKernel for MathUnit {
    fn stage(&self) -> StageId {
        StageId::Math
    }

    fn hw_configure(&mut self, setup: &KernelSetup, reconfigure: bool) -> Result<(), PipelineError> {
        setup.shape.validate()?;
        let next = MathSetup {
            formats: setup.formats,
            shape: setup.shape,
            fp32_dest: setup.fp32_dest,
        };
        self.tracker.hw_configure(reconfigure, &Self::tracked_fields(&next))?;

        let int8_math = setup.formats.is_integer();
        let alu = AluConfig {
            srca_format: src_register_format(next.formats.src_a).code() & 0xF,
            srcb_format: src_register_format(next.formats.src_b).code() & 0xF,
            dst_format: next.dest_format().code() & 0xF,
            fp32_dest: next.fp32_dest,
            int8_math,
        };
        let cfg_space = self.hw.cfg();
        cfg_space.write(cfg::ALU_FORMAT_SPEC, alu.to_word());
        cfg_space.rmw(cfg::ALU_ACC_CTRL, 0, 0x1, next.fp32_dest as u32);
        cfg_space.rmw(cfg::ALU_ACC_CTRL, 1, 0x1, int8_math as u32);
        self.hw.dest().set_fp32(next.fp32_dest);
        self.hw.barrier();

        self.setup = Some(next);
        info!(
            dst = %next.formats.dst,
            dest_format = %next.dest_format(),
            fp32_dest = next.fp32_dest,
            reconfigure,
            "math configured"
        );
        Ok(())
    }

    fn mop_init(&mut self, op: Operation, setup: &KernelSetup) -> Result<(), PipelineError> {
        setup.shape.validate()?;
        let phases = setup.phases_for(&op);
        self.tracker
            .init(op.name(), &[("num_faces", setup.shape.num_faces())])?;

        let fidelity = FidelityConfig {
            phases,
            increment: phases > 1,
        };
        self.hw.cfg().write(cfg::MATH_FIDELITY, fidelity.to_word());

        let rows = setup.shape.face_rows().min(MAX_ROWS_PER_INSTR) as u8;
        self.program_addr_mods(rows)?;
        self.mop
            .program(Self::build_mop(&op, &setup.shape, phases)?)?;
        self.hw.barrier();
        self.op = Some(op);
        debug!(op = op.name(), phases, rows, "math mop programmed");
        Ok(())
    }

    fn execute(&mut self, _job: &TileJob, slot: u32) -> Result<(), PipelineError> {
        MathUnit::execute(self, slot)
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
        self.metrics = StageMetrics::new(StageId::Math);
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

/// Executes math instructions against the register files.
struct MathExec<'a> {
    hw: &'a HwContext,
    counters: &'a mut RwCounters,
    dest_base: u32,
    dest_format: DataFormat,
}

impl MathExec<'_> {
    fn apply(&mut self, slot: AddrModSlot) {
        let m = AddrMod::read(self.hw, StageId::Math, slot);
        self.counters.apply(&m);
    }

    fn src_rows(&self, operand: SrcOperand, start: u32, rows: u32) -> Result<Array2<f32>, PipelineError> {
        let end = start + rows;
        if end as usize > SRC_ROWS {
            return Err(HwError::SrcOutOfRange {
                start,
                end,
                rows: SRC_ROWS as u32,
            }
            .into());
        }
        let (a, b) = (start as usize, end as usize);
        Ok(self
            .hw
            .src(operand)
            .with_read(|bank| bank.slice(s![a..b, ..]).to_owned()))
    }

    fn store(&self, values: &Array2<f32>) -> Result<(), PipelineError> {
        let mut quantized = Array2::<f32>::zeros(values.raw_dim());
        for (q, v) in quantized.iter_mut().zip(values.iter()) {
            *q = codec::quantize(self.dest_format, *v)?;
        }
        let start = self.dest_base + self.counters.dest;
        self.hw
            .dest()
            .with_rows_mut(start, values.nrows() as u32, |mut rows| rows.assign(&quantized))?;
        Ok(())
    }

    fn eltwise(&mut self, op: EltwiseOp, bcast: Broadcast, rows: u32) -> Result<(), PipelineError> {
        self.hw.src(SrcOperand::A).wait_valid()?;
        self.hw.src(SrcOperand::B).wait_valid()?;
        let a = self.src_rows(SrcOperand::A, self.counters.srca, rows)?;
        let b = match bcast {
            Broadcast::None | Broadcast::Col => self.src_rows(SrcOperand::B, self.counters.srcb, rows)?,
            Broadcast::Row | Broadcast::Scalar => self.src_rows(SrcOperand::B, 0, 1)?,
        };
        let phase = self.counters.fidelity;
        let current = if op == EltwiseOp::Mul && phase > 0 {
            Some(self.hw.dest().read_rows(self.dest_base + self.counters.dest, rows)?)
        } else {
            None
        };

        let mut out = Array2::<f32>::zeros((rows as usize, REG_COLS));
        for r in 0..rows as usize {
            for c in 0..REG_COLS {
                let av = a[[r, c]];
                let bv = match bcast {
                    Broadcast::None => b[[r, c]],
                    Broadcast::Col => b[[r, 0]],
                    Broadcast::Row => b[[0, c]],
                    Broadcast::Scalar => b[[0, 0]],
                };
                out[[r, c]] = match op {
                    EltwiseOp::Add => av + bv,
                    EltwiseOp::Sub => av - bv,
                    EltwiseOp::Mul => {
                        let partial = av * fidelity_slice(bv, phase);
                        match &current {
                            Some(acc) => acc[[r, c]] + partial,
                            None => partial,
                        }
                    }
                };
            }
        }
        self.store(&out)
    }

    fn mov_a2d(&mut self, rows: u32) -> Result<(), PipelineError> {
        self.hw.src(SrcOperand::A).wait_valid()?;
        let a = self.src_rows(SrcOperand::A, self.counters.srca, rows)?;
        self.store(&a)
    }
}

impl InstrSink for MathExec<'_> {
    type Error = PipelineError;

    fn issue(&mut self, instr: &Instr) -> Result<(), PipelineError> {
        match *instr {
            Instr::Elw {
                op,
                bcast,
                rows,
                addr_mod,
            } => {
                self.eltwise(op, bcast, rows as u32)?;
                self.apply(addr_mod);
            }
            Instr::MovA2D { rows, addr_mod } => {
                self.mov_a2d(rows as u32)?;
                self.apply(addr_mod);
            }
            Instr::IncRwc { addr_mod } => self.apply(addr_mod),
            Instr::ClearSrc { which, addr_mod } => {
                for operand in [SrcOperand::A, SrcOperand::B] {
                    if which.clears(operand) {
                        self.hw.src(operand).release();
                    }
                }
                self.apply(addr_mod);
            }
            Instr::Nop => {}
            other => {
                return Err(PipelineError::violation(
                    StageId::Math,
                    format!("math cannot issue {other}"),
                ))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Formats;
    use hw_context::{HwConfig, HwEvent};

    fn hw() -> HwContext {
        HwContext::new(HwConfig {
            trace_events: true,
            ..HwConfig::default()
        })
    }

    fn setup(fidelity: MathFidelity) -> KernelSetup {
        KernelSetup {
            fidelity,
            ..KernelSetup::new(Formats::uniform(DataFormat::Float32), TileShape::TILE_32X32)
        }
    }

    fn math(hw: &HwContext, op: Operation, fidelity: MathFidelity) -> MathUnit {
        let mut m = MathUnit::new(hw.clone(), true);
        m.hw_configure(&setup(fidelity), false).unwrap();
        m.pack_sync_init(DestSync::Half).unwrap();
        m.mop_init(op, &setup(fidelity)).unwrap();
        m
    }

    /// Fills one face into `operand` with `f(row, col)`.
    fn load_face(hw: &HwContext, operand: SrcOperand, f: impl Fn(usize, usize) -> f32) {
        hw.src(operand)
            .produce(|mut bank| {
                for r in 0..16 {
                    for c in 0..REG_COLS {
                        bank[[r, c]] = f(r, c);
                    }
                }
            })
            .unwrap();
    }

    #[test]
    fn test_fidelity_slices_sum_to_operand() {
        let b = 1.234_567_8_f32;
        let full: f32 = (0..4).map(|p| fidelity_slice(b, p)).sum();
        assert_eq!(full, b);
        assert_eq!(fidelity_product(3.0, 5.0, MathFidelity::LoFi), 15.0);
        let lofi = fidelity_product(1.0, b, MathFidelity::LoFi);
        assert!((lofi - b).abs() > 1e-3);
        assert_eq!(fidelity_product(1.0, b, MathFidelity::HiFi4), b);
    }

    #[test]
    fn test_slot_map_programmed() {
        let hw = hw();
        let _m = math(&hw, Operation::eltwise(EltwiseOp::Add), MathFidelity::HiFi4);
        let mod0 = AddrMod::read(&hw, StageId::Math, AddrModSlot::MOD0);
        assert_eq!(mod0.srca, SrcIncr::incr(8));
        assert_eq!(mod0.dest.incr, 8);
        let mod3 = AddrMod::read(&hw, StageId::Math, AddrModSlot::MOD3);
        assert!(mod3.srca.clr && mod3.srcb.clr);
        assert!(mod3.dest.cr);
        assert_eq!(mod3.dest.incr, 16);
        assert_eq!(AddrMod::read(&hw, StageId::Math, AddrModSlot::MOD1), AddrMod::default());
    }

    #[test]
    fn test_mul_mop_repeats_per_phase() {
        let t = MathUnit::build_mop(&Operation::eltwise(EltwiseOp::Mul), &TileShape::TILE_32X32, 4)
            .unwrap();
        // 2 chunks x 4 phases, one IncRwc per chunk, one ClearSrc.
        assert_eq!(t.issue_count(), 2 * 4 + 2 + 1);
    }

    #[test]
    fn test_execute_add_tile() {
        let hw = hw();
        let mut m = math(&hw, Operation::eltwise(EltwiseOp::Add), MathFidelity::HiFi4);

        let feeder_hw = hw.clone();
        let feeder = std::thread::spawn(move || {
            for face in 0..4 {
                load_face(&feeder_hw, SrcOperand::A, |r, c| (r + c) as f32);
                load_face(&feeder_hw, SrcOperand::B, move |_, _| face as f32);
            }
        });
        m.execute(0).unwrap();
        feeder.join().unwrap();

        for face in 0..4u32 {
            let rows = hw.dest().read_rows(face * 16, 16).unwrap();
            assert_eq!(rows[[0, 0]], face as f32);
            assert_eq!(rows[[15, 15]], 30.0 + face as f32);
        }
        // Each face is two row chunks plus IncRwc per chunk and one ClearSrc.
        assert_eq!(m.metrics().instructions, 4 * 5);
        assert_eq!(m.metrics().tiles, 1);
        m.uninit().unwrap();
        assert!(m.execute(0).is_err());
    }

    #[test]
    fn test_execute_mul_scalar_broadcast() {
        let hw = hw();
        let op = Operation::EltwiseBinary {
            op: EltwiseOp::Mul,
            broadcast: Broadcast::Scalar,
        };
        let mut m = math(&hw, op, MathFidelity::HiFi4);

        let feeder_hw = hw.clone();
        let feeder = std::thread::spawn(move || {
            load_face(&feeder_hw, SrcOperand::B, |r, c| if r == 0 && c == 0 { 3.0 } else { 99.0 });
            for face in 0..4 {
                load_face(&feeder_hw, SrcOperand::A, move |r, c| (face * 16 + r + c) as f32);
            }
        });
        m.execute(1).unwrap();
        feeder.join().unwrap();

        let base = 64; // slot 1 of section 0
        for face in 0..4u32 {
            let rows = hw.dest().read_rows(base + face * 16, 16).unwrap();
            for r in 0..16 {
                for c in 0..16 {
                    let want = 3.0 * (face as usize * 16 + r + c) as f32;
                    assert_eq!(rows[[r, c]], want, "face {face} row {r} col {c}");
                }
            }
        }
        // Every bank was released: one B for the whole tile, one A per face.
        assert_eq!(hw.src(SrcOperand::A).valid_banks(), 0);
        assert_eq!(hw.src(SrcOperand::B).valid_banks(), 0);
        assert_eq!(m.metrics().mop_runs, 4);
    }

    #[test]
    fn test_execute_col_broadcast_sub() {
        let hw = hw();
        let op = Operation::EltwiseBinary {
            op: EltwiseOp::Sub,
            broadcast: Broadcast::Col,
        };
        let mut m = math(&hw, op, MathFidelity::LoFi);

        let feeder_hw = hw.clone();
        let feeder = std::thread::spawn(move || {
            // B face per face row, column 0 carries the value.
            for face_row in 0..2 {
                load_face(&feeder_hw, SrcOperand::B, move |r, c| {
                    if c == 0 { (face_row * 16 + r) as f32 } else { -1.0 }
                });
                for _ in 0..2 {
                    load_face(&feeder_hw, SrcOperand::A, |_, _| 100.0);
                }
            }
        });
        m.execute(0).unwrap();
        feeder.join().unwrap();

        for face in 0..4u32 {
            let rows = hw.dest().read_rows(face * 16, 16).unwrap();
            let face_row = face / 2;
            for r in 0..16 {
                assert_eq!(rows[[r, 5]], 100.0 - (face_row * 16 + r as u32) as f32);
            }
        }
    }

    #[test]
    fn test_dest_section_done_posts_and_flips() {
        let hw = hw();
        let mut m = math(&hw, Operation::Datacopy, MathFidelity::LoFi);
        hw.events().drain();
        m.wait_for_dest_available().unwrap();
        m.dest_section_done().unwrap();
        assert_eq!(hw.semaphores().read(SemaphoreId::MathPack), 1);
        assert_eq!(m.section().id(), 1);
        assert_eq!(hw.thread(StageId::Math).read(thread::DEST_TARGET_OFFSET), 512);

        m.dest_section_done().unwrap();
        assert_eq!(hw.semaphores().read(SemaphoreId::MathPack), 2);
        // Both sections full: a third post would overflow.
        assert!(m.dest_section_done().is_err());
        assert_eq!(
            hw.events().count(|e| matches!(e, HwEvent::DestOffsetFlip { stage: StageId::Math, .. })),
            2
        );
    }

    #[test]
    fn test_rejects_foreign_instruction() {
        let hw = hw();
        let mut counters = RwCounters::new();
        let s = MathSetup {
            formats: Formats::default(),
            shape: TileShape::TILE_32X32,
            fp32_dest: false,
        };
        let mut unit = MathUnit::exec_unit(&hw, &mut counters, &s);
        assert!(unit.issue(&Instr::ZeroAcc).is_err());
        assert!(unit.issue(&Instr::Nop).is_ok());
    }
}
