// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The unpack stage: moves operand faces from L1 into the source
//! registers.
//!
//! The unpacker is the single writer of the config-context bit. Per tile
//! it claims a context slot on `UNPACK_SYNC`, writes the tile's L1 base
//! addresses into the context that is *not* being read by an in-flight
//! tile, replays its MOP and flips to the other context:
//!
//! ```text
//!   wait UNPACK_SYNC < contexts ─► base_addr[ctx] = addr ─► post UNPACK_SYNC
//!        ─► barrier ─► mop run ─► ctx ^= 1
//! ```
//!
//! The consumer (math) gives the slot back with `get(UNPACK_SYNC)` once it
//! has finished with the tile.

use crate::formats::src_register_format;
use crate::kernel::{KernelSetup, Operation, StageKernel, TileJob};
use crate::metrics::StageMetrics;
use crate::sanitizer::{Field, StateTracker};
use crate::PipelineError;
use hw_context::layout::{TileDescriptor, UnpackConfig};
use hw_context::regs::{cfg, thread, UnpackRegs};
use hw_context::{HwContext, HwEvent, SemaphoreId, SrcOperand, StageId, REG_COLS};
use l1_memory::L1Address;
use mop::{Broadcast, Instr, InstrSink, MopExpander, MopTemplate};
use tile_core::{codec, DataFormat, TileShape, FACE_C_DIM};
use tracing::{debug, info, trace};

/// Thread-register value selecting config context 1.
const CONTEXT_1: u32 = 0x0101;

/// Unpacker output throttle level.
const UNPACK_THROTTLE: u32 = 2;

fn regs(src: SrcOperand) -> UnpackRegs {
    match src {
        SrcOperand::A => cfg::UNPACK_A,
        SrcOperand::B => cfg::UNPACK_B,
    }
}

#[derive(Debug, Clone, Copy)]
struct UnpackSetup {
    formats: [DataFormat; 2],
    shape: TileShape,
    contexts: u32,
}

/// The unpack stage.
#[derive(Debug)]
pub struct Unpacker {
    hw: HwContext,
    mop: MopExpander,
    tracker: StateTracker,
    setup: Option<UnpackSetup>,
    op: Option<Operation>,
    context: u8,
    metrics: StageMetrics,
}

impl Unpacker {
    pub fn new(hw: HwContext, sanitize: bool) -> Self {
        Self {
            mop: MopExpander::new(StageId::Unpack, hw.clone()),
            tracker: StateTracker::new(StageId::Unpack, sanitize),
            hw,
            setup: None,
            op: None,
            context: 0,
            metrics: StageMetrics::new(StageId::Unpack),
        }
    }

    /// Config context the next tile will be programmed into.
    pub fn current_context(&self) -> u8 {
        self.context
    }

    pub fn mop(&self) -> &MopExpander {
        &self.mop
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    pub(crate) fn take_metrics(&mut self) -> StageMetrics {
        std::mem::replace(&mut self.metrics, StageMetrics::new(StageId::Unpack))
    }

    fn setup(&self) -> Result<UnpackSetup, PipelineError> {
        self.setup
            .ok_or_else(|| PipelineError::violation(StageId::Unpack, "used before hw_configure"))
    }

    /// Fields as they are written to the tile descriptors. Formats keep
    /// only the 4-bit register code.
    fn tracked_fields(setup: &UnpackSetup) -> [Field; 4] {
        [
            ("src_a_format", setup.formats[0].code() & 0xF),
            ("src_b_format", setup.formats[1].code() & 0xF),
            ("face_rows", setup.shape.face_rows()),
            ("num_faces", setup.shape.num_faces()),
        ]
    }

    /// The same fields decoded from the descriptors the unpackers will
    /// actually read.
    fn programmed_fields(&self) -> [Field; 4] {
        let cfg_space = self.hw.cfg();
        let desc = |src| {
            let r = regs(src);
            TileDescriptor::from_words([cfg_space.read(r.tile_desc_lo), cfg_space.read(r.tile_desc_hi)])
        };
        let (a, b) = (desc(SrcOperand::A), desc(SrcOperand::B));
        [
            ("src_a_format", a.in_format),
            ("src_b_format", b.in_format),
            ("face_rows", a.x_dim / FACE_C_DIM as u32),
            ("num_faces", a.z_dim),
        ]
    }

    // ── Configuration ──────────────────────────────────────────

    fn program_unpacker(&self, src: SrcOperand, format: DataFormat, shape: &TileShape, contexts: u32) {
        let cfg_space = self.hw.cfg();
        let r = regs(src);
        let desc = TileDescriptor {
            in_format: format.code() & 0xF,
            uncompressed: true,
            blobs_per_xy_plane: 0,
            x_dim: shape.face_rows() * FACE_C_DIM as u32,
            y_dim: 1,
            z_dim: shape.num_faces(),
        };
        let [lo, hi] = desc.to_words();
        cfg_space.write(r.tile_desc_lo, lo);
        cfg_space.write(r.tile_desc_hi, hi);

        let out = src_register_format(format);
        let config = UnpackConfig {
            out_format: out.code() & 0xF,
            throttle: UNPACK_THROTTLE,
            context_count: contexts.saturating_sub(1),
            haloize: false,
            tileize: false,
        };
        cfg_space.write(r.config, config.to_word());
        cfg_space.write(r.z_stride, 16 * 16 * out.x_stride());
        cfg_space.write(r.x_end, shape.face_rows() * FACE_C_DIM as u32 - 1);
    }

    /// Changes one operand's L1 format without touching geometry.
    pub fn reconfig_data_format(&mut self, src: SrcOperand, format: DataFormat) -> Result<(), PipelineError> {
        let mut setup = self.setup()?;
        let field = match src {
            SrcOperand::A => "src_a_format",
            SrcOperand::B => "src_b_format",
        };
        self.tracker.hw_configure(true, &[(field, format.code() & 0xF)])?;
        self.wait_for_idle()?;

        let cfg_space = self.hw.cfg();
        let r = regs(src);
        cfg_space.rmw(r.tile_desc_lo, 0, 0xF, format.code());
        let out = src_register_format(format);
        cfg_space.rmw(r.config, 0, 0xF, out.code());
        cfg_space.write(r.z_stride, 16 * 16 * out.x_stride());
        self.hw.barrier();

        setup.formats[src.index()] = format;
        self.setup = Some(setup);
        debug!(%src, %format, "unpacker data format reconfigured");
        Ok(())
    }

    /// Spins until no tile holds a context slot.
    fn wait_for_idle(&self) -> Result<(), PipelineError> {
        self.hw
            .semaphores()
            .wait_while_at_least(SemaphoreId::UnpackSync, 1)?;
        Ok(())
    }

    // ── Context switching ──────────────────────────────────────

    /// Spins while `max_contexts` tiles are already in flight.
    pub fn wait_for_next_context(&self, max_contexts: u32) -> Result<(), PipelineError> {
        self.hw
            .semaphores()
            .wait_while_at_least(SemaphoreId::UnpackSync, max_contexts)?;
        Ok(())
    }

    fn write_context_register(&self) {
        let value = if self.context == 1 { CONTEXT_1 } else { 0 };
        self.hw
            .thread(StageId::Unpack)
            .setc16(thread::CFG_CONTEXT_OFFSET, value);
    }

    /// Flips to the other config context.
    pub fn switch_config_context(&mut self) {
        self.context ^= 1;
        self.write_context_register();
        self.metrics.context_flips += 1;
        trace!(context = self.context, "config context switch");
        self.hw.events().record(HwEvent::ConfigContextSwitch {
            stage: StageId::Unpack,
            context: self.context,
        });
    }

    /// Returns to context 0.
    pub fn reset_config_context(&mut self) {
        self.context = 0;
        self.write_context_register();
    }

    // ── Per tile ───────────────────────────────────────────────

    /// Announces tile `index` to math: mailbox write plus a credit on
    /// `UNPACK_OPERAND_SYNC`. Waits for math to have taken the previous
    /// announcement.
    pub fn publish_tile(&mut self, index: u32) -> Result<(), PipelineError> {
        let sems = self.hw.semaphores();
        sems.wait_on_max(SemaphoreId::UnpackOperandSync)?;
        self.hw.mailboxes().write(StageId::Math, index)?;
        sems.post(SemaphoreId::UnpackOperandSync)?;
        self.metrics.sem_posts += 1;
        Ok(())
    }

    /// Unpacks one tile. `addr_b` is ignored by unary operations.
    pub fn execute(&mut self, addr_a: L1Address, addr_b: L1Address) -> Result<(), PipelineError> {
        let setup = self.setup()?;
        let op = self
            .op
            .ok_or_else(|| PipelineError::violation(StageId::Unpack, "execute before init"))?;
        self.tracker
            .execute(op.name(), &[("num_faces", setup.shape.num_faces())])?;
        self.tracker.operand_check(&self.programmed_fields())?;

        let l1 = self.hw.l1();
        l1.check_address(addr_a, setup.formats[0].tile_size_bytes(&setup.shape))?;
        if op.is_binary() {
            l1.check_address(addr_b, setup.formats[1].tile_size_bytes(&setup.shape))?;
        }

        self.mop.arm()?;
        self.wait_for_next_context(setup.contexts)?;

        let ctx = self.context as usize;
        let cfg_space = self.hw.cfg();
        cfg_space.write(cfg::UNPACK_A.base_addr[ctx], addr_a.raw());
        if op.is_binary() {
            cfg_space.write(cfg::UNPACK_B.base_addr[ctx], addr_b.raw());
        }
        self.hw.semaphores().post(SemaphoreId::UnpackSync)?;
        self.metrics.sem_posts += 1;
        self.hw.barrier();

        let mut unit = UnpackUnit::new(&self.hw, setup.formats);
        let issued = self.mop.run(&mut unit)?;
        self.metrics.record_run(issued);
        self.metrics.faces += unit.faces;
        self.metrics.tiles += 1;
        trace!(%addr_a, %addr_b, ctx, issued, "unpacked tile");

        self.switch_config_context();
        Ok(())
    }

    /// Runs the unpack side of a workload.
    pub fn process(&mut self, jobs: &[TileJob]) -> Result<(), PipelineError> {
        for (i, job) in jobs.iter().enumerate() {
            self.publish_tile(i as u32)?;
            self.execute(job.addr_a, job.addr_b)?;
        }
        Ok(())
    }

    fn build_mop(op: &Operation, shape: &TileShape) -> Result<MopTemplate, PipelineError> {
        let unpack = |src, z_incr| Instr::Unpack { src, z_incr };
        let faces = shape.num_faces();
        let per_row = shape.faces_per_row();
        let per_col = shape.faces_per_col();
        let template = match (op.is_binary(), op.broadcast()) {
            (false, _) => MopTemplate::new(1, faces, unpack(SrcOperand::A, 1))?,
            (true, Broadcast::None) => {
                MopTemplate::new(1, faces, unpack(SrcOperand::A, 1))?.with_op1(unpack(SrcOperand::B, 1))
            }
            (true, Broadcast::Scalar) => MopTemplate::new(1, faces, unpack(SrcOperand::A, 1))?
                .with_start_op(unpack(SrcOperand::B, 0)),
            // One B face per face row, stepping down the face grid.
            (true, Broadcast::Col) => MopTemplate::new(per_col, per_row, unpack(SrcOperand::A, 1))?
                .with_start_op(unpack(SrcOperand::B, per_row as u8)),
            // The face row of B is replayed for every face row of A.
            (true, Broadcast::Row) => MopTemplate::new(per_col, per_row, unpack(SrcOperand::B, 1))?
                .with_op1(unpack(SrcOperand::A, 1))
                .with_end_op(Instr::SetUnpackZ {
                    src: SrcOperand::B,
                    face: 0,
                }),
        };
        Ok(template)
    }
}

impl StageKernel for Unpacker {
    fn stage(&self) -> StageId {
        StageId::Unpack
    }

    fn hw_configure(&mut self, setup: &KernelSetup, reconfigure: bool) -> Result<(), PipelineError> {
        setup.shape.validate()?;
        let next = UnpackSetup {
            formats: [setup.formats.src_a, setup.formats.src_b],
            shape: setup.shape,
            contexts: setup.unpack_contexts,
        };
        self.tracker.hw_configure(reconfigure, &Self::tracked_fields(&next))?;
        self.wait_for_idle()?;

        if !reconfigure {
            let sems = self.hw.semaphores();
            sems.init(SemaphoreId::UnpackSync, next.contexts);
            sems.init(SemaphoreId::UnpackOperandSync, 1);
        }
        self.program_unpacker(SrcOperand::A, next.formats[0], &next.shape, next.contexts);
        self.program_unpacker(SrcOperand::B, next.formats[1], &next.shape, next.contexts);
        self.reset_config_context();
        self.hw.barrier();

        self.setup = Some(next);
        info!(
            src_a = %next.formats[0],
            src_b = %next.formats[1],
            shape = %next.shape,
            contexts = next.contexts,
            reconfigure,
            "unpacker configured"
        );
        Ok(())
    }

    fn mop_init(&mut self, op: Operation, setup: &KernelSetup) -> Result<(), PipelineError> {
        setup.shape.validate()?;
        self.tracker
            .init(op.name(), &[("num_faces", setup.shape.num_faces())])?;
        self.mop.program(Self::build_mop(&op, &setup.shape)?)?;
        self.op = Some(op);
        debug!(op = op.name(), broadcast = %op.broadcast(), "unpacker mop programmed");
        Ok(())
    }

    fn execute(&mut self, job: &TileJob, _slot: u32) -> Result<(), PipelineError> {
        Unpacker::execute(self, job.addr_a, job.addr_b)
    }

    fn section_done(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn uninit(&mut self) -> Result<(), PipelineError> {
        if let Some(op) = self.op.take() {
            self.tracker.uninit(op.name())?;
        }
        self.mop.uninit();
        Ok(())
    }

    fn reset(&mut self) {
        self.tracker.reset();
        self.mop.uninit();
        self.setup = None;
        self.op = None;
        self.context = 0;
        self.metrics = StageMetrics::new(StageId::Unpack);
    }
}

// ── Execution unit ─────────────────────────────────────────────

/// Executes unpack instructions for one MOP replay.
struct UnpackUnit<'a> {
    hw: &'a HwContext,
    formats: [DataFormat; 2],
    z: [u32; 2],
    faces: u64,
}

impl<'a> UnpackUnit<'a> {
    fn new(hw: &'a HwContext, formats: [DataFormat; 2]) -> Self {
        Self {
            hw,
            formats,
            z: [0, 0],
            faces: 0,
        }
    }

    fn unpack_face(&mut self, src: SrcOperand, z_incr: u8) -> Result<(), PipelineError> {
        let r = regs(src);
        let cfg_space = self.hw.cfg();
        let ctx = (self.hw.thread(StageId::Unpack).read(thread::CFG_CONTEXT_OFFSET) & 1) as usize;
        let base = L1Address::new(cfg_space.read(r.base_addr[ctx]));
        let desc = TileDescriptor::from_words([
            cfg_space.read(r.tile_desc_lo),
            cfg_space.read(r.tile_desc_hi),
        ]);

        let z = self.z[src.index()];
        if z >= desc.z_dim {
            return Err(PipelineError::violation(
                StageId::Unpack,
                format!("{src} face {z} past tile of {} faces", desc.z_dim),
            ));
        }
        let format = self.formats[src.index()];
        let face_len = desc.x_dim as usize;
        let face_bytes = face_len * format.datum_bits() as usize / 8;
        let addr = base.byte_addr() + z * face_bytes as u32;
        let bytes = self.hw.l1().read(addr, face_bytes)?;
        let values = codec::decode(format, &bytes)?;

        let rows = face_len / REG_COLS;
        self.hw.src(src).produce(|mut bank| {
            for (i, v) in values.iter().enumerate().take(rows * REG_COLS) {
                bank[[i / REG_COLS, i % REG_COLS]] = *v;
            }
        })?;
        self.z[src.index()] = z + z_incr as u32;
        self.faces += 1;
        Ok(())
    }
}

impl InstrSink for UnpackUnit<'_> {
    type Error = PipelineError;

    fn issue(&mut self, instr: &Instr) -> Result<(), PipelineError> {
        match *instr {
            Instr::Unpack { src, z_incr } => self.unpack_face(src, z_incr),
            Instr::SetUnpackZ { src, face } => {
                self.z[src.index()] = face as u32;
                Ok(())
            }
            Instr::Nop => Ok(()),
            other => Err(PipelineError::violation(
                StageId::Unpack,
                format!("unpacker cannot issue {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Formats;
    use hw_context::HwConfig;
    use l1_memory::TileAllocator;
    use mop::EltwiseOp;
    use std::sync::Arc;
    use std::thread;

    fn hw() -> HwContext {
        HwContext::new(HwConfig {
            trace_events: true,
            ..HwConfig::default()
        })
    }

    fn setup() -> KernelSetup {
        KernelSetup::new(
            Formats::new(DataFormat::Float16B, DataFormat::Float16, DataFormat::Float16B),
            TileShape::TILE_32X32,
        )
    }

    fn configured(hw: &HwContext, op: Operation) -> Unpacker {
        let mut u = Unpacker::new(hw.clone(), true);
        u.hw_configure(&setup(), false).unwrap();
        u.mop_init(op, &setup()).unwrap();
        u
    }

    /// Writes a tile whose face `f` holds the value `base + f` everywhere.
    fn place(hw: &HwContext, alloc: &TileAllocator, format: DataFormat, base: f32) -> L1Address {
        place_shaped(hw, alloc, format, TileShape::TILE_32X32, base)
    }

    fn place_shaped(
        hw: &HwContext,
        alloc: &TileAllocator,
        format: DataFormat,
        shape: TileShape,
        base: f32,
    ) -> L1Address {
        let buf = alloc.alloc(format.tile_size_bytes(&shape)).unwrap();
        let values: Vec<f32> = (0..shape.num_elements())
            .map(|i| base + (i / shape.face_elements()) as f32)
            .collect();
        let mut bytes = Vec::new();
        codec::encode(format, &values, &mut bytes).unwrap();
        hw.l1().write_at(buf.addr, &bytes).unwrap();
        buf.addr
    }

    #[test]
    fn test_hw_configure_programs_registers() {
        let hw = hw();
        let _u = configured(&hw, Operation::eltwise(EltwiseOp::Add));
        let cfg_space = hw.cfg();

        let desc = TileDescriptor::from_words([
            cfg_space.read(cfg::UNPACK_A.tile_desc_lo),
            cfg_space.read(cfg::UNPACK_A.tile_desc_hi),
        ]);
        assert_eq!(desc.in_format, DataFormat::Float16B.code());
        assert_eq!((desc.x_dim, desc.y_dim, desc.z_dim), (256, 1, 4));
        assert!(desc.uncompressed);

        let b_cfg = UnpackConfig::from_word(cfg_space.read(cfg::UNPACK_B.config));
        assert_eq!(b_cfg.out_format, DataFormat::Float16.code());
        assert_eq!(b_cfg.throttle, 2);
        assert_eq!(b_cfg.context_count, 1);
        assert_eq!(cfg_space.read(cfg::UNPACK_A.z_stride), 16 * 16 * 2);
        assert_eq!(cfg_space.read(cfg::UNPACK_A.x_end), 255);
        assert_eq!(hw.semaphores().max(SemaphoreId::UnpackSync), 2);
    }

    #[test]
    fn test_configure_twice_is_protocol_violation() {
        let hw = hw();
        let mut u = configured(&hw, Operation::Datacopy);
        let err = u.hw_configure(&setup(), false).unwrap_err();
        assert!(matches!(err, PipelineError::ProtocolViolation { stage: StageId::Unpack, .. }));
        assert!(u.hw_configure(&setup(), true).is_ok());
    }

    #[test]
    fn test_execute_before_init_rejected() {
        let hw = hw();
        let mut u = Unpacker::new(hw.clone(), true);
        u.hw_configure(&setup(), false).unwrap();
        let addr = L1Address::new(0x1000);
        assert!(matches!(
            u.execute(addr, addr),
            Err(PipelineError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_execute_rejects_out_of_range_address() {
        let hw = hw();
        let mut u = configured(&hw, Operation::eltwise(EltwiseOp::Add));
        let ok = L1Address::from_byte_addr(0x10000).unwrap();
        let bad = L1Address::new(0x10);
        let err = u.execute(ok, bad).unwrap_err();
        assert!(matches!(err, PipelineError::Memory(_)));
        assert_eq!(hw.semaphores().read(SemaphoreId::UnpackSync), 0);
    }

    #[test]
    fn test_execute_single_tile() {
        let hw = hw();
        let alloc = TileAllocator::new(hw.l1().region());
        let a = place(&hw, &alloc, DataFormat::Float16B, 10.0);
        let b = place(&hw, &alloc, DataFormat::Float16, 20.0);
        let mut u = configured(&hw, Operation::eltwise(EltwiseOp::Add));
        hw.events().drain();

        let drain_hw = hw.clone();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let drain = thread::spawn(move || {
            for _ in 0..4 {
                for src in [SrcOperand::A, SrcOperand::B] {
                    let reg = drain_hw.src(src);
                    reg.wait_valid().unwrap();
                    let v = reg.with_read(|bank| bank[[15, 15]]);
                    seen_in.lock().unwrap().push(v);
                    reg.release();
                }
            }
        });

        u.wait_for_next_context(2).unwrap();
        u.execute(a, b).unwrap();
        drain.join().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![10.0, 20.0, 11.0, 21.0, 12.0, 22.0, 13.0, 23.0]
        );
        let events = hw.events().snapshot();
        let posts = events
            .iter()
            .filter(|e| matches!(e, HwEvent::SemaphorePost { id: SemaphoreId::UnpackSync, .. }))
            .count();
        assert_eq!(posts, 1);
        assert_eq!(
            hw.events().count(|e| matches!(e, HwEvent::ConfigContextSwitch { .. })),
            1
        );
        assert_eq!(
            hw.events().count(|e| *e == HwEvent::MopRun { stage: StageId::Unpack, issued: 8 }),
            1
        );
        assert_eq!(u.metrics().faces, 8);
        assert_eq!(u.current_context(), 1);
        assert_eq!(hw.thread(StageId::Unpack).read(hw_context::regs::thread::CFG_CONTEXT_OFFSET), CONTEXT_1);
    }

    #[test]
    fn test_back_to_back_executes_alternate_contexts() {
        let hw = hw();
        let alloc = TileAllocator::new(hw.l1().region());
        let a = place(&hw, &alloc, DataFormat::Float16B, 0.0);
        let mut u = configured(&hw, Operation::Datacopy);
        hw.events().drain();

        // Consumer: drains the first two tiles, frees one context slot,
        // then drains the third.
        let consumer_hw = hw.clone();
        let consumer = thread::spawn(move || {
            let src = consumer_hw.src(SrcOperand::A);
            for _ in 0..8 {
                src.wait_valid().unwrap();
                src.release();
            }
            let sems = consumer_hw.semaphores();
            while sems.read(SemaphoreId::UnpackSync) < 2 {
                std::hint::spin_loop();
            }
            sems.get(SemaphoreId::UnpackSync).unwrap();
            for _ in 0..4 {
                src.wait_valid().unwrap();
                src.release();
            }
        });

        let mut bases = Vec::new();
        for _ in 0..3 {
            let ctx = u.current_context() as usize;
            u.execute(a, a).unwrap();
            bases.push((ctx, hw.cfg().read(cfg::UNPACK_A.base_addr[ctx])));
        }
        consumer.join().unwrap();

        let contexts: Vec<u8> = hw
            .events()
            .snapshot()
            .into_iter()
            .filter_map(|e| match e {
                HwEvent::ConfigContextSwitch { context, .. } => Some(context),
                _ => None,
            })
            .collect();
        assert_eq!(contexts, vec![1, 0, 1]);
        assert_eq!(bases.iter().map(|b| b.0).collect::<Vec<_>>(), vec![0, 1, 0]);
        assert!(bases.iter().all(|b| b.1 == a.raw()));

        // The third execute could only claim a slot after the consumer's get.
        let events = hw.events().snapshot();
        let get_pos = events
            .iter()
            .position(|e| matches!(e, HwEvent::SemaphoreGet { id: SemaphoreId::UnpackSync, .. }))
            .unwrap();
        let third_post = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, HwEvent::SemaphorePost { id: SemaphoreId::UnpackSync, .. }))
            .nth(2)
            .map(|(i, _)| i)
            .unwrap();
        assert!(get_pos < third_post);
    }

    #[test]
    fn test_broadcast_mop_shapes() {
        let shape = TileShape::TILE_32X32;
        let scalar = Unpacker::build_mop(
            &Operation::EltwiseBinary { op: EltwiseOp::Mul, broadcast: Broadcast::Scalar },
            &shape,
        )
        .unwrap();
        let issued = scalar.expand();
        assert_eq!(issued.len(), 5);
        assert_eq!(issued[0], Instr::Unpack { src: SrcOperand::B, z_incr: 0 });

        let col = Unpacker::build_mop(
            &Operation::EltwiseBinary { op: EltwiseOp::Add, broadcast: Broadcast::Col },
            &shape,
        )
        .unwrap();
        let b_steps: Vec<u8> = col
            .expand()
            .into_iter()
            .filter_map(|i| match i {
                Instr::Unpack { src: SrcOperand::B, z_incr } => Some(z_incr),
                _ => None,
            })
            .collect();
        assert_eq!(b_steps, vec![2, 2]);

        let row = Unpacker::build_mop(
            &Operation::EltwiseBinary { op: EltwiseOp::Sub, broadcast: Broadcast::Row },
            &shape,
        )
        .unwrap();
        assert_eq!(row.issue_count(), 10);
    }

    #[test]
    fn test_reconfig_data_format() {
        let hw = hw();
        let mut u = configured(&hw, Operation::Datacopy);
        u.reconfig_data_format(SrcOperand::A, DataFormat::Float32).unwrap();
        let desc = TileDescriptor::from_words([
            hw.cfg().read(cfg::UNPACK_A.tile_desc_lo),
            hw.cfg().read(cfg::UNPACK_A.tile_desc_hi),
        ]);
        assert_eq!(desc.in_format, DataFormat::Float32.code());
        assert_eq!(desc.z_dim, 4);
        let out = UnpackConfig::from_word(hw.cfg().read(cfg::UNPACK_A.config));
        assert_eq!(out.out_format, DataFormat::Tf32.code());
    }

    #[test]
    fn test_operand_check_reads_programmed_descriptors() {
        let hw = hw();
        let mut u = configured(&hw, Operation::Datacopy);
        assert!(u.tracker.operand_check(&u.programmed_fields()).is_ok());

        u.reconfig_data_format(SrcOperand::A, DataFormat::Float32).unwrap();
        assert!(u.tracker.operand_check(&u.programmed_fields()).is_ok());
    }

    #[test]
    fn test_descriptor_reprogrammed_by_another_unpacker_is_caught() {
        let hw = hw();
        let alloc = TileAllocator::new(hw.l1().region());
        let a = place(&hw, &alloc, DataFormat::Float16B, 0.0);
        let mut first = configured(&hw, Operation::Datacopy);

        // A second kernel on the same core rewrites the shared descriptors.
        let other = KernelSetup::new(Formats::uniform(DataFormat::Float32), TileShape::TILE_16X16);
        let mut second = Unpacker::new(hw.clone(), true);
        second.hw_configure(&other, false).unwrap();

        let err = first.execute(a, a).unwrap_err();
        match err {
            PipelineError::ProtocolViolation { stage, detail } => {
                assert_eq!(stage, StageId::Unpack);
                assert_eq!(detail, "src_a_format mismatch: configured 5, got 0");
            }
            other => panic!("expected protocol violation, got {other}"),
        }
        assert_eq!(hw.semaphores().read(SemaphoreId::UnpackSync), 0);
    }

    #[test]
    fn test_partial_faces_land_at_bank_row_zero_in_both_contexts() {
        let hw = hw();
        let alloc = TileAllocator::new(hw.l1().region());
        let shape = TileShape::new(8, 16, 2, 2).unwrap();
        let format = DataFormat::Float16B;
        let first = place_shaped(&hw, &alloc, format, shape, 10.0);
        let second = place_shaped(&hw, &alloc, format, shape, 20.0);

        let partial = KernelSetup::new(Formats::uniform(format), shape);
        let mut u = Unpacker::new(hw.clone(), true);
        u.hw_configure(&partial, false).unwrap();
        u.mop_init(Operation::Datacopy, &partial).unwrap();

        let drain_hw = hw.clone();
        let drain = thread::spawn(move || {
            let src = drain_hw.src(SrcOperand::A);
            let mut seen = Vec::new();
            for _ in 0..8 {
                src.wait_valid().unwrap();
                seen.push(src.with_read(|bank| (bank[[0, 0]], bank[[7, 15]], bank[[8, 0]])));
                src.release();
            }
            seen
        });

        let mut contexts = Vec::new();
        for addr in [first, second] {
            contexts.push(u.current_context());
            u.execute(addr, addr).unwrap();
        }
        let seen = drain.join().unwrap();

        assert_eq!(contexts, vec![0, 1]);
        let expected: Vec<(f32, f32, f32)> = [10.0, 20.0]
            .iter()
            .flat_map(|base| (0..4).map(move |f| (base + f as f32, base + f as f32, 0.0)))
            .collect();
        assert_eq!(seen, expected);
    }
}
