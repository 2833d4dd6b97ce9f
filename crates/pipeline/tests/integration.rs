// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: whole-pipeline runs.
//!
//! Tiles are placed in L1, pushed through unpack, math and pack by the
//! engine, read back and compared against a host reference. Small integer
//! operands keep every format and fidelity exact.

use hw_context::{HwEvent, SemaphoreId, StageId};
use l1_memory::{L1Address, TileAllocator};
use mop::{Broadcast, EltwiseOp};
use ndarray::Array2;
use pipeline::{
    DestSync, Formats, MathFidelity, Operation, PipelineConfig, PipelineEngine, PipelineError,
    Ready, RuntimeParams, TileJob,
};
use tile_core::{codec, tilize, untilize, DataFormat, TileShape};

// ── Helpers ────────────────────────────────────────────────────

fn config() -> PipelineConfig {
    PipelineConfig {
        watchdog_ms: 10_000,
        trace_events: true,
        ..PipelineConfig::default()
    }
}

/// A deterministic small-integer tile.
fn operand(shape: &TileShape, seed: usize) -> Array2<f32> {
    let (rows, cols) = (shape.total_rows() as usize, shape.total_cols() as usize);
    Array2::from_shape_fn((rows, cols), |(r, c)| ((r * 7 + c * 3 + seed) % 9) as f32)
}

fn place(
    engine: &PipelineEngine<Ready>,
    alloc: &TileAllocator,
    format: DataFormat,
    shape: &TileShape,
    tile: &Array2<f32>,
) -> L1Address {
    let buf = alloc.alloc(format.tile_size_bytes(shape)).unwrap();
    let faces = tilize(shape, tile.view()).unwrap();
    let mut bytes = Vec::new();
    codec::encode(format, &faces, &mut bytes).unwrap();
    engine.hw().l1().write_at(buf.addr, &bytes).unwrap();
    buf.addr
}

fn read_back(
    engine: &PipelineEngine<Ready>,
    addr: L1Address,
    format: DataFormat,
    shape: &TileShape,
) -> Array2<f32> {
    let bytes = engine
        .hw()
        .l1()
        .read_at(addr, format.tile_size_bytes(shape))
        .unwrap();
    untilize(shape, &codec::decode(format, &bytes).unwrap()).unwrap()
}

/// The srcB value the operation pairs with `a[r][c]`.
fn broadcast_b(b: &Array2<f32>, broadcast: Broadcast, r: usize, c: usize) -> f32 {
    match broadcast {
        Broadcast::None => b[[r, c]],
        Broadcast::Col => b[[r, 0]],
        Broadcast::Row => b[[0, c]],
        Broadcast::Scalar => b[[0, 0]],
    }
}

struct Case {
    config: PipelineConfig,
    formats: Formats,
    shape: TileShape,
    op: Operation,
    tiles: u32,
    per_section: u32,
}

impl Case {
    fn new(op: Operation) -> Self {
        Self {
            config: config(),
            formats: Formats::default(),
            shape: TileShape::TILE_32X32,
            op,
            tiles: 6,
            per_section: 2,
        }
    }
}

/// Runs `case` and checks every output tile against the reference.
async fn run_and_check(case: Case) -> pipeline::RunOutput {
    let engine = PipelineEngine::new(case.config)
        .unwrap()
        .configure(case.formats, case.shape)
        .unwrap()
        .init(case.op)
        .unwrap();
    let alloc = TileAllocator::new(engine.hw().l1().region());
    let shape = case.shape;

    let mut inputs = Vec::new();
    let mut jobs = Vec::new();
    for i in 0..case.tiles as usize {
        let a = operand(&shape, i);
        let b = operand(&shape, i + 4);
        let addr_a = place(&engine, &alloc, case.formats.src_a, &shape, &a);
        let addr_b = place(&engine, &alloc, case.formats.src_b, &shape, &b);
        let out = alloc.alloc(case.formats.dst.tile_size_bytes(&shape)).unwrap();
        jobs.push(TileJob {
            addr_a,
            addr_b,
            addr_out: out.addr,
        });
        inputs.push((a, b));
    }

    let output = engine
        .run(&RuntimeParams::new(case.tiles, case.per_section), &jobs)
        .await
        .unwrap();

    for (i, (job, (a, b))) in jobs.iter().zip(&inputs).enumerate() {
        let got = read_back(&engine, job.addr_out, case.formats.dst, &shape);
        for ((r, c), v) in got.indexed_iter() {
            let want = case.op.reference(a[[r, c]], broadcast_b(b, case.op.broadcast(), r, c));
            let tol = codec::tolerance(case.formats.dst, want);
            assert!(
                (v - want).abs() <= tol,
                "{} {shape} tile {i} at ({r}, {c}): got {v}, want {want}",
                case.op.name()
            );
        }
    }
    for id in SemaphoreId::ALL {
        assert_eq!(engine.hw().semaphores().read(id), 0, "{} not drained", id.name());
    }
    output
}

// ── Operations ─────────────────────────────────────────────────

#[tokio::test]
async fn test_eltwise_add() {
    let out = run_and_check(Case::new(Operation::eltwise(EltwiseOp::Add))).await;
    assert_eq!(out.metrics.tile_count, 6);
    assert_eq!(out.metrics.stage(StageId::Math).unwrap().tiles, 6);
}

#[tokio::test]
async fn test_eltwise_sub() {
    run_and_check(Case::new(Operation::eltwise(EltwiseOp::Sub))).await;
}

#[tokio::test]
async fn test_eltwise_mul_each_fidelity() {
    for fidelity in [
        MathFidelity::LoFi,
        MathFidelity::HiFi2,
        MathFidelity::HiFi3,
        MathFidelity::HiFi4,
    ] {
        let case = Case {
            config: PipelineConfig {
                math_fidelity: fidelity,
                ..config()
            },
            tiles: 3,
            ..Case::new(Operation::eltwise(EltwiseOp::Mul))
        };
        let out = run_and_check(case).await;
        // Two row chunks per face, each repeated once per phase.
        let math = out.metrics.stage(StageId::Math).unwrap();
        let per_face = 2 * fidelity.phases() as u64 + 2 + 1;
        assert_eq!(math.instructions, 3 * 4 * per_face, "{fidelity}");
    }
}

#[tokio::test]
async fn test_datacopy() {
    run_and_check(Case {
        tiles: 9,
        per_section: 4,
        ..Case::new(Operation::Datacopy)
    })
    .await;
}

#[tokio::test]
async fn test_broadcasts() {
    for broadcast in [Broadcast::Col, Broadcast::Row, Broadcast::Scalar] {
        for op in [EltwiseOp::Add, EltwiseOp::Mul] {
            run_and_check(Case {
                tiles: 3,
                ..Case::new(Operation::EltwiseBinary { op, broadcast })
            })
            .await;
        }
    }
}

#[tokio::test]
async fn test_smaller_tile_shapes() {
    for shape in [TileShape::TILE_16X16, TileShape::TILE_32X16, TileShape::TILE_16X32] {
        run_and_check(Case {
            shape,
            tiles: 5,
            per_section: 3,
            ..Case::new(Operation::eltwise(EltwiseOp::Add))
        })
        .await;
    }
}

#[tokio::test]
async fn test_partial_faces_and_face_grids() {
    // (faces_per_row, faces_per_col)
    let grids = [(1, 1), (2, 1), (1, 2), (2, 2), (4, 1), (1, 4)];
    let ops = [
        Operation::Datacopy,
        Operation::eltwise(EltwiseOp::Mul),
        Operation::EltwiseBinary {
            op: EltwiseOp::Add,
            broadcast: Broadcast::Col,
        },
        Operation::EltwiseBinary {
            op: EltwiseOp::Add,
            broadcast: Broadcast::Row,
        },
        Operation::EltwiseBinary {
            op: EltwiseOp::Sub,
            broadcast: Broadcast::Scalar,
        },
    ];
    for face_rows in [1, 2, 4, 8, 16] {
        for (per_row, per_col) in grids {
            let shape = TileShape::new(face_rows, 16, per_row, per_col).unwrap();
            for dest_sync in [DestSync::Half, DestSync::Full] {
                for op in ops {
                    let out = run_and_check(Case {
                        config: PipelineConfig {
                            dest_sync,
                            trace_events: false,
                            ..config()
                        },
                        shape,
                        tiles: 5,
                        per_section: 2,
                        ..Case::new(op)
                    })
                    .await;
                    let pack = out.metrics.stage(StageId::Pack).unwrap();
                    assert_eq!(pack.faces, 5 * shape.num_faces() as u64, "{shape}");
                }
            }
        }
    }
}

#[tokio::test]
async fn test_mixed_formats() {
    run_and_check(Case {
        formats: Formats::new(DataFormat::Float16, DataFormat::Float16B, DataFormat::Float32),
        ..Case::new(Operation::eltwise(EltwiseOp::Add))
    })
    .await;
}

// ── Dest modes ─────────────────────────────────────────────────

#[tokio::test]
async fn test_full_sync_one_section_at_a_time() {
    let out = run_and_check(Case {
        config: PipelineConfig {
            dest_sync: DestSync::Full,
            ..config()
        },
        tiles: 20,
        per_section: 16,
        ..Case::new(Operation::Datacopy)
    })
    .await;
    let flips = out
        .events
        .iter()
        .filter(|e| matches!(e, HwEvent::DestOffsetFlip { .. }))
        .count();
    assert_eq!(flips, 0);
}

#[tokio::test]
async fn test_fp32_dest() {
    let case = Case {
        config: PipelineConfig {
            fp32_dest_acc: true,
            ..config()
        },
        formats: Formats::uniform(DataFormat::Float32),
        tiles: 9,
        per_section: 4,
        ..Case::new(Operation::eltwise(EltwiseOp::Mul))
    };
    run_and_check(case).await;
}

#[tokio::test]
async fn test_half_sync_flips_pair_up() {
    let out = run_and_check(Case {
        tiles: 8,
        per_section: 2,
        ..Case::new(Operation::eltwise(EltwiseOp::Add))
    })
    .await;
    let flips = |stage: StageId| {
        out.events
            .iter()
            .filter(|e| matches!(e, HwEvent::DestOffsetFlip { stage: s, .. } if *s == stage))
            .count()
    };
    assert_eq!(flips(StageId::Math), 4);
    assert_eq!(flips(StageId::Pack), 4);

    let switches = out
        .events
        .iter()
        .filter(|e| matches!(e, HwEvent::ConfigContextSwitch { .. }))
        .count();
    assert_eq!(switches, 8);
}

#[tokio::test]
async fn test_single_unpack_context() {
    run_and_check(Case {
        config: PipelineConfig {
            unpack_contexts: 1,
            ..config()
        },
        ..Case::new(Operation::eltwise(EltwiseOp::Sub))
    })
    .await;
}

#[tokio::test]
async fn test_repeated_runs_and_reconfigure() {
    let engine = PipelineEngine::new(config())
        .unwrap()
        .configure(Formats::default(), TileShape::TILE_32X32)
        .unwrap()
        .init(Operation::Datacopy)
        .unwrap();
    let alloc = TileAllocator::new(engine.hw().l1().region());
    let shape = TileShape::TILE_32X32;
    let a = operand(&shape, 1);
    let addr = place(&engine, &alloc, DataFormat::Float16B, &shape, &a);
    let out = alloc.alloc(4096).unwrap().addr;
    let job = TileJob {
        addr_a: addr,
        addr_b: addr,
        addr_out: out,
    };

    for _ in 0..3 {
        engine.run(&RuntimeParams::new(1, 1), &[job]).await.unwrap();
        assert_eq!(read_back(&engine, out, DataFormat::Float16B, &shape), a);
    }

    let mut configured = engine.uninit().unwrap();
    configured
        .reconfigure(Formats::new(DataFormat::Float16B, DataFormat::Float16B, DataFormat::Float32))
        .unwrap();
    let engine = configured.init(Operation::Datacopy).unwrap();
    engine.run(&RuntimeParams::new(1, 1), &[job]).await.unwrap();
    assert_eq!(read_back(&engine, out, DataFormat::Float32, &shape), a);
}

// ── Failure handling ───────────────────────────────────────────

#[tokio::test]
async fn test_stall_trips_watchdog() {
    let engine = PipelineEngine::new(PipelineConfig {
        watchdog_ms: 100,
        ..config()
    })
    .unwrap()
    .configure(Formats::default(), TileShape::TILE_32X32)
    .unwrap()
    .init(Operation::Datacopy)
    .unwrap();
    let alloc = TileAllocator::new(engine.hw().l1().region());
    let addr = alloc.alloc(2048).unwrap().addr;
    let job = TileJob {
        addr_a: addr,
        addr_b: addr,
        addr_out: alloc.alloc(2048).unwrap().addr,
    };

    // Both config contexts look taken, so the unpacker never starts.
    let sems = engine.hw().semaphores();
    sems.post(SemaphoreId::UnpackSync).unwrap();
    sems.post(SemaphoreId::UnpackSync).unwrap();

    let err = engine.run(&RuntimeParams::new(1, 1), &[job]).await.unwrap_err();
    assert!(
        matches!(err, PipelineError::SynchronizationStall { waited_ms: 100 }),
        "{err}"
    );
    assert!(engine.hw().is_halted());

    // The core stays halted until reset.
    let err = engine.run(&RuntimeParams::new(1, 1), &[job]).await.unwrap_err();
    assert!(err.is_halt());
    let engine = engine
        .reset()
        .configure(Formats::default(), TileShape::TILE_32X32)
        .unwrap()
        .init(Operation::Datacopy)
        .unwrap();
    engine.run(&RuntimeParams::new(1, 1), &[job]).await.unwrap();
}

#[tokio::test]
async fn test_stage_error_halts_partners() {
    let engine = PipelineEngine::new(config())
        .unwrap()
        .configure(Formats::default(), TileShape::TILE_32X32)
        .unwrap()
        .init(Operation::Datacopy)
        .unwrap();
    let alloc = TileAllocator::new(engine.hw().l1().region());
    let addr = alloc.alloc(2048).unwrap().addr;
    let end = engine.hw().l1().region().end();
    let job = TileJob {
        addr_a: addr,
        addr_b: addr,
        // Past the end of L1: pack rejects it after math has finished.
        addr_out: L1Address::new((end >> 4) - 1),
    };

    let err = engine.run(&RuntimeParams::new(1, 1), &[job]).await.unwrap_err();
    assert!(matches!(err, PipelineError::Memory(_)), "{err}");
    assert!(engine.hw().is_halted());
}

#[tokio::test]
async fn test_stale_mailbox_is_an_error() {
    let engine = PipelineEngine::new(config())
        .unwrap()
        .configure(Formats::default(), TileShape::TILE_32X32)
        .unwrap()
        .init(Operation::Datacopy)
        .unwrap();
    let alloc = TileAllocator::new(engine.hw().l1().region());
    let addr = alloc.alloc(2048).unwrap().addr;
    let job = TileJob {
        addr_a: addr,
        addr_b: addr,
        addr_out: alloc.alloc(2048).unwrap().addr,
    };
    engine.hw().mailboxes().write(StageId::Math, 99).unwrap();

    let err = engine.run(&RuntimeParams::new(1, 1), &[job]).await.unwrap_err();
    assert!(matches!(err, PipelineError::Hw(_) | PipelineError::ProtocolViolation { .. }), "{err}");
}
