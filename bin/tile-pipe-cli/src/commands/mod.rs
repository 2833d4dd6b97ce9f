// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommands and the helpers they share: logging setup, config
//! overrides, argument parsing and synthetic workloads.

pub mod benchmark;
pub mod inspect;
pub mod run;

use crate::OpArgs;
use anyhow::{bail, Context};
use l1_memory::{L1Address, TileAllocator};
use mop::{Broadcast, EltwiseOp};
use ndarray::Array2;
use pipeline::{
    fidelity_product, Formats, MathFidelity, Operation, PipelineConfig, PipelineEngine, Ready,
    TileJob,
};
use std::path::Path;
use tile_core::{codec, tilize, untilize, DataFormat, TileShape, FACE_C_DIM};
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Loads the pipeline configuration, or the defaults without a file.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::from_file(p)
            .with_context(|| format!("loading config from {}", p.display())),
        None => Ok(PipelineConfig::default()),
    }
}

/// Applies the per-command overrides on top of the loaded configuration.
pub fn apply_overrides(mut config: PipelineConfig, args: &OpArgs) -> anyhow::Result<PipelineConfig> {
    if let Some(sync) = &args.dest_sync {
        config.dest_sync = sync.parse()?;
    }
    if let Some(fidelity) = &args.fidelity {
        config.math_fidelity = fidelity.parse()?;
    }
    if args.fp32_dest {
        config.fp32_dest_acc = true;
    }
    config.validate()?;
    Ok(config)
}

/// Parses `"RxC"` into one of the supported tile shapes.
pub fn parse_shape(s: &str) -> anyhow::Result<TileShape> {
    let (rows, cols) = s
        .trim()
        .to_ascii_lowercase()
        .split_once('x')
        .map(|(r, c)| (r.trim().parse::<u32>(), c.trim().parse::<u32>()))
        .with_context(|| format!("tile shape '{s}' is not of the form RxC"))?;
    let (rows, cols) = (rows?, cols?);
    [
        TileShape::TILE_32X32,
        TileShape::TILE_32X16,
        TileShape::TILE_16X32,
        TileShape::TILE_16X16,
    ]
    .into_iter()
    .find(|t| t.total_rows() == rows && t.total_cols() == cols)
    .with_context(|| format!("unsupported tile shape {rows}x{cols}"))
}

/// Parses a `"RxC"` face grid into `(faces_per_col, faces_per_row)`.
pub fn parse_face_grid(s: &str) -> anyhow::Result<(u8, u8)> {
    let (rows, cols) = s
        .trim()
        .to_ascii_lowercase()
        .split_once('x')
        .map(|(r, c)| (r.trim().parse::<u8>(), c.trim().parse::<u8>()))
        .with_context(|| format!("face grid '{s}' is not of the form RxC"))?;
    Ok((rows?, cols?))
}

/// Resolves the tile geometry: a named shape, optionally with its face
/// height or face grid replaced. The result is validated.
pub fn parse_tile(shape: &str, face_rows: Option<u8>, face_grid: Option<&str>) -> anyhow::Result<TileShape> {
    let base = parse_shape(shape)?;
    if face_rows.is_none() && face_grid.is_none() {
        return Ok(base);
    }
    let (per_col, per_row) = match face_grid {
        Some(grid) => parse_face_grid(grid)?,
        None => (base.faces_per_col() as u8, base.faces_per_row() as u8),
    };
    let face_rows = face_rows.unwrap_or(base.face_rows() as u8);
    TileShape::new(face_rows, FACE_C_DIM, per_row, per_col)
        .with_context(|| format!("face rows {face_rows}, face grid {per_col}x{per_row}"))
}

/// Parses `"a,b,dst"` or a single format used for all three.
pub fn parse_formats(s: &str) -> anyhow::Result<Formats> {
    let parts: Vec<DataFormat> = s
        .split(',')
        .map(|p| p.parse::<DataFormat>())
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [f] => Ok(Formats::uniform(*f)),
        [a, b, d] => Ok(Formats::new(*a, *b, *d)),
        _ => bail!("expected one format or three comma-separated formats, got '{s}'"),
    }
}

/// Parses the operation name and broadcast mode.
pub fn parse_op(op: &str, broadcast: &str) -> anyhow::Result<Operation> {
    let broadcast: Broadcast = broadcast.parse()?;
    if op.eq_ignore_ascii_case("datacopy") {
        if broadcast != Broadcast::None {
            bail!("datacopy takes no broadcast");
        }
        return Ok(Operation::Datacopy);
    }
    let op: EltwiseOp = op.parse()?;
    Ok(Operation::EltwiseBinary { op, broadcast })
}

/// Everything an [`OpArgs`] resolves to.
pub struct Resolved {
    pub config: PipelineConfig,
    pub formats: Formats,
    pub shape: TileShape,
    pub op: Operation,
}

pub fn resolve(config: PipelineConfig, args: &OpArgs) -> anyhow::Result<Resolved> {
    Ok(Resolved {
        config: apply_overrides(config, args)?,
        formats: parse_formats(&args.formats)?,
        shape: parse_tile(&args.shape, args.face_rows, args.face_grid.as_deref())?,
        op: parse_op(&args.op, &args.broadcast)?,
    })
}

// ── Synthetic workloads ────────────────────────────────────────

/// What the pipeline should produce for one element. Multiplies see only
/// as much of srcB's mantissa as the fidelity phases cover.
fn host_reference(op: Operation, fidelity: MathFidelity, a: f32, b: f32) -> f32 {
    match op {
        Operation::EltwiseBinary { op: EltwiseOp::Mul, .. } => fidelity_product(a, b, fidelity),
        _ => op.reference(a, b),
    }
}

/// Small integers, exact in every format the pipeline supports.
fn operand(shape: &TileShape, seed: usize) -> Array2<f32> {
    let (rows, cols) = (shape.total_rows() as usize, shape.total_cols() as usize);
    Array2::from_shape_fn((rows, cols), |(r, c)| ((r * 5 + c * 3 + seed) % 7) as f32)
}

/// Operand tiles staged in the engine's L1 and the jobs that point at them.
pub struct Workload {
    pub jobs: Vec<TileJob>,
    inputs: Vec<(Array2<f32>, Array2<f32>)>,
    formats: Formats,
    shape: TileShape,
}

impl Workload {
    /// Allocates and writes `tiles` operand pairs plus output buffers.
    pub fn stage(
        engine: &PipelineEngine<Ready>,
        formats: Formats,
        shape: TileShape,
        tiles: u32,
    ) -> anyhow::Result<Self> {
        let alloc = TileAllocator::new(engine.hw().l1().region());
        let mut jobs = Vec::with_capacity(tiles as usize);
        let mut inputs = Vec::with_capacity(tiles as usize);
        for i in 0..tiles as usize {
            let a = operand(&shape, i);
            let b = operand(&shape, i + 3);
            let addr_a = place(engine, &alloc, formats.src_a, &shape, &a)?;
            let addr_b = place(engine, &alloc, formats.src_b, &shape, &b)?;
            let out = alloc
                .alloc(formats.dst.tile_size_bytes(&shape))
                .context("allocating output tile")?;
            jobs.push(TileJob {
                addr_a,
                addr_b,
                addr_out: out.addr,
            });
            inputs.push((a, b));
        }
        Ok(Self {
            jobs,
            inputs,
            formats,
            shape,
        })
    }

    /// Reads every output tile back and counts elements outside the
    /// format tolerance of the host reference.
    pub fn verify(&self, engine: &PipelineEngine<Ready>, op: Operation) -> anyhow::Result<Mismatches> {
        let fidelity = engine.config().math_fidelity;
        let mut result = Mismatches::default();
        for (job, (a, b)) in self.jobs.iter().zip(&self.inputs) {
            let bytes = engine
                .hw()
                .l1()
                .read_at(job.addr_out, self.formats.dst.tile_size_bytes(&self.shape))?;
            let got = untilize(&self.shape, &codec::decode(self.formats.dst, &bytes)?)?;
            for ((r, c), v) in got.indexed_iter() {
                let rhs = match op.broadcast() {
                    Broadcast::None => b[[r, c]],
                    Broadcast::Col => b[[r, 0]],
                    Broadcast::Row => b[[0, c]],
                    Broadcast::Scalar => b[[0, 0]],
                };
                let want = host_reference(op, fidelity, a[[r, c]], rhs);
                let err = (v - want).abs();
                result.checked += 1;
                result.max_error = result.max_error.max(err);
                if err > codec::tolerance(self.formats.dst, want) {
                    result.wrong += 1;
                }
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Mismatches {
    pub checked: u64,
    pub wrong: u64,
    pub max_error: f32,
}

fn place(
    engine: &PipelineEngine<Ready>,
    alloc: &TileAllocator,
    format: DataFormat,
    shape: &TileShape,
    tile: &Array2<f32>,
) -> anyhow::Result<L1Address> {
    let buf = alloc
        .alloc(format.tile_size_bytes(shape))
        .context("allocating operand tile")?;
    let faces = tilize(shape, tile.view())?;
    let mut bytes = Vec::with_capacity(buf.len as usize);
    codec::encode(format, &faces, &mut bytes)?;
    engine.hw().l1().write_at(buf.addr, &bytes)?;
    Ok(buf.addr)
}

/// Builds a ready engine for one resolved command.
pub fn ready_engine(r: &Resolved) -> anyhow::Result<PipelineEngine<Ready>> {
    Ok(PipelineEngine::new(r.config.clone())?
        .configure(r.formats, r.shape)?
        .init(r.op)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("32x32").unwrap(), TileShape::TILE_32X32);
        assert_eq!(parse_shape("16X32").unwrap(), TileShape::TILE_16X32);
        assert!(parse_shape("64x64").is_err());
        assert!(parse_shape("square").is_err());
    }

    #[test]
    fn test_parse_tile_geometry() {
        assert_eq!(parse_tile("32x32", None, None).unwrap(), TileShape::TILE_32X32);

        let partial = parse_tile("32x32", Some(8), None).unwrap();
        assert_eq!((partial.face_rows(), partial.num_faces()), (8, 4));
        assert_eq!((partial.total_rows(), partial.total_cols()), (16, 32));

        let wide = parse_tile("32x32", Some(4), Some("1x4")).unwrap();
        assert_eq!((wide.faces_per_col(), wide.faces_per_row()), (1, 4));
        assert_eq!((wide.total_rows(), wide.total_cols()), (4, 64));

        assert_eq!(parse_tile("16x16", None, Some("2x1")).unwrap(), TileShape::TILE_32X16);

        // Geometry goes through validation.
        assert!(parse_tile("32x32", Some(3), None).is_err());
        assert!(parse_tile("32x32", None, Some("3x1")).is_err());
        assert!(parse_tile("32x32", None, Some("4x4")).is_err());
        assert!(parse_face_grid("two").is_err());
    }

    #[test]
    fn test_mul_reference_follows_fidelity() {
        let op = Operation::eltwise(EltwiseOp::Mul);
        let b = 1.234_567_8_f32;
        let lofi = host_reference(op, MathFidelity::LoFi, 2.0, b);
        assert_eq!(lofi, fidelity_product(2.0, b, MathFidelity::LoFi));
        assert!((lofi - 2.0 * b).abs() > 1e-3);
        assert_eq!(host_reference(op, MathFidelity::HiFi4, 2.0, b), 2.0 * b);
        // Only multiplies depend on fidelity.
        let add = Operation::eltwise(EltwiseOp::Add);
        assert_eq!(host_reference(add, MathFidelity::LoFi, 2.0, b), 2.0 + b);
    }

    #[test]
    fn test_parse_formats() {
        assert_eq!(parse_formats("bf16").unwrap(), Formats::uniform(DataFormat::Float16B));
        let f = parse_formats("fp16,bf16,fp32").unwrap();
        assert_eq!(f.src_a, DataFormat::Float16);
        assert_eq!(f.dst, DataFormat::Float32);
        assert!(parse_formats("fp16,bf16").is_err());
    }

    #[test]
    fn test_parse_op() {
        assert_eq!(parse_op("datacopy", "none").unwrap(), Operation::Datacopy);
        assert_eq!(
            parse_op("mul", "col").unwrap(),
            Operation::EltwiseBinary {
                op: EltwiseOp::Mul,
                broadcast: Broadcast::Col
            }
        );
        assert!(parse_op("datacopy", "row").is_err());
        assert!(parse_op("div", "none").is_err());
    }
}
