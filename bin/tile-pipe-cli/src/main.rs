// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tile-pipe
//!
//! Command-line driver for the tile pipeline simulator.
//!
//! ## Usage
//! ```bash
//! # Push 32 tiles through an element-wise multiply and check the result
//! tile-pipe run --op mul --tiles 32 --fidelity hifi2
//!
//! # Show the programmed registers and MOP expansion of each stage
//! tile-pipe inspect --op add --broadcast col
//!
//! # Partial faces: four faces of 8x16 in one row
//! tile-pipe run --op sub --face-rows 8 --face-grid 1x4
//!
//! # Compare dest modes and fidelities
//! tile-pipe benchmark --tiles 64 --sweep-sync half,full --sweep-fidelity lofi,hifi4
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tile-pipe",
    about = "Unpack/math/pack pipeline simulator for a tile-based tensor core",
    version,
    author
)]
struct Cli {
    /// Path to a TOML pipeline configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Operation and operand selection shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct OpArgs {
    /// Operation: add, sub, mul or datacopy.
    #[arg(short, long, default_value = "add")]
    pub op: String,

    /// srcB broadcast for binary operations: none, col, row or scalar.
    #[arg(short, long, default_value = "none")]
    pub broadcast: String,

    /// Tile shape: 32x32, 32x16, 16x32 or 16x16.
    #[arg(short, long, default_value = "32x32")]
    pub shape: String,

    /// Face height (1, 2, 4, 8 or 16 rows), overriding the shape's.
    #[arg(long)]
    pub face_rows: Option<u8>,

    /// Face grid as "RxC" (face rows x faces per row), overriding the
    /// shape's. Partial-face tiles need this or --face-rows.
    #[arg(long)]
    pub face_grid: Option<String>,

    /// L1 formats as "src_a,src_b,dst" (or one format for all three).
    #[arg(short, long, default_value = "bf16")]
    pub formats: String,

    /// Override the configured dest sync mode (half or full).
    #[arg(long)]
    pub dest_sync: Option<String>,

    /// Override the configured math fidelity.
    #[arg(long)]
    pub fidelity: Option<String>,

    /// Accumulate in fp32.
    #[arg(long)]
    pub fp32_dest: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one workload through the pipeline and verify the output tiles.
    Run {
        #[command(flatten)]
        op: OpArgs,

        /// Number of tiles.
        #[arg(short, long, default_value_t = 16)]
        tiles: u32,

        /// Tiles per dest section (defaults to the dest capacity).
        #[arg(long)]
        per_section: Option<u32>,

        /// Print the hardware event trace.
        #[arg(long)]
        events: bool,

        /// Print metrics as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Show configuration registers, address modifiers and MOP programs.
    Inspect {
        #[command(flatten)]
        op: OpArgs,
    },

    /// Time runs across dest modes and fidelities.
    Benchmark {
        #[command(flatten)]
        op: OpArgs,

        /// Tiles per run.
        #[arg(short, long, default_value_t = 64)]
        tiles: u32,

        /// Comma-separated dest sync modes to sweep.
        #[arg(long, default_value = "half,full")]
        sweep_sync: String,

        /// Comma-separated fidelities to sweep.
        #[arg(long, default_value = "lofi,hifi4")]
        sweep_fidelity: String,

        /// Timed runs per configuration.
        #[arg(long, default_value_t = 5)]
        iterations: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);

    let config = commands::load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Run {
            op,
            tiles,
            per_section,
            events,
            json,
        } => commands::run::execute(config, op, tiles, per_section, events, json).await,
        Commands::Inspect { op } => commands::inspect::execute(config, op).await,
        Commands::Benchmark {
            op,
            tiles,
            sweep_sync,
            sweep_fidelity,
            iterations,
        } => {
            commands::benchmark::execute(config, op, tiles, sweep_sync, sweep_fidelity, iterations)
                .await
        }
    }
}
