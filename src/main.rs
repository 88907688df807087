// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! Empirical quality tests for 16-bit PRNGs: pixel fill, collision and gorilla tests
//! run in parallel on a fixed worker pool.

pub mod collision;
pub mod config;
pub mod error;
pub mod fill;
pub mod gorilla;
pub mod job_pool;
pub mod orchestrator;
pub mod rng_testing;
pub mod rngs;
pub mod stats;
mod strings;
pub mod utils;

use std::{process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::BenchConfig;
use error::Result;
use orchestrator::{Bench, TestMode};
use rngs::GeneratorKind;

/// Statistical comparison of pseudo random number generators
#[derive(Parser)]
#[command(name = "pearlacid-bench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Worker threads and generator lanes
    #[arg(long, global = true, default_value_t = config::DEFAULT_WORKER_COUNT)]
    workers: usize,

    /// Gorilla window length is 26 minus this (0..=12)
    #[arg(long, global = true, default_value_t = 0)]
    shortening: u32,

    /// Seconds before a missing worker completion is reported as a deadlock
    #[arg(long, global = true, default_value_t = 30)]
    sync_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive one generator through one test mode
    Run {
        /// Generator name, e.g. XorShift32 or BadLcg
        #[arg(short, long, default_value = "XorShift32")]
        generator: String,

        /// Fill, Collision or Gorilla
        #[arg(short, long, default_value = "Fill")]
        test: String,

        /// Frames to step (ignored for Gorilla)
        #[arg(short, long, default_value_t = 10)]
        frames: usize,

        /// Write the fill canvas to this .ppm file
        #[arg(long)]
        ppm: Option<String>,
    },

    /// Collision and gorilla tests for every generator
    Suite {
        /// Collision frames per generator
        #[arg(short, long, default_value_t = 8)]
        frames: usize,

        /// Only test these generators
        #[arg(short, long)]
        generator: Vec<String>,

        /// Result file, lines are appended
        #[arg(long, default_value = "rslt.txt")]
        results: String,
    },

    /// Throughput of every generator
    Bench {
        /// Calls per generator
        #[arg(short, long, default_value_t = 100_000_000)]
        calls: usize,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn bench_config(cli: &Cli) -> BenchConfig {
    BenchConfig {
        worker_count: cli.workers,
        gorilla_shortening: cli.shortening,
        sync_timeout: Duration::from_secs(cli.sync_timeout),
        ..Default::default()
    }
}

fn run(config: BenchConfig, generator: &str, test: &str, frames: usize, ppm: Option<&str>) -> Result<()> {
    let kind: GeneratorKind = generator.parse()?;
    let mode: TestMode = test.parse()?;
    let mut bench = Bench::new(config)?;
    bench.set_generator(kind)?;
    bench.set_test_mode(mode)?;

    match mode {
        TestMode::Gorilla => {
            let report = bench.wait_gorilla()?;
            println!("Gorilla test of {}", kind);
            for line in rng_testing::format_gorilla_report(report) {
                println!("{}", line);
            }
        }
        TestMode::Fill | TestMode::Collision => {
            for _ in 0..frames {
                bench.step()?;
            }
            info!("{} frames of {} on {}", frames, mode, kind);
        }
    }
    if mode == TestMode::Collision {
        println!("Collision test of {} after {} frames", kind, bench.collision_frames());
        let diff_scale = bench.config().diff_scale;
        for cell in bench.collision_report() {
            println!("{}", rng_testing::format_collision_cell(&cell, diff_scale));
        }
    }
    if let Some(path) = ppm {
        let canvas = bench.canvas();
        utils::create_ppm(path, canvas.width(), canvas.height(), &canvas.to_bytes())?;
        info!("Fill canvas written to {}", path);
    }
    bench.dispose();
    Ok(())
}

fn suite(config: BenchConfig, frames: usize, generators: &[String], results: &str) -> Result<()> {
    let kinds = if generators.is_empty() {
        GeneratorKind::ALL.to_vec()
    } else {
        generators
            .iter()
            .map(|name| name.parse())
            .collect::<Result<Vec<GeneratorKind>>>()?
    };
    let mut bench = Bench::new(config)?;
    rng_testing::test_suite(&mut bench, &kinds, frames, results)?;
    bench.dispose();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);
    let start = std::time::Instant::now();
    let config = bench_config(&cli);

    let result = match &cli.command {
        Commands::Run {
            generator,
            test,
            frames,
            ppm,
        } => run(config, generator, test, *frames, ppm.as_deref()),
        Commands::Suite {
            frames,
            generator,
            results,
        } => suite(config, *frames, generator, results),
        Commands::Bench { calls } => {
            for line in rng_testing::benchmark(*calls) {
                println!("{}", line);
            }
            Ok(())
        }
    };

    match result {
        Ok(()) => {
            info!("Full program runtime: {:?}", start.elapsed());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
