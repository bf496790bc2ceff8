// Copyright 2026 Cornell University
// released under MIT License

use alu_bfm::config::{AluTiming, TestbenchConfig};
use alu_bfm::scoreboard::Scoreboard;
use alu_bfm::stimulus::SequenceKind;
use alu_bfm::testbench::{runtime, RunMode, Testbench};
use anyhow::{bail, Context};
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::time::Duration;

/// Args for the regression CLI
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Which command sequence to send
    #[arg(short, long, value_enum, default_value_t = SequenceKind::AllOps)]
    sequence: SequenceKind,

    /// Number of random commands (or Fibonacci additions)
    #[arg(short = 'n', long, default_value_t = 8)]
    count: usize,

    /// Seed for the random operands
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Whether to wait for each result before sending the next command
    #[arg(short, long, value_enum, default_value_t = RunMode::Lockstep)]
    mode: RunMode,

    /// Clock period in milliseconds of virtual time, must be even
    #[arg(long, default_value_t = 2)]
    period_ms: u64,

    /// Latency of add, and, xor in clock cycles
    #[arg(long, default_value_t = 1)]
    op_latency: u32,

    /// Latency of multiply in clock cycles
    #[arg(long, default_value_t = 3)]
    mul_latency: u32,

    /// Users can specify `-v` or `--verbose` to toggle logging
    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,
}

/// Example (logs every check):
/// `cargo run -- --sequence random -n 20 --mode pipelined -v`
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // For concision, we disable timestamps in the log
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    let config = TestbenchConfig {
        timing: AluTiming {
            single_cycle: cli.op_latency,
            multiply: cli.mul_latency,
        },
        clock_period: Duration::from_millis(cli.period_ms),
        ..TestbenchConfig::default()
    };
    let scoreboard = if cli.sequence.covers_all_ops() {
        Scoreboard::new()
    } else {
        Scoreboard::new().without_coverage_errors()
    };

    let runtime = runtime().context("failed to build the simulation runtime")?;
    let report = runtime.block_on(async {
        let tb = Testbench::new(config)?;
        tb.bring_up().await?;
        let mut stimulus = cli.sequence.build(cli.count, cli.seed);
        let report = tb.run(stimulus.as_mut(), cli.mode, scoreboard).await;
        tb.finish().await?;
        report
    })?;

    println!("{report}");
    if !report.passed() {
        bail!("{} regression failed", cli.sequence);
    }
    Ok(())
}
