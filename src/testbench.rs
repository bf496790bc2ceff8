// Copyright 2026 Cornell University
// released under MIT License

//! # Testbench
//! Wires the simulator, the clock, the TinyALU model and the bridge together,
//! and runs stimulus through them.

use crate::bridge::BusBridge;
use crate::command::Command;
use crate::config::TestbenchConfig;
use crate::device::{declare_ports, TinyAlu};
use crate::errors::{BridgeError, BridgeResult, SimResult};
use crate::scoreboard::{Report, Scoreboard};
use crate::sim::{Clock, Simulation, Simulator};
use crate::stimulus::Stimulus;
use log::{info, warn};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

/// Clock cycles to keep watching the bus after the last expected result
const CHECKOUT_CYCLES: usize = 4;

/// How commands are sent through the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunMode {
    /// Wait for each result before sending the next command
    Lockstep,
    /// Keep the command channel full and collect results as they arrive
    Pipelined,
}

/// Builds the runtime every testbench runs on: one thread, with virtual time
/// that jumps straight to the next clock edge
pub fn runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
}

pub struct Testbench {
    config: TestbenchConfig,
    sim: Simulator,
    bridge: BusBridge<Simulator>,
    clock: JoinHandle<SimResult<()>>,
    device: JoinHandle<SimResult<()>>,
}

impl Testbench {
    /// Declares the bus and starts the clock and the device model.
    /// Must be called from within a runtime.
    pub fn new(config: TestbenchConfig) -> BridgeResult<Self> {
        let sim = Simulator::new();
        let pins = config.pins();
        declare_ports(&sim, pins)?;
        let device = TinyAlu::new(sim.clone(), pins.clone(), config.timing).start();
        let clock = Clock::new(sim.clone(), &pins.clock, config.clock_period)?.start();
        let bridge = BusBridge::new(sim.clone(), config.bridge.clone());
        Ok(Self {
            config,
            sim,
            bridge,
            clock,
            device,
        })
    }

    pub fn bridge(&self) -> &BusBridge<Simulator> {
        &self.bridge
    }

    pub fn config(&self) -> &TestbenchConfig {
        &self.config
    }

    pub fn sim(&self) -> &Simulator {
        &self.sim
    }

    /// Resets the bus and starts the bridge loops
    pub async fn bring_up(&self) -> BridgeResult<()> {
        self.bridge.reset().await?;
        self.bridge.start()
    }

    /// Sends every command `stimulus` produces and checks the results
    pub async fn run(
        &self,
        stimulus: &mut dyn Stimulus,
        mode: RunMode,
        mut scoreboard: Scoreboard,
    ) -> BridgeResult<Report> {
        let mode = if mode == RunMode::Pipelined && stimulus.needs_feedback() {
            warn!("Stimulus depends on previous results, running in lockstep instead");
            RunMode::Lockstep
        } else {
            mode
        };
        info!("Running in {mode:?} mode");
        match mode {
            RunMode::Lockstep => self.run_lockstep(stimulus, &mut scoreboard).await?,
            RunMode::Pipelined => self.run_pipelined(stimulus, &mut scoreboard).await?,
        }
        self.checkout(scoreboard).await
    }

    /// Watches the bus for a few more cycles, records anything the bridge
    /// observed in the meantime and checks the scoreboard.
    /// Items observed beyond the expected pairs are duplicates.
    pub async fn checkout(&self, mut scoreboard: Scoreboard) -> BridgeResult<Report> {
        self.bridge.wait_cycles(CHECKOUT_CYCLES).await?;
        while let Some(command) = self.bridge.try_command() {
            scoreboard.record_command(command);
        }
        while let Some(result) = self.bridge.try_result() {
            scoreboard.record_result(result);
        }
        self.bridge.check()?;
        Ok(scoreboard.check())
    }

    async fn run_lockstep(
        &self,
        stimulus: &mut dyn Stimulus,
        scoreboard: &mut Scoreboard,
    ) -> BridgeResult<()> {
        let mut last = None;
        while let Some(command) = stimulus.next(last) {
            self.bridge.send(command).await?;
            scoreboard.record_command(self.bridge.await_command().await?);
            let result = self.bridge.await_result().await?;
            scoreboard.record_result(result);
            last = Some(result);
        }
        Ok(())
    }

    async fn run_pipelined(
        &self,
        stimulus: &mut dyn Stimulus,
        scoreboard: &mut Scoreboard,
    ) -> BridgeResult<()> {
        let commands: Vec<Command> = std::iter::from_fn(|| stimulus.next(None)).collect();
        let send_all = async {
            for &command in &commands {
                self.bridge.send(command).await?;
            }
            Ok::<_, BridgeError>(())
        };
        let collect = async {
            let mut observed = Vec::with_capacity(commands.len());
            for _ in &commands {
                let command = self.bridge.await_command().await?;
                let result = self.bridge.await_result().await?;
                observed.push((command, result));
            }
            Ok::<_, BridgeError>(observed)
        };
        let (sent, observed) = tokio::join!(send_all, collect);
        sent?;
        for (command, result) in observed? {
            scoreboard.record_command(command);
            scoreboard.record_result(result);
        }
        Ok(())
    }

    /// Shuts the bridge down and stops the simulation.
    /// Returns the first fault of any task.
    pub async fn finish(self) -> BridgeResult<()> {
        let bridge = self.bridge.shutdown().await;
        self.sim.stop();
        for (task, handle) in [("clock", self.clock), ("device", self.device)] {
            match handle.await {
                Ok(res) => res?,
                Err(err) => {
                    return Err(BridgeError::TaskFailed {
                        task,
                        details: err.to_string(),
                    })
                }
            }
        }
        info!("Testbench finished at step {}", self.sim.now());
        bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Op;
    use crate::config::AluTiming;
    use crate::errors::SimError;
    use crate::stimulus::{Fibonacci, SequenceKind};
    use std::time::Duration;

    /// Asserts that `res` is `Ok`
    fn assert_ok<T: std::fmt::Debug>(res: &BridgeResult<T>) {
        assert!(res.is_ok(), "Expected Ok, got {:?}", res);
    }

    async fn bench(config: TestbenchConfig) -> Testbench {
        let tb = Testbench::new(config).unwrap();
        assert_ok(&tb.bring_up().await);
        tb
    }

    #[tokio::test(start_paused = true)]
    async fn all_ops_lockstep_regression() {
        let tb = bench(TestbenchConfig::default()).await;
        let mut stimulus = SequenceKind::AllOps.build(4, 0);
        let report = tb
            .run(stimulus.as_mut(), RunMode::Lockstep, Scoreboard::new())
            .await
            .unwrap();
        assert!(report.passed(), "{report}");
        assert_eq!(report.passed_count(), 8);
        assert!(report.missed_ops.is_empty());
        assert_ok(&tb.finish().await);
    }

    #[tokio::test(start_paused = true)]
    async fn pipelined_random_regression_with_slow_device() {
        let config = TestbenchConfig {
            timing: AluTiming::uniform(3),
            ..TestbenchConfig::default()
        };
        let tb = bench(config).await;
        let mut stimulus = SequenceKind::Random.build(12, 42);
        let report = tb
            .run(stimulus.as_mut(), RunMode::Pipelined, Scoreboard::new())
            .await
            .unwrap();
        assert!(report.passed(), "{report}");
        assert_eq!(report.passed_count(), 12);
        assert!(report.orphan_results.is_empty());
        assert_ok(&tb.finish().await);
    }

    #[tokio::test(start_paused = true)]
    async fn fibonacci_runs_in_lockstep() {
        let tb = bench(TestbenchConfig::default()).await;
        let mut fib = Fibonacci::new(7);
        let report = tb
            .run(
                &mut fib,
                RunMode::Pipelined,
                Scoreboard::new().without_coverage_errors(),
            )
            .await
            .unwrap();
        assert!(report.passed(), "{report}");
        assert_eq!(fib.numbers(), [0, 1, 1, 2, 3, 5, 8, 13, 21]);
        assert_ok(&tb.finish().await);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_reports_bridge_faults() {
        let tb = bench(TestbenchConfig::default()).await;
        let pins = tb.config().pins().clone();
        tb.sim().write(&pins.completion, 1).unwrap();
        let fault = tb.bridge().wait_for_fault().await;
        assert!(fault.is_protocol_violation());
        assert_eq!(tb.finish().await, Err(fault));
    }

    #[tokio::test(start_paused = true)]
    async fn result_without_command_is_reported_as_orphan() {
        let tb = bench(TestbenchConfig::default()).await;
        let command = Command::new(0x10, 0x20, Op::Mul);
        tb.bridge().send(command).await.unwrap();
        // the command is consumed here, so the scoreboard only sees its result
        tb.bridge().await_command().await.unwrap();
        let start = tb.sim().now();

        let report = tb
            .checkout(Scoreboard::new().without_coverage_errors())
            .await
            .unwrap();
        assert_eq!(tb.sim().now(), start + 2 * CHECKOUT_CYCLES as u64);
        assert_eq!(report.orphan_results, [command.expected()]);
        assert_eq!(report.passed_count(), 0);
        assert!(!report.passed(), "{report}");
        assert_ok(&tb.finish().await);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_clock_period_is_rejected() {
        let config = TestbenchConfig {
            clock_period: Duration::from_micros(2),
            ..TestbenchConfig::default()
        };
        let err = Testbench::new(config).err();
        assert_eq!(
            err,
            Some(BridgeError::Sim(SimError::ClockPeriod(Duration::from_micros(2))))
        );
    }
}
