// Copyright 2026 Cornell University
// released under MIT License

//! # Bus bridge
//! The client-facing side of the bus-functional model. Commands are queued into
//! a single-slot channel, the driver loop moves them onto the bus, and two
//! monitor loops record what the bus actually carried. Commands and results are
//! decoupled: a client may send several commands before reading any result.

use crate::command::{AluResult, Command, ObservedCommand, Op};
use crate::config::BridgeConfig;
use crate::driver::Driver;
use crate::errors::{BridgeError, BridgeResult};
use crate::monitor::{CommandTap, Monitor, ResultTap};
use crate::signal::Edge;
use crate::sim::Simulation;
use crate::ticker::Ticker;
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Capacity of the command channel: at most one command waits for the bus
const COMMAND_CAPACITY: usize = 1;

type Fault = Arc<watch::Sender<Option<BridgeError>>>;

/// Channel ends handed to the loops when they are started
struct LoopEnds {
    commands: mpsc::Receiver<Command>,
    observed_commands: mpsc::UnboundedSender<ObservedCommand>,
    observed_results: mpsc::UnboundedSender<AluResult>,
}

struct Inner<S> {
    sim: S,
    config: BridgeConfig,
    commands: mpsc::Sender<Command>,
    observed_commands: tokio::sync::Mutex<mpsc::UnboundedReceiver<ObservedCommand>>,
    observed_results: tokio::sync::Mutex<mpsc::UnboundedReceiver<AluResult>>,
    /// `None` once the loops have been started
    loop_ends: Mutex<Option<LoopEnds>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<BridgeResult<()>>)>>,
    /// first error reported by any loop
    fault: Fault,
    shutdown: Arc<watch::Sender<bool>>,
    reset_done: AtomicBool,
}

/// Handle to a bus bridge. Clones share the same channels and loops.
pub struct BusBridge<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for BusBridge<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records `err` unless a fault is already recorded, and stops every loop
fn record_fault(fault: &Fault, shutdown: &watch::Sender<bool>, task: &str, err: BridgeError) {
    let first = fault.send_if_modified(|current| match current {
        Some(_) => false,
        None => {
            *current = Some(err.clone());
            true
        }
    });
    if first {
        error!("{task} failed: {err}");
        shutdown.send_replace(true);
    } else {
        debug!("{task} failed after an earlier fault: {err}");
    }
}

/// Resolves once a fault has been recorded
async fn next_fault(fault: &mut watch::Receiver<Option<BridgeError>>) -> BridgeError {
    let recorded = fault.wait_for(Option::is_some).await.map(|f| (*f).clone());
    match recorded {
        Ok(Some(err)) => err,
        _ => BridgeError::Closed,
    }
}

impl<S: Simulation> BusBridge<S> {
    pub fn new(sim: S, config: BridgeConfig) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (observed_commands, observed_command_rx) = mpsc::unbounded_channel();
        let (observed_results, observed_result_rx) = mpsc::unbounded_channel();
        let (fault, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);
        let inner = Inner {
            sim,
            config,
            commands,
            observed_commands: tokio::sync::Mutex::new(observed_command_rx),
            observed_results: tokio::sync::Mutex::new(observed_result_rx),
            loop_ends: Mutex::new(Some(LoopEnds {
                commands: command_rx,
                observed_commands,
                observed_results,
            })),
            tasks: Mutex::new(vec![]),
            fault: Arc::new(fault),
            shutdown: Arc::new(shutdown),
            reset_done: AtomicBool::new(false),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn sim(&self) -> &S {
        &self.inner.sim
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    async fn falling_edge(&self) -> BridgeResult<()> {
        let clock = &self.inner.config.pins.clock;
        Ok(self.inner.sim.edge(clock, Edge::Falling).await?)
    }

    /// Waits for `n` falling clock edges
    pub async fn wait_cycles(&self, n: usize) -> BridgeResult<()> {
        for _ in 0..n {
            self.falling_edge().await?;
        }
        Ok(())
    }

    /// Puts the bus into a known state: holds reset for one cycle with every
    /// line driven by the bridge at 0, then releases it.
    /// Must complete before `start`.
    pub async fn reset(&self) -> BridgeResult<()> {
        let pins = &self.inner.config.pins;
        let sim = &self.inner.sim;
        self.falling_edge().await?;
        sim.write(&pins.reset_n, 0)?;
        for line in [&pins.request, &pins.operand_a, &pins.operand_b, &pins.op] {
            sim.write(line, 0)?;
        }
        self.falling_edge().await?;
        sim.write(&pins.reset_n, 1)?;
        self.falling_edge().await?;
        self.inner.reset_done.store(true, Ordering::Release);
        info!("Reset complete at step {}", sim.now());
        Ok(())
    }

    /// Spawns the driver and both monitors on the current runtime.
    /// The loops can only be started once.
    pub fn start(&self) -> BridgeResult<()> {
        let ends = lock(&self.inner.loop_ends)
            .take()
            .ok_or(BridgeError::AlreadyStarted)?;
        if !self.inner.reset_done.load(Ordering::Acquire) {
            warn!("Starting the bridge before the bus has been reset");
        }

        let pins = &self.inner.config.pins;
        let ticker = || {
            Ticker::new(
                self.inner.sim.clone(),
                &pins.clock,
                Edge::Falling,
                self.inner.shutdown.subscribe(),
            )
        };
        let driver = Driver::new(ticker(), pins.clone(), ends.commands);
        let command_monitor = Monitor::new(
            ticker(),
            CommandTap::new(pins.clone()),
            ends.observed_commands,
        );
        let result_monitor = Monitor::new(
            ticker(),
            ResultTap::new(pins.clone()),
            ends.observed_results,
        );

        self.spawn("driver", driver.run());
        self.spawn("command monitor", command_monitor.run());
        self.spawn("result monitor", result_monitor.run());
        info!("Bridge started at step {}", self.inner.sim.now());
        Ok(())
    }

    fn spawn<F>(&self, task: &'static str, body: F)
    where
        F: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        let fault = self.inner.fault.clone();
        let shutdown = self.inner.shutdown.clone();
        let handle = tokio::spawn(async move {
            let res = body.await;
            if let Err(err) = &res {
                record_fault(&fault, &shutdown, task, err.clone());
            }
            res
        });
        lock(&self.inner.tasks).push((task, handle));
    }

    /// Queues a command for the driver. Suspends while another command is still
    /// waiting for the bus; returns once this one has been accepted into the queue.
    pub async fn send(&self, command: Command) -> BridgeResult<()> {
        let mut fault = self.inner.fault.subscribe();
        debug!("Queueing {command}");
        tokio::select! {
            biased;
            err = next_fault(&mut fault) => Err(err),
            res = self.inner.commands.send(command) => res.map_err(|_| BridgeError::Closed),
        }
    }

    pub async fn send_op(&self, a: u8, b: u8, op: Op) -> BridgeResult<()> {
        self.send(Command::new(a, b, op)).await
    }

    /// Next command seen on the bus, in bus order
    pub async fn await_command(&self) -> BridgeResult<ObservedCommand> {
        let mut fault = self.inner.fault.subscribe();
        let mut observed = self.inner.observed_commands.lock().await;
        tokio::select! {
            biased;
            item = observed.recv() => item.ok_or_else(|| self.closed_reason()),
            err = next_fault(&mut fault) => Err(err),
        }
    }

    /// Next result seen on the bus, in bus order
    pub async fn await_result(&self) -> BridgeResult<AluResult> {
        let mut fault = self.inner.fault.subscribe();
        let mut observed = self.inner.observed_results.lock().await;
        tokio::select! {
            biased;
            item = observed.recv() => item.ok_or_else(|| self.closed_reason()),
            err = next_fault(&mut fault) => Err(err),
        }
    }

    /// Already observed command, if any. Never suspends.
    pub fn try_command(&self) -> Option<ObservedCommand> {
        self.inner.observed_commands.try_lock().ok()?.try_recv().ok()
    }

    /// Already observed result, if any. Never suspends.
    pub fn try_result(&self) -> Option<AluResult> {
        self.inner.observed_results.try_lock().ok()?.try_recv().ok()
    }

    /// Returns the fault recorded by a loop, if there is one
    pub fn check(&self) -> BridgeResult<()> {
        match &*self.inner.fault.borrow() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Why a channel closed: the recorded fault, or a plain shutdown
    fn closed_reason(&self) -> BridgeError {
        self.check().err().unwrap_or(BridgeError::Closed)
    }

    /// Resolves once one of the loops has failed
    pub async fn wait_for_fault(&self) -> BridgeError {
        next_fault(&mut self.inner.fault.subscribe()).await
    }

    /// Stops the loops and waits for them to finish.
    /// Returns the first fault any of them reported.
    pub async fn shutdown(&self) -> BridgeResult<()> {
        self.inner.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        for (task, handle) in tasks {
            if let Err(err) = handle.await {
                let details = err.to_string();
                record_fault(
                    &self.inner.fault,
                    &self.inner.shutdown,
                    task,
                    BridgeError::TaskFailed { task, details },
                );
            }
        }
        debug!("Bridge shut down at step {}", self.inner.sim.now());
        self.check()
    }
}
