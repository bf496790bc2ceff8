// Copyright 2026 Cornell University
// released under MIT License

use crate::errors::{BridgeResult, SimError};
use crate::signal::Edge;
use crate::sim::Simulation;
use std::ops::ControlFlow;
use tokio::sync::watch;

/// Clock-edge synchronization shared by the bridge loops.
/// Every loop samples the bus exactly once per `tick`.
pub(crate) struct Ticker<S> {
    sim: S,
    clock: String,
    edge: Edge,
    shutdown: watch::Receiver<bool>,
}

impl<S: Simulation> Ticker<S> {
    pub fn new(sim: S, clock: &str, edge: Edge, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            sim,
            clock: clock.to_string(),
            edge,
            shutdown,
        }
    }

    /// Waits for the next clock edge.
    /// Returns `Break` when the bridge is shut down or the simulation stops.
    pub async fn tick(&mut self) -> BridgeResult<ControlFlow<()>> {
        if *self.shutdown.borrow() {
            return Ok(ControlFlow::Break(()));
        }
        let edge = self.sim.edge(&self.clock, self.edge);
        tokio::select! {
            biased;
            // also fires if the bridge (and with it the sender) is gone
            _ = self.shutdown.changed() => Ok(ControlFlow::Break(())),
            res = edge => match res {
                Ok(()) => Ok(ControlFlow::Continue(())),
                Err(SimError::Stopped) => Ok(ControlFlow::Break(())),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Schedules a write. Returns `Break` if the simulation has stopped.
    pub fn drive(&self, line: &str, value: u64) -> BridgeResult<ControlFlow<()>> {
        match self.sim.write(line, value) {
            Ok(()) => Ok(ControlFlow::Continue(())),
            Err(SimError::Stopped) => Ok(ControlFlow::Break(())),
            Err(e) => Err(e.into()),
        }
    }

    /// Integer value of a line, with unknown values read as 0
    pub fn sample(&self, line: &str) -> BridgeResult<u64> {
        Ok(self.sim.read_int(line)?)
    }

    pub fn sim(&self) -> &S {
        &self.sim
    }
}
