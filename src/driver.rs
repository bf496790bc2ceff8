// Copyright 2026 Cornell University
// released under MIT License

//! # Driver loop
//! Moves commands from the command channel onto the bus, one at a time,
//! following the request/completion handshake.

use crate::command::Command;
use crate::config::PinMap;
use crate::errors::{BridgeError, BridgeResult};
use crate::sim::Simulation;
use crate::ticker::Ticker;
use log::{debug, error, info};
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Where the handshake currently is, from the driver's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// request=0, completion=0
    Idle,
    /// request=1, waiting for completion
    Issuing,
}

/// What the driver does with one sample of the request and completion lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverAction {
    /// Bus is idle: issue the next queued command, if there is one
    TryIssue,
    /// Device is still processing
    Wait,
    /// Device has completed: de-assert the request
    Release,
    /// Completion is asserted without a request
    Violation,
}

/// The handshake transition table
pub fn next_action(request: bool, completion: bool) -> DriverAction {
    match (request, completion) {
        (false, false) => DriverAction::TryIssue,
        (true, false) => DriverAction::Wait,
        (true, true) => DriverAction::Release,
        (false, true) => DriverAction::Violation,
    }
}

pub(crate) struct Driver<S> {
    ticker: Ticker<S>,
    pins: PinMap,
    commands: mpsc::Receiver<Command>,
    state: DriverState,
}

impl<S: Simulation> Driver<S> {
    pub fn new(ticker: Ticker<S>, pins: PinMap, commands: mpsc::Receiver<Command>) -> Self {
        Self {
            ticker,
            pins,
            commands,
            state: DriverState::Idle,
        }
    }

    /// Runs until shutdown or until the simulation stops.
    /// Fails on a protocol violation.
    pub async fn run(mut self) -> BridgeResult<()> {
        if self.drive_idle()?.is_break() {
            return self.stopped();
        }
        loop {
            if self.ticker.tick().await?.is_break() {
                return self.stopped();
            }
            let request = self.ticker.sample(&self.pins.request)? == 1;
            let completion = self.ticker.sample(&self.pins.completion)? == 1;

            let flow = match next_action(request, completion) {
                DriverAction::TryIssue => match self.commands.try_recv() {
                    Ok(command) => self.issue(command)?,
                    Err(TryRecvError::Empty) => ControlFlow::Continue(()),
                    // every bridge handle is gone, nobody can send any more
                    Err(TryRecvError::Disconnected) => ControlFlow::Break(()),
                },
                DriverAction::Wait => ControlFlow::Continue(()),
                DriverAction::Release => {
                    let flow = self.ticker.drive(&self.pins.request, 0)?;
                    self.enter(DriverState::Idle);
                    flow
                }
                DriverAction::Violation => {
                    let err = BridgeError::protocol_violation(
                        &self.pins.request,
                        &self.pins.completion,
                        self.ticker.sim().now(),
                    );
                    error!("{err}");
                    return Err(err);
                }
            };
            if flow.is_break() {
                return self.stopped();
            }
        }
    }

    fn stopped(&self) -> BridgeResult<()> {
        debug!("Driver stopping in state {:?}", self.state);
        Ok(())
    }

    /// Drives every line owned by the driver
    fn drive_all(&self, writes: [(&str, u64); 4]) -> BridgeResult<ControlFlow<()>> {
        for (line, value) in writes {
            if self.ticker.drive(line, value)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Drives the lines owned by the driver to a known idle value
    fn drive_idle(&self) -> BridgeResult<ControlFlow<()>> {
        self.drive_all([
            (&self.pins.request, 0),
            (&self.pins.operand_a, 0),
            (&self.pins.operand_b, 0),
            (&self.pins.op, 0),
        ])
    }

    fn issue(&mut self, command: Command) -> BridgeResult<ControlFlow<()>> {
        info!("Driving {command}");
        // the request goes last, together with valid operands
        let flow = self.drive_all([
            (&self.pins.operand_a, command.a as u64),
            (&self.pins.operand_b, command.b as u64),
            (&self.pins.op, command.op.encoding() as u64),
            (&self.pins.request, 1),
        ])?;
        self.enter(DriverState::Issuing);
        Ok(flow)
    }

    fn enter(&mut self, state: DriverState) {
        debug!("Driver {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}
