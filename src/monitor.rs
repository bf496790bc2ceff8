// Copyright 2026 Cornell University
// released under MIT License

//! # Monitor loops
//! Passive observers of the bus. Each monitor samples a trigger line once per
//! clock edge and, whenever it rises, snapshots some lines into an unbounded
//! channel. Monitors never write to the bus.

use crate::command::{AluResult, ObservedCommand};
use crate::config::PinMap;
use crate::errors::{BridgeError, BridgeResult};
use crate::signal::Edge;
use crate::sim::Simulation;
use crate::ticker::Ticker;
use log::{debug, info};
use std::fmt::Display;
use tokio::sync::mpsc;

/// Detects a 0 -> 1 transition from two consecutive samples of a line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RisingEdge {
    prev: u64,
}

impl RisingEdge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sample` and returns whether the line just rose
    pub fn update(&mut self, sample: u64) -> bool {
        let rose = Edge::Rising.matches(self.prev, sample);
        self.prev = sample;
        rose
    }
}

/// Reads `line` as a bus field of type `T`, failing if the value does not fit
fn read_field<S: Simulation, T: TryFrom<u64>>(sim: &S, line: &str) -> BridgeResult<T> {
    let value = sim.read_int(line)?;
    T::try_from(value).map_err(|_| BridgeError::ValueOutOfRange {
        line: line.to_string(),
        value,
        bits: std::mem::size_of::<T>() as u32 * 8,
    })
}

/// What a monitor watches and what it records
pub(crate) trait Tap<S: Simulation>: Send + 'static {
    type Item: Display + Send + 'static;

    /// Name used in log messages
    fn name(&self) -> &'static str;

    /// The line whose rising edge triggers a snapshot
    fn trigger(&self) -> &str;

    fn capture(&self, sim: &S) -> BridgeResult<Self::Item>;
}

/// Snapshots operand A, operand B and the selector when the request rises
pub(crate) struct CommandTap {
    pins: PinMap,
}

impl CommandTap {
    pub fn new(pins: PinMap) -> Self {
        Self { pins }
    }
}

impl<S: Simulation> Tap<S> for CommandTap {
    type Item = ObservedCommand;

    fn name(&self) -> &'static str {
        "command monitor"
    }

    fn trigger(&self) -> &str {
        &self.pins.request
    }

    fn capture(&self, sim: &S) -> BridgeResult<ObservedCommand> {
        Ok(ObservedCommand::new(
            read_field(sim, &self.pins.operand_a)?,
            read_field(sim, &self.pins.operand_b)?,
            read_field(sim, &self.pins.op)?,
        ))
    }
}

/// Snapshots the result line when the completion rises
pub(crate) struct ResultTap {
    pins: PinMap,
}

impl ResultTap {
    pub fn new(pins: PinMap) -> Self {
        Self { pins }
    }
}

impl<S: Simulation> Tap<S> for ResultTap {
    type Item = AluResult;

    fn name(&self) -> &'static str {
        "result monitor"
    }

    fn trigger(&self) -> &str {
        &self.pins.completion
    }

    fn capture(&self, sim: &S) -> BridgeResult<AluResult> {
        read_field(sim, &self.pins.result)
    }
}

pub(crate) struct Monitor<S, P: Tap<S>>
where
    S: Simulation,
{
    ticker: Ticker<S>,
    tap: P,
    detector: RisingEdge,
    observed: mpsc::UnboundedSender<P::Item>,
}

impl<S: Simulation, P: Tap<S>> Monitor<S, P> {
    pub fn new(ticker: Ticker<S>, tap: P, observed: mpsc::UnboundedSender<P::Item>) -> Self {
        Self {
            ticker,
            tap,
            detector: RisingEdge::new(),
            observed,
        }
    }

    pub async fn run(mut self) -> BridgeResult<()> {
        loop {
            if self.ticker.tick().await?.is_break() {
                debug!("{} stopping", self.tap.name());
                return Ok(());
            }
            let level = self.ticker.sample(self.tap.trigger())?;
            if !self.detector.update(level) {
                continue;
            }
            let item = self.tap.capture(self.ticker.sim())?;
            info!("{} observed {item}", self.tap.name());
            if self.observed.send(item).is_err() {
                debug!("{} has no more readers", self.tap.name());
                return Ok(());
            }
        }
    }
}
