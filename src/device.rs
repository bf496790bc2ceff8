// Copyright 2026 Cornell University
// released under MIT License

//! # TinyALU model
//! A behavioural model of the device on the other side of the bus. It reacts to
//! rising clock edges, and owns the completion and result lines.

use crate::command::{AluResult, Op};
use crate::config::{AluTiming, PinMap};
use crate::errors::{SimError, SimResult};
use crate::signal::Edge;
use crate::sim::{Simulation, Simulator};
use baa::{BitVecOps, BitVecValue, WidthInt};
use log::{debug, trace};
use tokio::task::JoinHandle;

const OPERAND_WIDTH: WidthInt = 8;
const RESULT_WIDTH: WidthInt = 16;
const OP_WIDTH: WidthInt = 3;

/// Computes a result the way the hardware does: on bit-vectors, with both
/// operands zero-extended to the result width
pub fn compute(a: u8, b: u8, op: Op) -> AluResult {
    let extend = RESULT_WIDTH - OPERAND_WIDTH;
    let a = BitVecValue::from_u64(a as u64, OPERAND_WIDTH).zero_extend(extend);
    let b = BitVecValue::from_u64(b as u64, OPERAND_WIDTH).zero_extend(extend);
    let out = match op {
        Op::Add => a.add(&b),
        Op::And => a.and(&b),
        Op::Xor => a.xor(&b),
        Op::Mul => a.mul(&b),
    };
    out.to_u64().unwrap_or_default() as AluResult
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AluState {
    Idle,
    Busy { remaining: u32, result: AluResult },
    /// completion is high for exactly one cycle
    Done,
}

/// The device: computes one operation at a time and pulses the completion line
pub struct TinyAlu<S> {
    sim: S,
    pins: PinMap,
    timing: AluTiming,
    state: AluState,
}

/// Declares every bus line with the width the TinyALU ports have
pub fn declare_ports(sim: &Simulator, pins: &PinMap) -> SimResult<()> {
    let lines = [
        (&pins.clock, 1),
        (&pins.reset_n, 1),
        (&pins.request, 1),
        (&pins.completion, 1),
        (&pins.operand_a, OPERAND_WIDTH),
        (&pins.operand_b, OPERAND_WIDTH),
        (&pins.op, OP_WIDTH),
        (&pins.result, RESULT_WIDTH),
    ];
    for (name, width) in lines {
        sim.declare(name, width)?;
    }
    Ok(())
}

impl<S: Simulation> TinyAlu<S> {
    pub fn new(sim: S, pins: PinMap, timing: AluTiming) -> Self {
        Self {
            sim,
            pins,
            timing,
            state: AluState::Idle,
        }
    }

    /// Runs until the simulation stops
    pub async fn run(mut self) -> SimResult<()> {
        loop {
            let res = match self.sim.edge(&self.pins.clock, Edge::Rising).await {
                Ok(()) => self.on_rising_edge(),
                Err(e) => Err(e),
            };
            match res {
                Ok(()) => {}
                // the edge may have been delivered just before the stop
                Err(SimError::Stopped) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Spawns the model as a task on the current runtime
    pub fn start(self) -> JoinHandle<SimResult<()>> {
        tokio::spawn(self.run())
    }

    fn in_reset(&self) -> SimResult<bool> {
        // an undriven reset line does not hold the device in reset
        Ok(self.sim.read(&self.pins.reset_n)?.to_u64() == Some(0))
    }

    fn on_rising_edge(&mut self) -> SimResult<()> {
        if self.in_reset()? {
            if self.state != AluState::Idle {
                debug!("TinyALU reset while {:?}", self.state);
            }
            self.sim.write(&self.pins.completion, 0)?;
            self.sim.write(&self.pins.result, 0)?;
            self.state = AluState::Idle;
            return Ok(());
        }

        let next = match self.state {
            AluState::Idle => match self.accept()? {
                Some(busy) => busy,
                None => return Ok(()),
            },
            busy @ AluState::Busy { .. } => busy,
            AluState::Done => {
                self.sim.write(&self.pins.completion, 0)?;
                self.state = AluState::Idle;
                return Ok(());
            }
        };

        self.state = match next {
            AluState::Busy { remaining, result } if remaining <= 1 => {
                trace!("TinyALU result {result:#x}");
                self.sim.write(&self.pins.result, result as u64)?;
                self.sim.write(&self.pins.completion, 1)?;
                AluState::Done
            }
            AluState::Busy { remaining, result } => AluState::Busy {
                remaining: remaining - 1,
                result,
            },
            other => other,
        };
        Ok(())
    }

    /// Starts a new operation if the request is high and the selector is legal
    fn accept(&self) -> SimResult<Option<AluState>> {
        if self.sim.read_int(&self.pins.request)? != 1 {
            return Ok(None);
        }
        let selector = self.sim.read_int(&self.pins.op)?;
        let op = match Op::try_from(selector) {
            Ok(op) => op,
            Err(illegal) => {
                trace!("TinyALU ignoring {illegal}");
                return Ok(None);
            }
        };
        let a = self.sim.read_int(&self.pins.operand_a)? as u8;
        let b = self.sim.read_int(&self.pins.operand_b)? as u8;
        debug!("TinyALU accepted 0x{a:02x} {op} 0x{b:02x}");
        Ok(Some(AluState::Busy {
            remaining: self.timing.latency(op),
            result: compute(a, b, op),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::predict;
    use crate::sim::Clock;
    use std::time::Duration;

    #[test]
    fn bit_vector_arithmetic_matches_the_reference_model() {
        for op in Op::ALL {
            for a in 0..=u8::MAX {
                for b in 0..=u8::MAX {
                    let expected = predict(a, b, op);
                    assert_eq!(compute(a, b, op), expected, "0x{a:02x} {op} 0x{b:02x}");
                }
            }
        }
    }

    fn device_bench(timing: AluTiming) -> (Simulator, PinMap) {
        let sim = Simulator::new();
        let pins = PinMap::default();
        declare_ports(&sim, &pins).unwrap();
        TinyAlu::new(sim.clone(), pins.clone(), timing).start();
        Clock::new(sim.clone(), &pins.clock, Duration::from_millis(2))
            .unwrap()
            .start();
        (sim, pins)
    }

    #[tokio::test(start_paused = true)]
    async fn multiply_completes_after_three_cycles() {
        let (sim, pins) = device_bench(AluTiming::default());
        for (line, value) in [("reset_n", 1), ("start", 1), ("A", 6), ("B", 7), ("op", 4)] {
            sim.write(line, value).unwrap();
        }
        // the request becomes visible at step 1, the device first sees it at
        // the rising edge of step 2 and needs rising edges 2, 4 and 6
        sim.edge(&pins.completion, Edge::Rising).await.unwrap();
        assert_eq!(sim.now(), 7);
        assert_eq!(sim.read_int(&pins.result).unwrap(), 42);

        sim.write(&pins.request, 0).unwrap();
        sim.edge(&pins.completion, Edge::Falling).await.unwrap();
        assert_eq!(sim.now(), 9);
        sim.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn illegal_selector_never_completes() {
        let (sim, pins) = device_bench(AluTiming::default());
        for (line, value) in [("reset_n", 1), ("start", 1), ("A", 1), ("B", 2), ("op", 0)] {
            sim.write(line, value).unwrap();
        }
        let done = sim.edge(&pins.completion, Edge::Rising);
        let cycles = async {
            for _ in 0..20 {
                sim.edge(&pins.clock, Edge::Falling).await.unwrap();
            }
        };
        tokio::select! {
            biased;
            _ = done => panic!("NOP must not complete"),
            _ = cycles => {}
        }
        assert_eq!(sim.now(), 41);
        sim.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_the_outputs() {
        let (sim, pins) = device_bench(AluTiming::default());
        sim.write(&pins.reset_n, 0).unwrap();
        sim.edge(&pins.clock, Edge::Falling).await.unwrap();
        assert_eq!(sim.read_int(&pins.completion).unwrap(), 0);
        assert!(sim.read(&pins.result).unwrap().is_known());
        assert_eq!(sim.read_int(&pins.result).unwrap(), 0);
        sim.stop();
    }
}
