// Copyright 2026 Cornell University
// released under MIT License

//! # Configuration
//! Initialization-time options for the bridge, the device model and the testbench.
//! Usually `Default::default()` is what you want; the CLI overrides individual fields.

use crate::command::Op;
use std::time::Duration;

/// Names of the bus lines. The defaults match the TinyALU port names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinMap {
    pub clock: String,
    pub reset_n: String,
    /// Request line, driven by the bridge
    pub request: String,
    /// Completion line, driven by the device
    pub completion: String,
    pub operand_a: String,
    pub operand_b: String,
    pub op: String,
    pub result: String,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            clock: "clk".to_string(),
            reset_n: "reset_n".to_string(),
            request: "start".to_string(),
            completion: "done".to_string(),
            operand_a: "A".to_string(),
            operand_b: "B".to_string(),
            op: "op".to_string(),
            result: "result".to_string(),
        }
    }
}

/// Options for a `BusBridge`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    pub pins: PinMap,
}

/// Number of clock cycles the device model needs per operation.
/// Cycles are counted from the first rising edge at which it sees the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluTiming {
    /// Latency of add, and, xor
    pub single_cycle: u32,
    /// Latency of multiply
    pub multiply: u32,
}

impl Default for AluTiming {
    fn default() -> Self {
        Self {
            single_cycle: 1,
            multiply: 3,
        }
    }
}

impl AluTiming {
    /// Same latency for every operation
    pub fn uniform(cycles: u32) -> Self {
        Self {
            single_cycle: cycles,
            multiply: cycles,
        }
    }

    /// Latency of `op`, never less than one cycle
    pub fn latency(&self, op: Op) -> u32 {
        let cycles = match op {
            Op::Mul => self.multiply,
            Op::Add | Op::And | Op::Xor => self.single_cycle,
        };
        cycles.max(1)
    }
}

/// Options for a complete `Testbench`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestbenchConfig {
    pub bridge: BridgeConfig,
    pub timing: AluTiming,
    pub clock_period: Duration,
}

impl Default for TestbenchConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            timing: AluTiming::default(),
            clock_period: Duration::from_millis(2),
        }
    }
}

impl TestbenchConfig {
    pub fn pins(&self) -> &PinMap {
        &self.bridge.pins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_is_at_least_one_cycle() {
        let timing = AluTiming::default();
        assert_eq!(timing.latency(Op::Add), 1);
        assert_eq!(timing.latency(Op::Mul), 3);
        assert_eq!(AluTiming::uniform(0).latency(Op::Xor), 1);
        assert_eq!(AluTiming::uniform(3).latency(Op::And), 3);
    }
}
