// Copyright 2026 Cornell University
// released under MIT License

use baa::WidthInt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a `Simulation` backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("no signal named `{0}` has been declared")]
    UnknownSignal(String),
    #[error("signal `{0}` is already declared")]
    DuplicateSignal(String),
    #[error("value {value:#x} does not fit in {width}-bit signal `{signal}`")]
    ValueTooWide {
        signal: String,
        value: u64,
        width: WidthInt,
    },
    #[error("the simulation has stopped")]
    Stopped,
    #[error("clock period {0:?} is not a positive multiple of 2ms")]
    ClockPeriod(Duration),
}

/// Main error type for the bus bridge and its loops
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The completion line was high while the request line was low.
    /// This means the device and the bridge disagree about the handshake.
    #[error(
        "protocol violation at step {step}: `{completion}` asserted while `{request}` is low \
         ({request}=0, {completion}=1)"
    )]
    ProtocolViolation {
        request: String,
        completion: String,
        step: u64,
    },
    #[error("simulation error: {0}")]
    Sim(#[from] SimError),
    #[error("bridge loops have already been started")]
    AlreadyStarted,
    #[error("the bridge has been shut down")]
    Closed,
    /// A monitored line holds a value wider than the bus field it carries
    #[error("value {value:#x} on `{line}` does not fit in {bits} bits")]
    ValueOutOfRange { line: String, value: u64, bits: u32 },
    #[error("{task} task did not finish cleanly: {details}")]
    TaskFailed { task: &'static str, details: String },
}

impl BridgeError {
    pub fn protocol_violation(request: &str, completion: &str, step: u64) -> Self {
        BridgeError::ProtocolViolation {
            request: request.to_string(),
            completion: completion.to_string(),
            step,
        }
    }

    /// Whether the error is a protocol violation (as opposed to a setup or teardown problem)
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, BridgeError::ProtocolViolation { .. })
    }
}

pub type SimResult<T> = std::result::Result<T, SimError>;
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_message_names_both_lines() {
        let err = BridgeError::protocol_violation("start", "done", 7);
        assert_eq!(
            err.to_string(),
            "protocol violation at step 7: `done` asserted while `start` is low (start=0, done=1)"
        );
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn sim_errors_convert() {
        let err: BridgeError = SimError::UnknownSignal("busy".to_string()).into();
        assert_eq!(
            err.to_string(),
            "simulation error: no signal named `busy` has been declared"
        );
        assert!(!err.is_protocol_violation());
    }
}
