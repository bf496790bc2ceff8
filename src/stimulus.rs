// Copyright 2026 Cornell University
// released under MIT License

//! # Stimulus
//! Generators for the commands a regression sends through the bridge.

use crate::command::{AluResult, Command, Op};
use baa::{BitVecOps, BitVecValue};
use itertools::Itertools;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;

/// A source of commands.
/// `last_result` is the result of the previous command when the runner waits
/// for every result before sending the next command, and `None` otherwise.
pub trait Stimulus {
    fn next(&mut self, last_result: Option<AluResult>) -> Option<Command>;

    /// Whether the next command depends on the previous result
    fn needs_feedback(&self) -> bool {
        false
    }
}

/// The named sequences the CLI can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SequenceKind {
    /// Random operands, cycling through every operation
    Random,
    /// Random operands followed by maximum operands
    AllOps,
    /// Both operands 0xff, once per operation
    Max,
    /// Fibonacci numbers computed by feeding every sum back into the next add
    Fibonacci,
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SequenceKind::Random => "random",
            SequenceKind::AllOps => "all-ops",
            SequenceKind::Max => "max",
            SequenceKind::Fibonacci => "fibonacci",
        })
    }
}

impl SequenceKind {
    /// Whether a run of this sequence is expected to exercise every operation
    pub fn covers_all_ops(&self) -> bool {
        !matches!(self, SequenceKind::Fibonacci)
    }

    pub fn build(&self, count: usize, seed: u64) -> Box<dyn Stimulus + Send> {
        match self {
            SequenceKind::Random => Box::new(RandomOperands::new(count, seed)),
            SequenceKind::AllOps => Box::new(Chain::new(
                RandomOperands::new(count, seed),
                MaxOperands::new(),
            )),
            SequenceKind::Max => Box::new(MaxOperands::new()),
            SequenceKind::Fibonacci => Box::new(Fibonacci::new(count)),
        }
    }
}

/// `count` commands with random operands; the n-th command uses the n-th
/// operation (wrapping around), so four or more commands cover every operation
pub struct RandomOperands {
    rng: StdRng,
    remaining: usize,
    issued: usize,
}

impl RandomOperands {
    pub fn new(count: usize, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            remaining: count,
            issued: 0,
        }
    }

    fn operand(&mut self) -> u8 {
        BitVecValue::random(&mut self.rng, 8)
            .to_u64()
            .unwrap_or_default() as u8
    }
}

impl Stimulus for RandomOperands {
    fn next(&mut self, _last_result: Option<AluResult>) -> Option<Command> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let op = Op::ALL[self.issued % Op::ALL.len()];
        self.issued += 1;
        let (a, b) = (self.operand(), self.operand());
        Some(Command::new(a, b, op))
    }
}

/// Both operands at their maximum, once per operation
#[derive(Debug, Default)]
pub struct MaxOperands {
    issued: usize,
}

impl MaxOperands {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stimulus for MaxOperands {
    fn next(&mut self, _last_result: Option<AluResult>) -> Option<Command> {
        let op = *Op::ALL.get(self.issued)?;
        self.issued += 1;
        Some(Command::new(u8::MAX, u8::MAX, op))
    }
}

/// Runs `first` to completion, then `second`
pub struct Chain<A, B> {
    first: Option<A>,
    second: B,
}

impl<A: Stimulus, B: Stimulus> Chain<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first: Some(first),
            second,
        }
    }
}

impl<A: Stimulus, B: Stimulus> Stimulus for Chain<A, B> {
    fn next(&mut self, last_result: Option<AluResult>) -> Option<Command> {
        if let Some(first) = &mut self.first {
            if let Some(cmd) = first.next(last_result) {
                return Some(cmd);
            }
            self.first = None;
        }
        self.second.next(last_result)
    }

    fn needs_feedback(&self) -> bool {
        self.first.as_ref().is_some_and(|f| f.needs_feedback()) || self.second.needs_feedback()
    }
}

/// Computes Fibonacci numbers on the device: every command adds the last two
/// numbers, and the result becomes an operand of the next command.
/// Stops after `terms` additions, or earlier once a sum no longer fits an operand.
#[derive(Debug)]
pub struct Fibonacci {
    terms: usize,
    issued: usize,
    numbers: Vec<u8>,
}

impl Fibonacci {
    pub fn new(terms: usize) -> Self {
        Self {
            terms,
            issued: 0,
            numbers: vec![0, 1],
        }
    }

    /// The numbers computed so far, starting with the seeds 0 and 1
    pub fn numbers(&self) -> &[u8] {
        &self.numbers
    }

    fn operands(&self) -> (u8, u8) {
        match self.numbers.as_slice() {
            [.., prev, cur] => (*prev, *cur),
            _ => (0, 1),
        }
    }
}

impl Stimulus for Fibonacci {
    fn next(&mut self, last_result: Option<AluResult>) -> Option<Command> {
        if self.issued > 0 {
            let sum = u8::try_from(last_result?).ok()?;
            self.numbers.push(sum);
        }
        if self.issued == self.terms {
            info!("Fibonacci sequence: {}", self.numbers.iter().join(", "));
            return None;
        }
        self.issued += 1;
        let (a, b) = self.operands();
        Some(Command::new(a, b, Op::Add))
    }

    fn needs_feedback(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(stimulus: &mut dyn Stimulus) -> Vec<Command> {
        let mut out = vec![];
        while let Some(cmd) = stimulus.next(None) {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn random_operands_are_reproducible_and_cycle_ops() {
        let first = drain(&mut RandomOperands::new(8, 7));
        let again = drain(&mut RandomOperands::new(8, 7));
        assert_eq!(first, again);
        assert_eq!(first.len(), 8);
        let ops: Vec<Op> = first.iter().map(|c| c.op).collect();
        assert_eq!(ops[..4], Op::ALL);
        assert_eq!(ops[4..], Op::ALL);
    }

    #[test]
    fn all_ops_ends_with_maximum_operands() {
        let mut seq = SequenceKind::AllOps.build(4, 1);
        let cmds = drain(seq.as_mut());
        assert_eq!(cmds.len(), 8);
        assert!(cmds[4..].iter().all(|c| c.a == 0xff && c.b == 0xff));
        let expected: Vec<_> = cmds[4..].iter().map(|c| c.expected()).collect();
        assert_eq!(expected, [0x1fe, 0xff, 0x0, 0xfe01]);
        assert!(!seq.needs_feedback());
    }

    #[test]
    fn fibonacci_feeds_results_back() {
        let mut fib = Fibonacci::new(7);
        assert!(fib.needs_feedback());
        let mut last = None;
        let mut sent = vec![];
        while let Some(cmd) = fib.next(last) {
            sent.push((cmd.a, cmd.b));
            last = Some(cmd.expected());
        }
        assert_eq!(
            sent,
            [(0, 1), (1, 1), (1, 2), (2, 3), (3, 5), (5, 8), (8, 13)]
        );
        assert_eq!(fib.numbers(), [0, 1, 1, 2, 3, 5, 8, 13, 21]);
    }

    #[test]
    fn fibonacci_stops_before_overflowing_an_operand() {
        let mut fib = Fibonacci::new(20);
        let mut last = None;
        while let Some(cmd) = fib.next(last) {
            last = Some(cmd.expected());
        }
        // 144 + 233 no longer fits in a byte
        assert_eq!(fib.numbers().last(), Some(&233));
        assert_eq!(fib.next(None), None);
    }
}
