// Copyright 2026 Cornell University
// released under MIT License

//! # Scoreboard
//! Client-side checking of what the bus carried. Observed commands and results
//! are paired by position: the n-th result belongs to the n-th command.

use crate::command::{predict, AluResult, ObservedCommand, Op};
use itertools::Itertools;
use log::{error, info};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::fmt;

/// Functional coverage: which operations have been seen on the bus
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    seen: FxHashSet<Op>,
}

impl Coverage {
    pub fn sample(&mut self, command: &ObservedCommand) {
        if let Ok(command) = command.decode() {
            self.seen.insert(command.op);
        }
    }

    /// Operations never observed, in encoding order
    pub fn missed(&self) -> Vec<Op> {
        Op::ALL
            .into_iter()
            .filter(|op| !self.seen.contains(op))
            .collect()
    }
}

/// Outcome of checking one command/result pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Passed {
        command: ObservedCommand,
        result: AluResult,
    },
    Failed {
        command: ObservedCommand,
        actual: AluResult,
        expected: AluResult,
    },
    /// The bus carried a selector that is not a legal operation
    Illegal {
        command: ObservedCommand,
        actual: AluResult,
    },
}

impl Check {
    pub fn is_pass(&self) -> bool {
        matches!(self, Check::Passed { .. })
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Passed { command, result } => {
                write!(f, "PASSED: {command} = 0x{result:04x}")
            }
            Check::Failed {
                command,
                actual,
                expected,
            } => write!(
                f,
                "FAILED: {command} = 0x{actual:04x} expected 0x{expected:04x}"
            ),
            Check::Illegal { command, actual } => {
                write!(f, "ILLEGAL: {command} = 0x{actual:04x}")
            }
        }
    }
}

/// Everything the scoreboard found at checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub checks: Vec<Check>,
    /// Results that arrived without a command to pair with
    pub orphan_results: Vec<AluResult>,
    /// Commands whose result never arrived
    pub missing_results: Vec<ObservedCommand>,
    pub missed_ops: Vec<Op>,
    pub coverage_required: bool,
}

impl Report {
    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.is_pass()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.checks.len() - self.passed_count()
    }

    /// Whether the run is clean: every check passed, nothing is left unpaired
    /// and (if required) every operation was exercised
    pub fn passed(&self) -> bool {
        self.failed_count() == 0
            && self.orphan_results.is_empty()
            && self.missing_results.is_empty()
            && (!self.coverage_required || self.missed_ops.is_empty())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            writeln!(f, "{check}")?;
        }
        for result in &self.orphan_results {
            writeln!(f, "result 0x{result:04x} had no command")?;
        }
        for command in &self.missing_results {
            writeln!(f, "no result for {command}")?;
        }
        if self.missed_ops.is_empty() {
            writeln!(f, "Covered all operations")?;
        } else {
            writeln!(
                f,
                "Functional coverage error. Missed: {}",
                self.missed_ops.iter().join(", ")
            )?;
        }
        write!(
            f,
            "{} passed, {} failed",
            self.passed_count(),
            self.failed_count()
        )
    }
}

/// Collects observed commands and results, and pairs them at checkout
#[derive(Debug, Clone)]
pub struct Scoreboard {
    commands: VecDeque<ObservedCommand>,
    results: VecDeque<AluResult>,
    coverage: Coverage,
    coverage_required: bool,
}

impl Default for Scoreboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Scoreboard {
    pub fn new() -> Self {
        Self {
            commands: VecDeque::new(),
            results: VecDeque::new(),
            coverage: Coverage::default(),
            coverage_required: true,
        }
    }

    /// Do not fail the run on coverage holes, e.g. for sequences that only
    /// exercise a single operation
    pub fn without_coverage_errors(mut self) -> Self {
        self.coverage_required = false;
        self
    }

    pub fn record_command(&mut self, command: ObservedCommand) {
        self.coverage.sample(&command);
        self.commands.push_back(command);
    }

    pub fn record_result(&mut self, result: AluResult) {
        self.results.push_back(result);
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    /// Pairs everything recorded so far and logs every verdict
    pub fn check(&mut self) -> Report {
        let mut checks = vec![];
        let mut orphan_results = vec![];
        while let Some(actual) = self.results.pop_front() {
            let Some(command) = self.commands.pop_front() else {
                error!("result 0x{actual:04x} had no command");
                orphan_results.push(actual);
                continue;
            };
            let check = match command.decode() {
                Ok(cmd) => {
                    let expected = predict(cmd.a, cmd.b, cmd.op);
                    if expected == actual {
                        Check::Passed {
                            command,
                            result: actual,
                        }
                    } else {
                        Check::Failed {
                            command,
                            actual,
                            expected,
                        }
                    }
                }
                Err(_) => Check::Illegal { command, actual },
            };
            if check.is_pass() {
                info!("{check}");
            } else {
                error!("{check}");
            }
            checks.push(check);
        }
        let missing_results: Vec<_> = self.commands.drain(..).collect();
        for command in &missing_results {
            error!("no result for {command}");
        }

        let missed_ops = self.coverage.missed();
        if missed_ops.is_empty() {
            info!("Covered all operations");
        } else if self.coverage_required {
            error!(
                "Functional coverage error. Missed: {}",
                missed_ops.iter().join(", ")
            );
        }

        Report {
            checks,
            orphan_results,
            missing_results,
            missed_ops,
            coverage_required: self.coverage_required,
        }
    }
}
