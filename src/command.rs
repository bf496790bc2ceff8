// Copyright 2026 Cornell University
// released under MIT License

//! # Commands and results
//! The values that flow through the bridge: commands sent by clients,
//! snapshots of the commands the bus actually carried, and results.

use std::fmt;

/// Result of one operation. Wide enough for the product of two byte operands.
pub type AluResult = u16;

/// Legal operations of the ALU, with their encoding on the `op` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Op {
    Add = 1,
    And = 2,
    Xor = 3,
    Mul = 4,
}

impl Op {
    /// All legal operations, in encoding order
    pub const ALL: [Op; 4] = [Op::Add, Op::And, Op::Xor, Op::Mul];

    /// Encoding of this operation on the selector line
    pub fn encoding(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Add => "ADD",
            Op::And => "AND",
            Op::Xor => "XOR",
            Op::Mul => "MUL",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A selector value that does not name a legal operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalOp(pub u64);

impl fmt::Display for IllegalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal operation selector {}", self.0)
    }
}

impl std::error::Error for IllegalOp {}

impl TryFrom<u64> for Op {
    type Error = IllegalOp;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Op::Add),
            2 => Ok(Op::And),
            3 => Ok(Op::Xor),
            4 => Ok(Op::Mul),
            other => Err(IllegalOp(other)),
        }
    }
}

/// Reference model of the ALU: exact integer semantics, no side effects
pub fn predict(a: u8, b: u8, op: Op) -> AluResult {
    let (a, b) = (a as u16, b as u16);
    match op {
        Op::Add => a + b,
        Op::And => a & b,
        Op::Xor => a ^ b,
        Op::Mul => a * b,
    }
}

/// A request to the device, as sent by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    pub a: u8,
    pub b: u8,
    pub op: Op,
}

impl Command {
    pub fn new(a: u8, b: u8, op: Op) -> Self {
        Self { a, b, op }
    }

    /// The result a correct device produces for this command
    pub fn expected(&self) -> AluResult {
        predict(self.a, self.b, self.op)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x} {} 0x{:02x}", self.a, self.op, self.b)
    }
}

/// Snapshot of the operand and selector lines taken when a request appeared on the bus.
/// The selector is kept raw so that an illegal value on the bus is still visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservedCommand {
    pub a: u8,
    pub b: u8,
    pub op: u8,
}

impl ObservedCommand {
    pub fn new(a: u8, b: u8, op: u8) -> Self {
        Self { a, b, op }
    }

    /// Returns the `Command` this snapshot corresponds to, if its selector is legal
    pub fn decode(&self) -> Result<Command, IllegalOp> {
        let op = Op::try_from(self.op as u64)?;
        Ok(Command::new(self.a, self.b, op))
    }
}

impl From<Command> for ObservedCommand {
    fn from(command: Command) -> Self {
        Self::new(command.a, command.b, command.op.encoding())
    }
}

impl fmt::Display for ObservedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Ok(command) => write!(f, "{command}"),
            Err(_) => write!(f, "0x{:02x} op{} 0x{:02x}", self.a, self.op, self.b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_encoding() {
        for op in Op::ALL {
            assert_eq!(Op::try_from(op.encoding() as u64), Ok(op));
        }
        assert_eq!(Op::try_from(0), Err(IllegalOp(0)));
        assert_eq!(Op::try_from(5), Err(IllegalOp(5)));
        assert_eq!(Op::Add.encoding(), 1);
        assert_eq!(Op::Mul.encoding(), 4);
    }

    #[test]
    fn predict_covers_the_widest_result() {
        assert_eq!(predict(0xaa, 0x55, Op::Add), 0xff);
        assert_eq!(predict(0xff, 0xff, Op::Add), 0x1fe);
        assert_eq!(predict(0xf0, 0x3c, Op::And), 0x30);
        assert_eq!(predict(0xf0, 0x3c, Op::Xor), 0xcc);
        assert_eq!(predict(0xff, 0xff, Op::Mul), 0xfe01);
    }

    #[test]
    fn observed_commands_decode() {
        let cmd = Command::new(170, 85, Op::Add);
        let seen = ObservedCommand::from(cmd);
        assert_eq!(seen, ObservedCommand::new(170, 85, 1));
        assert_eq!(seen.decode(), Ok(cmd));
        assert_eq!(seen.to_string(), "0xaa ADD 0x55");

        let nop = ObservedCommand::new(1, 2, 0);
        assert_eq!(nop.decode(), Err(IllegalOp(0)));
        assert_eq!(nop.to_string(), "0x01 op0 0x02");
    }
}
