// Copyright 2026 Cornell University
// released under MIT License

//! # Signal values
//! Encoding and decoding of the values carried by bus lines.

use baa::{BitVecOps, BitVecValue, WidthInt};
use std::fmt;

/// Direction of a transition on a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Rising,
    Falling,
}

impl Edge {
    /// Whether going from `prev` to `next` is a transition in this direction.
    /// Both levels are coerced integers, so an unknown value counts as low.
    pub fn matches(self, prev: u64, next: u64) -> bool {
        match self {
            Edge::Rising => prev == 0 && next == 1,
            Edge::Falling => prev == 1 && next == 0,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Edge::Rising => "rising",
            Edge::Falling => "falling",
        })
    }
}

/// The value of a bus line: either a concrete bit-vector, or `Unknown`
/// (the line has not been driven yet, e.g. before reset)
#[derive(Debug, Clone)]
pub enum SignalValue {
    Known(BitVecValue),
    Unknown(WidthInt),
}

impl PartialEq for SignalValue {
    fn eq(&self, other: &Self) -> bool {
        use SignalValue::*;

        match (self, other) {
            (Known(a), Known(b)) => a.is_equal(b),
            (Unknown(a), Unknown(b)) => a == b,
            _ => false,
        }
    }
}

impl SignalValue {
    /// Returns the bitwidth of the line
    pub fn width(&self) -> WidthInt {
        match self {
            SignalValue::Known(bvv) => bvv.width(),
            SignalValue::Unknown(width) => *width,
        }
    }

    /// Returns the integer value if the line carries a concrete value
    pub fn to_u64(&self) -> Option<u64> {
        match self {
            SignalValue::Known(bvv) => bvv.to_u64(),
            SignalValue::Unknown(_) => None,
        }
    }

    /// Integer view of the line where an unresolvable value reads as 0.
    /// Unknown values are expected while the design settles, so they are not an error.
    pub fn to_int(&self) -> u64 {
        self.to_u64().unwrap_or(0)
    }

    pub fn is_known(&self) -> bool {
        matches!(self, SignalValue::Known(_))
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Known(bvv) => write!(f, "{}", bvv.to_dec_str()),
            SignalValue::Unknown(width) => write!(f, "{}", "x".repeat(*width as usize)),
        }
    }
}

/// Largest value representable in `width` bits
pub fn max_value(width: WidthInt) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Creates an owned bit-vector with a particular `value` & `width`.
/// Returns `None` if `value` needs more than `width` bits.
pub fn bv(value: u64, width: WidthInt) -> Option<BitVecValue> {
    (value <= max_value(width)).then(|| BitVecValue::from_u64(value, width))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_coerces_to_zero() {
        let x = SignalValue::Unknown(8);
        assert_eq!(x.to_u64(), None);
        assert_eq!(x.to_int(), 0);
        assert_eq!(x.width(), 8);
        assert_eq!(x.to_string(), "xxxxxxxx");
    }

    #[test]
    fn known_values_round_trip() {
        let v = SignalValue::Known(BitVecValue::from_u64(0xaa, 8));
        assert_eq!(v.to_int(), 170);
        assert_eq!(v.to_string(), "170");
        assert!(v.is_known());
        assert_eq!(v, SignalValue::Known(BitVecValue::from_u64(170, 8)));
        assert_ne!(v, SignalValue::Unknown(8));
    }

    #[test]
    fn edges_from_consecutive_samples() {
        assert!(Edge::Rising.matches(0, 1));
        assert!(!Edge::Rising.matches(1, 1));
        assert!(!Edge::Rising.matches(1, 0));
        assert!(Edge::Falling.matches(1, 0));
        assert!(!Edge::Falling.matches(0, 0));
    }

    #[test]
    fn bv_rejects_values_wider_than_the_line() {
        assert!(bv(255, 8).is_some());
        assert!(bv(256, 8).is_none());
        assert!(bv(1, 1).is_some());
        assert!(bv(2, 1).is_none());
        assert_eq!(max_value(64), u64::MAX);
        assert_eq!(max_value(16), 0xffff);
    }
}
