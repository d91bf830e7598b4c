#![forbid(unsafe_code)]

use std::fmt;
use std::ops::{Add, Mul};

/// A count drawn from `{0, 1, ∞}`. The derived order is `Zero < One < Inf`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cardinal {
    Zero,
    One,
    Inf,
}

impl Add for Cardinal {
    type Output = Cardinal;

    fn add(self, rhs: Cardinal) -> Cardinal {
        match (self, rhs) {
            (Cardinal::Zero, x) | (x, Cardinal::Zero) => x,
            _ => Cardinal::Inf,
        }
    }
}

impl Mul for Cardinal {
    type Output = Cardinal;

    fn mul(self, rhs: Cardinal) -> Cardinal {
        match (self, rhs) {
            (Cardinal::Zero, _) | (_, Cardinal::Zero) => Cardinal::Zero,
            (Cardinal::One, x) | (x, Cardinal::One) => x,
            (Cardinal::Inf, Cardinal::Inf) => Cardinal::Inf,
        }
    }
}

impl fmt::Display for Cardinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinal::Zero => write!(f, "0"),
            Cardinal::One => write!(f, "1"),
            Cardinal::Inf => write!(f, "∞"),
        }
    }
}

/// Cardinality bound of an expression: `lower ∈ {0, 1}`, `upper ∈ {1, ∞}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CMMode {
    pub lower: Cardinal,
    pub upper: Cardinal,
}

impl CMMode {
    pub const ONE: CMMode = CMMode::new(Cardinal::One, Cardinal::One);
    pub const AT_MOST_ONE: CMMode = CMMode::new(Cardinal::Zero, Cardinal::One);
    pub const AT_LEAST_ONE: CMMode = CMMode::new(Cardinal::One, Cardinal::Inf);
    pub const ANY: CMMode = CMMode::new(Cardinal::Zero, Cardinal::Inf);

    pub const fn new(lower: Cardinal, upper: Cardinal) -> Self {
        Self { lower, upper }
    }

    /// `self` fits inside `bound`: the bound's interval contains ours.
    pub fn is_subcard_of(self, bound: CMMode) -> bool {
        bound.lower <= self.lower && self.upper <= bound.upper
    }

    pub fn is_singular(self) -> bool {
        self.upper == Cardinal::One
    }
}

impl Add for CMMode {
    type Output = CMMode;

    /// Union: bounds add, the lower bound saturates at one.
    fn add(self, rhs: CMMode) -> CMMode {
        CMMode {
            lower: (self.lower + rhs.lower).min(Cardinal::One),
            upper: self.upper + rhs.upper,
        }
    }
}

impl Mul for CMMode {
    type Output = CMMode;

    fn mul(self, rhs: CMMode) -> CMMode {
        CMMode {
            lower: self.lower * rhs.lower,
            upper: self.upper * rhs.upper,
        }
    }
}

impl fmt::Display for CMMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_of_two_singletons_is_at_least_one() {
        assert_eq!(CMMode::ONE + CMMode::ONE, CMMode::AT_LEAST_ONE);
        assert_eq!(CMMode::AT_MOST_ONE + CMMode::ONE, CMMode::AT_LEAST_ONE);
        assert_eq!(CMMode::AT_MOST_ONE + CMMode::AT_MOST_ONE, CMMode::ANY);
    }

    #[test]
    fn product_is_componentwise() {
        assert_eq!(CMMode::ONE * CMMode::ANY, CMMode::ANY);
        assert_eq!(CMMode::AT_MOST_ONE * CMMode::AT_LEAST_ONE, CMMode::ANY);
        assert_eq!(CMMode::ONE * CMMode::AT_MOST_ONE, CMMode::AT_MOST_ONE);
    }

    #[test]
    fn subcard_is_interval_containment() {
        assert!(CMMode::ONE.is_subcard_of(CMMode::ANY));
        assert!(CMMode::ONE.is_subcard_of(CMMode::AT_MOST_ONE));
        assert!(!CMMode::ANY.is_subcard_of(CMMode::AT_MOST_ONE));
        assert!(!CMMode::AT_MOST_ONE.is_subcard_of(CMMode::ONE));
    }
}
