//! Exact rational note lengths
//!
//! A `Rat` is a note length or musical position measured in whole notes:
//! `Rat::new(1, 4)` is a quarter note, `Rat::new(3, 8)` a dotted quarter.
//! Values are always stored normalized, so structural equality and hashing
//! agree with numeric equality.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rat {
    num: i64,
    den: i64,
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

impl Rat {
    pub const ZERO: Rat = Rat { num: 0, den: 1 };

    /// Create a normalized rational. Panics if `den` is zero.
    pub fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "Rat with zero denominator");
        let g = gcd(num, den).max(1);
        let sign = if den < 0 { -1 } else { 1 };
        Rat {
            num: sign * num / g,
            den: sign * den / g,
        }
    }

    /// The reciprocal of a note value: `Rat::note_value(4)` is a quarter note.
    pub fn note_value(n: i64) -> Self {
        Rat::new(1, n)
    }

    pub fn num(&self) -> i64 {
        self.num
    }

    pub fn den(&self) -> i64 {
        self.den
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    /// Integer part, rounded towards zero.
    pub fn trunc(&self) -> i64 {
        self.num / self.den
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl Default for Rat {
    fn default() -> Self {
        Rat::ZERO
    }
}

impl Add for Rat {
    type Output = Rat;

    fn add(self, rhs: Rat) -> Rat {
        Rat::new(self.num * rhs.den + rhs.num * self.den, self.den * rhs.den)
    }
}

impl AddAssign for Rat {
    fn add_assign(&mut self, rhs: Rat) {
        *self = *self + rhs;
    }
}

impl Sub for Rat {
    type Output = Rat;

    fn sub(self, rhs: Rat) -> Rat {
        Rat::new(self.num * rhs.den - rhs.num * self.den, self.den * rhs.den)
    }
}

impl Mul<i64> for Rat {
    type Output = Rat;

    fn mul(self, rhs: i64) -> Rat {
        Rat::new(self.num * rhs, self.den)
    }
}

impl Ord for Rat {
    fn cmp(&self, other: &Self) -> Ordering {
        // denominators are kept positive
        (self.num * other.den).cmp(&(other.num * self.den))
    }
}

impl PartialOrd for Rat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Rat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
