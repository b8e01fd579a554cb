//! Reduced rationals over signed 64-bit integers.
//!
//! Invariants: gcd-normalized, denominator strictly positive, zero stored as
//! `0/1`. Comparison cross-multiplies through `i128` so that large
//! numerators cannot wrap.

use crate::{MathError, gcd};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    num: i64,
    den: i64,
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };

    /// Build a reduced rational. Fails when `den == 0`.
    pub fn new(num: i64, den: i64) -> Result<Self, MathError> {
        if den == 0 {
            return Err(MathError::DivisionByZero);
        }
        Ok(Self::reduced(num, den))
    }

    pub fn from_int(value: i64) -> Self {
        Self { num: value, den: 1 }
    }

    fn reduced(num: i64, den: i64) -> Self {
        debug_assert!(den != 0);
        if num == 0 {
            return Self::ZERO;
        }
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()) as i64;
        let sign = if den < 0 { -1 } else { 1 };
        Self {
            num: sign * (num / g),
            den: (den / g).abs(),
        }
    }

    pub fn numerator(self) -> i64 {
        self.num
    }

    pub fn denominator(self) -> i64 {
        self.den
    }

    pub fn is_zero(self) -> bool {
        self.num == 0
    }

    pub fn abs(self) -> Self {
        Self {
            num: self.num.abs(),
            den: self.den,
        }
    }

    /// Exact division. Fails when `rhs` is zero.
    pub fn checked_div(self, rhs: Self) -> Result<Self, MathError> {
        if rhs.num == 0 {
            return Err(MathError::DivisionByZero);
        }
        Ok(Self::reduced(self.num * rhs.den, self.den * rhs.num))
    }

    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Truncating conversion (`1/2 -> 0`, `-3/2 -> -1`).
    pub fn to_i64(self) -> i64 {
        self.num / self.den
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl Add for Rational {
    type Output = Rational;
    fn add(self, rhs: Self) -> Self {
        Self::reduced(self.num * rhs.den + rhs.num * self.den, self.den * rhs.den)
    }
}

impl Sub for Rational {
    type Output = Rational;
    fn sub(self, rhs: Self) -> Self {
        Self::reduced(self.num * rhs.den - rhs.num * self.den, self.den * rhs.den)
    }
}

impl Mul for Rational {
    type Output = Rational;
    fn mul(self, rhs: Self) -> Self {
        Self::reduced(self.num * rhs.num, self.den * rhs.den)
    }
}

impl Neg for Rational {
    type Output = Rational;
    fn neg(self) -> Self {
        Self {
            num: -self.num,
            den: self.den,
        }
    }
}

impl AddAssign for Rational {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Rational {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl MulAssign for Rational {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as i128 * other.den as i128;
        let rhs = other.num as i128 * self.den as i128;
        lhs.cmp(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn construction_reduces_and_normalizes_sign() {
        let r = Rational::new(2, -4).unwrap();
        assert_eq!((r.numerator(), r.denominator()), (-1, 2));
        assert_eq!(Rational::new(0, -7).unwrap(), Rational::ZERO);
        assert_eq!(Rational::new(1, 0), Err(MathError::DivisionByZero));
    }

    #[test]
    fn conversions_truncate() {
        assert_eq!(Rational::new(1, 2).unwrap().to_i64(), 0);
        assert_eq!(Rational::new(-3, 2).unwrap().to_i64(), -1);
        assert_eq!(Rational::new(1, 2).unwrap().to_f64(), 0.5);
        assert_eq!(Rational::from_int(314159265358979).to_i64(), 314159265358979);
    }

    #[test]
    fn ordering_matches_real_values() {
        let half = Rational::new(1, 2).unwrap();
        let quarter = Rational::new(1, 4).unwrap();
        let neg_half = Rational::new(-1, 2).unwrap();
        assert!(half > quarter);
        assert!(half >= half);
        assert!(neg_half < quarter);
        assert!(neg_half <= neg_half);
    }

    #[test]
    fn division_by_zero_rational_fails() {
        let half = Rational::new(1, 2).unwrap();
        assert_eq!(half.checked_div(Rational::ZERO), Err(MathError::DivisionByZero));
        assert_eq!(
            half.checked_div(Rational::new(1, 4).unwrap()).unwrap(),
            Rational::from_int(2)
        );
    }

    proptest! {
        #[test]
        fn additive_inverse_is_zero(a in -10_000i64..10_000, b in 1i64..10_000) {
            let lhs = Rational::new(a, b).unwrap();
            let rhs = Rational::new(-a, b).unwrap();
            prop_assert_eq!(lhs + rhs, Rational::ZERO);
        }

        #[test]
        fn mul_div_roundtrip(a in -1000i64..1000, b in 1i64..1000, c in 1i64..1000) {
            let x = Rational::new(a, b).unwrap();
            let y = Rational::new(c, b).unwrap();
            prop_assert_eq!((x * y).checked_div(y).unwrap(), x);
        }
    }
}
