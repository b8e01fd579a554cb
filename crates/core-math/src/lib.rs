//! Integer helpers and exact rational arithmetic.
//!
//! The repetition-vector solver manipulates production/consumption rates as
//! exact fractions; everything here exists to keep that computation free of
//! floating-point drift. Signed `floor_div`/`ceil_div` follow the
//! mathematical definition (round toward -inf / +inf) independently of the
//! hardware truncation convention, which the dependency window arithmetic
//! relies on for negative (delay-shifted) indices.
//!
//! Saturating addition is not wrapped here: callers use the std
//! `saturating_add` family directly.

use thiserror::Error;

mod rational;

pub use rational::Rational;

/// Arithmetic failure surfaced by [`Rational`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MathError {
    #[error("division by zero in rational arithmetic")]
    DivisionByZero,
}

/// Greatest common divisor (Euclid). `gcd(0, 0) == 0`.
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple. `lcm(0, _) == 0`.
pub fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        return 0;
    }
    (a / gcd(a, b)) * b
}

/// Signed gcd; always non-negative.
pub fn gcd_i64(a: i64, b: i64) -> i64 {
    gcd(a.unsigned_abs(), b.unsigned_abs()) as i64
}

/// Signed lcm; always non-negative.
pub fn lcm_i64(a: i64, b: i64) -> i64 {
    lcm(a.unsigned_abs(), b.unsigned_abs()) as i64
}

/// Unsigned ceiling division.
pub fn ceil_div(a: u64, b: u64) -> u64 {
    a.div_ceil(b)
}

/// Unsigned floor division (plain integer division).
pub fn floor_div(a: u64, b: u64) -> u64 {
    a / b
}

/// Signed floor division: rounds toward negative infinity for any sign
/// combination, e.g. `floor_div_i64(-5, 2) == -3`.
pub fn floor_div_i64(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) { q - 1 } else { q }
}

/// Signed ceiling division: rounds toward positive infinity, e.g.
/// `ceil_div_i64(-5, 2) == -2`.
pub fn ceil_div_i64(a: i64, b: i64) -> i64 {
    -floor_div_i64(-a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn gcd_handles_zero_and_sign() {
        assert_eq!(gcd(0, 0), 0);
        assert_eq!(gcd(4, 2), 2);
        assert_eq!(gcd_i64(-4, 2), 2);
        assert_eq!(gcd_i64(4, -2), 2);
    }

    #[test]
    fn lcm_handles_zero_and_sign() {
        assert_eq!(lcm(0, 7), 0);
        assert_eq!(lcm(4, 2), 4);
        assert_eq!(lcm_i64(-4, 2), 4);
        assert_eq!(lcm_i64(4, -2), 4);
    }

    #[test]
    fn signed_division_is_mathematical() {
        assert_eq!(floor_div_i64(5, 2), 2);
        assert_eq!(floor_div_i64(-5, 2), -3);
        assert_eq!(floor_div_i64(5, -2), -3);
        assert_eq!(ceil_div_i64(5, 2), 3);
        assert_eq!(ceil_div_i64(-5, 2), -2);
        assert_eq!(ceil_div_i64(5, -2), -2);
        assert_eq!(ceil_div(5, 2), 3);
        assert_eq!(floor_div(5, 2), 2);
    }

    proptest! {
        #[test]
        fn ceil_is_negated_floor(a in -1_000_000i64..1_000_000, b in -1000i64..1000) {
            prop_assume!(b != 0);
            prop_assert_eq!(ceil_div_i64(a, b), -floor_div_i64(-a, b));
        }

        #[test]
        fn lcm_is_divisible_by_both(a in 1u64..10_000, b in 1u64..10_000, k in 1u64..100) {
            prop_assert_eq!(gcd(lcm(a, b) * k, a), a);
            prop_assert_eq!(lcm(a, b) % b, 0);
        }

        #[test]
        fn floor_mul_bound(a in -1_000_000i64..1_000_000, b in 1i64..1000) {
            let q = floor_div_i64(a, b);
            prop_assert!(q * b <= a && (q + 1) * b > a);
        }
    }
}
