//! Settlement-exact fixed-point arithmetic.
//!
//! Values are integers scaled by [`BONE`] (1e18). Every operation replicates
//! the rounding rules of the target execution environment bit-for-bit:
//! `mul`/`div` round half-up, fractional exponentiation splits into an exact
//! integer power and a signed binomial series. No floating point is involved
//! anywhere on this path.

use derive_more::{From, Into};
use primitive_types::{U256, U512};
use std::fmt;

pub mod real;

pub use real::FixedReal;

/// Raw value of one whole unit.
pub const BONE: u64 = 1_000_000_000_000_000_000;

const POW_PRECISION_RAW: u64 = BONE / 10_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixedMathError {
    #[error("fixed-point addition overflow")]
    AddOverflow,
    #[error("fixed-point subtraction underflow")]
    SubUnderflow,
    #[error("fixed-point multiplication overflow")]
    MulOverflow,
    #[error("fixed-point division by zero")]
    DivByZero,
    #[error("pow base out of range")]
    PowBaseOutOfRange,
    #[error("value does not fit the target width")]
    Narrowing,
}

/// A non-negative real number scaled by 1e18, stored in a 256-bit word.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, From, Into)]
pub struct Fixed(U256);

impl Fixed {
    pub const ZERO: Fixed = Fixed(U256([0, 0, 0, 0]));
    pub const ONE: Fixed = Fixed(U256([BONE, 0, 0, 0]));
    /// Smallest admissible `pow` base: one raw unit above zero.
    pub const MIN_POW_BASE: Fixed = Fixed(U256([1, 0, 0, 0]));
    /// Largest admissible `pow` base: one raw unit below two.
    pub const MAX_POW_BASE: Fixed = Fixed(U256([2 * BONE - 1, 0, 0, 0]));
    /// Relative floor below which series terms are discarded.
    pub const POW_PRECISION: Fixed = Fixed(U256([POW_PRECISION_RAW, 0, 0, 0]));

    pub fn from_raw(raw: u128) -> Fixed {
        Fixed(U256::from(raw))
    }

    pub fn from_raw_u256(raw: U256) -> Fixed {
        Fixed(raw)
    }

    /// `n` whole units.
    pub fn from_int(n: u64) -> Fixed {
        Fixed(U256::from(n) * U256::from(BONE))
    }

    pub fn raw(self) -> U256 {
        self.0
    }

    /// Raw value narrowed to u128; errors out when the value is wider.
    pub fn raw_u128(self) -> Result<u128, FixedMathError> {
        if self.0.bits() > 128 {
            return Err(FixedMathError::Narrowing);
        }
        Ok(self.0.low_u128())
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn add(self, rhs: Fixed) -> Result<Fixed, FixedMathError> {
        self.0
            .checked_add(rhs.0)
            .map(Fixed)
            .ok_or(FixedMathError::AddOverflow)
    }

    pub fn sub(self, rhs: Fixed) -> Result<Fixed, FixedMathError> {
        self.0
            .checked_sub(rhs.0)
            .map(Fixed)
            .ok_or(FixedMathError::SubUnderflow)
    }

    /// Absolute difference together with the sign of `self - rhs`.
    pub fn sub_sign(self, rhs: Fixed) -> (Fixed, bool) {
        if self.0 >= rhs.0 {
            (Fixed(self.0 - rhs.0), false)
        } else {
            (Fixed(rhs.0 - self.0), true)
        }
    }

    /// `(a * b + BONE / 2) / BONE`, round half-up.
    pub fn mul(self, rhs: Fixed) -> Result<Fixed, FixedMathError> {
        let prod = self.0.full_mul(rhs.0);
        let rounded = prod
            .checked_add(U512::from(BONE / 2))
            .ok_or(FixedMathError::MulOverflow)?
            / U512::from(BONE);
        narrow(rounded).map(Fixed).ok_or(FixedMathError::MulOverflow)
    }

    /// `(a * BONE + b / 2) / b`, round half-up.
    pub fn div(self, rhs: Fixed) -> Result<Fixed, FixedMathError> {
        if rhs.is_zero() {
            return Err(FixedMathError::DivByZero);
        }
        let num = self
            .0
            .full_mul(U256::from(BONE))
            .checked_add(widen(rhs.0 >> 1))
            .ok_or(FixedMathError::MulOverflow)?;
        narrow(num / widen(rhs.0))
            .map(Fixed)
            .ok_or(FixedMathError::MulOverflow)
    }

    /// Largest whole-unit value not exceeding `self`.
    pub fn floor(self) -> Fixed {
        Fixed(self.0 / U256::from(BONE) * U256::from(BONE))
    }

    /// Whole-unit part as a plain integer.
    pub fn to_int(self) -> Result<u64, FixedMathError> {
        let whole = self.0 / U256::from(BONE);
        if whole.bits() > 64 {
            return Err(FixedMathError::Narrowing);
        }
        Ok(whole.low_u64())
    }

    /// Exact integer power by repeated squaring over round-half-up `mul`.
    pub fn powi(self, mut n: u64) -> Result<Fixed, FixedMathError> {
        let mut z = if n % 2 != 0 { self } else { Fixed::ONE };
        let mut b = self;
        n /= 2;
        while n != 0 {
            b = b.mul(b)?;
            if n % 2 != 0 {
                z = z.mul(b)?;
            }
            n /= 2;
        }
        Ok(z)
    }

    /// `base ^ exp` for fractional exponents.
    ///
    /// The whole part of `exp` is evaluated exactly with [`powi`]; the
    /// remainder with a binomial series whose terms are summed until their
    /// magnitude drops below [`Fixed::POW_PRECISION`]. The base must lie in
    /// `(0, 2)` exclusive for the series to converge.
    pub fn pow(self, exp: Fixed) -> Result<Fixed, FixedMathError> {
        if self < Fixed::MIN_POW_BASE || self > Fixed::MAX_POW_BASE {
            return Err(FixedMathError::PowBaseOutOfRange);
        }
        let whole = exp.floor();
        let remain = exp.sub(whole)?;
        let whole_pow = self.powi(whole.to_int()?)?;
        if remain.is_zero() {
            return Ok(whole_pow);
        }
        let partial = self.pow_approx(remain, Fixed::POW_PRECISION)?;
        whole_pow.mul(partial)
    }

    /// Binomial series for `base ^ exp`, `exp` in `[0, 1)`.
    ///
    /// term(k) = term(k-1) * (exp - (k-1)) * (base - 1) / k, with the sign
    /// of each term tracked explicitly from the signs of both factors.
    fn pow_approx(self, exp: Fixed, precision: Fixed) -> Result<Fixed, FixedMathError> {
        let a = exp;
        let (x, xneg) = self.sub_sign(Fixed::ONE);
        let mut term = Fixed::ONE;
        let mut sum = term;
        let mut negative = false;
        let mut i: u64 = 1;
        while term >= precision {
            let big_k = Fixed::from_int(i);
            let (c, cneg) = a.sub_sign(big_k.sub(Fixed::ONE)?);
            term = term.mul(c.mul(x)?)?;
            term = term.div(big_k)?;
            if term.is_zero() {
                break;
            }
            if xneg {
                negative = !negative;
            }
            if cneg {
                negative = !negative;
            }
            sum = if negative { sum.sub(term)? } else { sum.add(term)? };
            i += 1;
        }
        Ok(sum)
    }

    /// Floor square root in fixed-point semantics: `sqrt(raw * BONE)`.
    pub fn sqrt(self) -> Fixed {
        let widened = widen(self.0) * U512::from(BONE);
        let root = isqrt(widened);
        // root of a 512-bit product of two 256-bit-bounded factors fits.
        Fixed(narrow(root).expect("sqrt narrows by construction"))
    }

    /// Lossy conversion for the floating-point representation.
    pub fn to_f64(self) -> f64 {
        let hi = (self.0 >> 128).low_u128() as f64;
        let lo = self.0.low_u128() as f64;
        (hi * 2f64.powi(128) + lo) / 1e18
    }

    /// Nearest fixed-point value; negatives clamp to zero.
    pub fn from_f64_lossy(value: f64) -> Fixed {
        if !value.is_finite() || value <= 0.0 {
            return Fixed::ZERO;
        }
        let raw = (value * 1e18).round();
        if raw >= u128::MAX as f64 {
            Fixed(U256::from(u128::MAX))
        } else {
            Fixed(U256::from(raw as u128))
        }
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / U256::from(BONE);
        let frac = (self.0 % U256::from(BONE)).low_u64();
        write!(f, "{}.{:018}", whole, frac)
    }
}

fn widen(a: U256) -> U512 {
    let mut words = [0u64; 8];
    words[..4].copy_from_slice(&a.0);
    U512(words)
}

fn narrow(a: U512) -> Option<U256> {
    if a.0[4..].iter().any(|w| *w != 0) {
        return None;
    }
    Some(U256([a.0[0], a.0[1], a.0[2], a.0[3]]))
}

fn isqrt(n: U512) -> U512 {
    if n.is_zero() {
        return n;
    }
    let mut x = U512::one() << ((n.bits() + 1) / 2);
    loop {
        let y = (x + n / x) >> 1;
        if y >= x {
            return x;
        }
        x = y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn fx(units: u64) -> Fixed {
        Fixed::from_int(units)
    }

    #[test]
    fn mul_div_round_trip_within_one_unit() {
        // Dividing by b < 1 amplifies mul's half-unit rounding error by
        // 1/b, so the one-unit bound only holds for divisors of at least
        // one whole unit.
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let a = Fixed::from_raw(rng.gen_range(1..u64::MAX as u128));
            let b = Fixed::from_raw(rng.gen_range(BONE as u128..u64::MAX as u128));
            let round_trip = a.mul(b).unwrap().div(b).unwrap();
            let (diff, _) = round_trip.sub_sign(a);
            assert!(
                diff <= Fixed::from_raw(1),
                "a={} b={} got={}",
                a,
                b,
                round_trip
            );
        }
    }

    #[test]
    fn mul_rounds_half_up() {
        // 1.5 * 0.333...334 picks the nearest representable value.
        let a = Fixed::from_raw(3);
        let b = Fixed::from_raw(BONE as u128 / 2);
        // 3 * 0.5 = 1.5 raw, rounds to 2.
        assert_eq!(a.mul(b).unwrap(), Fixed::from_raw(2));
    }

    #[test]
    fn pow_identities() {
        for raw in [1u128, 7, BONE as u128 / 3, BONE as u128, 19 * BONE as u128 / 10] {
            let x = Fixed::from_raw(raw);
            assert_eq!(x.pow(Fixed::ONE).unwrap(), x);
            assert_eq!(x.pow(Fixed::ZERO).unwrap(), Fixed::ONE);
        }
    }

    #[test]
    fn powi_matches_repeated_mul() {
        // Squaring rounds intermediates in a different order than a
        // sequential product, so the two can drift by a raw unit per step.
        let x = Fixed::from_raw(1_234_567_890_123_456_789);
        let mut acc = Fixed::ONE;
        for n in 0..8u64 {
            let (diff, _) = x.powi(n).unwrap().sub_sign(acc);
            assert!(diff <= Fixed::from_raw(4), "n={} diff={}", n, diff);
            acc = acc.mul(x).unwrap();
        }
    }

    #[test]
    fn fractional_pow_converges() {
        // 1.21 ^ 0.5 = 1.1
        let base = Fixed::from_raw(1_210_000_000_000_000_000);
        let half = Fixed::from_raw(BONE as u128 / 2);
        let got = base.pow(half).unwrap();
        let (diff, _) = got.sub_sign(Fixed::from_raw(1_100_000_000_000_000_000));
        assert!(diff < Fixed::POW_PRECISION, "got {}", got);
    }

    #[test]
    fn pow_rejects_out_of_domain_base() {
        assert_eq!(
            Fixed::ZERO.pow(Fixed::ONE),
            Err(FixedMathError::PowBaseOutOfRange)
        );
        assert_eq!(
            fx(2).pow(Fixed::ONE),
            Err(FixedMathError::PowBaseOutOfRange)
        );
    }

    #[test]
    fn sqrt_squares_back() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let a = Fixed::from_raw(rng.gen_range(0..u64::MAX as u128));
            let root = a.sqrt();
            assert!(root.mul(root).unwrap() <= a.add(Fixed::from_raw(1)).unwrap());
            let above = root.add(Fixed::from_raw(1)).unwrap();
            assert!(above.mul(above).unwrap() >= a);
        }
    }

    #[test]
    fn div_by_zero_is_an_error() {
        assert_eq!(fx(1).div(Fixed::ZERO), Err(FixedMathError::DivByZero));
    }

    #[test]
    fn display_is_decimal() {
        assert_eq!(fx(3).to_string(), "3.000000000000000000");
        assert_eq!(Fixed::from_raw(1).to_string(), "0.000000000000000001");
    }
}
