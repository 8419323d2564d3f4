//! Numeric representation seam for the route linearization algebra.
//!
//! The breakpoint walk is one algorithm over two representations: the
//! settlement-exact [`Fixed`] type and plain `f64` (the fast prototype
//! representation, kept alive for cross-checking). Everything the linear
//! price algebra needs is captured here; saturating behavior is fine on
//! this path because it only ever produces trial volumes that are later
//! re-evaluated with the exact pool formulas.

use crate::Fixed;
use primitive_types::U256;

pub trait FixedReal: Copy + PartialOrd + std::fmt::Debug {
    fn zero() -> Self;
    fn is_zero(&self) -> bool;
    fn from_fixed(value: Fixed) -> Self;
    fn to_fixed(self) -> Fixed;
    fn add(self, rhs: Self) -> Self;
    /// Subtraction clamped at zero.
    fn sub_or_zero(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    /// `None` on division by zero.
    fn div(self, rhs: Self) -> Option<Self>;
}

impl FixedReal for Fixed {
    fn zero() -> Self {
        Fixed::ZERO
    }

    fn is_zero(&self) -> bool {
        Fixed::is_zero(*self)
    }

    fn from_fixed(value: Fixed) -> Self {
        value
    }

    fn to_fixed(self) -> Fixed {
        self
    }

    fn add(self, rhs: Self) -> Self {
        Fixed::add(self, rhs).unwrap_or(Fixed::from_raw_u256(U256::MAX))
    }

    fn sub_or_zero(self, rhs: Self) -> Self {
        Fixed::sub(self, rhs).unwrap_or(Fixed::ZERO)
    }

    fn mul(self, rhs: Self) -> Self {
        Fixed::mul(self, rhs).unwrap_or(Fixed::from_raw_u256(U256::MAX))
    }

    fn div(self, rhs: Self) -> Option<Self> {
        Fixed::div(self, rhs).ok()
    }
}

impl FixedReal for f64 {
    fn zero() -> Self {
        0.0
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }

    fn from_fixed(value: Fixed) -> Self {
        value.to_f64()
    }

    fn to_fixed(self) -> Fixed {
        Fixed::from_f64_lossy(self)
    }

    fn add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn sub_or_zero(self, rhs: Self) -> Self {
        (self - rhs).max(0.0)
    }

    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }

    fn div(self, rhs: Self) -> Option<Self> {
        if rhs == 0.0 {
            None
        } else {
            Some(self / rhs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representations_agree_on_basic_algebra() {
        let a = Fixed::from_int(3);
        let b = Fixed::from_int(2);
        let exact = FixedReal::div(FixedReal::mul(a, b), b).unwrap();
        let float = f64::from_fixed(a)
            .mul(f64::from_fixed(b))
            .div(f64::from_fixed(b))
            .unwrap();
        assert_eq!(exact, a);
        assert!((float - 3.0).abs() < 1e-12);
    }

    #[test]
    fn sub_clamps_at_zero() {
        assert_eq!(
            Fixed::from_int(1).sub_or_zero(Fixed::from_int(2)),
            Fixed::ZERO
        );
        assert_eq!(1.0f64.sub_or_zero(2.0), 0.0);
    }
}
