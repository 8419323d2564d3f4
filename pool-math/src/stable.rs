//! Stable-swap pricing.
//!
//! Quotes require the invariant `D` of
//! `A*n^n * S + D = A*n^n * D + D^(n+1) / (n^n * prod(reserves))`,
//! solved with a Newton recurrence whose product term is recomputed and
//! rounded on every iteration. A single missing reserve given `D` reduces
//! to a quadratic, so no full Newton step is needed there. There is no
//! closed form for the price slope; it is estimated by an adaptively
//! refined finite difference.

use crate::error::PoolMathError;
use crate::pair::{max_in_amount, max_out_amount, PricingModel, SwapKind};
use crate::pool::PoolId;
use fixed_math::Fixed;
use log::trace;

const MAX_ITERATIONS: u32 = 255;

/// Reciprocal of the relative tolerance (1e-10) at which two successive
/// finite-difference estimates are considered to agree.
const DERIVATIVE_TOLERANCE_RECIP: u64 = 10_000_000_000;

#[derive(Debug, Clone)]
pub struct StablePair {
    pub pool: PoolId,
    /// All pool reserves in the common unit, in pool token order.
    pub reserves: Vec<Fixed>,
    pub index_in: usize,
    pub index_out: usize,
    /// Amplification coefficient, >= 1.
    pub amp: Fixed,
    pub swap_fee: Fixed,
}

impl StablePair {
    fn coins(&self) -> u64 {
        self.reserves.len() as u64
    }

    fn ann(&self) -> Result<Fixed, PoolMathError> {
        let n = self.coins() as u32;
        Ok(self.amp.mul(Fixed::from_int((n as u64).pow(n)))?)
    }

    /// Marginal price of `index_in` per `index_out` at the given reserves,
    /// from the partial derivatives of the invariant expression, fee
    /// included. `D` is held fixed by the caller.
    fn price_at(
        &self,
        reserves: &[Fixed],
        d: Fixed,
        ann: Fixed,
    ) -> Result<Fixed, PoolMathError> {
        let n = Fixed::from_int(self.coins());
        // t = D^(n+1) / (n^n * prod)
        let mut t = d;
        for r in reserves {
            t = t.mul(d)?.div(r.mul(n)?)?;
        }
        let partial_in = ann.add(t.div(reserves[self.index_in])?)?;
        let partial_out = ann.add(t.div(reserves[self.index_out])?)?;
        Ok(partial_out
            .div(partial_in)?
            .div(Fixed::ONE.sub(self.swap_fee)?)?)
    }

    /// Reserves after a hypothetical trade of `amount`, along with the
    /// invariant the trade was priced against.
    fn displaced_reserves(
        &self,
        amount: Fixed,
        kind: SwapKind,
    ) -> Result<(Vec<Fixed>, Fixed, Fixed), PoolMathError> {
        let d = invariant(&self.reserves, self.amp)?;
        let ann = self.ann()?;
        let mut reserves = self.reserves.clone();
        match kind {
            SwapKind::GivenIn => {
                let net_in = amount.mul(Fixed::ONE.sub(self.swap_fee)?)?;
                reserves[self.index_in] = reserves[self.index_in].add(net_in)?;
                reserves[self.index_out] =
                    reserve_given_invariant(&reserves, self.index_out, d, ann)?;
            }
            SwapKind::GivenOut => {
                if amount >= reserves[self.index_out] {
                    return Err(PoolMathError::ExceedsReserves);
                }
                reserves[self.index_out] = reserves[self.index_out].sub(amount)?;
                reserves[self.index_in] =
                    reserve_given_invariant(&reserves, self.index_in, d, ann)?;
            }
        }
        Ok((reserves, d, ann))
    }
}

impl PricingModel for StablePair {
    fn quote_out_given_in(&self, amount_in: Fixed) -> Result<Fixed, PoolMathError> {
        let old_out = self.reserves[self.index_out];
        if self.reserves[self.index_in].is_zero() || old_out.is_zero() {
            return Ok(Fixed::ZERO);
        }
        let (reserves, _, _) = self.displaced_reserves(amount_in, SwapKind::GivenIn)?;
        let (out, drained) = old_out.sub_sign(reserves[self.index_out]);
        if drained {
            // The conservative rounding of the quadratic can nudge the new
            // reserve a hair above the old one for dust-sized inputs.
            return Ok(Fixed::ZERO);
        }
        Ok(out)
    }

    fn quote_in_given_out(&self, amount_out: Fixed) -> Result<Fixed, PoolMathError> {
        let old_in = self.reserves[self.index_in];
        if old_in.is_zero() || self.reserves[self.index_out].is_zero() {
            return Ok(Fixed::ZERO);
        }
        let (reserves, _, _) = self.displaced_reserves(amount_out, SwapKind::GivenOut)?;
        let (gross, shrunk) = reserves[self.index_in].sub_sign(old_in);
        if shrunk {
            return Ok(Fixed::ZERO);
        }
        Ok(gross.div(Fixed::ONE.sub(self.swap_fee)?)?)
    }

    fn spot_price(&self) -> Result<Fixed, PoolMathError> {
        let d = invariant(&self.reserves, self.amp)?;
        self.price_at(&self.reserves, d, self.ann()?)
    }

    fn spot_price_after_swap(&self, amount: Fixed, kind: SwapKind) -> Result<Fixed, PoolMathError> {
        let (reserves, d, ann) = self.displaced_reserves(amount, kind)?;
        self.price_at(&reserves, d, ann)
    }

    fn price_derivative_after_swap(
        &self,
        amount: Fixed,
        kind: SwapKind,
    ) -> Result<Fixed, PoolMathError> {
        let price_here = self.spot_price_after_swap(amount, kind)?;
        let anchor = match kind {
            SwapKind::GivenIn => self.reserves[self.index_in],
            SwapKind::GivenOut => self.reserves[self.index_out],
        };
        let mut step = anchor.div(Fixed::from_int(100))?;
        let tolerance = Fixed::from_int(DERIVATIVE_TOLERANCE_RECIP);
        let mut previous: Option<Fixed> = None;
        for iteration in 0..MAX_ITERATIONS {
            if step.is_zero() {
                break;
            }
            let displaced = match self.spot_price_after_swap(amount.add(step)?, kind) {
                Ok(price) => price,
                // Step landed outside the valid region; refine and retry.
                Err(PoolMathError::ExceedsReserves) | Err(PoolMathError::Fixed(_)) => {
                    step = halve(step);
                    continue;
                }
                Err(fatal) => return Err(fatal),
            };
            let (rise, _) = displaced.sub_sign(price_here);
            let estimate = rise.div(step)?;
            if let Some(prev) = previous {
                let (gap, _) = estimate.sub_sign(prev);
                if gap.mul(tolerance)? <= estimate {
                    trace!(
                        "stable derivative settled after {} refinements: {}",
                        iteration,
                        estimate
                    );
                    return Ok(estimate);
                }
            }
            previous = Some(estimate);
            step = halve(step);
        }
        previous.ok_or(PoolMathError::NonConvergence {
            iterations: MAX_ITERATIONS,
        })
    }

    fn limit_amount(&self, kind: SwapKind) -> Result<Fixed, PoolMathError> {
        let (reserves_in, reserves_out) =
            (self.reserves[self.index_in], self.reserves[self.index_out]);
        if reserves_in.is_zero() || reserves_out.is_zero() {
            return Ok(Fixed::ZERO);
        }
        match kind {
            SwapKind::GivenIn => max_in_amount(reserves_in),
            SwapKind::GivenOut => max_out_amount(reserves_out),
        }
    }
}

fn halve(value: Fixed) -> Fixed {
    Fixed::from_raw_u256(value.raw() >> 1)
}

/// Newton solve of the stable-swap invariant `D`.
///
/// `D <- (n*D^2 + A*n^n*S*P) / ((n+1)*D + (A*n^n - 1)*P)` with
/// `P = D^(n+1) / (n^n * prod)` recomputed (and rounded) every iteration.
/// Stops at |dD| <= one raw unit; exceeding the iteration bound is fatal,
/// a silently wrong `D` would misprice an executable trade.
pub fn invariant(reserves: &[Fixed], amp: Fixed) -> Result<Fixed, PoolMathError> {
    let mut sum = Fixed::ZERO;
    for r in reserves {
        sum = sum.add(*r)?;
    }
    if sum.is_zero() {
        return Ok(Fixed::ZERO);
    }
    let n = reserves.len() as u64;
    let n_fixed = Fixed::from_int(n);
    let ann = amp.mul(Fixed::from_int(n.pow(n as u32)))?;
    let mut d = sum;
    for iteration in 0..MAX_ITERATIONS {
        let mut p = reserves[0].mul(n_fixed)?;
        for r in &reserves[1..] {
            p = p.mul(*r)?.mul(n_fixed)?.div(d)?;
        }
        let previous = d;
        let numerator = n_fixed.mul(d)?.mul(d)?.add(ann.mul(sum)?.mul(p)?)?;
        let denominator = n_fixed
            .add(Fixed::ONE)?
            .mul(d)?
            .add(ann.sub(Fixed::ONE)?.mul(p)?)?;
        d = numerator.div(denominator)?;
        let (error, _) = d.sub_sign(previous);
        if error <= Fixed::from_raw(1) {
            trace!("stable invariant converged after {} iterations", iteration);
            return Ok(d);
        }
    }
    Err(PoolMathError::NonConvergence {
        iterations: MAX_ITERATIONS,
    })
}

/// The reserve at `missing` that restores the invariant `d`, all other
/// reserves given. From the invariant, `x` solves
/// `x^2 + (S' + D/(A*n^n) - D)*x - D^(n+1) / (n^n * prod' * A*n^n) = 0`;
/// the positive root is taken and rounded up, the direction that favors
/// the pool.
pub fn reserve_given_invariant(
    reserves: &[Fixed],
    missing: usize,
    d: Fixed,
    ann: Fixed,
) -> Result<Fixed, PoolMathError> {
    let n_fixed = Fixed::from_int(reserves.len() as u64);
    let mut quad_c = d;
    let mut sum_others = Fixed::ZERO;
    for (index, r) in reserves.iter().enumerate() {
        if index == missing {
            continue;
        }
        sum_others = sum_others.add(*r)?;
        quad_c = quad_c.mul(d)?.div(r.mul(n_fixed)?)?;
    }
    quad_c = quad_c.mul(d)?.div(ann.mul(n_fixed)?)?;
    let b = sum_others.add(d.div(ann)?)?;
    let (shift, b_dominates) = d.sub_sign(b);
    let discriminant = shift.mul(shift)?.add(quad_c.mul(Fixed::from_int(4))?)?;
    let root = discriminant.sqrt();
    let two = Fixed::from_int(2);
    let solution = if b_dominates {
        root.sub(shift)?.div(two)?
    } else {
        root.add(shift)?.div(two)?
    };
    Ok(solution.add(Fixed::from_raw(1))?)
}
