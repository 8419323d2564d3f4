//! Three-asset concentrated-liquidity pricing.
//!
//! The pool concentrates liquidity on the price interval [alpha, 1/alpha]
//! by trading on virtual reserves, each real reserve shifted by
//! `L * alpha^(1/3)` where `L` is the root of the cubic
//! `a*L^3 - mb*L^2 - mc*L - md = 0` with
//! `a = 1 - alpha, mb = (x+y+z)*alpha^(2/3), mc = (xy+yz+xz)*alpha^(1/3),
//! md = x*y*z`. Here `alpha^(1/3)` is stored directly as `root3_alpha`.
//! Once the offsets are known, every quote is plain constant-product math
//! on the two virtual reserves involved.

use crate::error::PoolMathError;
use crate::pair::{max_in_amount, max_out_amount, PricingModel, SwapKind};
use crate::pool::PoolId;
use fixed_math::Fixed;
use log::trace;

const MAX_ITERATIONS: u32 = 255;

/// Newton steps taken unconditionally before the early-stop rules apply.
const MIN_ITERATIONS: u32 = 5;

/// Once past `MIN_ITERATIONS`, a step that fails to shrink by this factor
/// signals the fixed-point noise floor.
const SHRINK_FACTOR: u64 = 8;

#[derive(Debug, Clone)]
pub struct Gyro3Pair {
    pub pool: PoolId,
    pub reserves_in: Fixed,
    pub reserves_out: Fixed,
    /// The reserve of the third asset, needed only for the invariant.
    pub reserves_third: Fixed,
    /// Cube root of the lower price bound alpha, in (0, 1).
    pub root3_alpha: Fixed,
    pub swap_fee: Fixed,
}

impl Gyro3Pair {
    fn fee_complement(&self) -> Result<Fixed, PoolMathError> {
        Ok(Fixed::ONE.sub(self.swap_fee)?)
    }

    /// Virtual reserves of the traded pair: real balances plus the
    /// common offset `L * root3_alpha`.
    fn virtual_reserves(&self) -> Result<(Fixed, Fixed), PoolMathError> {
        let l = invariant(
            [self.reserves_in, self.reserves_out, self.reserves_third],
            self.root3_alpha,
        )?;
        let offset = l.mul(self.root3_alpha)?;
        Ok((
            self.reserves_in.add(offset)?,
            self.reserves_out.add(offset)?,
        ))
    }

    /// Virtual reserves displaced by a hypothetical trade.
    fn displaced_virtual(
        &self,
        amount: Fixed,
        kind: SwapKind,
    ) -> Result<(Fixed, Fixed), PoolMathError> {
        let (virt_in, virt_out) = self.virtual_reserves()?;
        match kind {
            SwapKind::GivenIn => {
                let net = amount.mul(self.fee_complement()?)?;
                let new_in = virt_in.add(net)?;
                Ok((new_in, virt_in.mul(virt_out)?.div(new_in)?))
            }
            SwapKind::GivenOut => {
                if amount >= self.reserves_out {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let new_out = virt_out.sub(amount)?;
                Ok((virt_in.mul(virt_out)?.div(new_out)?, new_out))
            }
        }
    }
}

impl PricingModel for Gyro3Pair {
    fn quote_out_given_in(&self, amount_in: Fixed) -> Result<Fixed, PoolMathError> {
        if self.reserves_in.is_zero() || self.reserves_out.is_zero() {
            return Ok(Fixed::ZERO);
        }
        let (virt_in, virt_out) = self.virtual_reserves()?;
        let net = amount_in.mul(self.fee_complement()?)?;
        let remaining = virt_in.mul(virt_out)?.div(virt_in.add(net)?)?;
        let (out, _) = virt_out.sub_sign(remaining);
        if out >= self.reserves_out {
            return Err(PoolMathError::ExceedsReserves);
        }
        Ok(out)
    }

    fn quote_in_given_out(&self, amount_out: Fixed) -> Result<Fixed, PoolMathError> {
        if self.reserves_in.is_zero() || self.reserves_out.is_zero() {
            return Ok(Fixed::ZERO);
        }
        let (new_in, _) = self.displaced_virtual(amount_out, SwapKind::GivenOut)?;
        let (virt_in, _) = self.virtual_reserves()?;
        let (gross, _) = new_in.sub_sign(virt_in);
        Ok(gross.div(self.fee_complement()?)?)
    }

    fn spot_price(&self) -> Result<Fixed, PoolMathError> {
        let (virt_in, virt_out) = self.virtual_reserves()?;
        virt_in
            .div(virt_out.mul(self.fee_complement()?)?)
            .map_err(Into::into)
    }

    // in(out) on virtual constant-product reserves differentiates in
    // closed form, so no iteration is needed here.
    fn spot_price_after_swap(&self, amount: Fixed, kind: SwapKind) -> Result<Fixed, PoolMathError> {
        let (virt_in, virt_out) = self.virtual_reserves()?;
        let c = self.fee_complement()?;
        match kind {
            SwapKind::GivenIn => {
                // (vIn + c*a)^2 / (c * vIn * vOut)
                let shifted = virt_in.add(c.mul(amount)?)?;
                Ok(shifted
                    .mul(shifted)?
                    .div(c.mul(virt_in)?.mul(virt_out)?)?)
            }
            SwapKind::GivenOut => {
                // vIn * vOut / (c * (vOut - ao)^2)
                if amount >= self.reserves_out {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let remaining = virt_out.sub(amount)?;
                Ok(virt_in
                    .mul(virt_out)?
                    .div(c.mul(remaining)?.mul(remaining)?)?)
            }
        }
    }

    fn price_derivative_after_swap(
        &self,
        amount: Fixed,
        kind: SwapKind,
    ) -> Result<Fixed, PoolMathError> {
        let (virt_in, virt_out) = self.virtual_reserves()?;
        let c = self.fee_complement()?;
        let two = Fixed::from_int(2);
        match kind {
            SwapKind::GivenIn => {
                // 2 * (vIn + c*a) / (vIn * vOut)
                let shifted = virt_in.add(c.mul(amount)?)?;
                Ok(two.mul(shifted)?.div(virt_in.mul(virt_out)?)?)
            }
            SwapKind::GivenOut => {
                // 2 * vIn * vOut / (c * (vOut - ao)^3)
                if amount >= self.reserves_out {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let remaining = virt_out.sub(amount)?;
                Ok(two
                    .mul(virt_in)?
                    .mul(virt_out)?
                    .div(c.mul(remaining)?.mul(remaining)?.mul(remaining)?)?)
            }
        }
    }

    fn limit_amount(&self, kind: SwapKind) -> Result<Fixed, PoolMathError> {
        if self.reserves_in.is_zero() || self.reserves_out.is_zero() {
            return Ok(Fixed::ZERO);
        }
        match kind {
            SwapKind::GivenIn => max_in_amount(self.reserves_in),
            SwapKind::GivenOut => max_out_amount(self.reserves_out),
        }
    }
}

/// Coefficients of `a*L^3 - mb*L^2 - mc*L - md`.
fn cubic_terms(reserves: [Fixed; 3], root3_alpha: Fixed) -> Result<(Fixed, Fixed, Fixed, Fixed), PoolMathError> {
    let [x, y, z] = reserves;
    let alpha = root3_alpha.mul(root3_alpha)?.mul(root3_alpha)?;
    let a = Fixed::ONE.sub(alpha)?;
    let mb = x
        .add(y)?
        .add(z)?
        .mul(root3_alpha)?
        .mul(root3_alpha)?;
    let mc = x
        .mul(y)?
        .add(y.mul(z)?)?
        .add(x.mul(z)?)?
        .mul(root3_alpha)?;
    let md = x.mul(y)?.mul(z)?;
    Ok((a, mb, mc, md))
}

/// Magnitude and direction of a Newton step at `l`. The bool is true when
/// the residual is negative, i.e. `l` sits below the root and the step
/// points upward.
fn newton_delta(
    l: Fixed,
    a: Fixed,
    mb: Fixed,
    mc: Fixed,
    md: Fixed,
) -> Result<(Fixed, bool), PoolMathError> {
    let l_sq = l.mul(l)?;
    let rising = a.mul(l_sq)?.mul(l)?;
    let falling = mb.mul(l_sq)?.add(mc.mul(l)?)?.add(md)?;
    let (residual, below_root) = rising.sub_sign(falling);
    let slope_rising = Fixed::from_int(3).mul(a)?.mul(l_sq)?;
    let slope_falling = Fixed::from_int(2).mul(mb)?.mul(l)?.add(mc)?;
    // Iteration starts above the local maximum, so the slope stays positive.
    let (slope, _) = slope_rising.sub_sign(slope_falling);
    Ok((residual.div(slope)?, below_root))
}

/// Positive root `L` of the invariant cubic.
///
/// Starts from 3/2 of the critical point, a guaranteed overestimate, and
/// descends by Newton steps. After `MIN_ITERATIONS` the solve ends as soon
/// as a step flips upward (the root has been crossed from above, so the
/// current `l` underestimates) or stops shrinking by `SHRINK_FACTOR`
/// (fixed-point noise; one more downward step is taken so the result never
/// overestimates). Hitting the iteration cap is fatal.
pub fn invariant(reserves: [Fixed; 3], root3_alpha: Fixed) -> Result<Fixed, PoolMathError> {
    let (a, mb, mc, md) = cubic_terms(reserves, root3_alpha)?;
    if md.is_zero() {
        // A zero reserve drops the constant term; the remaining quadratic
        // has the positive root (mb + sqrt(mb^2 + 4*a*mc)) / (2*a).
        let discriminant = mb.mul(mb)?.add(Fixed::from_int(4).mul(a)?.mul(mc)?)?;
        return Ok(mb
            .add(discriminant.sqrt())?
            .div(Fixed::from_int(2).mul(a)?)?);
    }
    let radicand = mb.mul(mb)?.add(Fixed::from_int(3).mul(a)?.mul(mc)?)?;
    let critical = mb.add(radicand.sqrt())?.div(Fixed::from_int(3).mul(a)?)?;
    let mut l = critical.mul(Fixed::from_int(3))?.div(Fixed::from_int(2))?;
    let mut delta_prev = Fixed::ZERO;
    for iteration in 0..MAX_ITERATIONS {
        let (delta, points_up) = newton_delta(l, a, mb, mc, md)?;
        if delta.is_zero() {
            return Ok(l);
        }
        if iteration >= MIN_ITERATIONS {
            if points_up {
                trace!("gyro3 invariant crossed the root after {} steps", iteration);
                return Ok(l);
            }
            if delta.mul(Fixed::from_int(SHRINK_FACTOR))? >= delta_prev {
                trace!("gyro3 invariant stalled after {} steps", iteration);
                return Ok(l.sub(delta)?);
            }
        }
        l = if points_up { l.add(delta)? } else { l.sub(delta)? };
        delta_prev = delta;
    }
    Err(PoolMathError::NonConvergence {
        iterations: MAX_ITERATIONS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixed_math::BONE;
    use rand::Rng;

    fn root3_alpha() -> Fixed {
        // alpha^(1/3) = 0.995
        Fixed::from_raw(995 * (BONE as u128) / 1_000)
    }

    fn pair(x: u64, y: u64, z: u64) -> Gyro3Pair {
        Gyro3Pair {
            pool: PoolId::from("gyro3-test"),
            reserves_in: Fixed::from_int(x),
            reserves_out: Fixed::from_int(y),
            reserves_third: Fixed::from_int(z),
            root3_alpha: root3_alpha(),
            swap_fee: Fixed::from_raw(BONE as u128 / 1_000),
        }
    }

    /// Signed residual of the cubic at `l`, as (|value|, is_negative).
    fn residual(reserves: [Fixed; 3], root3_alpha: Fixed, l: Fixed) -> (Fixed, bool) {
        let (a, mb, mc, md) = cubic_terms(reserves, root3_alpha).unwrap();
        let l_sq = l.mul(l).unwrap();
        let rising = a.mul(l_sq).unwrap().mul(l).unwrap();
        let falling = mb
            .mul(l_sq)
            .unwrap()
            .add(mc.mul(l).unwrap())
            .unwrap()
            .add(md)
            .unwrap();
        rising.sub_sign(falling)
    }

    #[test]
    fn invariant_zeroes_the_cubic() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let reserves = [
                Fixed::from_int(rng.gen_range(1_000..1_000_000)),
                Fixed::from_int(rng.gen_range(1_000..1_000_000)),
                Fixed::from_int(rng.gen_range(1_000..1_000_000)),
            ];
            let l = invariant(reserves, root3_alpha()).unwrap();
            let (value, _) = residual(reserves, root3_alpha(), l);
            // The cubic is steep near the root; allow slack proportional
            // to the slope times a few raw units of L.
            let bound = l.mul(l).unwrap().div(Fixed::from_int(1_000)).unwrap();
            assert!(value <= bound, "residual {} at L {}", value, l);
        }
    }

    #[test]
    fn invariant_never_overestimates() {
        let reserves = [
            Fixed::from_int(40_000),
            Fixed::from_int(55_000),
            Fixed::from_int(47_000),
        ];
        let l = invariant(reserves, root3_alpha()).unwrap();
        // Stepping one part in 1e9 above the returned root must put the
        // cubic clearly positive.
        let nudged = l
            .add(l.div(Fixed::from_int(1_000_000_000)).unwrap())
            .unwrap();
        let (_, negative) = residual(reserves, root3_alpha(), nudged);
        assert!(!negative, "root {} overestimates", l);
    }

    #[test]
    fn zero_reserve_uses_quadratic_branch() {
        let reserves = [Fixed::from_int(10_000), Fixed::from_int(12_000), Fixed::ZERO];
        let l = invariant(reserves, root3_alpha()).unwrap();
        assert!(l > Fixed::ZERO);
        let (value, _) = residual(reserves, root3_alpha(), l);
        let bound = l.mul(l).unwrap().div(Fixed::from_int(1_000)).unwrap();
        assert!(value <= bound);
    }

    #[test]
    fn quote_round_trip_recovers_input() {
        let p = pair(90_000, 80_000, 100_000);
        let amount_in = Fixed::from_int(4_000);
        let out = p.quote_out_given_in(amount_in).unwrap();
        assert!(out > Fixed::ZERO);
        let back = p.quote_in_given_out(out).unwrap();
        let (diff, _) = back.sub_sign(amount_in);
        assert!(diff <= Fixed::from_raw(1_000_000_000), "{} vs {}", back, amount_in);
    }

    #[test]
    fn spot_price_matches_post_swap_price_at_zero() {
        let p = pair(70_000, 60_000, 65_000);
        let spot = p.spot_price().unwrap();
        let at_zero = p
            .spot_price_after_swap(Fixed::ZERO, SwapKind::GivenIn)
            .unwrap();
        let (diff, _) = spot.sub_sign(at_zero);
        assert!(diff <= Fixed::from_raw(100), "{} vs {}", spot, at_zero);
    }

    #[test]
    fn concentration_beats_plain_constant_product_depth() {
        // The virtual offsets flatten the curve: the same trade moves the
        // price less than it would on the raw reserves.
        let p = pair(50_000, 50_000, 50_000);
        let before = p.spot_price().unwrap();
        let after = p
            .spot_price_after_swap(Fixed::from_int(5_000), SwapKind::GivenIn)
            .unwrap();
        let growth = after.div(before).unwrap();
        // Raw constant product would grow by more than (55/50)^2 = 1.21.
        assert!(growth < Fixed::from_raw(121 * (BONE as u128) / 100));
        assert!(growth > Fixed::ONE);
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let p = pair(30_000, 45_000, 38_000);
        for kind in [SwapKind::GivenIn, SwapKind::GivenOut] {
            let amount = Fixed::from_int(2_000);
            let step = Fixed::from_raw(BONE as u128 / 1_000);
            let slope = p.price_derivative_after_swap(amount, kind).unwrap();
            let lo = p.spot_price_after_swap(amount, kind).unwrap();
            let hi = p.spot_price_after_swap(amount.add(step).unwrap(), kind).unwrap();
            let estimate = hi.sub(lo).unwrap().div(step).unwrap();
            let (diff, _) = slope.sub_sign(estimate);
            assert!(
                diff.div(slope).unwrap() < Fixed::from_raw(BONE as u128 / 10_000),
                "{:?}: {} vs {}",
                kind,
                slope,
                estimate
            );
        }
    }

    #[test]
    fn given_out_rejects_exhaustion() {
        let p = pair(10_000, 10_000, 10_000);
        assert_eq!(
            p.quote_in_given_out(Fixed::from_int(10_000)),
            Err(PoolMathError::ExceedsReserves)
        );
    }
}
