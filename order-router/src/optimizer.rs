//! Best-allocation search.
//!
//! Candidate paths are linearized and split by the breakpoint walk for
//! every trial pool count, then each trial is re-priced with the exact
//! pool math on its own copy of the snapshot so legs sharing a pool see
//! each other's balance changes. The search over pool counts stops at the
//! first count that fails to beat its predecessor after gas.

use crate::breakpoints::{allocate, LinearPath};
use crate::catalog::build_paths;
use crate::error::RouterError;
use crate::path::{self, Leg, Path};
use fixed_math::Fixed;
use log::{debug, info, trace};
use pool_math::{
    downscale_down, upscale, Pool, PoolId, PoolMathError, PoolPair, PricingModel, SwapKind,
    TokenId,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub legs: Vec<Leg>,
    /// Volume routed down this path, in native units of the anchored
    /// side: input for an exact-input trade, output for an exact-output.
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Allocation {
    pub routes: Vec<Route>,
    /// Realized total on the opposite side after gas, native units.
    pub total_return: u128,
}

/// Splits `amount` of `token_in` -> `token_out` across the pool snapshot
/// for the best realized total, net of `cost_per_leg` gas (expressed in
/// units of the returned token, common 18-decimal scale).
///
/// Unfillable requests degrade to an empty allocation; only malformed
/// input and fatal numerics surface as errors.
#[allow(clippy::too_many_arguments)]
pub fn find_best_allocation(
    pools: &HashMap<PoolId, Pool>,
    token_in: &TokenId,
    token_out: &TokenId,
    kind: SwapKind,
    amount: u128,
    max_pools: usize,
    cost_per_leg: Fixed,
    disabled_tokens: &HashSet<TokenId>,
) -> Result<Allocation, RouterError> {
    let in_decimals =
        decimals_of(pools, token_in).ok_or_else(|| RouterError::UnknownToken(token_in.clone()))?;
    let out_decimals = decimals_of(pools, token_out)
        .ok_or_else(|| RouterError::UnknownToken(token_out.clone()))?;
    if amount == 0 || max_pools == 0 || token_in == token_out {
        return Ok(Allocation::default());
    }
    let (anchor_decimals, return_decimals) = match kind {
        SwapKind::GivenIn => (in_decimals, out_decimals),
        SwapKind::GivenOut => (out_decimals, in_decimals),
    };
    let target = upscale(amount, anchor_decimals)?;

    let mut candidates = Vec::new();
    let mut lines = Vec::new();
    for path in build_paths(pools, token_in, token_out, disabled_tokens)? {
        let pairs = path.pairs(pools)?;
        if let Some(line) = linearize(&pairs, path.leg_count(), kind)? {
            candidates.push((path, pairs));
            lines.push(line);
        }
    }
    if candidates.is_empty() {
        debug!("no usable path from {} to {}", token_in, token_out);
        return Ok(Allocation::default());
    }

    let mut best: Option<(Vec<(usize, Fixed)>, Fixed)> = None;
    for b in 1..=max_pools {
        let mut amounts = allocate(&lines, b, target);
        amounts.retain(|(_, v)| !v.is_zero());
        if amounts.is_empty() {
            continue;
        }
        settle_dust(&mut amounts, target);
        if amounts.is_empty() {
            continue;
        }
        let realized = match evaluate(pools, &candidates, &amounts, kind, cost_per_leg)? {
            Some(realized) => realized,
            None => {
                trace!("trial with {} pools cannot fill the request", b);
                continue;
            }
        };
        let improved = match (&best, kind) {
            (None, _) => true,
            (Some((_, incumbent)), SwapKind::GivenIn) => realized > *incumbent,
            (Some((_, incumbent)), SwapKind::GivenOut) => realized < *incumbent,
        };
        trace!("trial b={}: realized {}", b, realized);
        if !improved {
            break;
        }
        best = Some((amounts, realized));
    }

    let (amounts, realized) = match best {
        Some(best) => best,
        None => return Ok(Allocation::default()),
    };
    let mut routes: Vec<Route> = amounts
        .iter()
        .map(|(i, v)| {
            Ok(Route {
                legs: candidates[*i].0.legs.iter().cloned().collect(),
                amount: downscale_down(*v, anchor_decimals)?,
            })
        })
        .collect::<Result<_, PoolMathError>>()?;
    // Rounding dust lands on the first route so the native total is exact.
    let routed: u128 = routes.iter().map(|r| r.amount).sum();
    if let Some(first) = routes.first_mut() {
        if routed <= amount {
            first.amount += amount - routed;
        } else {
            first.amount = first.amount.saturating_sub(routed - amount);
        }
    }
    let allocation = Allocation {
        routes,
        total_return: downscale_down(realized, return_decimals)?,
    };
    info!(
        "routing {} {} over {} path(s), returning {}",
        amount,
        token_in,
        allocation.routes.len(),
        allocation.total_return
    );
    Ok(allocation)
}

/// Spot, slope and limit of one path; `None` when the path has nothing to
/// give (zero balance or a rejected candidate), which excludes it rather
/// than failing the call.
fn linearize(
    pairs: &[PoolPair],
    legs: usize,
    kind: SwapKind,
) -> Result<Option<LinearPath<Fixed>>, RouterError> {
    let build = || -> Result<Option<LinearPath<Fixed>>, PoolMathError> {
        let limit = path::limit_amount(pairs, kind)?;
        if limit.is_zero() {
            return Ok(None);
        }
        Ok(Some(LinearPath {
            spot: path::spot_price_after_swap(pairs, Fixed::ZERO, kind)?,
            slope: path::price_derivative_after_swap(pairs, Fixed::ZERO, kind)?,
            limit,
            legs,
        }))
    };
    match build() {
        Ok(line) => Ok(line),
        Err(rejection @ (PoolMathError::Fixed(_) | PoolMathError::ExceedsReserves)) => {
            trace!("excluding path: {}", rejection);
            Ok(None)
        }
        Err(fatal) => Err(fatal.into()),
    }
}

fn settle_dust(amounts: &mut Vec<(usize, Fixed)>, target: Fixed) {
    let total = amounts
        .iter()
        .fold(Fixed::ZERO, |acc, (_, v)| acc.add(*v).unwrap_or(acc));
    let (mut dust, overshoot) = target.sub_sign(total);
    if !overshoot {
        if let Some(first) = amounts.first_mut() {
            first.1 = first.1.add(dust).unwrap_or(first.1);
        }
        return;
    }
    // Trim the excess front to back, zeroing paths the excess swallows
    // whole and carrying the remainder forward.
    for entry in amounts.iter_mut() {
        let (left, swallowed) = entry.1.sub_sign(dust);
        if swallowed {
            dust = left;
            entry.1 = Fixed::ZERO;
        } else {
            entry.1 = left;
            break;
        }
    }
    amounts.retain(|(_, v)| !v.is_zero());
}

/// Exact realized total of one trial, on a private copy of the snapshot.
/// `None` marks a trial that cannot fill its volumes; recoverable leg
/// failures in the exact-input direction just forfeit that path's output.
fn evaluate(
    pools: &HashMap<PoolId, Pool>,
    candidates: &[(Path, Vec<PoolPair>)],
    amounts: &[(usize, Fixed)],
    kind: SwapKind,
    cost_per_leg: Fixed,
) -> Result<Option<Fixed>, RouterError> {
    let mut snapshot = pools.clone();
    let mut realized = Fixed::ZERO;
    let mut legs_used: u64 = 0;
    for (index, volume) in amounts {
        let path = &candidates[*index].0;
        match simulate_path(&mut snapshot, path, *volume, kind)? {
            Some(counter_volume) => {
                realized = realized.add(counter_volume).map_err(PoolMathError::from)?;
                legs_used += path.leg_count() as u64;
            }
            None if kind == SwapKind::GivenOut => return Ok(None),
            None => {}
        }
    }
    let gas = cost_per_leg
        .mul(Fixed::from_int(legs_used))
        .map_err(PoolMathError::from)?;
    Ok(Some(match kind {
        SwapKind::GivenIn => realized.sub_sign(gas).0,
        SwapKind::GivenOut => realized.add(gas).map_err(PoolMathError::from)?,
    }))
}

/// Runs one path through the mutable snapshot, returning the opposite-side
/// volume, or `None` when a leg rejects the trade.
fn simulate_path(
    snapshot: &mut HashMap<PoolId, Pool>,
    path: &Path,
    volume: Fixed,
    kind: SwapKind,
) -> Result<Option<Fixed>, RouterError> {
    // Per-leg (in, out) amounts, priced against the current snapshot.
    let mut transfers: Vec<(Leg, Fixed, Fixed)> = Vec::with_capacity(path.leg_count());
    let quote = |snapshot: &HashMap<PoolId, Pool>,
                 leg: &Leg,
                 amount: Fixed,
                 kind: SwapKind|
     -> Result<Option<Fixed>, RouterError> {
        let pool = snapshot
            .get(&leg.pool)
            .ok_or_else(|| RouterError::UnknownPool(leg.pool.clone()))?;
        let pair = pool.pair(&leg.token_in, &leg.token_out)?;
        let quoted = match kind {
            SwapKind::GivenIn => pair.quote_out_given_in(amount),
            SwapKind::GivenOut => pair.quote_in_given_out(amount),
        };
        match quoted {
            Ok(quoted) if !quoted.is_zero() => Ok(Some(quoted)),
            Ok(_) => Ok(None),
            Err(rejection @ (PoolMathError::Fixed(_) | PoolMathError::ExceedsReserves)) => {
                trace!("leg {} rejected: {}", leg.pool, rejection);
                Ok(None)
            }
            Err(fatal) => Err(fatal.into()),
        }
    };
    match kind {
        SwapKind::GivenIn => {
            let mut amount = volume;
            for leg in path.legs.iter() {
                match quote(snapshot, leg, amount, kind)? {
                    Some(out) => {
                        transfers.push((leg.clone(), amount, out));
                        amount = out;
                    }
                    None => return Ok(None),
                }
            }
        }
        SwapKind::GivenOut => {
            let mut amount = volume;
            for leg in path.legs.iter().rev() {
                match quote(snapshot, leg, amount, kind)? {
                    Some(needed) => {
                        transfers.push((leg.clone(), needed, amount));
                        amount = needed;
                    }
                    None => return Ok(None),
                }
            }
            transfers.reverse();
        }
    }
    let counter_volume = match kind {
        SwapKind::GivenIn => transfers.last().map(|(_, _, out)| *out),
        SwapKind::GivenOut => transfers.first().map(|(_, input, _)| *input),
    };
    for (leg, input, output) in transfers {
        let pool = snapshot
            .get_mut(&leg.pool)
            .ok_or_else(|| RouterError::UnknownPool(leg.pool.clone()))?;
        pool.apply_swap(&leg.token_in, input, &leg.token_out, output)?;
    }
    Ok(counter_volume)
}

fn decimals_of(pools: &HashMap<PoolId, Pool>, token: &TokenId) -> Option<u32> {
    for pool in pools.values() {
        if pool.share_token.as_ref() == Some(token) {
            return Some(pool_math::pool::COMMON_DECIMALS);
        }
        if let Some(entry) = pool.tokens.iter().find(|t| &t.token == token) {
            return Some(entry.decimals);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(amounts: &[(usize, Fixed)]) -> Fixed {
        amounts
            .iter()
            .fold(Fixed::ZERO, |acc, (_, v)| acc.add(*v).unwrap())
    }

    #[test]
    fn dust_shortfall_lands_on_the_first_path() {
        let mut amounts = vec![(0, Fixed::from_int(3)), (1, Fixed::from_int(4))];
        settle_dust(&mut amounts, Fixed::from_int(8));
        assert_eq!(amounts[0].1, Fixed::from_int(4));
        assert_eq!(total(&amounts), Fixed::from_int(8));
    }

    #[test]
    fn overshoot_larger_than_the_first_path_spills_over() {
        let mut amounts = vec![
            (0, Fixed::from_int(1)),
            (1, Fixed::from_int(5)),
            (2, Fixed::from_int(4)),
        ];
        settle_dust(&mut amounts, Fixed::from_int(7));
        assert_eq!(
            amounts,
            vec![(1, Fixed::from_int(3)), (2, Fixed::from_int(4))]
        );
        assert_eq!(total(&amounts), Fixed::from_int(7));
    }

    #[test]
    fn small_overshoot_only_touches_the_first_path() {
        let mut amounts = vec![(0, Fixed::from_int(5)), (1, Fixed::from_int(4))];
        settle_dust(&mut amounts, Fixed::from_int(8));
        assert_eq!(amounts[0].1, Fixed::from_int(4));
        assert_eq!(amounts[1].1, Fixed::from_int(4));
    }
}
