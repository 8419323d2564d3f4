//! The "prices of interest" allocation over linearized paths.
//!
//! Each candidate path is reduced to a line `price = spot + slope * volume`
//! valid up to its limit. The marginal price any optimal split clears at
//! can only change character at a small set of prices: where a path's line
//! starts (its spot), where it saturates, and where two lines cross. The
//! walk over those prices brackets the requested volume, then the exact
//! clearing price falls out of a linear solve.
//!
//! Everything here is generic over the numeric representation so the
//! fixed-point production arithmetic can be checked against plain floats.

use fixed_math::FixedReal;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
pub struct LinearPath<R> {
    pub spot: R,
    /// First derivative of the post-swap price at zero volume.
    pub slope: R,
    pub limit: R,
    /// Pool legs the path occupies in the pool-count budget.
    pub legs: usize,
}

impl<R: FixedReal> LinearPath<R> {
    /// Price at which the path hits its limit.
    fn saturation_price(&self) -> R {
        self.spot.add(self.slope.mul(self.limit))
    }

    /// Volume the path absorbs before its marginal price reaches `price`,
    /// clipped to the limit. A zero slope means the bracketing walk can
    /// stop at this path's limit straight away.
    fn volume_at(&self, price: R) -> R {
        if price < self.spot {
            return R::zero();
        }
        match price.sub_or_zero(self.spot).div(self.slope) {
            Some(volume) if volume < self.limit => volume,
            _ => self.limit,
        }
    }
}

/// Price where the lines of `a` and `b` cross at positive volume, if they
/// do. When the crossing volume is beyond the tighter path's limit the
/// crossover never materializes; the constraining path's saturation price
/// substitutes for it.
fn crossover<R: FixedReal>(a: &LinearPath<R>, b: &LinearPath<R>) -> Option<R> {
    // Lines cross ahead only when the cheaper path steepens faster.
    let (low, high) = if a.spot < b.spot && b.slope < a.slope {
        (a, b)
    } else if b.spot < a.spot && a.slope < b.slope {
        (b, a)
    } else {
        return None;
    };
    let volume = high
        .spot
        .sub_or_zero(low.spot)
        .div(low.slope.sub_or_zero(high.slope))?;
    let constraining = if a.limit < b.limit { a } else { b };
    if volume < constraining.limit {
        Some(low.spot.add(low.slope.mul(volume)))
    } else {
        Some(constraining.saturation_price())
    }
}

/// Sorted, deduplicated candidate clearing prices.
fn prices_of_interest<R: FixedReal>(paths: &[LinearPath<R>]) -> Vec<R> {
    let mut prices = Vec::with_capacity(paths.len() * 2);
    for path in paths {
        prices.push(path.spot);
        prices.push(path.saturation_price());
    }
    for (i, a) in paths.iter().enumerate() {
        for b in &paths[i + 1..] {
            if let Some(price) = crossover(a, b) {
                prices.push(price);
            }
        }
    }
    prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    prices.dedup_by(|a, b| a == b);
    prices
}

/// Indices of the paths worth filling at `price`, best first, greedily
/// constrained to the leg budget. Paths already absorbing more volume
/// rank higher; at a crossover the flatter line wins the tie, which is
/// exactly the rank swap of the ascending walk.
fn ranked_within_budget<R: FixedReal>(
    paths: &[LinearPath<R>],
    price: R,
    max_legs: usize,
) -> Vec<usize> {
    let mut active: Vec<usize> = (0..paths.len())
        .filter(|&i| !(price < paths[i].spot))
        .collect();
    active.sort_by(|&i, &j| {
        paths[j]
            .volume_at(price)
            .partial_cmp(&paths[i].volume_at(price))
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                paths[i]
                    .slope
                    .partial_cmp(&paths[j].slope)
                    .unwrap_or(Ordering::Equal)
            })
            .then(i.cmp(&j))
    });
    let mut budget = max_legs;
    let mut selected = Vec::new();
    for i in active {
        if paths[i].legs <= budget {
            budget -= paths[i].legs;
            selected.push(i);
        }
    }
    selected
}

/// Volumes hitting `target` exactly across `selected`, by solving for the
/// common clearing price with saturated paths pinned at their limits:
/// `P = (target - sum(sat limits) + sum(spot/slope)) / sum(1/slope)`.
/// When every path saturates, the shortfall spreads in proportion to
/// inverse slope, knowingly past the limits.
fn solve_for_target<R: FixedReal>(
    paths: &[LinearPath<R>],
    selected: &[usize],
    target: R,
) -> Vec<(usize, R)> {
    let one = R::from_fixed(fixed_math::Fixed::ONE);
    let mut saturated = vec![false; selected.len()];
    loop {
        let mut pinned = R::zero();
        let mut inv_slope_sum = R::zero();
        let mut spot_over_slope = R::zero();
        for (flag, &i) in saturated.iter().zip(selected) {
            let path = &paths[i];
            if *flag {
                pinned = pinned.add(path.limit);
            } else if let (Some(inv), Some(sos)) =
                (one.div(path.slope), path.spot.div(path.slope))
            {
                inv_slope_sum = inv_slope_sum.add(inv);
                spot_over_slope = spot_over_slope.add(sos);
            }
        }
        if inv_slope_sum.is_zero() {
            break;
        }
        let price = match target.sub_or_zero(pinned).add(spot_over_slope).div(inv_slope_sum) {
            Some(price) => price,
            None => break,
        };
        let mut newly_pinned = false;
        for (flag, &i) in saturated.iter_mut().zip(selected) {
            if !*flag && paths[i].saturation_price() < price {
                *flag = true;
                newly_pinned = true;
            }
        }
        if !newly_pinned {
            return selected
                .iter()
                .map(|&i| (i, paths[i].volume_at(price)))
                .collect();
        }
    }
    // Everything pinned: distribute the shortfall by marginal liquidity.
    let limits_total = selected
        .iter()
        .fold(R::zero(), |acc, &i| acc.add(paths[i].limit));
    let shortfall = target.sub_or_zero(limits_total);
    let weight_total = selected.iter().fold(R::zero(), |acc, &i| {
        acc.add(one.div(paths[i].slope).unwrap_or_else(R::zero))
    });
    selected
        .iter()
        .map(|&i| {
            let extra = one
                .div(paths[i].slope)
                .and_then(|w| w.mul(shortfall).div(weight_total))
                .unwrap_or_else(R::zero);
            (i, paths[i].limit.add(extra))
        })
        .collect()
}

/// Per-path volumes filling `target` with at most `max_legs` pool legs.
/// Returns (path index, volume) pairs for the chosen subset.
pub fn allocate<R: FixedReal>(
    paths: &[LinearPath<R>],
    max_legs: usize,
    target: R,
) -> Vec<(usize, R)> {
    if paths.is_empty() || target.is_zero() || max_legs == 0 {
        return Vec::new();
    }
    let prices = prices_of_interest(paths);
    let mut selected = Vec::new();
    for price in &prices {
        let candidate = ranked_within_budget(paths, *price, max_legs);
        let total = candidate
            .iter()
            .fold(R::zero(), |acc, &i| acc.add(paths[i].volume_at(*price)));
        selected = candidate;
        if !(total < target) {
            break;
        }
    }
    if selected.is_empty() {
        return Vec::new();
    }
    solve_for_target(paths, &selected, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixed_math::{Fixed, BONE};

    fn line(spot: f64, slope: f64, limit: f64) -> LinearPath<f64> {
        LinearPath {
            spot,
            slope,
            limit,
            legs: 1,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn crossover_price_matches_algebra() {
        let a = line(1.0, 0.5, 100.0);
        let b = line(1.2, 0.1, 100.0);
        // 1.0 + 0.5v = 1.2 + 0.1v  =>  v = 0.5, P = 1.25.
        let p = crossover(&a, &b).unwrap();
        assert!(close(p, 1.25), "{}", p);
        assert!(crossover(&a, &a).is_none());
    }

    #[test]
    fn constrained_crossover_substitutes_saturation() {
        let a = line(1.0, 0.5, 0.2);
        let b = line(1.2, 0.1, 100.0);
        // Crossing volume 0.5 exceeds a's limit 0.2: use a's saturation.
        let p = crossover(&a, &b).unwrap();
        assert!(close(p, 1.0 + 0.5 * 0.2), "{}", p);
    }

    #[test]
    fn equal_paths_split_evenly() {
        let paths = vec![line(1.0, 0.2, 100.0), line(1.0, 0.2, 100.0)];
        let amounts = allocate(&paths, 2, 10.0);
        assert_eq!(amounts.len(), 2);
        assert!(close(amounts[0].1, 5.0));
        assert!(close(amounts[1].1, 5.0));
    }

    #[test]
    fn cheaper_path_takes_the_larger_share() {
        let paths = vec![line(1.0, 0.2, 100.0), line(1.1, 0.2, 100.0)];
        let amounts = allocate(&paths, 2, 10.0);
        // Equalize marginal prices: v0 - v1 = 0.1/0.2 = 0.5.
        let total = amounts[0].1 + amounts[1].1;
        assert!(close(total, 10.0), "{}", total);
        assert!(close(amounts[0].1 - amounts[1].1, 0.5));
    }

    #[test]
    fn leg_budget_prefers_the_deep_path() {
        let paths = vec![line(1.0, 0.5, 100.0), line(1.01, 0.01, 100.0)];
        let amounts = allocate(&paths, 1, 10.0);
        assert_eq!(amounts.len(), 1);
        assert_eq!(amounts[0].0, 1);
        assert!(close(amounts[0].1, 10.0));
    }

    #[test]
    fn saturated_path_is_pinned_at_its_limit() {
        let paths = vec![line(1.0, 0.2, 2.0), line(1.0, 0.2, 100.0)];
        let amounts = allocate(&paths, 2, 10.0);
        assert!(close(amounts.iter().map(|(_, v)| v).sum(), 10.0));
        let first = amounts.iter().find(|(i, _)| *i == 0).unwrap().1;
        let second = amounts.iter().find(|(i, _)| *i == 1).unwrap().1;
        assert!(close(first, 2.0), "{}", first);
        assert!(close(second, 8.0), "{}", second);
    }

    #[test]
    fn overflow_demand_extrapolates_past_limits() {
        let paths = vec![line(1.0, 0.2, 3.0), line(1.0, 0.4, 3.0)];
        let amounts = allocate(&paths, 2, 9.0);
        // Shortfall 3.0 split 2:1 by inverse slope.
        assert!(close(amounts[0].1, 5.0), "{}", amounts[0].1);
        assert!(close(amounts[1].1, 4.0), "{}", amounts[1].1);
    }

    #[test]
    fn fixed_and_float_representations_agree() {
        let as_fixed = |v: f64| Fixed::from_raw((v * BONE as f64) as u128);
        let float_paths = vec![
            line(0.008, 0.012, 0.67),
            line(0.019, 0.0017, 7.15),
            line(0.015, 0.004, 3.0),
        ];
        let fixed_paths: Vec<LinearPath<Fixed>> = float_paths
            .iter()
            .map(|p| LinearPath {
                spot: as_fixed(p.spot),
                slope: as_fixed(p.slope),
                limit: as_fixed(p.limit),
                legs: p.legs,
            })
            .collect();
        for target in [0.5, 2.0, 7.0] {
            let float_amounts = allocate(&float_paths, 3, target);
            let fixed_amounts = allocate(&fixed_paths, 3, as_fixed(target));
            assert_eq!(float_amounts.len(), fixed_amounts.len());
            for ((fi, fv), (xi, xv)) in float_amounts.iter().zip(&fixed_amounts) {
                assert_eq!(fi, xi);
                let xv_float = xv.raw().as_u128() as f64 / BONE as f64;
                assert!(
                    (fv - xv_float).abs() < 1e-6,
                    "target {}: {} vs {}",
                    target,
                    fv,
                    xv_float
                );
            }
        }
    }
}
