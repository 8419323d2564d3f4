//! Candidate trade paths and their composed pricing.
//!
//! A path is one or two directed pool legs. Composed quotes chain leg
//! quotes; the composed marginal price is the product of leg prices, and
//! its derivative follows from the chain rule with `d out/d in = 1/price`
//! on the upstream leg.

use crate::error::RouterError;
use fixed_math::Fixed;
use nonempty::NonEmpty;
use pool_math::{Pool, PoolId, PoolMathError, PoolPair, PricingModel, SwapKind, TokenId};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Leg {
    pub pool: PoolId,
    pub token_in: TokenId,
    pub token_out: TokenId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub legs: NonEmpty<Leg>,
}

impl Path {
    pub fn new(legs: NonEmpty<Leg>) -> Result<Self, RouterError> {
        if legs.len() > 2 {
            return Err(RouterError::TooManyHops);
        }
        for window in legs.iter().zip(legs.iter().skip(1)) {
            if window.0.token_out != window.1.token_in {
                return Err(RouterError::DisconnectedPath);
            }
        }
        Ok(Path { legs })
    }

    pub fn direct(leg: Leg) -> Self {
        Path {
            legs: NonEmpty::new(leg),
        }
    }

    pub fn token_in(&self) -> &TokenId {
        &self.legs.first().token_in
    }

    pub fn token_out(&self) -> &TokenId {
        &self.legs.last().token_out
    }

    /// Pool legs this path occupies in the pool-count budget.
    pub fn leg_count(&self) -> usize {
        self.legs.len()
    }

    /// Pricing views of every leg against the given snapshot.
    pub fn pairs(&self, pools: &HashMap<PoolId, Pool>) -> Result<Vec<PoolPair>, RouterError> {
        self.legs
            .iter()
            .map(|leg| {
                let pool = pools
                    .get(&leg.pool)
                    .ok_or_else(|| RouterError::UnknownPool(leg.pool.clone()))?;
                Ok(pool.pair(&leg.token_in, &leg.token_out)?)
            })
            .collect()
    }
}

pub fn quote_out_given_in(pairs: &[PoolPair], amount_in: Fixed) -> Result<Fixed, PoolMathError> {
    let mut amount = amount_in;
    for pair in pairs {
        amount = pair.quote_out_given_in(amount)?;
    }
    Ok(amount)
}

pub fn quote_in_given_out(pairs: &[PoolPair], amount_out: Fixed) -> Result<Fixed, PoolMathError> {
    let mut amount = amount_out;
    for pair in pairs.iter().rev() {
        amount = pair.quote_in_given_out(amount)?;
    }
    Ok(amount)
}

pub fn spot_price(pairs: &[PoolPair]) -> Result<Fixed, PoolMathError> {
    let mut price = Fixed::ONE;
    for pair in pairs {
        price = price.mul(pair.spot_price()?)?;
    }
    Ok(price)
}

/// Leg amounts implied by a path-level trade: the path amount itself on
/// the anchored side, the chained quote on the other.
fn leg_amounts(
    pairs: &[PoolPair],
    amount: Fixed,
    kind: SwapKind,
) -> Result<Vec<Fixed>, PoolMathError> {
    let mut amounts = vec![amount];
    match kind {
        SwapKind::GivenIn => {
            let mut running = amount;
            for pair in &pairs[..pairs.len() - 1] {
                running = pair.quote_out_given_in(running)?;
                amounts.push(running);
            }
        }
        SwapKind::GivenOut => {
            let mut running = amount;
            for pair in pairs[1..].iter().rev() {
                running = pair.quote_in_given_out(running)?;
                amounts.push(running);
            }
            amounts.reverse();
        }
    }
    Ok(amounts)
}

pub fn spot_price_after_swap(
    pairs: &[PoolPair],
    amount: Fixed,
    kind: SwapKind,
) -> Result<Fixed, PoolMathError> {
    let amounts = leg_amounts(pairs, amount, kind)?;
    let mut price = Fixed::ONE;
    for (pair, leg_amount) in pairs.iter().zip(amounts) {
        price = price.mul(pair.spot_price_after_swap(leg_amount, kind)?)?;
    }
    Ok(price)
}

pub fn price_derivative_after_swap(
    pairs: &[PoolPair],
    amount: Fixed,
    kind: SwapKind,
) -> Result<Fixed, PoolMathError> {
    match pairs {
        [only] => only.price_derivative_after_swap(amount, kind),
        [first, second] => {
            let amounts = leg_amounts(pairs, amount, kind)?;
            let p1 = first.spot_price_after_swap(amounts[0], kind)?;
            let p2 = second.spot_price_after_swap(amounts[1], kind)?;
            let d1 = first.price_derivative_after_swap(amounts[0], kind)?;
            let d2 = second.price_derivative_after_swap(amounts[1], kind)?;
            match kind {
                // d/dAi [P1(Ai) * P2(o1(Ai))], with o1' = 1/P1.
                SwapKind::GivenIn => Ok(d1.mul(p2)?.add(d2)?),
                // d/dAo [P1(i2(Ao)) * P2(Ao)], with i2' = P2.
                SwapKind::GivenOut => Ok(d1.mul(p2)?.mul(p2)?.add(p1.mul(d2)?)?),
            }
        }
        _ => Err(PoolMathError::MalformedPool {
            pool: PoolId::from("composed-path"),
            reason: "paths hold one or two legs".to_string(),
        }),
    }
}

/// The tightest leg limit, expressed in path terms: a downstream bound is
/// translated through the upstream leg before comparing.
pub fn limit_amount(pairs: &[PoolPair], kind: SwapKind) -> Result<Fixed, PoolMathError> {
    match pairs {
        [only] => only.limit_amount(kind),
        [first, second] => match kind {
            SwapKind::GivenIn => {
                let l1 = first.limit_amount(SwapKind::GivenIn)?;
                let l2 = second.limit_amount(SwapKind::GivenIn)?;
                let deliverable = first.quote_out_given_in(l1)?;
                if deliverable <= l2 {
                    Ok(l1)
                } else {
                    first.quote_in_given_out(l2)
                }
            }
            SwapKind::GivenOut => {
                let l1 = first.limit_amount(SwapKind::GivenOut)?;
                let l2 = second.limit_amount(SwapKind::GivenOut)?;
                let reachable = second.quote_out_given_in(l1)?;
                Ok(if reachable <= l2 { reachable } else { l2 })
            }
        },
        _ => Ok(Fixed::ZERO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixed_math::BONE;
    use pool_math::{PoolParams, PoolToken};

    fn weighted(id: &str, a: (&str, u64), b: (&str, u64), fee_millis: u128) -> Pool {
        let half = Fixed::from_raw(BONE as u128 / 2);
        Pool::new(
            PoolId::from(id),
            Fixed::from_raw(fee_millis * (BONE as u128) / 1_000),
            vec![
                PoolToken {
                    token: TokenId::from(a.0),
                    reserves: a.1 as u128 * 10u128.pow(18),
                    decimals: 18,
                    weight: Some(half),
                },
                PoolToken {
                    token: TokenId::from(b.0),
                    reserves: b.1 as u128 * 10u128.pow(18),
                    decimals: 18,
                    weight: Some(half),
                },
            ],
            PoolParams::Weighted,
            None,
            0,
        )
        .unwrap()
    }

    fn snapshot() -> HashMap<PoolId, Pool> {
        let mut pools = HashMap::new();
        pools.insert(PoolId::from("p1"), weighted("p1", ("A", 1_000), ("B", 2_000), 3));
        pools.insert(PoolId::from("p2"), weighted("p2", ("B", 2_000), ("C", 500), 3));
        pools
    }

    fn two_hop() -> Path {
        Path::new(NonEmpty::from((
            Leg {
                pool: PoolId::from("p1"),
                token_in: TokenId::from("A"),
                token_out: TokenId::from("B"),
            },
            vec![Leg {
                pool: PoolId::from("p2"),
                token_in: TokenId::from("B"),
                token_out: TokenId::from("C"),
            }],
        )))
        .unwrap()
    }

    #[test]
    fn rejects_three_legs_and_gaps() {
        let leg = |pool: &str, i: &str, o: &str| Leg {
            pool: PoolId::from(pool),
            token_in: TokenId::from(i),
            token_out: TokenId::from(o),
        };
        let three = NonEmpty::from((
            leg("p1", "A", "B"),
            vec![leg("p2", "B", "C"), leg("p3", "C", "D")],
        ));
        assert_eq!(Path::new(three), Err(RouterError::TooManyHops));
        let gap = NonEmpty::from((leg("p1", "A", "B"), vec![leg("p2", "C", "D")]));
        assert_eq!(Path::new(gap), Err(RouterError::DisconnectedPath));
    }

    #[test]
    fn composed_quote_chains_legs() {
        let pools = snapshot();
        let path = two_hop();
        let pairs = path.pairs(&pools).unwrap();
        let out = quote_out_given_in(&pairs, Fixed::from_int(10)).unwrap();
        let mid = pairs[0].quote_out_given_in(Fixed::from_int(10)).unwrap();
        let direct = pairs[1].quote_out_given_in(mid).unwrap();
        assert_eq!(out, direct);
        // Round trip through the exact-out direction.
        let back = quote_in_given_out(&pairs, out).unwrap();
        let (diff, _) = back.sub_sign(Fixed::from_int(10));
        assert!(diff <= Fixed::from_raw(100_000_000_000), "{}", back);
    }

    #[test]
    fn composed_price_is_product_of_leg_prices() {
        let pools = snapshot();
        let pairs = two_hop().pairs(&pools).unwrap();
        let composed = spot_price(&pairs).unwrap();
        let product = pairs[0]
            .spot_price()
            .unwrap()
            .mul(pairs[1].spot_price().unwrap())
            .unwrap();
        assert_eq!(composed, product);
        let at_zero = spot_price_after_swap(&pairs, Fixed::ZERO, SwapKind::GivenIn).unwrap();
        let (diff, _) = composed.sub_sign(at_zero);
        assert!(diff <= Fixed::from_raw(100));
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let pools = snapshot();
        let pairs = two_hop().pairs(&pools).unwrap();
        for kind in [SwapKind::GivenIn, SwapKind::GivenOut] {
            let amount = Fixed::from_int(20);
            let step = Fixed::from_raw(BONE as u128 / 100);
            let slope = price_derivative_after_swap(&pairs, amount, kind).unwrap();
            let lo = spot_price_after_swap(&pairs, amount, kind).unwrap();
            let hi = spot_price_after_swap(&pairs, amount.add(step).unwrap(), kind).unwrap();
            let estimate = hi.sub(lo).unwrap().div(step).unwrap();
            let (diff, _) = slope.sub_sign(estimate);
            assert!(
                diff.div(slope).unwrap() < Fixed::from_raw(BONE as u128 / 100),
                "{:?}: {} vs {}",
                kind,
                slope,
                estimate
            );
        }
    }

    #[test]
    fn path_limit_respects_the_narrow_leg() {
        let pools = snapshot();
        let pairs = two_hop().pairs(&pools).unwrap();
        let limit = limit_amount(&pairs, SwapKind::GivenIn).unwrap();
        // Leg one alone would allow 500 A in; the composed limit cannot
        // exceed it and must stay deliverable through leg two.
        assert!(limit <= Fixed::from_int(500));
        let out = quote_out_given_in(&pairs, limit).unwrap();
        let l2 = pairs[1].limit_amount(SwapKind::GivenIn).unwrap();
        let mid = pairs[0].quote_out_given_in(limit).unwrap();
        assert!(mid <= l2.add(Fixed::from_raw(1_000)).unwrap());
        assert!(out > Fixed::ZERO);
    }

    #[test]
    fn unknown_pool_is_reported() {
        let pools = snapshot();
        let mut path = two_hop();
        path.legs.head.pool = PoolId::from("missing");
        assert!(matches!(
            path.pairs(&pools),
            Err(RouterError::UnknownPool(pool)) if pool == PoolId::from("missing")
        ));
    }
}
