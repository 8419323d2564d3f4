//! Candidate path discovery.
//!
//! Every pool trading both endpoint tokens yields a direct path. Two-hop
//! paths go through each token reachable from the input side and into the
//! output side, one pool per leg, picked by the highest normalized
//! liquidity so uneven weights do not masquerade as depth.

use crate::error::RouterError;
use crate::path::{Leg, Path};
use fixed_math::Fixed;
use log::{debug, trace};
use nonempty::NonEmpty;
use pool_math::{Pool, PoolId, PoolMathError, PricingModel, TokenId};
use std::collections::{BTreeSet, HashMap, HashSet};

/// All supported paths from `token_in` to `token_out`, direct first.
/// Tokens on the disabled list never become hops.
pub fn build_paths(
    pools: &HashMap<PoolId, Pool>,
    token_in: &TokenId,
    token_out: &TokenId,
    disabled: &HashSet<TokenId>,
) -> Result<Vec<Path>, RouterError> {
    let mut ordered: Vec<(&PoolId, &Pool)> = pools.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    let mut paths = Vec::new();
    let mut from_in: BTreeSet<&TokenId> = BTreeSet::new();
    let mut to_out: BTreeSet<&TokenId> = BTreeSet::new();
    for (id, pool) in &ordered {
        let has_in = pool.tradable_tokens().any(|t| t == token_in);
        let has_out = pool.tradable_tokens().any(|t| t == token_out);
        match (has_in, has_out) {
            (true, true) => paths.push(Path::direct(Leg {
                pool: (*id).clone(),
                token_in: token_in.clone(),
                token_out: token_out.clone(),
            })),
            (true, false) => from_in.extend(
                pool.tradable_tokens()
                    .filter(|t| *t != token_in && !disabled.contains(*t)),
            ),
            (false, true) => to_out.extend(
                pool.tradable_tokens()
                    .filter(|t| *t != token_out && !disabled.contains(*t)),
            ),
            (false, false) => {}
        }
    }

    for &hop in from_in.intersection(&to_out) {
        if hop == token_in || hop == token_out {
            continue;
        }
        let entry = most_liquid_leg(&ordered, token_in, hop, token_out)?;
        let exit = most_liquid_leg(&ordered, hop, token_out, token_in)?;
        if let (Some(entry), Some(exit)) = (entry, exit) {
            trace!("hop {} via {} then {}", hop, entry.pool, exit.pool);
            paths.push(Path::new(NonEmpty::from((entry, vec![exit])))?);
        }
    }
    debug!(
        "{} candidate paths from {} to {}",
        paths.len(),
        token_in,
        token_out
    );
    Ok(paths)
}

/// The leg between `from` and `to` through the pool with the deepest
/// normalized liquidity, skipping pools that also trade `excluded` (those
/// already form direct paths). Pools that fail to price are skipped too,
/// except for a non-converging solver, which aborts discovery.
fn most_liquid_leg(
    ordered: &[(&PoolId, &Pool)],
    from: &TokenId,
    to: &TokenId,
    excluded: &TokenId,
) -> Result<Option<Leg>, RouterError> {
    let mut best: Option<(Fixed, Leg)> = None;
    for (id, pool) in ordered {
        let trades = |token: &TokenId| pool.tradable_tokens().any(|t| t == token);
        if !trades(from) || !trades(to) || trades(excluded) {
            continue;
        }
        let liquidity = match pool
            .pair(from, to)
            .and_then(|pair| pair.normalized_liquidity())
        {
            Ok(liquidity) => liquidity,
            Err(fatal @ PoolMathError::NonConvergence { .. }) => return Err(fatal.into()),
            Err(rejected) => {
                trace!("skipping {} for {}->{}: {}", id, from, to, rejected);
                continue;
            }
        };
        if best.as_ref().map_or(true, |(depth, _)| liquidity > *depth) {
            best = Some((
                liquidity,
                Leg {
                    pool: (*id).clone(),
                    token_in: from.clone(),
                    token_out: to.clone(),
                },
            ));
        }
    }
    Ok(best.map(|(_, leg)| leg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixed_math::BONE;
    use pool_math::{PoolParams, PoolToken};

    fn weighted(id: &str, tokens: &[(&str, u64, u128)]) -> Pool {
        let total: u64 = tokens.iter().map(|(_, w, _)| *w).sum();
        let mut weights: Vec<Fixed> = tokens
            .iter()
            .map(|(_, w, _)| Fixed::from_raw(*w as u128 * (BONE as u128) / total as u128))
            .collect();
        // Integer division leaves dust on the last weight.
        let assigned: Fixed = weights[..weights.len() - 1]
            .iter()
            .fold(Fixed::ZERO, |acc, w| acc.add(*w).unwrap());
        let last = weights.len() - 1;
        weights[last] = Fixed::ONE.sub(assigned).unwrap();
        Pool::new(
            PoolId::from(id),
            Fixed::from_raw(3 * (BONE as u128) / 1_000),
            tokens
                .iter()
                .zip(weights)
                .map(|((name, _, reserves), weight)| PoolToken {
                    token: TokenId::from(*name),
                    reserves: *reserves * 10u128.pow(18),
                    decimals: 18,
                    weight: Some(weight),
                })
                .collect(),
            PoolParams::Weighted,
            None,
            0,
        )
        .unwrap()
    }

    fn snapshot() -> HashMap<PoolId, Pool> {
        let mut pools = HashMap::new();
        // Direct A/C pool, plus two A/B candidates of different depth and
        // one B/C, so exactly one hop path through B must be built.
        pools.insert(PoolId::from("direct"), weighted("direct", &[("A", 1, 100), ("C", 1, 100)]));
        pools.insert(PoolId::from("ab-shallow"), weighted("ab-shallow", &[("A", 1, 10), ("B", 1, 10)]));
        pools.insert(PoolId::from("ab-deep"), weighted("ab-deep", &[("A", 1, 10_000), ("B", 1, 10_000)]));
        pools.insert(PoolId::from("bc"), weighted("bc", &[("B", 1, 500), ("C", 1, 500)]));
        pools
    }

    #[test]
    fn builds_direct_and_hop_paths() {
        let pools = snapshot();
        let paths = build_paths(
            &pools,
            &TokenId::from("A"),
            &TokenId::from("C"),
            &HashSet::new(),
        )
        .unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].leg_count(), 1);
        assert_eq!(paths[0].legs.head.pool, PoolId::from("direct"));
        assert_eq!(paths[1].leg_count(), 2);
        assert_eq!(paths[1].legs.head.pool, PoolId::from("ab-deep"));
        assert_eq!(paths[1].legs.last().pool, PoolId::from("bc"));
    }

    #[test]
    fn disabled_token_blocks_the_hop() {
        let pools = snapshot();
        let disabled: HashSet<TokenId> = [TokenId::from("B")].into_iter().collect();
        let paths = build_paths(&pools, &TokenId::from("A"), &TokenId::from("C"), &disabled).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].leg_count(), 1);
    }

    #[test]
    fn no_route_yields_no_paths() {
        let pools = snapshot();
        let paths = build_paths(
            &pools,
            &TokenId::from("A"),
            &TokenId::from("Z"),
            &HashSet::new(),
        )
        .unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn uneven_weights_change_leg_choice() {
        let mut pools = HashMap::new();
        // Equal balances, but weight concentrated on the entering token
        // flattens the price curve, so the skewed pool is the deeper leg
        // even though raw balances tie.
        pools.insert(PoolId::from("even"), weighted("even", &[("A", 1, 1_000), ("B", 1, 1_000)]));
        pools.insert(PoolId::from("skewed"), weighted("skewed", &[("A", 4, 1_000), ("B", 1, 1_000)]));
        pools.insert(PoolId::from("bc"), weighted("bc", &[("B", 1, 500), ("C", 1, 500)]));
        let paths = build_paths(
            &pools,
            &TokenId::from("A"),
            &TokenId::from("C"),
            &HashSet::new(),
        )
        .unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].legs.head.pool, PoolId::from("skewed"));
    }
}
