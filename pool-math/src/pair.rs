//! The pricing capability and its closed dispatch.

use crate::error::PoolMathError;
use crate::gyro3::Gyro3Pair;
use crate::stable::StablePair;
use crate::weighted::WeightedPair;
use derive_more::Display;
use fixed_math::Fixed;

/// Which side of the trade is fixed by the caller.
#[derive(Debug, Display, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SwapKind {
    GivenIn,
    GivenOut,
}

/// Shape of a directional pair: a plain swap, a single-token issuance of
/// pool shares, or a single-token redemption of pool shares.
#[derive(Debug, Display, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PairShape {
    AssetToAsset,
    AssetToShare,
    ShareToAsset,
}

/// Pricing capability of one directional pool pair.
///
/// Prices are quoted as input units per output unit, fee included, so a
/// lower price is always better for the trader and the price is
/// non-decreasing in trade size. All amounts are in the common 1e18 unit.
pub trait PricingModel {
    fn quote_out_given_in(&self, amount_in: Fixed) -> Result<Fixed, PoolMathError>;

    fn quote_in_given_out(&self, amount_out: Fixed) -> Result<Fixed, PoolMathError>;

    /// Marginal price of an infinitesimal trade at current reserves.
    fn spot_price(&self) -> Result<Fixed, PoolMathError>;

    /// Marginal price assuming a hypothetical trade of `amount` was placed.
    fn spot_price_after_swap(&self, amount: Fixed, kind: SwapKind) -> Result<Fixed, PoolMathError>;

    /// Local slope of the post-swap price curve; the linearization primitive.
    fn price_derivative_after_swap(
        &self,
        amount: Fixed,
        kind: SwapKind,
    ) -> Result<Fixed, PoolMathError>;

    /// Largest trade size for which the formulas stay numerically valid:
    /// half the entering reserves, a third of the exiting reserves.
    fn limit_amount(&self, kind: SwapKind) -> Result<Fixed, PoolMathError>;

    /// Depth measure used for hop-pool ranking: the reciprocal of the
    /// zero-volume price slope. Weight-adjusted by construction, unlike a
    /// raw reserves comparison.
    fn normalized_liquidity(&self) -> Result<Fixed, PoolMathError> {
        let slope = self.price_derivative_after_swap(Fixed::ZERO, SwapKind::GivenIn)?;
        if slope.is_zero() {
            return Ok(Fixed::ZERO);
        }
        Ok(Fixed::ONE.div(slope)?)
    }
}

/// Directional pair view over the closed set of pool families.
#[derive(Debug, Clone)]
pub enum PoolPair {
    Weighted(WeightedPair),
    Stable(StablePair),
    Gyro3(Gyro3Pair),
}

impl PricingModel for PoolPair {
    fn quote_out_given_in(&self, amount_in: Fixed) -> Result<Fixed, PoolMathError> {
        match self {
            PoolPair::Weighted(p) => p.quote_out_given_in(amount_in),
            PoolPair::Stable(p) => p.quote_out_given_in(amount_in),
            PoolPair::Gyro3(p) => p.quote_out_given_in(amount_in),
        }
    }

    fn quote_in_given_out(&self, amount_out: Fixed) -> Result<Fixed, PoolMathError> {
        match self {
            PoolPair::Weighted(p) => p.quote_in_given_out(amount_out),
            PoolPair::Stable(p) => p.quote_in_given_out(amount_out),
            PoolPair::Gyro3(p) => p.quote_in_given_out(amount_out),
        }
    }

    fn spot_price(&self) -> Result<Fixed, PoolMathError> {
        match self {
            PoolPair::Weighted(p) => p.spot_price(),
            PoolPair::Stable(p) => p.spot_price(),
            PoolPair::Gyro3(p) => p.spot_price(),
        }
    }

    fn spot_price_after_swap(&self, amount: Fixed, kind: SwapKind) -> Result<Fixed, PoolMathError> {
        match self {
            PoolPair::Weighted(p) => p.spot_price_after_swap(amount, kind),
            PoolPair::Stable(p) => p.spot_price_after_swap(amount, kind),
            PoolPair::Gyro3(p) => p.spot_price_after_swap(amount, kind),
        }
    }

    fn price_derivative_after_swap(
        &self,
        amount: Fixed,
        kind: SwapKind,
    ) -> Result<Fixed, PoolMathError> {
        match self {
            PoolPair::Weighted(p) => p.price_derivative_after_swap(amount, kind),
            PoolPair::Stable(p) => p.price_derivative_after_swap(amount, kind),
            PoolPair::Gyro3(p) => p.price_derivative_after_swap(amount, kind),
        }
    }

    fn limit_amount(&self, kind: SwapKind) -> Result<Fixed, PoolMathError> {
        match self {
            PoolPair::Weighted(p) => p.limit_amount(kind),
            PoolPair::Stable(p) => p.limit_amount(kind),
            PoolPair::Gyro3(p) => p.limit_amount(kind),
        }
    }

    fn normalized_liquidity(&self) -> Result<Fixed, PoolMathError> {
        match self {
            PoolPair::Weighted(p) => p.normalized_liquidity(),
            PoolPair::Stable(p) => p.normalized_liquidity(),
            PoolPair::Gyro3(p) => p.normalized_liquidity(),
        }
    }
}

/// Half of the entering reserves.
pub(crate) fn max_in_amount(reserves_in: Fixed) -> Result<Fixed, PoolMathError> {
    Ok(reserves_in.div(Fixed::from_int(2))?)
}

/// A third of the exiting reserves.
pub(crate) fn max_out_amount(reserves_out: Fixed) -> Result<Fixed, PoolMathError> {
    Ok(reserves_out.div(Fixed::from_int(3))?)
}
