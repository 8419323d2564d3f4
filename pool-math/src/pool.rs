//! Pool model shared by all pricing families.
//!
//! Pools carry native-unit `u128` balances tagged with token decimals.
//! All pricing happens in the common 18-decimal fixed-point unit, so a
//! pair view upscales the relevant balances on construction and callers
//! downscale results at the boundary.

use crate::error::PoolMathError;
use crate::gyro3::Gyro3Pair;
use crate::pair::{PairShape, PoolPair};
use crate::stable::StablePair;
use crate::weighted::WeightedPair;
use derive_more::{Display, From, Into};
use fixed_math::Fixed;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

pub const COMMON_DECIMALS: u32 = 18;

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TokenId(String);

impl From<&str> for TokenId {
    fn from(value: &str) -> Self {
        TokenId(value.to_string())
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PoolId(String);

impl From<&str> for PoolId {
    fn from(value: &str) -> Self {
        PoolId(value.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PoolToken {
    pub token: TokenId,
    /// Balance in the token's own smallest unit.
    pub reserves: u128,
    pub decimals: u32,
    /// Normalized weight, present on weighted pools only.
    pub weight: Option<Fixed>,
}

#[derive(Debug, Clone)]
pub enum PoolParams {
    Weighted,
    Stable {
        /// Amplification coefficient, >= 1.
        amp: Fixed,
    },
    Gyro3 {
        /// Cube root of the lower price bound, in (0, 1).
        root3_alpha: Fixed,
    },
}

#[derive(Debug, Clone)]
pub struct Pool {
    pub id: PoolId,
    pub swap_fee: Fixed,
    pub tokens: Vec<PoolToken>,
    pub params: PoolParams,
    /// Share (LP) token, joinable/exitable on weighted pools.
    pub share_token: Option<TokenId>,
    /// Outstanding shares, always 18 decimals.
    pub total_shares: u128,
}

/// Scale a native amount up to the common 18-decimal unit.
pub fn upscale(amount: u128, decimals: u32) -> Result<Fixed, PoolMathError> {
    debug_assert!(decimals <= COMMON_DECIMALS);
    let factor = U256::from(10u64).pow(U256::from(COMMON_DECIMALS - decimals));
    Ok(Fixed::from_raw_u256(U256::from(amount) * factor))
}

/// Scale a common-unit amount down to native units, truncating.
pub fn downscale_down(amount: Fixed, decimals: u32) -> Result<u128, PoolMathError> {
    let factor = U256::from(10u64).pow(U256::from(COMMON_DECIMALS - decimals));
    let scaled = amount.raw() / factor;
    if scaled.bits() > 128 {
        return Err(PoolMathError::Fixed(fixed_math::FixedMathError::Narrowing));
    }
    Ok(scaled.as_u128())
}

/// Scale a common-unit amount down to native units, rounding away from
/// zero so the caller never under-reserves an input.
pub fn downscale_up(amount: Fixed, decimals: u32) -> Result<u128, PoolMathError> {
    let factor = U256::from(10u64).pow(U256::from(COMMON_DECIMALS - decimals));
    let scaled = (amount.raw() + factor - U256::one()) / factor;
    if scaled.bits() > 128 {
        return Err(PoolMathError::Fixed(fixed_math::FixedMathError::Narrowing));
    }
    Ok(scaled.as_u128())
}

impl Pool {
    pub fn new(
        id: PoolId,
        swap_fee: Fixed,
        tokens: Vec<PoolToken>,
        params: PoolParams,
        share_token: Option<TokenId>,
        total_shares: u128,
    ) -> Result<Self, PoolMathError> {
        let malformed = |reason: &str| PoolMathError::MalformedPool {
            pool: id.clone(),
            reason: reason.to_string(),
        };
        if swap_fee >= Fixed::ONE {
            return Err(malformed("swap fee must be below 100%"));
        }
        if tokens.len() < 2 {
            return Err(malformed("a pool needs at least two tokens"));
        }
        for (index, token) in tokens.iter().enumerate() {
            if token.decimals > COMMON_DECIMALS {
                return Err(malformed("token decimals exceed 18"));
            }
            if tokens[..index].iter().any(|t| t.token == token.token) {
                return Err(malformed("duplicate token"));
            }
            if share_token.as_ref() == Some(&token.token) {
                return Err(malformed("share token listed as a pool token"));
            }
        }
        match params {
            PoolParams::Weighted => {
                let mut total = Fixed::ZERO;
                for token in &tokens {
                    let weight = token.weight.ok_or_else(|| malformed("missing weight"))?;
                    total = total.add(weight)?;
                }
                if total != Fixed::ONE {
                    return Err(malformed("weights must sum to exactly 1"));
                }
            }
            PoolParams::Stable { amp } => {
                if amp < Fixed::ONE {
                    return Err(malformed("amplification below 1"));
                }
            }
            PoolParams::Gyro3 { root3_alpha } => {
                if tokens.len() != 3 {
                    return Err(malformed("gyro3 pools hold exactly three tokens"));
                }
                if root3_alpha.is_zero() || root3_alpha >= Fixed::ONE {
                    return Err(malformed("root3_alpha outside (0, 1)"));
                }
            }
        }
        Ok(Pool {
            id,
            swap_fee,
            tokens,
            params,
            share_token,
            total_shares,
        })
    }

    fn index_of(&self, token: &TokenId) -> Result<usize, PoolMathError> {
        self.tokens
            .iter()
            .position(|t| &t.token == token)
            .ok_or_else(|| PoolMathError::UnknownToken {
                token: token.clone(),
                pool: self.id.clone(),
            })
    }

    fn is_share(&self, token: &TokenId) -> bool {
        self.share_token.as_ref() == Some(token)
    }

    fn scaled_reserves(&self, index: usize) -> Result<Fixed, PoolMathError> {
        let t = &self.tokens[index];
        upscale(t.reserves, t.decimals)
    }

    fn weight_of(&self, index: usize) -> Result<Fixed, PoolMathError> {
        self.tokens[index]
            .weight
            .ok_or_else(|| PoolMathError::MalformedPool {
                pool: self.id.clone(),
                reason: "missing weight".to_string(),
            })
    }

    /// Tokens a trade can enter or leave through, the share token included
    /// where joins and exits are supported.
    pub fn tradable_tokens(&self) -> impl Iterator<Item = &TokenId> {
        let shares = match self.params {
            PoolParams::Weighted => self.share_token.as_ref(),
            _ => None,
        };
        self.tokens.iter().map(|t| &t.token).chain(shares)
    }

    /// Pricing view of a directed pair, balances upscaled to the common
    /// unit. Joins and exits are only priced on weighted pools; share
    /// pairs on other families are rejected.
    pub fn pair(&self, token_in: &TokenId, token_out: &TokenId) -> Result<PoolPair, PoolMathError> {
        if token_in == token_out {
            return Err(PoolMathError::UnsupportedPair {
                pool: self.id.clone(),
            });
        }
        let shape = match (self.is_share(token_in), self.is_share(token_out)) {
            (false, false) => PairShape::AssetToAsset,
            (false, true) => PairShape::AssetToShare,
            (true, false) => PairShape::ShareToAsset,
            (true, true) => unreachable!("distinct tokens cannot both be the share token"),
        };
        match (&self.params, shape) {
            (PoolParams::Weighted, PairShape::AssetToAsset) => {
                let (i, o) = (self.index_of(token_in)?, self.index_of(token_out)?);
                Ok(PoolPair::Weighted(WeightedPair {
                    shape,
                    reserves_in: self.scaled_reserves(i)?,
                    reserves_out: self.scaled_reserves(o)?,
                    weight_in: self.weight_of(i)?,
                    weight_out: self.weight_of(o)?,
                    swap_fee: self.swap_fee,
                }))
            }
            (PoolParams::Weighted, PairShape::AssetToShare) => {
                let i = self.index_of(token_in)?;
                Ok(PoolPair::Weighted(WeightedPair {
                    shape,
                    reserves_in: self.scaled_reserves(i)?,
                    reserves_out: Fixed::from_raw(self.total_shares),
                    weight_in: self.weight_of(i)?,
                    weight_out: Fixed::ONE,
                    swap_fee: self.swap_fee,
                }))
            }
            (PoolParams::Weighted, PairShape::ShareToAsset) => {
                let o = self.index_of(token_out)?;
                Ok(PoolPair::Weighted(WeightedPair {
                    shape,
                    reserves_in: Fixed::from_raw(self.total_shares),
                    reserves_out: self.scaled_reserves(o)?,
                    weight_in: Fixed::ONE,
                    weight_out: self.weight_of(o)?,
                    swap_fee: self.swap_fee,
                }))
            }
            (PoolParams::Stable { amp }, PairShape::AssetToAsset) => {
                let (i, o) = (self.index_of(token_in)?, self.index_of(token_out)?);
                let reserves = (0..self.tokens.len())
                    .map(|index| self.scaled_reserves(index))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PoolPair::Stable(StablePair {
                    pool: self.id.clone(),
                    reserves,
                    index_in: i,
                    index_out: o,
                    amp: *amp,
                    swap_fee: self.swap_fee,
                }))
            }
            (PoolParams::Gyro3 { root3_alpha }, PairShape::AssetToAsset) => {
                let (i, o) = (self.index_of(token_in)?, self.index_of(token_out)?);
                let third = (0..3)
                    .find(|index| *index != i && *index != o)
                    .expect("three tokens leave one untouched");
                Ok(PoolPair::Gyro3(Gyro3Pair {
                    pool: self.id.clone(),
                    reserves_in: self.scaled_reserves(i)?,
                    reserves_out: self.scaled_reserves(o)?,
                    reserves_third: self.scaled_reserves(third)?,
                    root3_alpha: *root3_alpha,
                    swap_fee: self.swap_fee,
                }))
            }
            _ => Err(PoolMathError::UnsupportedPair {
                pool: self.id.clone(),
            }),
        }
    }

    /// Move balances as if the trade executed: credit the input, debit the
    /// output, mint or burn shares when one side is the share token.
    /// Rounding favors the pool in both directions.
    pub fn apply_swap(
        &mut self,
        token_in: &TokenId,
        amount_in: Fixed,
        token_out: &TokenId,
        amount_out: Fixed,
    ) -> Result<(), PoolMathError> {
        if self.is_share(token_in) {
            let burned = downscale_up(amount_in, COMMON_DECIMALS)?;
            self.total_shares = self.total_shares.saturating_sub(burned);
        } else {
            let i = self.index_of(token_in)?;
            let credited = downscale_down(amount_in, self.tokens[i].decimals)?;
            self.tokens[i].reserves = self.tokens[i]
                .reserves
                .checked_add(credited)
                .ok_or(PoolMathError::Fixed(fixed_math::FixedMathError::AddOverflow))?;
        }
        if self.is_share(token_out) {
            let minted = downscale_down(amount_out, COMMON_DECIMALS)?;
            self.total_shares = self.total_shares.saturating_add(minted);
        } else {
            let o = self.index_of(token_out)?;
            let debited = downscale_up(amount_out, self.tokens[o].decimals)?;
            if debited > self.tokens[o].reserves {
                return Err(PoolMathError::ExceedsReserves);
            }
            self.tokens[o].reserves -= debited;
        }
        Ok(())
    }
}
