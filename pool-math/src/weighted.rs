//! Constant-weighted-product pricing.
//!
//! Six closed-form formula families: a plain two-asset swap, a single-token
//! issuance of pool shares and a single-token redemption, each for a given
//! input or a given output. Issuance and redemption have their own
//! marginal-price curves because only the non-proportional part of a
//! single-token join/exit pays the swap fee.

use crate::error::PoolMathError;
use crate::pair::{max_in_amount, max_out_amount, PairShape, PricingModel, SwapKind};
use fixed_math::Fixed;

#[derive(Debug, Clone)]
pub struct WeightedPair {
    pub shape: PairShape,
    /// Entering-side reserves; the share supply for a redemption.
    pub reserves_in: Fixed,
    /// Exiting-side reserves; the share supply for an issuance.
    pub reserves_out: Fixed,
    pub weight_in: Fixed,
    pub weight_out: Fixed,
    pub swap_fee: Fixed,
}

impl WeightedPair {
    fn fee_complement(&self) -> Result<Fixed, PoolMathError> {
        Ok(Fixed::ONE.sub(self.swap_fee)?)
    }

    /// `1 - (1 - w) * fee`: the effective fee factor of a single-token
    /// join/exit, where only the non-proportional part is charged.
    fn taxable_factor(&self, weight: Fixed) -> Result<Fixed, PoolMathError> {
        Ok(Fixed::ONE.sub(Fixed::ONE.sub(weight)?.mul(self.swap_fee)?)?)
    }
}

impl PricingModel for WeightedPair {
    fn quote_out_given_in(&self, amount_in: Fixed) -> Result<Fixed, PoolMathError> {
        let (bi, bo) = (self.reserves_in, self.reserves_out);
        if bi.is_zero() || bo.is_zero() {
            return Ok(Fixed::ZERO);
        }
        match self.shape {
            // Ao = Bo * (1 - (Bi / (Bi + Ai*(1-f))) ^ (wi/wo))
            PairShape::AssetToAsset => {
                let adjusted_in = amount_in.mul(self.fee_complement()?)?;
                let ratio = bi.div(bi.add(adjusted_in)?)?;
                let power = ratio.pow(self.weight_in.div(self.weight_out)?)?;
                Ok(bo.mul(Fixed::ONE.sub(power)?)?)
            }
            // Ao = S * ((1 + Ai*phi/Bi) ^ wi - 1)
            PairShape::AssetToShare => {
                let phi = self.taxable_factor(self.weight_in)?;
                let grown = Fixed::ONE.add(amount_in.mul(phi)?.div(bi)?)?;
                let power = grown.pow(self.weight_in)?;
                Ok(bo.mul(power.sub(Fixed::ONE)?)?)
            }
            // Ao = Bo * (1 - (1 - Ai/S) ^ (1/wo)) * phi
            PairShape::ShareToAsset => {
                if amount_in >= bi {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let phi = self.taxable_factor(self.weight_out)?;
                let remaining = Fixed::ONE.sub(amount_in.div(bi)?)?;
                let power = remaining.pow(Fixed::ONE.div(self.weight_out)?)?;
                Ok(bo.mul(Fixed::ONE.sub(power)?)?.mul(phi)?)
            }
        }
    }

    fn quote_in_given_out(&self, amount_out: Fixed) -> Result<Fixed, PoolMathError> {
        let (bi, bo) = (self.reserves_in, self.reserves_out);
        if bi.is_zero() || bo.is_zero() {
            return Ok(Fixed::ZERO);
        }
        match self.shape {
            // Ai = Bi * ((Bo / (Bo - Ao)) ^ (wo/wi) - 1) / (1-f)
            PairShape::AssetToAsset => {
                if amount_out >= bo {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let ratio = bo.div(bo.sub(amount_out)?)?;
                let power = ratio.pow(self.weight_out.div(self.weight_in)?)?;
                Ok(bi.mul(power.sub(Fixed::ONE)?)?.div(self.fee_complement()?)?)
            }
            // Ai = Bi * ((1 + Ao/S) ^ (1/wi) - 1) / phi
            PairShape::AssetToShare => {
                let phi = self.taxable_factor(self.weight_in)?;
                let grown = Fixed::ONE.add(amount_out.div(bo)?)?;
                let power = grown.pow(Fixed::ONE.div(self.weight_in)?)?;
                Ok(bi.mul(power.sub(Fixed::ONE)?)?.div(phi)?)
            }
            // Ai = S * (1 - (1 - Ao / (Bo*phi)) ^ wo)
            PairShape::ShareToAsset => {
                let phi = self.taxable_factor(self.weight_out)?;
                let drained = amount_out.div(bo.mul(phi)?)?;
                if drained >= Fixed::ONE {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let power = Fixed::ONE.sub(drained)?.pow(self.weight_out)?;
                Ok(bi.mul(Fixed::ONE.sub(power)?)?)
            }
        }
    }

    fn spot_price(&self) -> Result<Fixed, PoolMathError> {
        let (bi, bo) = (self.reserves_in, self.reserves_out);
        match self.shape {
            // (Bi/wi) / (Bo/wo) / (1-f)
            PairShape::AssetToAsset => Ok(bi
                .div(self.weight_in)?
                .div(bo.div(self.weight_out)?)?
                .div(self.fee_complement()?)?),
            // Bi / (S * wi * phi)
            PairShape::AssetToShare => {
                let phi = self.taxable_factor(self.weight_in)?;
                Ok(bi.div(bo.mul(self.weight_in)?.mul(phi)?)?)
            }
            // S * wo / (Bo * phi)
            PairShape::ShareToAsset => {
                let phi = self.taxable_factor(self.weight_out)?;
                Ok(bi.mul(self.weight_out)?.div(bo.mul(phi)?)?)
            }
        }
    }

    fn spot_price_after_swap(&self, amount: Fixed, kind: SwapKind) -> Result<Fixed, PoolMathError> {
        let (bi, bo) = (self.reserves_in, self.reserves_out);
        let (wi, wo) = (self.weight_in, self.weight_out);
        match (self.shape, kind) {
            // The entire input lands in the pool; only Ai*(1-f) prices the
            // output leg. Post-trade spot:
            // wo*(Bi+Ai) * ((Bi + Ai*(1-f))/Bi)^(wi/wo) / (wi*(1-f)*Bo)
            (PairShape::AssetToAsset, SwapKind::GivenIn) => {
                let c = self.fee_complement()?;
                let credited = bi.add(amount)?;
                let growth = bi.add(amount.mul(c)?)?.div(bi)?;
                let power = growth.pow(wi.div(wo)?)?;
                Ok(credited.mul(wo)?.mul(power)?.div(bo.mul(c)?.mul(wi)?)?)
            }
            // Bi*wo * ((Bo/(Bo-Ao))^(wo/wi) - f) / (wi*(1-f)^2*(Bo-Ao))
            (PairShape::AssetToAsset, SwapKind::GivenOut) => {
                if amount >= bo {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let c = self.fee_complement()?;
                let remaining = bo.sub(amount)?;
                let power = bo.div(remaining)?.pow(wo.div(wi)?)?;
                Ok(bi
                    .mul(wo)?
                    .mul(power.sub(self.swap_fee)?)?
                    .div(wi.mul(c)?.mul(c)?.mul(remaining)?)?)
            }
            // (Bi+Ai) / (S * r^wi * wi * phi),  r = 1 + Ai*phi/Bi
            (PairShape::AssetToShare, SwapKind::GivenIn) => {
                let phi = self.taxable_factor(wi)?;
                let grown = Fixed::ONE.add(amount.mul(phi)?.div(bi)?)?;
                let supply = bo.mul(grown.pow(wi)?)?;
                Ok(bi.add(amount)?.div(supply.mul(wi)?.mul(phi)?)?)
            }
            // Bi * (r^(1/wi) - (1-phi)) / (phi^2 * wi * S * r),  r = 1 + Ao/S
            (PairShape::AssetToShare, SwapKind::GivenOut) => {
                let phi = self.taxable_factor(wi)?;
                let kept = Fixed::ONE.sub(phi)?;
                let grown = Fixed::ONE.add(amount.div(bo)?)?;
                let power = grown.pow(Fixed::ONE.div(wi)?)?;
                Ok(bi
                    .mul(power.sub(kept)?)?
                    .div(phi.mul(phi)?.mul(wi)?.mul(bo)?.mul(grown)?)?)
            }
            // S*r*wo / (Bo*phi * ((1-phi) + phi*r^(1/wo))),  r = 1 - Ai/S
            (PairShape::ShareToAsset, SwapKind::GivenIn) => {
                if amount >= bi {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let phi = self.taxable_factor(wo)?;
                let remaining = Fixed::ONE.sub(amount.div(bi)?)?;
                let power = remaining.pow(Fixed::ONE.div(wo)?)?;
                let depleted = Fixed::ONE.sub(phi)?.add(phi.mul(power)?)?;
                Ok(bi.mul(remaining)?.mul(wo)?.div(bo.mul(phi)?.mul(depleted)?)?)
            }
            // S*wo * r^wo / ((Bo-Ao) * phi),  r = 1 - Ao/(Bo*phi)
            (PairShape::ShareToAsset, SwapKind::GivenOut) => {
                let phi = self.taxable_factor(wo)?;
                let drained = amount.div(bo.mul(phi)?)?;
                if drained >= Fixed::ONE {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let remaining = Fixed::ONE.sub(drained)?;
                Ok(bi
                    .mul(wo)?
                    .mul(remaining.pow(wo)?)?
                    .div(bo.sub(amount)?.mul(phi)?)?)
            }
        }
    }

    fn price_derivative_after_swap(
        &self,
        amount: Fixed,
        kind: SwapKind,
    ) -> Result<Fixed, PoolMathError> {
        let (bi, bo) = (self.reserves_in, self.reserves_out);
        let (wi, wo) = (self.weight_in, self.weight_out);
        match (self.shape, kind) {
            // wo * g^(wi/wo - 1) * ((Bi + Ai*(1-f)) + (wi/wo)*(1-f)*(Bi+Ai))
            //   / (wi*(1-f)*Bo*Bi),  g = (Bi + Ai*(1-f))/Bi
            (PairShape::AssetToAsset, SwapKind::GivenIn) => {
                let c = self.fee_complement()?;
                let ratio = wi.div(wo)?;
                let taxed = bi.add(amount.mul(c)?)?;
                let growth = taxed.div(bi)?;
                let power = growth.pow(ratio)?.div(growth)?;
                let numer = taxed.add(ratio.mul(c)?.mul(bi.add(amount)?)?)?;
                Ok(wo.mul(power)?.mul(numer)?.div(wi.mul(c)?.mul(bo)?.mul(bi)?)?)
            }
            // Bi*wo * ((1 + wo/wi)*(Bo/(Bo-Ao))^(wo/wi) - f)
            //   / (wi*(1-f)^2*(Bo-Ao)^2)
            (PairShape::AssetToAsset, SwapKind::GivenOut) => {
                if amount >= bo {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let c = self.fee_complement()?;
                let remaining = bo.sub(amount)?;
                let power = bo.div(remaining)?.pow(wo.div(wi)?)?;
                let numer = Fixed::ONE.add(wo.div(wi)?)?.mul(power)?.sub(self.swap_fee)?;
                Ok(bi
                    .mul(wo)?
                    .mul(numer)?
                    .div(wi.mul(c)?.mul(c)?.mul(remaining)?.mul(remaining)?)?)
            }
            // (Bi*(1 - wi*phi) + Ai*phi*(1-wi))
            //   / (S * r^wi * wi * phi * (Bi + Ai*phi)),  r = 1 + Ai*phi/Bi
            (PairShape::AssetToShare, SwapKind::GivenIn) => {
                let phi = self.taxable_factor(wi)?;
                let taxed_in = amount.mul(phi)?;
                let grown = Fixed::ONE.add(taxed_in.div(bi)?)?;
                let supply = bo.mul(grown.pow(wi)?)?;
                let numer = bi
                    .mul(Fixed::ONE.sub(wi.mul(phi)?)?)?
                    .add(taxed_in.mul(Fixed::ONE.sub(wi)?)?)?;
                Ok(numer.div(supply.mul(wi)?.mul(phi)?.mul(bi.add(taxed_in)?)?)?)
            }
            // Bi * (r^(1/wi)*(1-wi)/wi + (1-phi))
            //   / (phi^2 * wi * S^2 * r^2),  r = 1 + Ao/S
            (PairShape::AssetToShare, SwapKind::GivenOut) => {
                let phi = self.taxable_factor(wi)?;
                let kept = Fixed::ONE.sub(phi)?;
                let grown = Fixed::ONE.add(amount.div(bo)?)?;
                let power = grown.pow(Fixed::ONE.div(wi)?)?;
                let numer = power.mul(Fixed::ONE.sub(wi)?)?.div(wi)?.add(kept)?;
                Ok(bi.mul(numer)?.div(
                    phi.mul(phi)?
                        .mul(wi)?
                        .mul(bo)?
                        .mul(bo)?
                        .mul(grown)?
                        .mul(grown)?,
                )?)
            }
            // (phi*(1-wo)*r^(1/wo) - wo*(1-phi))
            //   / (Bo*phi * ((1-phi) + phi*r^(1/wo))^2),  r = 1 - Ai/S
            (PairShape::ShareToAsset, SwapKind::GivenIn) => {
                if amount >= bi {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let phi = self.taxable_factor(wo)?;
                let kept = Fixed::ONE.sub(phi)?;
                let remaining = Fixed::ONE.sub(amount.div(bi)?)?;
                let power = remaining.pow(Fixed::ONE.div(wo)?)?;
                let depleted = kept.add(phi.mul(power)?)?;
                let numer = phi
                    .mul(Fixed::ONE.sub(wo)?)?
                    .mul(power)?
                    .sub(wo.mul(kept)?)?;
                Ok(numer.div(bo.mul(phi)?.mul(depleted)?.mul(depleted)?)?)
            }
            // S*wo*(1-wo) * r^(wo-1) * (Bo*(1-f) - Ao)
            //   / (Bo * phi^2 * (Bo-Ao)^2),  r = 1 - Ao/(Bo*phi)
            (PairShape::ShareToAsset, SwapKind::GivenOut) => {
                let phi = self.taxable_factor(wo)?;
                let drained = amount.div(bo.mul(phi)?)?;
                if drained >= Fixed::ONE {
                    return Err(PoolMathError::ExceedsReserves);
                }
                let remaining = Fixed::ONE.sub(drained)?;
                let power = remaining.pow(wo)?.div(remaining)?;
                let headroom = bo.mul(self.fee_complement()?)?.sub(amount)?;
                let left = bo.sub(amount)?;
                Ok(bi
                    .mul(wo)?
                    .mul(Fixed::ONE.sub(wo)?)?
                    .mul(power)?
                    .mul(headroom)?
                    .div(bo.mul(phi)?.mul(phi)?.mul(left)?.mul(left)?)?)
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

    // Bo * wi / (wi + wo): fee-independent, unlike the generic
    // reciprocal-slope fallback.
    fn normalized_liquidity(&self) -> Result<Fixed, PoolMathError> {
        self.reserves_out
            .mul(self.weight_in)?
            .div(self.weight_in.add(self.weight_out)?)
            .map_err(PoolMathError::from)
    }
}
