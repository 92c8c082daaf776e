//! Concentrated-liquidity position valuation implementing [`PositionValuator`].
//!
//! A position with liquidity `L` over `[low, high]` holds, at price `P`:
//! - `P ≤ low`: only the sub-market token, `L·(1/√low − 1/√high)`
//! - `P ≥ high`: only the reference token, `L·(√high − √low)`
//! - in between: `L·(1/√P − 1/√high)` sub-market and `L·(√P − √low)` reference

use crate::error::ValuationError;
use crate::traits::PositionValuator;
use crate::types::{LiquidityPosition, TokenAmounts};

/// Production valuator using the sqrt-price formulas.
#[derive(Debug, Clone, Default)]
pub struct ConcentratedLiquidityValuator;

impl ConcentratedLiquidityValuator {
    pub fn new() -> Self {
        Self
    }
}

impl PositionValuator for ConcentratedLiquidityValuator {
    fn value(
        &self,
        position: &LiquidityPosition,
        price: f64,
    ) -> Result<TokenAmounts, ValuationError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(ValuationError::InvalidPrice(price));
        }
        let (low, high) = (position.price_low, position.price_high);
        if !(low.is_finite() && high.is_finite()) || low <= 0.0 || high <= low {
            return Err(ValuationError::InvalidBand { low, high });
        }
        let l = position.liquidity;
        if !l.is_finite() || l < 0.0 {
            return Err(ValuationError::InvalidLiquidity(l));
        }

        let sqrt_low = low.sqrt();
        let sqrt_high = high.sqrt();
        let sqrt_p = price.sqrt();

        let amounts = if price <= low {
            TokenAmounts {
                other: l * (1.0 / sqrt_low - 1.0 / sqrt_high),
                reference: 0.0,
            }
        } else if price >= high {
            TokenAmounts {
                other: 0.0,
                reference: l * (sqrt_high - sqrt_low),
            }
        } else {
            TokenAmounts {
                other: l * (1.0 / sqrt_p - 1.0 / sqrt_high),
                reference: l * (sqrt_p - sqrt_low),
            }
        };

        if !(amounts.other.is_finite() && amounts.reference.is_finite()) {
            return Err(ValuationError::NonFinite);
        }
        Ok(TokenAmounts {
            other: amounts.other.max(0.0),
            reference: amounts.reference.max(0.0),
        })
    }
}
