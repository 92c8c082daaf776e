//! Trait interfaces for the collaborators around the scoring pipeline.
//!
//! These traits define the contracts between crates:
//! - [`VoteSource`] — latest governance votes (HTTP vote API client implements)
//! - [`ChainGateway`] — prices, liquidity positions, identity slots (JSON-RPC gateway)
//! - [`PositionValuator`] — position → token amounts at a price (concentrated liquidity)
//! - [`WeightEmitter`] — consumer of the final normalized scores

use async_trait::async_trait;

use crate::error::{ChainError, ValuationError, VoteError};
use crate::types::{
    IdentityBinding, LiquidityPosition, LiquiditySubnet, Slot, SubMarketId, TokenAmounts, Vote,
};

/// Source of the current governance votes.
///
/// Errors are transient transport failures; callers retry with backoff
/// before treating the period as skipped.
#[async_trait]
pub trait VoteSource: Send + Sync {
    /// Most recent vote of every voter.
    async fn latest_votes(&self) -> Result<Vec<Vote>, VoteError>;
}

/// Read access to on-chain state needed for one scoring period.
///
/// Every call may fail on its own; a failure means "unavailable" for that
/// call only.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Current price of `sub_market` in reference units.
    ///
    /// `Ok(None)` means the chain has no price for it.
    async fn current_price(
        &self,
        sub_market: SubMarketId,
        at_block: Option<u64>,
    ) -> Result<Option<f64>, ChainError>;

    /// Liquidity positions grouped by sub-market.
    ///
    /// `None` fetches every active sub-market.
    async fn fetch_liquidity(
        &self,
        sub_market: Option<SubMarketId>,
        at_block: Option<u64>,
    ) -> Result<Vec<LiquiditySubnet>, ChainError>;

    /// Slot → identity snapshot of the scoring universe.
    async fn identity_slots(&self, at_block: Option<u64>) -> Result<IdentityBinding, ChainError>;
}

/// Converts a liquidity position into token amounts at a given price.
pub trait PositionValuator: Send + Sync {
    /// Both token legs of `position` at `price`.
    fn value(
        &self,
        position: &LiquidityPosition,
        price: f64,
    ) -> Result<TokenAmounts, ValuationError>;

    /// Reference-unit leg only.
    ///
    /// Default implementation delegates to [`value`](Self::value).
    fn reference_value(
        &self,
        position: &LiquidityPosition,
        price: f64,
    ) -> Result<f64, ValuationError> {
        Ok(self.value(position, price)?.reference)
    }
}

/// Downstream consumer of the normalized score vector.
///
/// Quantization and on-chain submission are the implementor's concern.
#[async_trait]
pub trait WeightEmitter: Send + Sync {
    /// `weights[i]` belongs to `slots[i]`.
    async fn emit(&self, slots: &[Slot], weights: &[f64]) -> Result<(), ChainError>;
}
