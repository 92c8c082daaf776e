//! # shoal-core
//! Foundation types and traits for the Shoal scoring pipeline.

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;
pub mod valuation;

pub use error::{ChainError, ConfigError, ShoalError, StateError, ValuationError, VoteError};
pub use traits::{ChainGateway, PositionValuator, VoteSource, WeightEmitter};
pub use types::{
    Identity, IdentityBinding, LiquidityPosition, LiquiditySubnet, LiquidityValuationMap,
    MasterVector, RewardVector, Slot, SubMarketId, TokenAmounts, Vote,
};
pub use valuation::ConcentratedLiquidityValuator;
