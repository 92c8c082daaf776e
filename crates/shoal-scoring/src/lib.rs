//! # shoal-scoring — Per-period scoring pipeline.
//!
//! Pure, synchronous computation over data supplied by collaborators:
//! - **Vote aggregation**: stake-weighted master allocation over sub-markets,
//!   summing to 1.0, or empty when no vote carries stake.
//! - **Liquidity aggregation**: band/activity filters, then reference-unit
//!   valuation per `(sub-market, slot)` at the current price.
//! - **Reward computation**: `Σ_m liquidity[m][slot] / T_m × master[m]`,
//!   normalized, with a uniform fallback when no sub-market has both weight
//!   and liquidity.
//! - **Score accumulation**: one-step EMA per slot, reset on identity rebinding.

pub mod liquidity;
pub mod reward;
pub mod scores;
pub mod votes;

pub use liquidity::{AggregationStats, DiscardReason, LiquidityAggregator, LiquidityPolicy};
pub use reward::{RewardCalculator, RewardOutcome};
pub use scores::{ResyncSummary, ScoreAccumulator};
pub use votes::{VoteAggregator, latest_per_voter};
