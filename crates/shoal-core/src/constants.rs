//! Pipeline constants. Valuations are in reference units (the network's native asset).

use crate::types::{Slot, SubMarketId};

/// Default EMA smoothing factor for the score accumulator.
///
/// A slot that earns nothing for `k` periods keeps `(1 - alpha)^k` of its score.
pub const DEFAULT_EMA_ALPHA: f64 = 0.1;

/// Tolerance used when checking that a normalized vector sums to 1.0.
pub const NORMALIZATION_TOLERANCE: f64 = 1e-9;

/// The root sub-market. It carries no user liquidity and is never scored.
pub const ROOT_SUB_MARKET: SubMarketId = 0;

/// Sub-market whose identity-slot universe receives the rewards.
pub const DEFAULT_PRIMARY_SUB_MARKET: SubMarketId = 66;

/// Sub-markets with user-supplied liquidity enabled.
pub const DEFAULT_ACTIVE_SUB_MARKETS: [SubMarketId; 11] =
    [10, 27, 36, 51, 73, 85, 87, 97, 102, 104, 106];

/// Upper bound on concurrent per-sub-market price lookups.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Budget for the whole price fan-out of one period.
pub const DEFAULT_PRICE_TIMEOUT_SECS: u64 = 30;

/// Lower bound of the jittered sleep between scoring periods.
pub const DEFAULT_MIN_INTERVAL_SECS: u64 = 10 * 60;

/// Upper bound of the jittered sleep between scoring periods.
pub const DEFAULT_MAX_INTERVAL_SECS: u64 = 20 * 60;

/// Fixed pause after a failed period, before the regular sleep.
pub const FAILED_PERIOD_PAUSE_SECS: u64 = 5;

/// Number of `(slot, score)` pairs reported in per-period summaries.
pub const TOP_K_SUMMARY: usize = 5;

/// Slot that receives the whole reward in burn mode.
pub const BURN_SLOT: Slot = 0;

/// Vote endpoint value that switches the vote source to deterministic offline votes.
pub const OFFLINE_VOTE_ENDPOINT: &str = "offline";

/// Block height stamped on offline votes.
pub const OFFLINE_VOTE_BLOCK_HEIGHT: u64 = 6_073_385;

/// Stake assigned to each offline voter.
pub const OFFLINE_VOTE_STAKE: f64 = 1.0;

/// Number of synthetic voters produced in offline mode.
pub const OFFLINE_VOTER_COUNT: usize = 4;

/// Voter identity length bounds accepted from the vote API.
pub const MIN_VOTER_IDENTITY_LEN: usize = 10;
pub const MAX_VOTER_IDENTITY_LEN: usize = 64;
