//! Stake-weighted vote aggregation into the master allocation vector.
//!
//! Each qualifying vote has its weights normalized to 1, scaled by the voter's
//! stake and accumulated per sub-market. The accumulated totals are then
//! divided by the total qualifying stake, so the result sums to 1.0.

use std::collections::BTreeMap;

use shoal_core::types::{Identity, MasterVector, SubMarketId, Vote};
use tracing::{debug, info, warn};

/// Builds the [`MasterVector`] for one period. Stateless.
#[derive(Debug, Clone, Default)]
pub struct VoteAggregator;

impl VoteAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate `votes` into a master vector.
    ///
    /// Votes with zero stake, no weights or a zero weight sum are ignored.
    /// Votes with a negative or non-finite stake or weight are rejected
    /// individually. Returns an empty vector when no vote qualifies.
    pub fn aggregate(&self, votes: &[Vote]) -> MasterVector {
        if votes.is_empty() {
            return MasterVector::default();
        }

        let mut raw: BTreeMap<SubMarketId, f64> = BTreeMap::new();
        let mut total_stake = 0.0;

        for vote in votes {
            if !vote.is_well_formed() {
                warn!(
                    voter = %vote.voter,
                    stake = vote.voter_stake,
                    "votes: rejecting malformed vote"
                );
                continue;
            }
            if vote.voter_stake <= 0.0 || vote.weights.is_empty() {
                continue;
            }
            let sum = vote.weight_sum();
            if !(sum > 0.0 && sum.is_finite()) {
                debug!(voter = %vote.voter, "votes: skipping vote with zero weight sum");
                continue;
            }

            for (&sub_market, &w) in &vote.weights {
                *raw.entry(sub_market).or_insert(0.0) += vote.voter_stake * (w / sum);
            }
            total_stake += vote.voter_stake;
        }

        if !(total_stake > 0.0 && total_stake.is_finite()) {
            return MasterVector::default();
        }

        let master: MasterVector = raw
            .into_iter()
            .map(|(sub_market, w)| (sub_market, w / total_stake))
            .collect();

        info!(
            sub_markets = master.len(),
            total_stake,
            sum = master.sum(),
            "votes: master vector built"
        );
        master
    }
}

/// Keep only the most recent vote of each voter.
///
/// The vote with the highest `block_height` wins; on a tie the one seen last
/// wins. Output is ordered by voter identity.
pub fn latest_per_voter(votes: Vec<Vote>) -> Vec<Vote> {
    let mut latest: BTreeMap<Identity, Vote> = BTreeMap::new();
    for vote in votes {
        match latest.get(&vote.voter) {
            Some(kept) if kept.block_height > vote.block_height => {}
            _ => {
                latest.insert(vote.voter.clone(), vote);
            }
        }
    }
    latest.into_values().collect()
}
