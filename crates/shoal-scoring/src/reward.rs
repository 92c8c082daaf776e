//! Reward computation: master vector × liquidity share per sub-market.
//!
//! For every sub-market `m` with `master[m] > 0` and total liquidity
//! `T_m > 0`, slot `s` earns `liquidity[m][s] / T_m × master[m]`. The summed
//! raw rewards are normalized to 1.0. When nothing earned anything, every
//! slot of the universe gets `1 / |universe|`.

use std::collections::{BTreeMap, BTreeSet};

use shoal_core::types::{LiquidityValuationMap, MasterVector, RewardVector, Slot};
use tracing::{debug, info, warn};

/// Reward vector tagged with how it was produced.
#[derive(Clone, Debug, PartialEq)]
pub enum RewardOutcome {
    /// At least one sub-market had both vote weight and liquidity.
    Computed(RewardVector),
    /// No evidence; uniform over the universe.
    UniformFallback(RewardVector),
    /// No evidence and an empty universe.
    Empty,
}

impl RewardOutcome {
    pub fn rewards(&self) -> Option<&RewardVector> {
        match self {
            Self::Computed(r) | Self::UniformFallback(r) => Some(r),
            Self::Empty => None,
        }
    }

    /// The reward vector, empty for [`RewardOutcome::Empty`].
    pub fn into_rewards(self) -> RewardVector {
        match self {
            Self::Computed(r) | Self::UniformFallback(r) => r,
            Self::Empty => RewardVector::default(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::UniformFallback(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Computed(_) => "computed",
            Self::UniformFallback(_) => "uniform_fallback",
            Self::Empty => "empty",
        }
    }
}

/// Stateless reward calculator.
#[derive(Debug, Clone, Default)]
pub struct RewardCalculator;

impl RewardCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(
        &self,
        universe: &BTreeSet<Slot>,
        master: &MasterVector,
        liquidity: &LiquidityValuationMap,
    ) -> RewardOutcome {
        let mut raw: BTreeMap<Slot, f64> = BTreeMap::new();

        for (sub_market, weight) in master.iter() {
            if !(weight > 0.0) {
                continue;
            }
            let total = liquidity.total(sub_market);
            if !(total > 0.0 && total.is_finite()) {
                debug!(sub_market, weight, "reward: no liquidity, sub-market contributes nothing");
                continue;
            }
            let Some(per_slot) = liquidity.sub_market(sub_market) else {
                continue;
            };
            for (&slot, &value) in per_slot {
                if value > 0.0 {
                    *raw.entry(slot).or_insert(0.0) += value / total * weight;
                }
            }
        }

        let sum: f64 = raw.values().sum();
        if sum > 0.0 && sum.is_finite() {
            let rewards: RewardVector = raw
                .into_iter()
                .filter_map(|(slot, r)| {
                    let normalized = r / sum;
                    if normalized.is_finite() && normalized >= 0.0 {
                        Some((slot, normalized))
                    } else {
                        warn!(slot, reward = normalized, "reward: dropping invalid reward");
                        None
                    }
                })
                .collect();
            info!(slots = rewards.len(), raw_sum = sum, "reward: computed");
            return RewardOutcome::Computed(rewards);
        }

        if universe.is_empty() {
            warn!("reward: no evidence and empty universe");
            return RewardOutcome::Empty;
        }

        let share = 1.0 / universe.len() as f64;
        info!(slots = universe.len(), share, "reward: no evidence, uniform fallback");
        RewardOutcome::UniformFallback(universe.iter().map(|&slot| (slot, share)).collect())
    }
}
