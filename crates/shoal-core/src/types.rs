//! Pipeline data model: votes, liquidity positions, and the per-period vectors.
//!
//! Everything here is validated once at the collaborator boundary; downstream
//! code relies on the field types rather than re-checking shapes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Identifier of one allocation target (a sub-market / subnet).
pub type SubMarketId = u16;

/// Stable numeric position of a participant in the scoring universe.
pub type Slot = u16;

/// Participant identity as published on chain (an account address).
pub type Identity = String;

/// One voter's declared allocation preference.
///
/// `weights` need not sum to 1; the vote aggregator normalizes them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Vote {
    /// Block at which the vote was cast.
    pub block_height: u64,
    /// Identity of the voter.
    pub voter: Identity,
    /// Stake backing the vote. Zero-stake votes carry no weight.
    pub voter_stake: f64,
    /// Raw preference per sub-market.
    pub weights: BTreeMap<SubMarketId, f64>,
}

impl Vote {
    /// Sum of the raw weights.
    pub fn weight_sum(&self) -> f64 {
        self.weights.values().sum()
    }

    /// Stake and every weight are finite and non-negative.
    pub fn is_well_formed(&self) -> bool {
        self.voter_stake.is_finite()
            && self.voter_stake >= 0.0
            && self.weights.values().all(|w| w.is_finite() && *w >= 0.0)
    }
}

/// One concentrated-liquidity band owned by an identity in a sub-market.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct LiquidityPosition {
    /// Lower price bound of the band.
    pub price_low: f64,
    /// Upper price bound of the band.
    pub price_high: f64,
    /// Concentrated-liquidity amount `L`, scaled to reference units.
    pub liquidity: f64,
    /// Accrued fees in the reference token. Carried, not valued.
    #[serde(default)]
    pub fees_reference: f64,
    /// Accrued fees in the sub-market token. Carried, not valued.
    #[serde(default)]
    pub fees_other: f64,
}

impl LiquidityPosition {
    /// A position without accrued fees.
    pub fn new(price_low: f64, price_high: f64, liquidity: f64) -> Self {
        Self {
            price_low,
            price_high,
            liquidity,
            fees_reference: 0.0,
            fees_other: 0.0,
        }
    }

    /// Absolute band width `high - low`.
    pub fn width(&self) -> f64 {
        self.price_high - self.price_low
    }

    /// Whether `price` lies strictly inside the band.
    pub fn contains_strictly(&self, price: f64) -> bool {
        self.price_low < price && price < self.price_high
    }
}

/// Token amounts of a position at a given price.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TokenAmounts {
    /// Sub-market token leg.
    pub other: f64,
    /// Reference-unit leg. The only leg the pipeline scores.
    pub reference: f64,
}

/// All positions of one sub-market for one fetch cycle, grouped by owner.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LiquiditySubnet {
    pub sub_market: SubMarketId,
    pub positions: BTreeMap<Identity, Vec<LiquidityPosition>>,
}

impl LiquiditySubnet {
    pub fn new(sub_market: SubMarketId) -> Self {
        Self {
            sub_market,
            positions: BTreeMap::new(),
        }
    }

    /// Append `position` to `identity`'s list.
    pub fn push(&mut self, identity: impl Into<Identity>, position: LiquidityPosition) {
        self.positions.entry(identity.into()).or_default().push(position);
    }

    /// Number of distinct identities with at least one listed position.
    pub fn unique_identities(&self) -> usize {
        self.positions.len()
    }

    /// Total number of positions across all identities.
    pub fn total_positions(&self) -> usize {
        self.positions.values().map(Vec::len).sum()
    }
}

/// Stake-weighted allocation over sub-markets.
///
/// Either empty ("no evidence") or non-negative values summing to 1.0.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MasterVector(BTreeMap<SubMarketId, f64>);

impl MasterVector {
    pub fn from_map(weights: BTreeMap<SubMarketId, f64>) -> Self {
        Self(weights)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Weight of `sub_market`, zero when absent.
    pub fn get(&self, sub_market: SubMarketId) -> f64 {
        self.0.get(&sub_market).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubMarketId, f64)> + '_ {
        self.0.iter().map(|(id, w)| (*id, *w))
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn as_map(&self) -> &BTreeMap<SubMarketId, f64> {
        &self.0
    }
}

impl FromIterator<(SubMarketId, f64)> for MasterVector {
    fn from_iter<I: IntoIterator<Item = (SubMarketId, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Reference-unit valuation per sub-market, then per slot. Absent entries are zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiquidityValuationMap(BTreeMap<SubMarketId, BTreeMap<Slot, f64>>);

impl LiquidityValuationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to the `(sub_market, slot)` entry.
    pub fn add(&mut self, sub_market: SubMarketId, slot: Slot, value: f64) {
        *self
            .0
            .entry(sub_market)
            .or_default()
            .entry(slot)
            .or_insert(0.0) += value;
    }

    /// Per-slot valuations of one sub-market.
    pub fn sub_market(&self, sub_market: SubMarketId) -> Option<&BTreeMap<Slot, f64>> {
        self.0.get(&sub_market)
    }

    /// Valuation of one slot in one sub-market, zero when absent.
    pub fn get(&self, sub_market: SubMarketId, slot: Slot) -> f64 {
        self.0
            .get(&sub_market)
            .and_then(|m| m.get(&slot))
            .copied()
            .unwrap_or(0.0)
    }

    /// `Σ liquidity[sub_market][*]`.
    pub fn total(&self, sub_market: SubMarketId) -> f64 {
        self.0
            .get(&sub_market)
            .map(|m| m.values().sum())
            .unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of `(sub_market, slot)` entries.
    pub fn entry_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubMarketId, &BTreeMap<Slot, f64>)> + '_ {
        self.0.iter().map(|(id, m)| (*id, m))
    }
}

impl FromIterator<(SubMarketId, Slot, f64)> for LiquidityValuationMap {
    fn from_iter<I: IntoIterator<Item = (SubMarketId, Slot, f64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (sub_market, slot, value) in iter {
            map.add(sub_market, slot, value);
        }
        map
    }
}

/// Per-slot reward for one period.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RewardVector(BTreeMap<Slot, f64>);

impl RewardVector {
    pub fn from_map(rewards: BTreeMap<Slot, f64>) -> Self {
        Self(rewards)
    }

    /// Reward of `slot`, zero when absent.
    pub fn get(&self, slot: Slot) -> f64 {
        self.0.get(&slot).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, f64)> + '_ {
        self.0.iter().map(|(slot, r)| (*slot, *r))
    }
}

impl FromIterator<(Slot, f64)> for RewardVector {
    fn from_iter<I: IntoIterator<Item = (Slot, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Slot → identity snapshot of the scoring universe.
///
/// Index `i` holds the identity bound to slot `i`. A slot missing from the
/// source snapshot is stored as an empty identity (unbound).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityBinding(Vec<Identity>);

impl IdentityBinding {
    pub fn from_identities(identities: Vec<Identity>) -> Self {
        Self(identities)
    }

    /// Build from `(slot, identity)` pairs in any order.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Slot, Identity)>,
    {
        let mut identities: Vec<Identity> = Vec::new();
        for (slot, identity) in pairs {
            let index = usize::from(slot);
            if identities.len() <= index {
                identities.resize(index + 1, Identity::new());
            }
            identities[index] = identity;
        }
        Self(identities)
    }

    /// Number of slots in the universe.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Identity bound to `slot`, if the slot exists and is bound.
    pub fn get(&self, slot: Slot) -> Option<&str> {
        self.0
            .get(usize::from(slot))
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn identities(&self) -> &[Identity] {
        &self.0
    }

    /// Every slot of the universe, bound or not.
    pub fn slots(&self) -> BTreeSet<Slot> {
        (0..self.0.len()).filter_map(|i| Slot::try_from(i).ok()).collect()
    }

    /// Identity → slot lookup. If an identity occupies several slots the highest wins.
    pub fn slot_index(&self) -> HashMap<Identity, Slot> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, id)| !id.is_empty())
            .filter_map(|(i, id)| Slot::try_from(i).ok().map(|slot| (id.clone(), slot)))
            .collect()
    }
}
