//! Liquidity aggregation: filter positions, value them, group by slot.
//!
//! Per sub-market the current price must be finite and positive, otherwise
//! the whole sub-market is skipped. Each position then passes the checks of
//! [`check_position`] in order; the first violation discards it. Accepted
//! positions are valued in reference units and summed per identity.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shoal_core::error::ValuationError;
use shoal_core::traits::PositionValuator;
use shoal_core::types::{
    Identity, LiquidityPosition, LiquiditySubnet, LiquidityValuationMap, Slot, SubMarketId,
};
use tracing::{debug, info, warn};

/// Position filter policy. Both knobs come from configuration.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct LiquidityPolicy {
    /// Only count positions whose band strictly contains the current price.
    pub count_only_in_range: bool,
    /// Minimum `(high - low) / price`. `0.0` disables the check.
    pub min_relative_width: f64,
}

impl Default for LiquidityPolicy {
    fn default() -> Self {
        Self {
            count_only_in_range: true,
            min_relative_width: 0.0,
        }
    }
}

/// Why a position was not counted.
#[derive(Clone, Debug, PartialEq)]
pub enum DiscardReason {
    NonFiniteBounds,
    NonPositiveBounds,
    /// `high <= low`.
    DegenerateRange,
    OutOfRange,
    TooNarrow { width: f64 },
    Valuation(ValuationError),
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFiniteBounds => write!(f, "non-finite bounds"),
            Self::NonPositiveBounds => write!(f, "non-positive bounds"),
            Self::DegenerateRange => write!(f, "degenerate range (high <= low)"),
            Self::OutOfRange => write!(f, "out of range"),
            Self::TooNarrow { width } => write!(f, "relative width {width:.6} below minimum"),
            Self::Valuation(e) => write!(f, "valuation failed: {e}"),
        }
    }
}

/// Apply the band and activity filters to one position at `price`.
///
/// `price` must already be known finite and positive.
pub fn check_position(
    position: &LiquidityPosition,
    price: f64,
    policy: &LiquidityPolicy,
) -> Result<(), DiscardReason> {
    let (low, high) = (position.price_low, position.price_high);
    if !(low.is_finite() && high.is_finite()) {
        return Err(DiscardReason::NonFiniteBounds);
    }
    if low <= 0.0 || high <= 0.0 {
        return Err(DiscardReason::NonPositiveBounds);
    }
    if high <= low {
        return Err(DiscardReason::DegenerateRange);
    }
    if policy.count_only_in_range && !position.contains_strictly(price) {
        return Err(DiscardReason::OutOfRange);
    }
    if policy.min_relative_width > 0.0 {
        let width = position.width() / price;
        if width < policy.min_relative_width {
            return Err(DiscardReason::TooNarrow { width });
        }
    }
    Ok(())
}

/// Counters for one aggregation run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregationStats {
    pub accepted: usize,
    pub discarded: usize,
    /// Sub-markets dropped for lack of a usable price.
    pub skipped_sub_markets: usize,
    /// Identities with positive liquidity but no slot in the universe.
    pub unknown_identities: usize,
}

/// Turns raw positions into a [`LiquidityValuationMap`].
#[derive(Clone)]
pub struct LiquidityAggregator {
    policy: LiquidityPolicy,
    valuator: Arc<dyn PositionValuator>,
}

impl LiquidityAggregator {
    pub fn new(policy: LiquidityPolicy, valuator: Arc<dyn PositionValuator>) -> Self {
        Self { policy, valuator }
    }

    pub fn policy(&self) -> &LiquidityPolicy {
        &self.policy
    }

    /// Valuation map keyed by sub-market then slot.
    pub fn aggregate(
        &self,
        subnets: &[LiquiditySubnet],
        prices: &BTreeMap<SubMarketId, f64>,
        slot_of: &HashMap<Identity, Slot>,
    ) -> LiquidityValuationMap {
        self.aggregate_detailed(subnets, prices, slot_of).0
    }

    /// Same as [`aggregate`](Self::aggregate), plus counters.
    pub fn aggregate_detailed(
        &self,
        subnets: &[LiquiditySubnet],
        prices: &BTreeMap<SubMarketId, f64>,
        slot_of: &HashMap<Identity, Slot>,
    ) -> (LiquidityValuationMap, AggregationStats) {
        let mut stats = AggregationStats::default();
        // (identity, sub-market) → reference-unit total
        let mut totals: BTreeMap<(Identity, SubMarketId), f64> = BTreeMap::new();

        for subnet in subnets {
            let price = match prices.get(&subnet.sub_market) {
                Some(&p) if p.is_finite() && p > 0.0 => p,
                other => {
                    warn!(
                        sub_market = subnet.sub_market,
                        price = ?other,
                        "liquidity: no valid price, skipping sub-market"
                    );
                    stats.skipped_sub_markets += 1;
                    continue;
                }
            };

            debug!(
                sub_market = subnet.sub_market,
                identities = subnet.unique_identities(),
                positions = subnet.total_positions(),
                price,
                "liquidity: analyzing sub-market"
            );

            for (identity, positions) in &subnet.positions {
                let mut sum = 0.0;
                for (idx, position) in positions.iter().enumerate() {
                    match self.value_position(position, price) {
                        Ok(value) => {
                            stats.accepted += 1;
                            sum += value;
                        }
                        Err(reason) => {
                            stats.discarded += 1;
                            debug!(
                                sub_market = subnet.sub_market,
                                identity = %identity,
                                position = idx,
                                low = position.price_low,
                                high = position.price_high,
                                %reason,
                                "liquidity: position discarded"
                            );
                        }
                    }
                }
                if sum > 0.0 {
                    *totals
                        .entry((identity.clone(), subnet.sub_market))
                        .or_insert(0.0) += sum;
                }
            }
        }

        let mut map = LiquidityValuationMap::new();
        for ((identity, sub_market), value) in totals {
            match slot_of.get(&identity) {
                Some(&slot) => map.add(sub_market, slot, value),
                None => {
                    stats.unknown_identities += 1;
                    debug!(
                        identity = %identity,
                        sub_market,
                        "liquidity: identity has no slot, dropped"
                    );
                }
            }
        }

        info!(
            entries = map.entry_count(),
            accepted = stats.accepted,
            discarded = stats.discarded,
            skipped_sub_markets = stats.skipped_sub_markets,
            "liquidity: aggregation complete"
        );
        (map, stats)
    }

    fn value_position(
        &self,
        position: &LiquidityPosition,
        price: f64,
    ) -> Result<f64, DiscardReason> {
        check_position(position, price, &self.policy)?;
        let value = self
            .valuator
            .reference_value(position, price)
            .map_err(DiscardReason::Valuation)?;
        if !value.is_finite() || value < 0.0 {
            return Err(DiscardReason::Valuation(ValuationError::NonFinite));
        }
        Ok(value)
    }
}

impl std::fmt::Debug for LiquidityAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidityAggregator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shoal_core::types::TokenAmounts;
    use shoal_core::valuation::ConcentratedLiquidityValuator;

    /// Values every position at its `liquidity` field.
    struct FlatValuator;

    impl PositionValuator for FlatValuator {
        fn value(
            &self,
            position: &LiquidityPosition,
            _price: f64,
        ) -> Result<TokenAmounts, ValuationError> {
            Ok(TokenAmounts {
                other: 0.0,
                reference: position.liquidity,
            })
        }
    }

    struct FailingValuator;

    impl PositionValuator for FailingValuator {
        fn value(
            &self,
            _position: &LiquidityPosition,
            _price: f64,
        ) -> Result<TokenAmounts, ValuationError> {
            Err(ValuationError::NonFinite)
        }
    }

    fn flat(policy: LiquidityPolicy) -> LiquidityAggregator {
        LiquidityAggregator::new(policy, Arc::new(FlatValuator))
    }

    fn no_filters() -> LiquidityPolicy {
        LiquidityPolicy {
            count_only_in_range: false,
            min_relative_width: 0.0,
        }
    }

    fn slots(pairs: &[(&str, Slot)]) -> HashMap<Identity, Slot> {
        pairs.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    fn prices(pairs: &[(SubMarketId, f64)]) -> BTreeMap<SubMarketId, f64> {
        pairs.iter().copied().collect()
    }

    // --- check_position ---

    #[test]
    fn degenerate_band_always_discarded() {
        let p = LiquidityPosition::new(2.0, 2.0, 10.0);
        for policy in [
            no_filters(),
            LiquidityPolicy::default(),
            LiquidityPolicy {
                count_only_in_range: true,
                min_relative_width: 0.5,
            },
        ] {
            assert_eq!(
                check_position(&p, 2.0, &policy),
                Err(DiscardReason::DegenerateRange)
            );
        }
    }

    #[test]
    fn bound_checks_in_order() {
        let policy = no_filters();
        assert_eq!(
            check_position(&LiquidityPosition::new(f64::NAN, 2.0, 1.0), 1.0, &policy),
            Err(DiscardReason::NonFiniteBounds)
        );
        assert_eq!(
            check_position(&LiquidityPosition::new(0.0, 2.0, 1.0), 1.0, &policy),
            Err(DiscardReason::NonPositiveBounds)
        );
        assert_eq!(
            check_position(&LiquidityPosition::new(3.0, 2.0, 1.0), 1.0, &policy),
            Err(DiscardReason::DegenerateRange)
        );
    }

    #[test]
    fn in_range_is_strict() {
        let policy = LiquidityPolicy::default();
        let p = LiquidityPosition::new(1.0, 2.0, 1.0);
        assert!(check_position(&p, 1.5, &policy).is_ok());
        assert_eq!(check_position(&p, 1.0, &policy), Err(DiscardReason::OutOfRange));
        assert_eq!(check_position(&p, 2.0, &policy), Err(DiscardReason::OutOfRange));
        assert!(check_position(&p, 2.0, &no_filters()).is_ok());
    }

    #[test]
    fn width_threshold_flips_at_boundary() {
        let policy = LiquidityPolicy {
            count_only_in_range: true,
            min_relative_width: 0.1,
        };
        let price = 10.0;
        // width 1.0 / price 10.0 = 0.1 exactly: accepted.
        assert!(check_position(&LiquidityPosition::new(9.5, 10.5, 1.0), price, &policy).is_ok());
        // width 0.8 / 10.0 = 0.08: discarded.
        assert!(matches!(
            check_position(&LiquidityPosition::new(9.6, 10.4, 1.0), price, &policy),
            Err(DiscardReason::TooNarrow { .. })
        ));
    }

    // --- aggregate ---

    #[test]
    fn sums_per_identity_and_maps_to_slot() {
        let mut s1 = LiquiditySubnet::new(1);
        s1.push("A", LiquidityPosition::new(1.0, 3.0, 4.0));
        s1.push("A", LiquidityPosition::new(1.0, 3.0, 6.0));
        s1.push("B", LiquidityPosition::new(1.0, 3.0, 30.0));
        let mut s2 = LiquiditySubnet::new(2);
        s2.push("A", LiquidityPosition::new(1.0, 3.0, 5.0));

        let map = flat(LiquidityPolicy::default()).aggregate(
            &[s1, s2],
            &prices(&[(1, 2.0), (2, 2.0)]),
            &slots(&[("A", 0), ("B", 1)]),
        );
        assert_eq!(map.get(1, 0), 10.0);
        assert_eq!(map.get(1, 1), 30.0);
        assert_eq!(map.get(2, 0), 5.0);
        assert_eq!(map.entry_count(), 3);
    }

    #[test]
    fn unknown_identity_dropped() {
        let mut s = LiquiditySubnet::new(1);
        s.push("A", LiquidityPosition::new(1.0, 3.0, 4.0));
        s.push("stranger", LiquidityPosition::new(1.0, 3.0, 100.0));
        let (map, stats) = flat(LiquidityPolicy::default()).aggregate_detailed(
            &[s],
            &prices(&[(1, 2.0)]),
            &slots(&[("A", 7)]),
        );
        assert_eq!(map.entry_count(), 1);
        assert_eq!(map.get(1, 7), 4.0);
        assert_eq!(map.total(1), 4.0);
        assert_eq!(stats.unknown_identities, 1);
    }

    #[test]
    fn missing_or_bad_price_skips_sub_market() {
        let mut subnets = Vec::new();
        for id in 1..=4 {
            let mut s = LiquiditySubnet::new(id);
            s.push("A", LiquidityPosition::new(1.0, 3.0, 1.0));
            subnets.push(s);
        }
        let (map, stats) = flat(no_filters()).aggregate_detailed(
            &subnets,
            &prices(&[(1, 2.0), (2, f64::NAN), (3, 0.0)]),
            &slots(&[("A", 0)]),
        );
        assert_eq!(map.get(1, 0), 1.0);
        assert!(map.sub_market(2).is_none());
        assert!(map.sub_market(3).is_none());
        assert!(map.sub_market(4).is_none());
        assert_eq!(stats.skipped_sub_markets, 3);
    }

    #[test]
    fn zero_sum_identity_not_retained() {
        let mut s = LiquiditySubnet::new(1);
        s.push("A", LiquidityPosition::new(1.0, 3.0, 0.0));
        let map = flat(no_filters()).aggregate(&[s], &prices(&[(1, 2.0)]), &slots(&[("A", 0)]));
        assert!(map.is_empty());
    }

    #[test]
    fn valuation_error_discards_position() {
        let mut s = LiquiditySubnet::new(1);
        s.push("A", LiquidityPosition::new(1.0, 3.0, 5.0));
        let agg = LiquidityAggregator::new(no_filters(), Arc::new(FailingValuator));
        let (map, stats) =
            agg.aggregate_detailed(&[s], &prices(&[(1, 2.0)]), &slots(&[("A", 0)]));
        assert!(map.is_empty());
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.accepted, 0);
    }

    #[test]
    fn two_identities_on_one_slot_are_summed() {
        let mut s = LiquiditySubnet::new(1);
        s.push("A", LiquidityPosition::new(1.0, 3.0, 2.0));
        s.push("A2", LiquidityPosition::new(1.0, 3.0, 3.0));
        let map = flat(no_filters()).aggregate(
            &[s],
            &prices(&[(1, 2.0)]),
            &slots(&[("A", 4), ("A2", 4)]),
        );
        assert_eq!(map.get(1, 4), 5.0);
    }

    #[test]
    fn concentrated_valuator_counts_reference_leg() {
        let mut s = LiquiditySubnet::new(1);
        s.push("A", LiquidityPosition::new(4.0, 16.0, 8.0));
        let agg = LiquidityAggregator::new(
            LiquidityPolicy::default(),
            Arc::new(ConcentratedLiquidityValuator::new()),
        );
        let map = agg.aggregate(&[s], &prices(&[(1, 9.0)]), &slots(&[("A", 0)]));
        // 8 * (sqrt(9) - sqrt(4)) = 8
        assert!((map.get(1, 0) - 8.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn width_check_is_monotonic(
            center in 1.0f64..100.0,
            half in 0.001f64..0.5,
            min_width in 0.001f64..1.0,
            shrink in 0.0f64..1.0,
        ) {
            let policy = LiquidityPolicy {
                count_only_in_range: true,
                min_relative_width: min_width,
            };
            let wide = LiquidityPosition::new(center * (1.0 - half), center * (1.0 + half), 1.0);
            let narrow_half = half * shrink;
            prop_assume!(narrow_half > 0.0);
            let narrow = LiquidityPosition::new(
                center * (1.0 - narrow_half),
                center * (1.0 + narrow_half),
                1.0,
            );
            // Narrowing a rejected band never makes it accepted.
            if check_position(&wide, center, &policy).is_err() {
                prop_assert!(check_position(&narrow, center, &policy).is_err());
            }
        }

        #[test]
        fn valuations_are_positive(
            values in proptest::collection::vec(0.0f64..1e6, 0..20),
        ) {
            let mut s = LiquiditySubnet::new(1);
            for (i, v) in values.iter().enumerate() {
                s.push(format!("id-{}", i % 5), LiquidityPosition::new(1.0, 3.0, *v));
            }
            let slot_of: HashMap<Identity, Slot> =
                (0..5).map(|i| (format!("id-{i}"), i as Slot)).collect();
            let map = flat(no_filters()).aggregate(&[s], &prices(&[(1, 2.0)]), &slot_of);
            for (_, per_slot) in map.iter() {
                prop_assert!(per_slot.values().all(|v| *v > 0.0));
            }
        }
    }
}
