//! Shared test helpers for scenario and property tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use shoal_core::error::{ChainError, ValuationError, VoteError};
use shoal_core::traits::{ChainGateway, PositionValuator, VoteSource, WeightEmitter};
use shoal_core::types::*;
use shoal_validator_lib::{RetryPolicy, Validator, ValidatorConfig};

/// Build a vote at block 1.
pub fn vote(voter: &str, stake: f64, weights: &[(SubMarketId, f64)]) -> Vote {
    Vote {
        block_height: 1,
        voter: voter.to_string(),
        voter_stake: stake,
        weights: weights.iter().copied().collect(),
    }
}

/// Band `[0.5, 2.0]`, which strictly contains the default mock price of 1.0.
pub fn position(liquidity: f64) -> LiquidityPosition {
    LiquidityPosition::new(0.5, 2.0, liquidity)
}

/// Sub-market with one position per `(identity, liquidity)` pair.
pub fn subnet(sub_market: SubMarketId, entries: &[(&str, f64)]) -> LiquiditySubnet {
    let mut s = LiquiditySubnet::new(sub_market);
    for (identity, liquidity) in entries {
        s.push(*identity, position(*liquidity));
    }
    s
}

pub fn binding(identities: &[&str]) -> IdentityBinding {
    IdentityBinding::from_identities(identities.iter().map(|s| s.to_string()).collect())
}

/// Config with millisecond retries and no jitter.
pub fn fast_config() -> ValidatorConfig {
    ValidatorConfig {
        retry: RetryPolicy {
            max_tries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        },
        min_interval_secs: 0,
        max_interval_secs: 0,
        ..ValidatorConfig::default()
    }
}

/// Vote source whose votes and failures can be changed between periods.
#[derive(Default)]
pub struct MockVoteSource {
    votes: Mutex<Vec<Vote>>,
    failures: AtomicU32,
}

impl MockVoteSource {
    pub fn new(votes: Vec<Vote>) -> Self {
        Self {
            votes: Mutex::new(votes),
            failures: AtomicU32::new(0),
        }
    }

    pub fn set_votes(&self, votes: Vec<Vote>) {
        *self.votes.lock() = votes;
    }

    /// Fail the next `n` calls.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoteSource for MockVoteSource {
    async fn latest_votes(&self) -> Result<Vec<Vote>, VoteError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(VoteError::Transport("mock outage".into()));
        }
        Ok(self.votes.lock().clone())
    }
}

/// Chain gateway backed by mutable in-memory state.
///
/// Every sub-market without an explicit price is priced at 1.0.
pub struct MockChain {
    binding: Mutex<IdentityBinding>,
    subnets: Mutex<Vec<LiquiditySubnet>>,
    prices: Mutex<BTreeMap<SubMarketId, Option<f64>>>,
    failing_prices: Mutex<BTreeSet<SubMarketId>>,
    liquidity_failures: AtomicU32,
}

impl MockChain {
    pub fn new(binding: IdentityBinding, subnets: Vec<LiquiditySubnet>) -> Self {
        Self {
            binding: Mutex::new(binding),
            subnets: Mutex::new(subnets),
            prices: Mutex::new(BTreeMap::new()),
            failing_prices: Mutex::new(BTreeSet::new()),
            liquidity_failures: AtomicU32::new(0),
        }
    }

    pub fn set_binding(&self, binding: IdentityBinding) {
        *self.binding.lock() = binding;
    }

    pub fn set_subnets(&self, subnets: Vec<LiquiditySubnet>) {
        *self.subnets.lock() = subnets;
    }

    pub fn set_price(&self, sub_market: SubMarketId, price: Option<f64>) {
        self.prices.lock().insert(sub_market, price);
    }

    pub fn fail_price(&self, sub_market: SubMarketId) {
        self.failing_prices.lock().insert(sub_market);
    }

    /// Fail the next `n` liquidity fetches.
    pub fn fail_liquidity(&self, n: u32) {
        self.liquidity_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainGateway for MockChain {
    async fn current_price(
        &self,
        sub_market: SubMarketId,
        _at_block: Option<u64>,
    ) -> Result<Option<f64>, ChainError> {
        if self.failing_prices.lock().contains(&sub_market) {
            return Err(ChainError::Rpc(format!("price for {sub_market} unavailable")));
        }
        Ok(self.prices.lock().get(&sub_market).copied().unwrap_or(Some(1.0)))
    }

    async fn fetch_liquidity(
        &self,
        sub_market: Option<SubMarketId>,
        _at_block: Option<u64>,
    ) -> Result<Vec<LiquiditySubnet>, ChainError> {
        if self
            .liquidity_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ChainError::Timeout);
        }
        Ok(self
            .subnets
            .lock()
            .iter()
            .filter(|s| sub_market.is_none_or(|id| id == s.sub_market))
            .cloned()
            .collect())
    }

    async fn identity_slots(&self, _at_block: Option<u64>) -> Result<IdentityBinding, ChainError> {
        Ok(self.binding.lock().clone())
    }
}

/// Values every position at its `liquidity` field, in reference units.
pub struct FixedValuator;

impl PositionValuator for FixedValuator {
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

/// Records every emission; can be told to fail.
#[derive(Default)]
pub struct RecordingEmitter {
    calls: Mutex<Vec<(Vec<Slot>, Vec<f64>)>>,
    fail: AtomicBool,
}

impl RecordingEmitter {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(Vec<Slot>, Vec<f64>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl WeightEmitter for RecordingEmitter {
    async fn emit(&self, slots: &[Slot], weights: &[f64]) -> Result<(), ChainError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc("submission refused".into()));
        }
        self.calls.lock().push((slots.to_vec(), weights.to_vec()));
        Ok(())
    }
}

/// Handles to the mocks behind a [`Validator`].
pub struct Harness {
    pub validator: Arc<Validator>,
    pub votes: Arc<MockVoteSource>,
    pub chain: Arc<MockChain>,
    pub emitter: Arc<RecordingEmitter>,
}

/// Validator over mocks with the given starting data.
pub fn harness(
    config: ValidatorConfig,
    votes: Vec<Vote>,
    binding: IdentityBinding,
    subnets: Vec<LiquiditySubnet>,
) -> Harness {
    let votes = Arc::new(MockVoteSource::new(votes));
    let chain = Arc::new(MockChain::new(binding, subnets));
    let emitter = Arc::new(RecordingEmitter::default());
    let validator = Validator::new(
        config,
        votes.clone(),
        chain.clone(),
        Arc::new(FixedValuator),
    )
    .with_emitter(emitter.clone());
    Harness {
        validator: Arc::new(validator),
        votes,
        chain,
        emitter,
    }
}

/// Two voters over sub-markets 1 and 2; identities A (slot 0) and B (slot 1).
///
/// Master `{1: 0.875, 2: 0.125}`, rewards `{A: 0.34375, B: 0.65625}`.
pub fn two_voter_scenario(config: ValidatorConfig) -> Harness {
    harness(
        config,
        vec![
            vote("voter-0001", 100.0, &[(1, 1.0)]),
            vote("voter-0002", 300.0, &[(1, 0.5), (2, 0.5)]),
        ],
        binding(&["A", "B"]),
        vec![subnet(1, &[("A", 10.0), ("B", 30.0)]), subnet(2, &[("A", 5.0)])],
    )
}

/// `|a - b| < tol`.
pub fn close(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}
