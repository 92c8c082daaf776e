//! Period orchestration for the validator.
//!
//! A period fetches everything it needs first (identity slots, votes,
//! liquidity, prices), with retries on the transient fetches. Only when all
//! fetches succeeded does it touch the score accumulator, under one short
//! lock that is never held across an await. A failed fetch skips the period
//! and leaves scores as they were.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tracing::{error, info, warn};

use shoal_core::constants::{BURN_SLOT, FAILED_PERIOD_PAUSE_SECS, ROOT_SUB_MARKET, TOP_K_SUMMARY};
use shoal_core::error::{ChainError, ShoalError, StateError, VoteError};
use shoal_core::traits::{ChainGateway, PositionValuator, VoteSource, WeightEmitter};
use shoal_core::types::{
    IdentityBinding, LiquiditySubnet, MasterVector, RewardVector, Slot, SubMarketId,
};
use shoal_core::valuation::ConcentratedLiquidityValuator;
use shoal_scoring::{
    AggregationStats, LiquidityAggregator, RewardCalculator, RewardOutcome, ScoreAccumulator,
    VoteAggregator, latest_per_voter,
};

use crate::chain_rpc::RpcChainGateway;
use crate::config::ValidatorConfig;
use crate::emitter::LogEmitter;
use crate::prices::fetch_prices;
use crate::retry::with_retry;
use crate::state::{load_state, save_state};
use crate::vote_client::HttpVoteSource;

/// Why a period produced no score update.
#[derive(Error, Debug)]
pub enum PeriodError {
    #[error("vote fetch failed: {0}")]
    Votes(#[from] VoteError),
    #[error("chain fetch failed: {0}")]
    Chain(#[from] ChainError),
    #[error("previous period still running")]
    Overlap,
}

/// Summary of one completed period.
#[derive(Debug, Clone)]
pub struct PeriodReport {
    pub started_at: DateTime<Utc>,
    /// Accumulator step after this period's update.
    pub step: u64,
    pub burn: bool,
    pub master: MasterVector,
    pub outcome: RewardOutcome,
    pub stats: AggregationStats,
    pub priced_sub_markets: usize,
    pub universe: usize,
    /// Best slots by score after the update.
    pub top: Vec<(Slot, f64)>,
    /// Whether the emitter accepted the weights.
    pub emitted: bool,
}

/// Clears the in-progress flag when the period ends, however it ends.
struct PeriodGuard<'a>(&'a AtomicBool);

impl<'a> PeriodGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PeriodGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The scoring validator: collaborators, scoring stages and the score state.
pub struct Validator {
    config: ValidatorConfig,
    votes: Arc<dyn VoteSource>,
    chain: Arc<dyn ChainGateway>,
    emitter: Option<Arc<dyn WeightEmitter>>,
    vote_aggregator: VoteAggregator,
    liquidity: LiquidityAggregator,
    rewards: RewardCalculator,
    accumulator: Mutex<ScoreAccumulator>,
    in_period: AtomicBool,
}

impl Validator {
    pub fn new(
        config: ValidatorConfig,
        votes: Arc<dyn VoteSource>,
        chain: Arc<dyn ChainGateway>,
        valuator: Arc<dyn PositionValuator>,
    ) -> Self {
        let liquidity = LiquidityAggregator::new(config.liquidity, valuator);
        let accumulator = Mutex::new(ScoreAccumulator::new(config.alpha));
        Self {
            config,
            votes,
            chain,
            emitter: None,
            vote_aggregator: VoteAggregator::new(),
            liquidity,
            rewards: RewardCalculator::new(),
            accumulator,
            in_period: AtomicBool::new(false),
        }
    }

    /// Wire the production collaborators described by `config`.
    ///
    /// Loads the score-state file when one is configured.
    pub fn from_config(config: ValidatorConfig) -> Result<Self, ShoalError> {
        let votes: Arc<dyn VoteSource> = Arc::new(HttpVoteSource::new(
            &config.vote_endpoint,
            config.active_sub_markets.clone(),
        )?);
        let gateway = Arc::new(RpcChainGateway::new(
            &config.chain_rpc_url,
            config.primary_sub_market,
            config.active_sub_markets.clone(),
            Duration::from_secs(config.price_timeout_secs),
        )?);
        let emitter: Arc<dyn WeightEmitter> = if config.emit_weights {
            gateway.clone()
        } else {
            Arc::new(LogEmitter)
        };
        let state = match &config.state_path {
            Some(path) => load_state(path)?,
            None => None,
        };

        let mut validator = Self::new(
            config,
            votes,
            gateway,
            Arc::new(ConcentratedLiquidityValuator::new()),
        )
        .with_emitter(emitter);
        if let Some(accumulator) = state {
            validator = validator.with_accumulator(accumulator);
        }
        Ok(validator)
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn WeightEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Resume from a saved accumulator. The configured alpha wins.
    pub fn with_accumulator(self, accumulator: ScoreAccumulator) -> Self {
        *self.accumulator.lock() = accumulator.with_alpha(self.config.alpha);
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Copy of the current accumulator.
    pub fn accumulator(&self) -> ScoreAccumulator {
        self.accumulator.lock().clone()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.accumulator.lock().scores().to_vec()
    }

    /// Run one scoring period.
    pub async fn run_period(&self) -> Result<PeriodReport, PeriodError> {
        let _guard = PeriodGuard::acquire(&self.in_period).ok_or(PeriodError::Overlap)?;
        let started_at = Utc::now();
        let retry = &self.config.retry;

        let binding =
            with_retry(retry, "identity_slots", || self.chain.identity_slots(None)).await?;

        if self.config.burn_mode {
            let rewards: RewardVector = [(BURN_SLOT, 1.0)].into_iter().collect();
            let outcome = RewardOutcome::Computed(rewards);
            let universe = binding.len();
            let (step, weights, top, snapshot) = self.apply(binding, &outcome);
            self.persist(snapshot).await;
            let emitted = self.emit(&weights).await;
            info!(step, "period: burn mode, full reward to slot {BURN_SLOT}");
            return Ok(PeriodReport {
                started_at,
                step,
                burn: true,
                master: MasterVector::default(),
                outcome,
                stats: AggregationStats::default(),
                priced_sub_markets: 0,
                universe,
                top,
                emitted,
            });
        }

        let votes = with_retry(retry, "votes", || self.votes.latest_votes()).await?;
        let subnets: Vec<LiquiditySubnet> =
            with_retry(retry, "liquidity", || self.chain.fetch_liquidity(None, None))
                .await?
                .into_iter()
                .filter(|s| s.sub_market != ROOT_SUB_MARKET)
                .collect();

        let wanted: BTreeSet<SubMarketId> = subnets.iter().map(|s| s.sub_market).collect();
        let prices = fetch_prices(
            Arc::clone(&self.chain),
            &wanted,
            None,
            self.config.max_concurrency,
            Duration::from_secs(self.config.price_timeout_secs),
        )
        .await;

        let votes = latest_per_voter(votes);
        let master = self.vote_aggregator.aggregate(&votes);
        if master.is_empty() {
            warn!(votes = votes.len(), "period: no vote carries stake, master vector empty");
        }
        let (liquidity, stats) =
            self.liquidity
                .aggregate_detailed(&subnets, &prices, &binding.slot_index());
        let universe_slots = binding.slots();
        let outcome = self.rewards.compute(&universe_slots, &master, &liquidity);

        let (step, weights, top, snapshot) = self.apply(binding, &outcome);
        self.persist(snapshot).await;
        let emitted = self.emit(&weights).await;

        info!(
            step,
            outcome = outcome.label(),
            sub_markets = master.len(),
            universe = universe_slots.len(),
            priced = prices.len(),
            accepted = stats.accepted,
            discarded = stats.discarded,
            top = ?top,
            "period: complete"
        );

        Ok(PeriodReport {
            started_at,
            step,
            burn: false,
            master,
            outcome,
            stats,
            priced_sub_markets: prices.len(),
            universe: universe_slots.len(),
            top,
            emitted,
        })
    }

    /// Resync and update under the lock. Returns a snapshot to persist when
    /// a state file is configured.
    fn apply(
        &self,
        binding: IdentityBinding,
        outcome: &RewardOutcome,
    ) -> (u64, Vec<f64>, Vec<(Slot, f64)>, Option<ScoreAccumulator>) {
        let empty = RewardVector::default();
        let rewards = outcome.rewards().unwrap_or(&empty);

        let mut acc = self.accumulator.lock();
        acc.resync(binding);
        acc.update(rewards);
        let snapshot = self.config.state_path.as_ref().map(|_| acc.clone());
        (acc.step(), acc.normalized_weights(), acc.top_k(TOP_K_SUMMARY), snapshot)
    }

    /// Write the snapshot on the blocking pool. Failures are logged, never fatal.
    async fn persist(&self, snapshot: Option<ScoreAccumulator>) {
        let (Some(path), Some(snapshot)) = (self.config.state_path.clone(), snapshot) else {
            return;
        };
        match tokio::task::spawn_blocking(move || save_state(&path, &snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "period: failed to save score state"),
            Err(e) => warn!(error = %e, "period: state save task failed"),
        }
    }

    /// Hand weights to the emitter. Failures are logged, never fatal.
    async fn emit(&self, weights: &[f64]) -> bool {
        let Some(emitter) = &self.emitter else {
            return false;
        };
        if weights.is_empty() {
            return false;
        }
        let slots: Vec<Slot> = (0..weights.len())
            .filter_map(|i| Slot::try_from(i).ok())
            .collect();
        match emitter.emit(&slots, &weights[..slots.len()]).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "period: weight emission failed");
                false
            }
        }
    }

    /// Save the accumulator to the configured state file, if any.
    pub fn save_state(&self) -> Result<(), StateError> {
        match &self.config.state_path {
            Some(path) => save_state(path, &self.accumulator()),
            None => Ok(()),
        }
    }

    /// Random wait in `[min_interval_secs, max_interval_secs]`.
    pub fn next_interval(&self) -> Duration {
        let (min, max) = (self.config.min_interval_secs, self.config.max_interval_secs);
        let secs = if min >= max {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        Duration::from_secs(secs)
    }

    /// Run periods until the future is dropped.
    pub async fn run_forever(&self) {
        loop {
            match self.run_period().await {
                Ok(report) => {
                    info!(step = report.step, outcome = report.outcome.label(), "period: done");
                }
                Err(e) => {
                    error!(error = %e, "period: skipped");
                    tokio::time::sleep(Duration::from_secs(FAILED_PERIOD_PAUSE_SECS)).await;
                }
            }
            let wait = self.next_interval();
            info!(
                minutes = wait.as_secs() / 60,
                seconds = wait.as_secs() % 60,
                "period: sleeping before next period"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use shoal_core::error::ValuationError;
    use shoal_core::types::{LiquidityPosition, TokenAmounts, Vote};
    use tokio::sync::Notify;

    use crate::retry::RetryPolicy;

    struct Votes {
        votes: Vec<Vote>,
        failures_left: AtomicU32,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl VoteSource for Votes {
        async fn latest_votes(&self) -> Result<Vec<Vote>, VoteError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(VoteError::Transport("flaky".into()));
            }
            Ok(self.votes.clone())
        }
    }

    struct Chain {
        binding: IdentityBinding,
        subnets: Vec<LiquiditySubnet>,
    }

    #[async_trait]
    impl ChainGateway for Chain {
        async fn current_price(
            &self,
            _sub_market: SubMarketId,
            _at_block: Option<u64>,
        ) -> Result<Option<f64>, ChainError> {
            Ok(Some(1.0))
        }

        async fn fetch_liquidity(
            &self,
            _sub_market: Option<SubMarketId>,
            _at_block: Option<u64>,
        ) -> Result<Vec<LiquiditySubnet>, ChainError> {
            Ok(self.subnets.clone())
        }

        async fn identity_slots(
            &self,
            _at_block: Option<u64>,
        ) -> Result<IdentityBinding, ChainError> {
            Ok(self.binding.clone())
        }
    }

    struct Flat;

    impl PositionValuator for Flat {
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

    fn config() -> ValidatorConfig {
        ValidatorConfig {
            retry: RetryPolicy {
                max_tries: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
            },
            ..ValidatorConfig::default()
        }
    }

    fn vote(voter: &str, stake: f64, weights: &[(SubMarketId, f64)]) -> Vote {
        Vote {
            block_height: 1,
            voter: voter.to_string(),
            voter_stake: stake,
            weights: weights.iter().copied().collect(),
        }
    }

    fn scenario(failures: u32, gate: Option<Arc<Notify>>) -> Validator {
        let mut s1 = LiquiditySubnet::new(1);
        s1.push("A", LiquidityPosition::new(0.5, 2.0, 10.0));
        s1.push("B", LiquidityPosition::new(0.5, 2.0, 30.0));
        let mut s2 = LiquiditySubnet::new(2);
        s2.push("A", LiquidityPosition::new(0.5, 2.0, 5.0));
        let mut root = LiquiditySubnet::new(ROOT_SUB_MARKET);
        root.push("B", LiquidityPosition::new(0.5, 2.0, 1_000.0));

        let votes = Votes {
            votes: vec![
                vote("voter-one", 100.0, &[(1, 1.0)]),
                vote("voter-two", 300.0, &[(1, 0.5), (2, 0.5), (ROOT_SUB_MARKET, 0.0)]),
            ],
            failures_left: AtomicU32::new(failures),
            gate,
        };
        let chain = Chain {
            binding: IdentityBinding::from_identities(vec!["A".into(), "B".into()]),
            subnets: vec![s1, s2, root],
        };
        Validator::new(config(), Arc::new(votes), Arc::new(chain), Arc::new(Flat))
    }

    #[tokio::test]
    async fn period_scores_two_voter_scenario() {
        let v = scenario(0, None);
        let report = v.run_period().await.unwrap();
        assert!(matches!(report.outcome, RewardOutcome::Computed(_)));
        let rewards = report.outcome.rewards().unwrap();
        assert!((rewards.get(0) - 0.34375).abs() < 1e-12);
        assert!((rewards.get(1) - 0.65625).abs() < 1e-12);
        assert_eq!(report.step, 1);
        assert_eq!(report.universe, 2);
        assert_eq!(report.priced_sub_markets, 2);
        let scores = v.scores();
        assert!((scores[0] - 0.034375).abs() < 1e-12);
        assert!((scores[1] - 0.065625).abs() < 1e-12);
        assert!(!report.emitted);
    }

    #[tokio::test]
    async fn transient_vote_failures_are_retried() {
        let v = scenario(2, None);
        assert!(v.run_period().await.is_ok());
    }

    #[tokio::test]
    async fn exhausted_retries_skip_period() {
        let v = scenario(10, None);
        let err = v.run_period().await.unwrap_err();
        assert!(matches!(err, PeriodError::Votes(_)));
        assert!(v.scores().is_empty());
        assert_eq!(v.accumulator().step(), 0);
    }

    #[tokio::test]
    async fn overlapping_period_rejected() {
        let gate = Arc::new(Notify::new());
        let v = Arc::new(scenario(0, Some(Arc::clone(&gate))));
        let first = tokio::spawn({
            let v = Arc::clone(&v);
            async move { v.run_period().await.map(|r| r.step) }
        });
        // Let the first period reach the vote fetch.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(v.run_period().await, Err(PeriodError::Overlap)));
        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn burn_mode_rewards_slot_zero() {
        let mut v = scenario(0, None);
        v.config.burn_mode = true;
        let report = v.run_period().await.unwrap();
        assert!(report.burn);
        assert_eq!(report.outcome.rewards().unwrap().get(BURN_SLOT), 1.0);
        assert!((v.scores()[0] - 0.1).abs() < 1e-12);
        assert_eq!(v.scores()[1], 0.0);
    }

    #[tokio::test]
    async fn emitter_receives_normalized_weights() {
        let v = scenario(0, None).with_emitter(Arc::new(LogEmitter));
        let report = v.run_period().await.unwrap();
        assert!(report.emitted);
    }

    #[tokio::test]
    async fn state_file_written_after_period() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.json");
        let mut v = scenario(0, None);
        v.config.state_path = Some(path.clone());
        v.run_period().await.unwrap();
        let saved = load_state(&path).unwrap().unwrap();
        assert_eq!(saved.step(), 1);
        assert_eq!(saved.scores(), v.scores().as_slice());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn state_saved_off_the_runtime_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scores.json");
        let mut v = scenario(0, None);
        v.config.state_path = Some(path.clone());
        v.run_period().await.unwrap();
        v.run_period().await.unwrap();
        assert_eq!(load_state(&path).unwrap().unwrap().step(), 2);
    }

    #[tokio::test]
    async fn unwritable_state_path_does_not_fail_the_period() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::create_dir(&blocked).unwrap();
        let mut v = scenario(0, None);
        // A directory cannot be replaced by the renamed temp file.
        v.config.state_path = Some(blocked.clone());
        let report = v.run_period().await.unwrap();
        assert_eq!(report.step, 1);
        assert!(blocked.is_dir());
    }

    #[test]
    fn next_interval_within_bounds() {
        let v = scenario(0, None);
        for _ in 0..50 {
            let wait = v.next_interval().as_secs();
            assert!((600..=1200).contains(&wait));
        }
    }

    #[test]
    fn loaded_accumulator_takes_configured_alpha() {
        let v = scenario(0, None).with_accumulator(ScoreAccumulator::new(0.7));
        assert_eq!(v.accumulator().alpha(), 0.1);
    }
}
