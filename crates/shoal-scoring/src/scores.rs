//! Persistent per-slot score vector smoothed with a one-step EMA.
//!
//! `new = alpha × reward + (1 − alpha) × old`, element-wise over the whole
//! universe. A slot without reward this period decays by `1 − alpha`.
//! A slot whose bound identity changes loses its history.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use shoal_core::constants::DEFAULT_EMA_ALPHA;
use shoal_core::types::{IdentityBinding, RewardVector, Slot};
use tracing::{debug, info, warn};

/// What a [`ScoreAccumulator::resync`] changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    /// Slots zeroed because their identity changed or disappeared.
    pub reset: Vec<Slot>,
    /// Number of slots appended.
    pub grown: usize,
}

/// Owns the score vector and the binding it was last synced to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScoreAccumulator {
    scores: Vec<f64>,
    binding: IdentityBinding,
    alpha: f64,
    /// Number of updates applied.
    step: u64,
}

impl Default for ScoreAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_EMA_ALPHA)
    }
}

impl ScoreAccumulator {
    /// Empty accumulator. `alpha` is expected in `(0, 1]`.
    pub fn new(alpha: f64) -> Self {
        Self {
            scores: Vec::new(),
            binding: IdentityBinding::default(),
            alpha,
            step: 0,
        }
    }

    /// Replace the smoothing factor, keeping scores.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Align the score vector with `binding`.
    ///
    /// Slots whose identity changed are zeroed, new slots are appended with
    /// zero, and slots no longer present are zeroed but kept. A slot that
    /// leaves the universe and later returns starts again from zero, bound
    /// or not.
    pub fn resync(&mut self, binding: IdentityBinding) -> ResyncSummary {
        let mut summary = ResyncSummary::default();
        let old = self.binding.identities();
        let new = binding.identities();
        let previous_len = self.scores.len();

        if new.len() > previous_len {
            summary.grown = new.len() - previous_len;
            self.scores.resize(new.len(), 0.0);
        }

        for (index, score) in self.scores.iter_mut().enumerate() {
            let changed = if index >= new.len() {
                old.get(index).is_some() || *score != 0.0
            } else {
                index < previous_len && old.get(index) != new.get(index)
            };
            if changed {
                *score = 0.0;
                if let Ok(slot) = Slot::try_from(index) {
                    summary.reset.push(slot);
                }
            }
        }

        if !summary.reset.is_empty() || summary.grown > 0 {
            info!(
                reset = summary.reset.len(),
                grown = summary.grown,
                universe = new.len(),
                "scores: resynced identity binding"
            );
        }
        self.binding = binding;
        summary
    }

    /// Apply one EMA step with this period's reward.
    ///
    /// Slots absent from `reward` count as zero. Rewards for slots outside
    /// the vector are ignored; non-finite or negative rewards count as zero.
    pub fn update(&mut self, reward: &RewardVector) {
        let mut scattered = vec![0.0; self.scores.len()];
        for (slot, value) in reward.iter() {
            let Some(cell) = scattered.get_mut(usize::from(slot)) else {
                debug!(slot, "scores: reward for unknown slot ignored");
                continue;
            };
            *cell = if value.is_finite() && value >= 0.0 {
                value
            } else {
                warn!(slot, value, "scores: invalid reward replaced with 0");
                0.0
            };
        }

        let alpha = self.alpha;
        for (score, r) in self.scores.iter_mut().zip(scattered) {
            *score = alpha * r + (1.0 - alpha) * *score;
        }
        self.step += 1;

        let nnz = self.scores.iter().filter(|s| **s > 0.0).count();
        let sum: f64 = self.scores.iter().sum();
        let max = self.scores.iter().copied().fold(0.0, f64::max);
        info!(step = self.step, slots = self.scores.len(), nnz, sum, max, "scores: updated");
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn binding(&self) -> &IdentityBinding {
        &self.binding
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// L1-normalized copy of the scores. An all-zero vector stays all-zero.
    pub fn normalized_weights(&self) -> Vec<f64> {
        if self.scores.iter().any(|s| s.is_nan()) {
            warn!("scores: NaN in score vector, treating as 0");
        }
        let clean: Vec<f64> = self
            .scores
            .iter()
            .map(|&s| if s.is_finite() && s > 0.0 { s } else { 0.0 })
            .collect();
        let sum: f64 = clean.iter().sum();
        if sum > 0.0 {
            clean.into_iter().map(|s| s / sum).collect()
        } else {
            clean
        }
    }

    /// Up to `k` slots with the highest positive score, best first.
    pub fn top_k(&self, k: usize) -> Vec<(Slot, f64)> {
        let mut ranked: Vec<(Slot, f64)> = self
            .scores
            .iter()
            .enumerate()
            .filter(|(_, s)| **s > 0.0)
            .filter_map(|(i, s)| Slot::try_from(i).ok().map(|slot| (slot, *s)))
            .collect();
        ranked.sort_by_key(|(slot, s)| (std::cmp::Reverse(OrderedFloat(*s)), *slot));
        ranked.truncate(k);
        ranked
    }
}
