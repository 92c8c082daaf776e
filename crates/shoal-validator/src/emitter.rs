//! Dry-run weight emitter.

use async_trait::async_trait;
use tracing::info;

use shoal_core::constants::TOP_K_SUMMARY;
use shoal_core::error::ChainError;
use shoal_core::traits::WeightEmitter;
use shoal_core::types::Slot;

/// Logs the weights it would have submitted.
#[derive(Debug, Clone, Default)]
pub struct LogEmitter;

#[async_trait]
impl WeightEmitter for LogEmitter {
    async fn emit(&self, slots: &[Slot], weights: &[f64]) -> Result<(), ChainError> {
        if slots.len() != weights.len() {
            return Err(ChainError::Rpc(format!(
                "{} slots but {} weights",
                slots.len(),
                weights.len()
            )));
        }
        let nonzero = weights.iter().filter(|w| **w > 0.0).count();
        info!(
            slots = slots.len(),
            nonzero,
            top = ?top_weights(slots, weights, TOP_K_SUMMARY),
            "emitter: dry run, weights not submitted"
        );
        Ok(())
    }
}

/// Up to `k` `(slot, weight)` pairs with the largest positive weight.
fn top_weights(slots: &[Slot], weights: &[f64], k: usize) -> Vec<(Slot, f64)> {
    let mut pairs: Vec<(Slot, f64)> = slots
        .iter()
        .copied()
        .zip(weights.iter().copied())
        .filter(|(_, w)| *w > 0.0)
        .collect();
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    pairs.truncate(k);
    pairs
}
