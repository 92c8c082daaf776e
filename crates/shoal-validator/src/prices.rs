//! Concurrent price lookup for one period.
//!
//! One task per sub-market, at most `max_concurrency` in flight, the whole
//! batch under a single deadline. A lookup that errors, times out, or returns
//! a non-finite or non-positive price leaves its sub-market out of the result.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use shoal_core::traits::ChainGateway;
use shoal_core::types::SubMarketId;

/// Usable prices keyed by sub-market.
pub async fn fetch_prices(
    gateway: Arc<dyn ChainGateway>,
    sub_markets: &BTreeSet<SubMarketId>,
    at_block: Option<u64>,
    max_concurrency: usize,
    timeout: Duration,
) -> BTreeMap<SubMarketId, f64> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for &sub_market in sub_markets {
        let gateway = Arc::clone(&gateway);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            (sub_market, gateway.current_price(sub_market, at_block).await)
        });
    }

    let mut prices = BTreeMap::new();
    let collect = async {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((sub_market, Ok(Some(price)))) if price.is_finite() && price > 0.0 => {
                    debug!(sub_market, price, "prices: fetched");
                    prices.insert(sub_market, price);
                }
                Ok((sub_market, Ok(Some(price)))) => {
                    warn!(sub_market, price, "prices: unusable price");
                }
                Ok((sub_market, Ok(None))) => {
                    debug!(sub_market, "prices: no price on chain");
                }
                Ok((sub_market, Err(e))) => {
                    warn!(sub_market, error = %e, "prices: lookup failed");
                }
                Err(e) => {
                    warn!(error = %e, "prices: lookup task failed");
                }
            }
        }
    };

    if tokio::time::timeout(timeout, collect).await.is_err() {
        warn!(
            timeout_ms = timeout.as_millis() as u64,
            pending = tasks.len(),
            "prices: batch deadline hit, cancelling remaining lookups"
        );
        tasks.abort_all();
    }

    info!(requested = sub_markets.len(), priced = prices.len(), "prices: batch complete");
    prices
}
