//! JSON-RPC access to the chain-query service.
//!
//! [`ChainQueryApi`] describes the `chain_*` methods; the macro generates both
//! the client extension used by [`RpcChainGateway`] and a server trait that
//! tests and local tooling can implement.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use jsonrpsee::core::{ClientError, RpcResult};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::proc_macros::rpc;
use tracing::{debug, info};

use shoal_core::error::ChainError;
use shoal_core::traits::{ChainGateway, WeightEmitter};
use shoal_core::types::{
    Identity, IdentityBinding, LiquidityPosition, LiquiditySubnet, Slot, SubMarketId,
};

/// Chain-query JSON-RPC interface.
#[rpc(client, server, namespace = "chain")]
pub trait ChainQueryApi {
    /// Current price of `sub_market` in reference units, `null` if unknown.
    #[method(name = "currentPrice")]
    async fn current_price(
        &self,
        sub_market: SubMarketId,
        block: Option<u64>,
    ) -> RpcResult<Option<f64>>;

    /// Positions of `sub_market` grouped by owner identity.
    #[method(name = "liquidityPositions")]
    async fn liquidity_positions(
        &self,
        sub_market: SubMarketId,
        block: Option<u64>,
    ) -> RpcResult<BTreeMap<Identity, Vec<LiquidityPosition>>>;

    /// `(slot, identity)` pairs of the participants of `sub_market`.
    #[method(name = "identitySlots")]
    async fn identity_slots(
        &self,
        sub_market: SubMarketId,
        block: Option<u64>,
    ) -> RpcResult<Vec<(Slot, Identity)>>;

    /// Submit normalized weights; quantization happens service-side.
    #[method(name = "submitWeights")]
    async fn submit_weights(
        &self,
        sub_market: SubMarketId,
        slots: Vec<Slot>,
        weights: Vec<f64>,
    ) -> RpcResult<bool>;
}

fn rpc_error(e: ClientError) -> ChainError {
    match e {
        ClientError::RequestTimeout => ChainError::Timeout,
        ClientError::ParseError(e) => ChainError::InvalidResponse(e.to_string()),
        other => ChainError::Rpc(other.to_string()),
    }
}

/// [`ChainGateway`] and [`WeightEmitter`] over the chain-query service.
pub struct RpcChainGateway {
    client: HttpClient,
    primary_sub_market: SubMarketId,
    active_sub_markets: Vec<SubMarketId>,
}

impl RpcChainGateway {
    pub fn new(
        url: &str,
        primary_sub_market: SubMarketId,
        active_sub_markets: Vec<SubMarketId>,
        request_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let client = HttpClientBuilder::default()
            .request_timeout(request_timeout)
            .build(url)
            .map_err(rpc_error)?;
        info!(
            %url,
            primary_sub_market,
            active = active_sub_markets.len(),
            "chain rpc: client ready"
        );
        Ok(Self {
            client,
            primary_sub_market,
            active_sub_markets,
        })
    }

    pub fn active_sub_markets(&self) -> &[SubMarketId] {
        &self.active_sub_markets
    }
}

#[async_trait]
impl ChainGateway for RpcChainGateway {
    async fn current_price(
        &self,
        sub_market: SubMarketId,
        at_block: Option<u64>,
    ) -> Result<Option<f64>, ChainError> {
        ChainQueryApiClient::current_price(&self.client, sub_market, at_block)
            .await
            .map_err(rpc_error)
    }

    async fn fetch_liquidity(
        &self,
        sub_market: Option<SubMarketId>,
        at_block: Option<u64>,
    ) -> Result<Vec<LiquiditySubnet>, ChainError> {
        let targets: Vec<SubMarketId> = match sub_market {
            Some(id) if !self.active_sub_markets.contains(&id) => {
                return Err(ChainError::InactiveSubMarket(id));
            }
            Some(id) => vec![id],
            None => self.active_sub_markets.clone(),
        };

        let mut subnets = Vec::with_capacity(targets.len());
        for id in targets {
            let positions = self
                .client
                .liquidity_positions(id, at_block)
                .await
                .map_err(rpc_error)?;
            let subnet = LiquiditySubnet {
                sub_market: id,
                positions,
            };
            debug!(
                sub_market = id,
                identities = subnet.unique_identities(),
                positions = subnet.total_positions(),
                "chain rpc: fetched liquidity"
            );
            subnets.push(subnet);
        }
        Ok(subnets)
    }

    async fn identity_slots(&self, at_block: Option<u64>) -> Result<IdentityBinding, ChainError> {
        let pairs =
            ChainQueryApiClient::identity_slots(&self.client, self.primary_sub_market, at_block)
                .await
                .map_err(rpc_error)?;
        Ok(IdentityBinding::from_pairs(pairs))
    }
}

#[async_trait]
impl WeightEmitter for RpcChainGateway {
    async fn emit(&self, slots: &[Slot], weights: &[f64]) -> Result<(), ChainError> {
        if slots.len() != weights.len() {
            return Err(ChainError::Rpc(format!(
                "{} slots but {} weights",
                slots.len(),
                weights.len()
            )));
        }
        let accepted = self
            .client
            .submit_weights(self.primary_sub_market, slots.to_vec(), weights.to_vec())
            .await
            .map_err(rpc_error)?;
        if !accepted {
            return Err(ChainError::Rpc("weights rejected".to_string()));
        }
        info!(slots = slots.len(), "chain rpc: weights submitted");
        Ok(())
    }
}
