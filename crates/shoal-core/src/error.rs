//! Error types for the Shoal pipeline.
use thiserror::Error;

use crate::types::SubMarketId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("transport: {0}")] Transport(String),
    #[error("http status {0}")] Status(u16),
    #[error("malformed response: {0}")] Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("rpc: {0}")] Rpc(String),
    #[error("invalid response: {0}")] InvalidResponse(String),
    #[error("sub-market {0} is not active")] InactiveSubMarket(SubMarketId),
    #[error("timeout")] Timeout,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValuationError {
    #[error("invalid price: {0}")] InvalidPrice(f64),
    #[error("invalid band: low={low}, high={high}")] InvalidBand { low: f64, high: f64 },
    #[error("invalid liquidity: {0}")] InvalidLiquidity(f64),
    #[error("non-finite amount")] NonFinite,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("io: {0}")] Io(String),
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("load: {0}")] Load(String),
    #[error("invalid {field}: {reason}")] Invalid { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum ShoalError {
    #[error(transparent)] Vote(#[from] VoteError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Valuation(#[from] ValuationError),
    #[error(transparent)] State(#[from] StateError),
    #[error(transparent)] Config(#[from] ConfigError),
}
