//! # shoal-validator — Period orchestration, chain RPC, vote API.
//!
//! Wires the scoring pipeline to its collaborators:
//! - [`validator::Validator`] — fetch, score, update and emit, once per period
//! - [`chain_rpc::RpcChainGateway`] — JSON-RPC chain-query client and weight submitter
//! - [`vote_client::HttpVoteSource`] — vote API client with an offline mode
//! - [`prices::fetch_prices`] — bounded concurrent price lookup
//! - [`config::ValidatorConfig`] — layered configuration

pub mod chain_rpc;
pub mod config;
pub mod emitter;
pub mod prices;
pub mod retry;
pub mod state;
pub mod validator;
pub mod vote_client;

pub use chain_rpc::RpcChainGateway;
pub use config::ValidatorConfig;
pub use emitter::LogEmitter;
pub use retry::RetryPolicy;
pub use state::{load_state, save_state};
pub use validator::{PeriodError, PeriodReport, Validator};
pub use vote_client::HttpVoteSource;
