//! Shoal validator binary.
//!
//! Loads configuration, wires the vote API and chain RPC clients, then runs a
//! scoring period every 10–20 minutes until Ctrl+C.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use shoal_validator_lib::config::default_config_path;
use shoal_validator_lib::{Validator, ValidatorConfig};

/// Shoal validator: stake-voted, liquidity-weighted scoring.
#[derive(Parser, Debug)]
#[command(
    name = "shoal-validator",
    version,
    about = "Scores liquidity providers from governance votes and on-chain liquidity"
)]
struct Args {
    /// Config file (TOML). Defaults to <config dir>/shoal/validator.toml if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Vote API base URL, or "offline"
    #[arg(long)]
    vote_endpoint: Option<String>,

    /// Chain-query JSON-RPC endpoint
    #[arg(long)]
    chain_rpc: Option<String>,

    /// Score-state file to resume from and save to
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Give the full reward to slot 0 instead of scoring
    #[arg(long)]
    burn: bool,

    /// Log weights instead of submitting them
    #[arg(long)]
    no_emit: bool,

    /// Run a single period and exit
    #[arg(long)]
    once: bool,
}

impl Args {
    /// Load the layered config, then apply CLI overrides.
    fn into_config(self) -> Result<(ValidatorConfig, String, bool)> {
        let path = self
            .config
            .or_else(|| default_config_path().filter(|p| p.exists()));
        let mut config = ValidatorConfig::load(path.as_deref())
            .with_context(|| format!("failed to load config from {path:?}"))?;

        if let Some(endpoint) = self.vote_endpoint {
            config.vote_endpoint = endpoint;
        }
        if let Some(url) = self.chain_rpc {
            config.chain_rpc_url = url;
        }
        if let Some(state_path) = self.state_path {
            config.state_path = Some(state_path);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.burn {
            config.burn_mode = true;
        }
        if self.no_emit {
            config.emit_weights = false;
        }
        config.validate().context("invalid configuration")?;
        Ok((config, self.log_format, self.once))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, log_format, once) = Args::parse().into_config()?;

    init_logging(&config.log_level, &log_format);

    info!("Shoal validator v{}", env!("CARGO_PKG_VERSION"));
    info!(
        vote_endpoint = %config.vote_endpoint,
        chain_rpc = %config.chain_rpc_url,
        primary_sub_market = config.primary_sub_market,
        active_sub_markets = ?config.active_sub_markets,
        burn_mode = config.burn_mode,
        emit_weights = config.emit_weights,
        "configuration loaded"
    );

    let validator = Validator::from_config(config).context("failed to start validator")?;

    if once {
        let report = validator.run_period().await;
        validator.save_state().context("failed to save score state")?;
        let report = report.context("period failed")?;
        info!(
            step = report.step,
            outcome = report.outcome.label(),
            top = ?report.top,
            "single period complete"
        );
        return Ok(());
    }

    info!("Shoal validator running (Ctrl+C to stop)");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down...");
    };

    tokio::select! {
        _ = validator.run_forever() => {
            info!("period loop exited");
        }
        _ = shutdown_signal => {
            info!("shutdown signal received");
        }
    }

    if let Err(e) = validator.save_state() {
        error!("failed to save score state: {}", e);
    }
    info!("Shoal validator shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
