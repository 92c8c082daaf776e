//! Validator configuration.
//!
//! [`ValidatorConfig`] is layered: built-in defaults, then an optional TOML
//! file, then `SHOAL_*` environment variables (`__` separates nested keys,
//! e.g. `SHOAL_RETRY__MAX_TRIES=3`). CLI flags override the result.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use shoal_core::constants::{
    DEFAULT_ACTIVE_SUB_MARKETS, DEFAULT_EMA_ALPHA, DEFAULT_MAX_CONCURRENCY,
    DEFAULT_MAX_INTERVAL_SECS, DEFAULT_MIN_INTERVAL_SECS, DEFAULT_PRICE_TIMEOUT_SECS,
    DEFAULT_PRIMARY_SUB_MARKET,
};
use shoal_core::error::ConfigError;
use shoal_core::types::SubMarketId;
use shoal_scoring::LiquidityPolicy;

use crate::retry::RetryPolicy;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SHOAL";

/// Configuration for one validator process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Base URL of the vote API, or `offline` for deterministic local votes.
    pub vote_endpoint: String,
    /// JSON-RPC endpoint of the chain-query service.
    pub chain_rpc_url: String,
    /// Sub-market whose participant set defines the scoring universe.
    pub primary_sub_market: SubMarketId,
    /// Sub-markets whose liquidity is scored.
    pub active_sub_markets: Vec<SubMarketId>,
    /// Position filters.
    pub liquidity: LiquidityPolicy,
    /// Upper bound on in-flight price lookups.
    pub max_concurrency: usize,
    /// Deadline for the whole price batch.
    pub price_timeout_secs: u64,
    pub retry: RetryPolicy,
    /// EMA smoothing factor in `(0, 1]`.
    pub alpha: f64,
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    /// Where to persist the score accumulator between runs.
    pub state_path: Option<PathBuf>,
    /// Submit weights after every period.
    pub emit_weights: bool,
    /// Skip scoring and give the full reward to slot 0.
    pub burn_mode: bool,
    /// Log level filter string (e.g. "info", "shoal_validator_lib=debug").
    pub log_level: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            vote_endpoint: "http://127.0.0.1:8000".to_string(),
            chain_rpc_url: "http://127.0.0.1:9944".to_string(),
            primary_sub_market: DEFAULT_PRIMARY_SUB_MARKET,
            active_sub_markets: DEFAULT_ACTIVE_SUB_MARKETS.to_vec(),
            liquidity: LiquidityPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            price_timeout_secs: DEFAULT_PRICE_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
            alpha: DEFAULT_EMA_ALPHA,
            min_interval_secs: DEFAULT_MIN_INTERVAL_SECS,
            max_interval_secs: DEFAULT_MAX_INTERVAL_SECS,
            state_path: None,
            emit_weights: true,
            burn_mode: false,
            log_level: "info".to_string(),
        }
    }
}

impl ValidatorConfig {
    /// Load defaults ← `path` ← `SHOAL_*` environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, environment())
    }

    /// [`load`](Self::load) with an explicit environment source.
    pub fn load_with_env(
        path: Option<&Path>,
        env: ::config::Environment,
    ) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let cfg: Self = builder
            .add_source(env)
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "alpha",
                reason: format!("{} is outside (0, 1]", self.alpha),
            });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.price_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "price_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.min_interval_secs > self.max_interval_secs {
            return Err(ConfigError::Invalid {
                field: "min_interval_secs",
                reason: format!(
                    "{} exceeds max_interval_secs {}",
                    self.min_interval_secs, self.max_interval_secs
                ),
            });
        }
        let width = self.liquidity.min_relative_width;
        if !width.is_finite() || width < 0.0 {
            return Err(ConfigError::Invalid {
                field: "liquidity.min_relative_width",
                reason: format!("{width} must be finite and non-negative"),
            });
        }
        if self.retry.max_tries == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_tries",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Whether votes come from the built-in offline set.
    pub fn is_offline(&self) -> bool {
        self.vote_endpoint
            .eq_ignore_ascii_case(shoal_core::constants::OFFLINE_VOTE_ENDPOINT)
    }
}

/// `SHOAL_*` environment source.
pub fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("active_sub_markets")
        .try_parsing(true)
}

/// `<config dir>/shoal/validator.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("shoal").join("validator.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> ::config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = ValidatorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.alpha, 0.1);
        assert_eq!(cfg.max_concurrency, 5);
        assert_eq!(cfg.retry.max_tries, 5);
        assert!(cfg.liquidity.count_only_in_range);
        assert_eq!(cfg.liquidity.min_relative_width, 0.0);
        assert_eq!((cfg.min_interval_secs, cfg.max_interval_secs), (600, 1200));
    }

    #[test]
    fn empty_sources_give_defaults() {
        let cfg = ValidatorConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(cfg, ValidatorConfig::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let file = toml_file(
            r#"
vote_endpoint = "offline"
alpha = 0.25
active_sub_markets = [3, 4]

[liquidity]
min_relative_width = 0.05

[retry]
max_tries = 2
"#,
        );
        let cfg = ValidatorConfig::load_with_env(Some(file.path()), env(&[])).unwrap();
        assert!(cfg.is_offline());
        assert_eq!(cfg.alpha, 0.25);
        assert_eq!(cfg.active_sub_markets, vec![3, 4]);
        assert_eq!(cfg.liquidity.min_relative_width, 0.05);
        assert!(cfg.liquidity.count_only_in_range);
        assert_eq!(cfg.retry.max_tries, 2);
        assert_eq!(cfg.retry.initial_backoff_ms, 2_000);
    }

    #[test]
    fn env_overrides_file() {
        let file = toml_file("alpha = 0.25\n");
        let cfg = ValidatorConfig::load_with_env(
            Some(file.path()),
            env(&[
                ("SHOAL_ALPHA", "0.5"),
                ("SHOAL_RETRY__MAX_TRIES", "7"),
                ("SHOAL_ACTIVE_SUB_MARKETS", "1,2,9"),
                ("SHOAL_BURN_MODE", "true"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.alpha, 0.5);
        assert_eq!(cfg.retry.max_tries, 7);
        assert_eq!(cfg.active_sub_markets, vec![1, 2, 9]);
        assert!(cfg.burn_mode);
    }

    #[test]
    fn missing_file_is_load_error() {
        let err = ValidatorConfig::load_with_env(
            Some(Path::new("/nonexistent/shoal/validator.toml")),
            env(&[]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn invalid_values_rejected() {
        let cases: Vec<(ValidatorConfig, &str)> = vec![
            (
                ValidatorConfig {
                    alpha: 0.0,
                    ..Default::default()
                },
                "alpha",
            ),
            (
                ValidatorConfig {
                    alpha: 1.5,
                    ..Default::default()
                },
                "alpha",
            ),
            (
                ValidatorConfig {
                    alpha: f64::NAN,
                    ..Default::default()
                },
                "alpha",
            ),
            (
                ValidatorConfig {
                    max_concurrency: 0,
                    ..Default::default()
                },
                "max_concurrency",
            ),
            (
                ValidatorConfig {
                    price_timeout_secs: 0,
                    ..Default::default()
                },
                "price_timeout_secs",
            ),
            (
                ValidatorConfig {
                    min_interval_secs: 10,
                    max_interval_secs: 5,
                    ..Default::default()
                },
                "min_interval_secs",
            ),
            (
                ValidatorConfig {
                    liquidity: LiquidityPolicy {
                        count_only_in_range: true,
                        min_relative_width: -0.1,
                    },
                    ..Default::default()
                },
                "liquidity.min_relative_width",
            ),
        ];
        for (cfg, expected) in cases {
            match cfg.validate() {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected invalid {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn alpha_of_one_is_allowed() {
        let cfg = ValidatorConfig {
            alpha: 1.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn offline_sentinel_is_case_insensitive() {
        let cfg = ValidatorConfig {
            vote_endpoint: "OFFLINE".into(),
            ..Default::default()
        };
        assert!(cfg.is_offline());
        assert!(!ValidatorConfig::default().is_offline());
    }

    #[test]
    fn default_config_path_ends_with_file_name() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("shoal/validator.toml"));
        }
    }
}
