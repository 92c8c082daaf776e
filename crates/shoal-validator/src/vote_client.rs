//! HTTP client for the vote API.
//!
//! `GET {endpoint}/votes/latest` returns a JSON list of votes with string
//! sub-market keys. Entries are parsed into [`Vote`] here; anything that does
//! not fit is dropped with a warning. With the `offline` endpoint no request
//! is made and a fixed, equal-weight vote set is returned instead.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use shoal_core::constants::{
    MAX_VOTER_IDENTITY_LEN, MIN_VOTER_IDENTITY_LEN, OFFLINE_VOTE_BLOCK_HEIGHT,
    OFFLINE_VOTE_ENDPOINT, OFFLINE_VOTE_STAKE, OFFLINE_VOTER_COUNT,
};
use shoal_core::error::VoteError;
use shoal_core::traits::VoteSource;
use shoal_core::types::{SubMarketId, Vote};

/// Request timeout for the vote API.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One entry of `/votes/latest` as served.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiVote {
    pub voter_hotkey: String,
    pub block_height: u64,
    #[serde(default)]
    pub voter_stake: Option<f64>,
    pub weights: BTreeMap<String, f64>,
}

impl TryFrom<ApiVote> for Vote {
    type Error = VoteError;

    fn try_from(api: ApiVote) -> Result<Self, Self::Error> {
        let voter = api.voter_hotkey.trim().to_string();
        if !(MIN_VOTER_IDENTITY_LEN..=MAX_VOTER_IDENTITY_LEN).contains(&voter.len()) {
            return Err(VoteError::Malformed(format!(
                "voter identity length {} outside {MIN_VOTER_IDENTITY_LEN}..={MAX_VOTER_IDENTITY_LEN}",
                voter.len()
            )));
        }
        if api.weights.is_empty() {
            return Err(VoteError::Malformed(format!("{voter}: empty weights")));
        }
        let mut weights = BTreeMap::new();
        for (key, weight) in api.weights {
            let sub_market: SubMarketId = key
                .trim()
                .parse()
                .map_err(|_| VoteError::Malformed(format!("{voter}: bad sub-market id {key:?}")))?;
            weights.insert(sub_market, weight);
        }
        Ok(Vote {
            block_height: api.block_height,
            voter,
            voter_stake: api.voter_stake.unwrap_or(0.0),
            weights,
        })
    }
}

/// Parse a `/votes/latest` body, dropping entries that fail validation.
pub fn parse_votes(body: &str) -> Result<Vec<Vote>, VoteError> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(body).map_err(|e| VoteError::Malformed(e.to_string()))?;
    let mut votes = Vec::with_capacity(entries.len());
    for entry in entries {
        let parsed = serde_json::from_value::<ApiVote>(entry)
            .map_err(|e| VoteError::Malformed(e.to_string()))
            .and_then(Vote::try_from);
        match parsed {
            Ok(vote) => votes.push(vote),
            Err(e) => warn!(error = %e, "votes api: dropping malformed entry"),
        }
    }
    Ok(votes)
}

/// Deterministic votes used when no vote API is configured.
///
/// Every offline voter has the same stake and splits it evenly across
/// `sub_markets`.
pub fn offline_votes(sub_markets: &[SubMarketId]) -> Vec<Vote> {
    if sub_markets.is_empty() {
        return Vec::new();
    }
    let share = 1.0 / sub_markets.len() as f64;
    let weights: BTreeMap<SubMarketId, f64> = sub_markets.iter().map(|&id| (id, share)).collect();
    (0..OFFLINE_VOTER_COUNT)
        .map(|i| Vote {
            block_height: OFFLINE_VOTE_BLOCK_HEIGHT,
            voter: format!("offline-voter-{i:02}"),
            voter_stake: OFFLINE_VOTE_STAKE,
            weights: weights.clone(),
        })
        .collect()
}

enum Mode {
    Online {
        client: reqwest::Client,
        url: String,
    },
    Offline { sub_markets: Vec<SubMarketId> },
}

/// [`VoteSource`] over the vote API.
pub struct HttpVoteSource {
    mode: Mode,
}

impl HttpVoteSource {
    /// `offline_sub_markets` is only used when `endpoint` is the offline sentinel.
    pub fn new(endpoint: &str, offline_sub_markets: Vec<SubMarketId>) -> Result<Self, VoteError> {
        if endpoint.trim().eq_ignore_ascii_case(OFFLINE_VOTE_ENDPOINT) {
            warn!("votes api: offline mode, returning fixed votes");
            return Ok(Self {
                mode: Mode::Offline {
                    sub_markets: offline_sub_markets,
                },
            });
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VoteError::Transport(e.to_string()))?;
        let url = format!("{}/votes/latest", endpoint.trim_end_matches('/'));
        info!(%url, "votes api: online mode");
        Ok(Self {
            mode: Mode::Online { client, url },
        })
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.mode, Mode::Offline { .. })
    }
}

#[async_trait]
impl VoteSource for HttpVoteSource {
    async fn latest_votes(&self) -> Result<Vec<Vote>, VoteError> {
        let (client, url) = match &self.mode {
            Mode::Offline { sub_markets } => return Ok(offline_votes(sub_markets)),
            Mode::Online { client, url } => (client, url),
        };
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| VoteError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(VoteError::Status(status.as_u16()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| VoteError::Transport(e.to_string()))?;
        let votes = parse_votes(&body)?;
        debug!(count = votes.len(), "votes api: fetched votes");
        Ok(votes)
    }
}
