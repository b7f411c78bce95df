//! HTTP Wire Types
//!
//! JSON bodies exchanged between the API server and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::autotweet::{AutoTweetSettings, TweetRecord};
use crate::cache::EntryStatus;
use crate::classifier::{ClassifiedResult, TransferRecord, TransferSummary};
use crate::tracker::{TrackError, TrackRequest};

/// Optional `/track` query parameters; unset fields fall back to server defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackQuery {
    pub api_key: Option<String>,
    pub address: Option<String>,
    pub network: Option<String>,
    pub treasury: Option<String>,
}

impl TrackQuery {
    /// Fill unset or blank fields from `defaults`
    pub fn resolve(&self, defaults: &TrackRequest) -> TrackRequest {
        let pick = |value: &Option<String>, fallback: &String| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| fallback.clone())
        };
        TrackRequest {
            api_key: pick(&self.api_key, &defaults.api_key),
            address: pick(&self.address, &defaults.address),
            network: pick(&self.network, &defaults.network),
            treasury: pick(&self.treasury, &defaults.treasury),
        }
    }

    /// Set fields as query pairs
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("api_key", &self.api_key),
            ("address", &self.address),
            ("network", &self.network),
            ("treasury", &self.treasury),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_deref().map(|v| (k, v)))
        .collect()
    }
}

/// One transfer as shown on the dashboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxSummary {
    pub extrinsic_id: Option<String>,
    pub from_ss58: String,
    pub to_ss58: String,
    /// TAO, rounded to 4 decimal places
    pub amount: f64,
    pub timestamp: Option<String>,
}

impl From<&TransferRecord> for TxSummary {
    fn from(record: &TransferRecord) -> Self {
        Self {
            extrinsic_id: record.extrinsic_id.clone(),
            from_ss58: record.from_address.clone(),
            to_ss58: record.to_address.clone(),
            amount: record.display_amount(),
            timestamp: record.timestamp.clone(),
        }
    }
}

/// Body of `GET /track`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackResponse {
    pub summary: TransferSummary,
    pub solana_to_bittensor: Vec<TxSummary>,
    pub bittensor_to_solana: Vec<TxSummary>,
}

impl From<&ClassifiedResult> for TrackResponse {
    fn from(result: &ClassifiedResult) -> Self {
        Self {
            summary: result.summary.clone(),
            solana_to_bittensor: result.inbound.iter().map(TxSummary::from).collect(),
            bittensor_to_solana: result.outbound.iter().map(TxSummary::from).collect(),
        }
    }
}

impl TrackResponse {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Machine-readable error kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    AutoTweetRateLimited,
    Upstream,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

/// Error body: `{ "error": { "kind": ..., "message": ... } }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

impl From<&TrackError> for ErrorBody {
    fn from(err: &TrackError) -> Self {
        let kind = match err {
            TrackError::RateLimited(_) => ErrorKind::RateLimited,
            TrackError::AutoTweetRateLimited(_) => ErrorKind::AutoTweetRateLimited,
            TrackError::Upstream(_) => ErrorKind::Upstream,
        };
        Self {
            error: ErrorDetail {
                kind,
                message: err.message().to_string(),
            },
        }
    }
}

impl From<ErrorBody> for TrackError {
    fn from(body: ErrorBody) -> Self {
        let ErrorDetail { kind, message } = body.error;
        match kind {
            ErrorKind::RateLimited => TrackError::RateLimited(message),
            ErrorKind::AutoTweetRateLimited => TrackError::AutoTweetRateLimited(message),
            ErrorKind::Upstream => TrackError::Upstream(message),
        }
    }
}

/// Body of `POST /tweet`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TweetResponse {
    pub status: String,
    pub tweet_preview: String,
}

/// Body of `POST /autotweet/toggle`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToggleResponse {
    pub status: String,
    pub enabled: bool,
}

/// Partial update accepted by `POST /autotweet/settings`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SettingsUpdate {
    pub check_interval_seconds: Option<u64>,
    pub min_amount_tao: Option<f64>,
    pub test_mode: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingsResponse {
    pub message: String,
    pub settings: AutoTweetSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnownTransactions {
    pub transfers_in: usize,
    pub transfers_out: usize,
}

/// Body of `GET /autotweet/status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoTweetStatus {
    pub enabled: bool,
    pub check_interval_seconds: u64,
    pub min_amount_tao: f64,
    pub test_mode: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub known_transactions: KnownTransactions,
    pub recent_tweets: usize,
    pub last_tweet: Option<TweetRecord>,
}

/// Body of `GET /autotweet/history`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryResponse {
    pub total_tweets: usize,
    pub history: Vec<TweetRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

/// Body of `GET /cache-status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStatusResponse {
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_seconds: Option<u64>,
    pub cache_duration_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_refresh_in_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CacheStatusResponse {
    pub fn from_status(status: Option<EntryStatus>, ttl_secs: u64) -> Self {
        match status {
            None => Self {
                cached: false,
                cache_valid: None,
                last_updated: None,
                cache_age_seconds: None,
                cache_duration_seconds: ttl_secs,
                next_refresh_in_seconds: None,
                message: Some("No data cached yet".to_string()),
            },
            Some(s) => Self {
                cached: true,
                cache_valid: Some(s.valid),
                last_updated: Some(s.created_at),
                cache_age_seconds: Some(s.age.as_secs()),
                cache_duration_seconds: ttl_secs,
                next_refresh_in_seconds: Some(s.refresh_in.as_secs()),
                message: None,
            },
        }
    }
}
