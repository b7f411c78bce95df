//! Taostats Source Client
//!
//! Fetches paginated TAO transfer records for one address from the Taostats indexer.
//! Pages are fetched sequentially and a call is all-or-nothing: a failure on any page
//! discards everything fetched before it.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Default Taostats API root
pub const DEFAULT_BASE_URL: &str = "https://api.taostats.io/api";

/// Records requested per page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Upper bound on pages fetched per call
pub const DEFAULT_MAX_PAGES: u32 = 5;

/// Pause between consecutive page requests
pub const DEFAULT_PAGE_DELAY_MS: u64 = 500;

/// Per-request timeout
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// A transfer record exactly as the indexer returned it.
///
/// Records stay untyped until classification so a single malformed record
/// can be skipped without failing the whole page.
pub type RawRecord = Value;

/// Errors that can occur while fetching from the indexer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Indexer rate limit exceeded (HTTP 429)")]
    RateLimited,

    #[error("Indexer rejected the API key (HTTP {0})")]
    Unauthorized(u16),

    #[error("Network error: {0}")]
    Network(String),
}

impl SourceError {
    /// Whether the indexer throttled the request
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SourceError::RateLimited)
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        match err.status().and_then(status_error) {
            Some(mapped) => mapped,
            None => SourceError::Network(err.to_string()),
        }
    }
}

/// Map an HTTP status to a source error, `None` for success
pub fn status_error(status: StatusCode) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SourceError::Unauthorized(status.as_u16())
        }
        other => SourceError::Network(format!("HTTP {}", other)),
    })
}

/// Pagination bounds for one fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLimits {
    /// Maximum number of pages to request
    pub max_pages: u32,
    /// Records per page; a shorter page marks the end of data
    pub page_size: usize,
    /// Delay slept between pages
    pub page_delay: Duration,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            page_size: DEFAULT_PAGE_SIZE,
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
        }
    }
}

impl PageLimits {
    /// Same limits with no inter-page delay
    pub fn without_delay(self) -> Self {
        Self {
            page_delay: Duration::ZERO,
            ..self
        }
    }
}

/// A paginated source of transfer records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferSource: Send + Sync {
    /// Fetch one 1-based page of transfers touching `address`
    async fn fetch_page(
        &self,
        api_key: &str,
        address: &str,
        network: &str,
        page: u32,
        limit: usize,
    ) -> Result<Vec<RawRecord>, SourceError>;
}

/// Fetch up to `limits.max_pages` pages sequentially.
///
/// Stops early on a page shorter than `limits.page_size`. Any page failure is
/// returned as-is and the pages already fetched are dropped.
pub async fn fetch_pages<S: TransferSource + ?Sized>(
    source: &S,
    api_key: &str,
    address: &str,
    network: &str,
    limits: &PageLimits,
) -> Result<Vec<RawRecord>, SourceError> {
    let mut records = Vec::new();

    for page in 1..=limits.max_pages {
        let batch = source
            .fetch_page(api_key, address, network, page, limits.page_size)
            .await
            .map_err(|e| {
                warn!(page, error = %e, "Transfer page fetch failed, discarding partial results");
                e
            })?;

        let count = batch.len();
        records.extend(batch);
        debug!(page, count, "Fetched transfer page");

        if count < limits.page_size {
            break;
        }
        if page < limits.max_pages && !limits.page_delay.is_zero() {
            sleep(limits.page_delay).await;
        }
    }

    info!(address, network, records = records.len(), "Fetched transfers from indexer");
    Ok(records)
}

/// Response envelope of `/transfer/v1`
#[derive(Debug, Deserialize)]
struct TransferPage {
    #[serde(default)]
    data: Vec<RawRecord>,
}

/// HTTP client for the Taostats transfer endpoint
#[derive(Debug, Clone)]
pub struct TaostatsClient {
    http: reqwest::Client,
    base_url: String,
}

impl TaostatsClient {
    /// Create a client against `base_url` with the given request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a client against the public Taostats API
    pub fn with_default_url() -> Result<Self, SourceError> {
        Self::new(DEFAULT_BASE_URL, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    /// Get the API root this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn transfers_url(&self) -> String {
        format!("{}/transfer/v1", self.base_url)
    }
}

#[async_trait]
impl TransferSource for TaostatsClient {
    async fn fetch_page(
        &self,
        api_key: &str,
        address: &str,
        network: &str,
        page: u32,
        limit: usize,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let response = self
            .http
            .get(self.transfers_url())
            .header("accept", "application/json")
            .header("Authorization", api_key)
            .query(&[
                ("network", network.to_string()),
                ("address", address.to_string()),
                ("limit", limit.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await?;

        if let Some(err) = status_error(response.status()) {
            return Err(err);
        }

        // A `null` body means there is nothing past this page
        let body: Option<TransferPage> = response
            .json()
            .await
            .map_err(|e| SourceError::Network(format!("Invalid transfer page: {}", e)))?;

        Ok(body.map(|p| p.data).unwrap_or_default())
    }
}
