//! Tracker HTTP Client
//!
//! Talks to a running tracker server over HTTP so a [`Poller`](crate::poller::Poller)
//! can run out of process.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::poller::TrackApi;
use crate::tracker::TrackError;
use crate::wire::{AutoTweetStatus, ErrorBody, TrackQuery, TrackResponse};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Message prefix older servers use to flag a rate limit hit while the
/// auto-tweet monitor is active
pub const LEGACY_AUTO_TWEET_PREFIX: &str = "RATE_LIMIT_AUTO_TWEET:";

/// Turn a non-success response into a [`TrackError`].
///
/// Structured bodies are decoded by kind. Anything else is checked for the
/// legacy auto-tweet prefix, then falls back to the HTTP status and a
/// "rate limit" substring check.
pub fn decode_error(status: StatusCode, body: &str) -> TrackError {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.into();
    }

    let message = if body.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        body.to_string()
    };

    if let Some(rest) = message.trim_start().strip_prefix(LEGACY_AUTO_TWEET_PREFIX) {
        return TrackError::AutoTweetRateLimited(rest.trim().to_string());
    }

    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || message.to_lowercase().contains("rate limit");
    if rate_limited {
        TrackError::RateLimited(message)
    } else {
        TrackError::Upstream(message)
    }
}

#[derive(Debug, Clone)]
pub struct HttpTrackClient {
    http: reqwest::Client,
    base_url: String,
    query: TrackQuery,
}

impl HttpTrackClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            query: TrackQuery::default(),
        })
    }

    pub fn with_query(mut self, query: TrackQuery) -> Self {
        self.query = query;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn into_api(self) -> Arc<dyn TrackApi> {
        Arc::new(self)
    }
}

#[async_trait]
impl TrackApi for HttpTrackClient {
    async fn track(&self) -> Result<Arc<TrackResponse>, TrackError> {
        let response = self
            .http
            .get(format!("{}/track", self.base_url))
            .query(&self.query.pairs())
            .send()
            .await
            .map_err(|e| TrackError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = decode_error(status, &body);
            debug!(%status, error = %err, "Track request failed");
            return Err(err);
        }

        response
            .json::<TrackResponse>()
            .await
            .map(Arc::new)
            .map_err(|e| TrackError::Upstream(format!("Invalid track response: {}", e)))
    }

    async fn auto_tweet_status(&self) -> Option<AutoTweetStatus> {
        let result = self
            .http
            .get(format!("{}/autotweet/status", self.base_url))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(response) => response.json().await.ok(),
            Err(e) => {
                warn!(error = %e, "Could not fetch auto-tweet status");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== decode_error tests ====================

    #[test]
    fn test_decode_structured_body() {
        let body = r#"{"error":{"kind":"auto_tweet_rate_limited","message":"rate limit"}}"#;
        let err = decode_error(StatusCode::TOO_MANY_REQUESTS, body);
        assert!(matches!(err, TrackError::AutoTweetRateLimited(_)));
    }

    #[test]
    fn test_decode_structured_upstream() {
        let body = r#"{"error":{"kind":"upstream","message":"indexer down"}}"#;
        let err = decode_error(StatusCode::BAD_GATEWAY, body);
        assert_eq!(err, TrackError::Upstream("indexer down".into()));
    }

    #[test]
    fn test_decode_falls_back_to_status() {
        let err = decode_error(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_decode_falls_back_to_substring() {
        let err = decode_error(StatusCode::INTERNAL_SERVER_ERROR, "Rate limit exceeded");
        assert!(err.is_rate_limited());

        let err = decode_error(StatusCode::INTERNAL_SERVER_ERROR, "database gone");
        assert_eq!(err, TrackError::Upstream("database gone".into()));
    }

    #[test]
    fn test_decode_legacy_auto_tweet_prefix() {
        let body = "RATE_LIMIT_AUTO_TWEET: Taostats API rate limit reached, monitoring active";
        let err = decode_error(StatusCode::INTERNAL_SERVER_ERROR, body);
        assert_eq!(
            err,
            TrackError::AutoTweetRateLimited(
                "Taostats API rate limit reached, monitoring active".into()
            )
        );
        assert!(err.is_rate_limited());

        // the prefix wins over a plain 429
        let err = decode_error(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_AUTO_TWEET:slow down");
        assert!(matches!(err, TrackError::AutoTweetRateLimited(_)));
    }

    // ==================== HttpTrackClient tests ====================

    #[test]
    fn test_client_trims_base_url() {
        let client =
            HttpTrackClient::new("http://localhost:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }
}
