//! Track Service
//!
//! Orchestrates source fetch → classification → cache for one tracked address and
//! maps source failures onto the two user-facing error kinds.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

use crate::cache::{EntryStatus, TtlCache};
use crate::classifier::{classify, ClassifiedResult};
use crate::source::{fetch_pages, PageLimits, SourceError, TransferSource};

/// Message surfaced when the indexer throttles and nothing fresh is cached
pub const RATE_LIMIT_MESSAGE: &str =
    "Indexer API rate limit exceeded. Data will refresh automatically when rate limits clear.";

/// Message surfaced when the rate limit hits while auto-post monitoring keeps running
pub const AUTO_TWEET_RATE_LIMIT_MESSAGE: &str =
    "Indexer API rate limit exceeded. Auto-tweet monitoring is active and will continue in \
     the background. Data will refresh when rate limits clear.";

/// Cache key: one classification per tracked address and network
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub address: String,
    pub network: String,
}

impl CacheKey {
    pub fn new(address: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            network: network.into(),
        }
    }
}

/// Everything needed to track one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    pub api_key: String,
    pub address: String,
    pub network: String,
    pub treasury: String,
}

impl TrackRequest {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.address, &self.network)
    }
}

/// User-facing tracking failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackError {
    /// Indexer throttled, nothing fresh cached; retryable
    #[error("{0}")]
    RateLimited(String),

    /// Same as `RateLimited`, tagged so clients keep showing monitoring controls
    #[error("{0}")]
    AutoTweetRateLimited(String),

    /// Any other upstream failure
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl TrackError {
    /// Whether clients should keep stale data and retry quietly
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TrackError::RateLimited(_) | TrackError::AutoTweetRateLimited(_))
    }

    pub fn message(&self) -> &str {
        match self {
            TrackError::RateLimited(m)
            | TrackError::AutoTweetRateLimited(m)
            | TrackError::Upstream(m) => m,
        }
    }

    /// Re-tag a rate limit as auto-tweet aware while the monitor is running
    pub fn with_monitoring(self, monitoring_active: bool) -> Self {
        match self {
            TrackError::RateLimited(_) if monitoring_active => {
                TrackError::AutoTweetRateLimited(AUTO_TWEET_RATE_LIMIT_MESSAGE.to_string())
            }
            other => other,
        }
    }
}

impl From<SourceError> for TrackError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::RateLimited => TrackError::RateLimited(RATE_LIMIT_MESSAGE.to_string()),
            other => TrackError::Upstream(other.to_string()),
        }
    }
}

/// Read-through tracking over a shared cache
pub struct TrackService<S: ?Sized> {
    source: Arc<S>,
    cache: Arc<TtlCache<CacheKey, ClassifiedResult>>,
    limits: PageLimits,
    ttl: Duration,
}

impl<S: TransferSource + ?Sized> TrackService<S> {
    pub fn new(
        source: Arc<S>,
        cache: Arc<TtlCache<CacheKey, ClassifiedResult>>,
        limits: PageLimits,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            limits,
            ttl,
        }
    }

    /// Classified transfers for `request`, from cache while fresh.
    ///
    /// Concurrent misses for the same key each fetch independently; the last
    /// successful write wins.
    pub async fn track(&self, request: &TrackRequest) -> Result<Arc<ClassifiedResult>, TrackError> {
        let source = Arc::clone(&self.source);
        let limits = self.limits.clone();

        self.cache
            .get_or_refresh(request.cache_key(), self.ttl, move || async move {
                let raw = fetch_pages(
                    source.as_ref(),
                    &request.api_key,
                    &request.address,
                    &request.network,
                    &limits,
                )
                .await?;
                Ok::<_, SourceError>(classify(&raw, &request.address, &request.treasury))
            })
            .await
            .map_err(|e| {
                if e.is_rate_limited() {
                    warn!(
                        address = %request.address,
                        "Indexer rate limited and no fresh cache entry"
                    );
                } else {
                    error!(address = %request.address, error = %e, "Failed to refresh transfers");
                }
                TrackError::from(e)
            })
    }

    /// Cache status for one address
    pub fn cache_status(&self, address: &str, network: &str) -> Option<EntryStatus> {
        self.cache.status(&CacheKey::new(address, network), self.ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn limits(&self) -> &PageLimits {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::source::MockTransferSource;
    use serde_json::json;

    const TRACKED: &str = "5Tracked";
    const TREASURY: &str = "5Treasury";

    fn request() -> TrackRequest {
        TrackRequest {
            api_key: "key".into(),
            address: TRACKED.into(),
            network: "finney".into(),
            treasury: TREASURY.into(),
        }
    }

    fn service(source: MockTransferSource) -> (TrackService<MockTransferSource>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Arc::new(TtlCache::new(clock.clone()));
        let limits = PageLimits {
            max_pages: 5,
            page_size: 10,
            page_delay: Duration::ZERO,
        };
        (
            TrackService::new(Arc::new(source), cache, limits, Duration::from_secs(300)),
            clock,
        )
    }

    fn one_inbound() -> Vec<serde_json::Value> {
        vec![json!({
            "extrinsic_id": "1-1",
            "from": { "ss58": "5Solana" },
            "to": { "ss58": TRACKED },
            "amount": "1000000000"
        })]
    }

    // ==================== track tests ====================

    #[tokio::test]
    async fn test_track_classifies_and_caches() {
        let mut source = MockTransferSource::new();
        source
            .expect_fetch_page()
            .times(1)
            .returning(|_, _, _, _, _| Ok(one_inbound()));
        let (service, _clock) = service(source);

        let first = service.track(&request()).await.unwrap();
        let second = service.track(&request()).await.unwrap();

        assert_eq!(first.summary.transfers_in_count, 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_track_refetches_after_301_seconds() {
        let mut source = MockTransferSource::new();
        source
            .expect_fetch_page()
            .times(2)
            .returning(|_, _, _, _, _| Ok(one_inbound()));
        let (service, clock) = service(source);

        service.track(&request()).await.unwrap();
        clock.advance(Duration::from_secs(301));
        service.track(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_rate_limited() {
        let mut source = MockTransferSource::new();
        source
            .expect_fetch_page()
            .returning(|_, _, _, _, _| Err(SourceError::RateLimited));
        let (service, _clock) = service(source);

        let err = service.track(&request()).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert!(err.message().to_lowercase().contains("rate limit"));
    }

    #[tokio::test]
    async fn test_other_errors_map_to_upstream() {
        let mut source = MockTransferSource::new();
        source
            .expect_fetch_page()
            .returning(|_, _, _, _, _| Err(SourceError::Unauthorized(401)));
        let (service, _clock) = service(source);

        let err = service.track(&request()).await.unwrap_err();
        assert!(matches!(err, TrackError::Upstream(ref m) if m.contains("401")));
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_expired_entry_not_served_on_rate_limit() {
        let mut source = MockTransferSource::new();
        let mut calls = 0;
        source.expect_fetch_page().times(2).returning(move |_, _, _, _, _| {
            calls += 1;
            if calls == 1 {
                Ok(one_inbound())
            } else {
                Err(SourceError::RateLimited)
            }
        });
        let (service, clock) = service(source);

        service.track(&request()).await.unwrap();
        clock.advance(Duration::from_secs(301));
        let err = service.track(&request()).await.unwrap_err();

        assert!(matches!(err, TrackError::RateLimited(_)));
        assert!(service.cache_status(TRACKED, "finney").is_some_and(|s| !s.valid));
    }

    // ==================== TrackError tests ====================

    #[test]
    fn test_with_monitoring_tags_rate_limits_only() {
        let tagged = TrackError::RateLimited(RATE_LIMIT_MESSAGE.into()).with_monitoring(true);
        assert!(matches!(tagged, TrackError::AutoTweetRateLimited(_)));
        assert!(tagged.is_rate_limited());

        let untouched = TrackError::RateLimited(RATE_LIMIT_MESSAGE.into()).with_monitoring(false);
        assert!(matches!(untouched, TrackError::RateLimited(_)));

        let upstream = TrackError::Upstream("boom".into()).with_monitoring(true);
        assert_eq!(upstream, TrackError::Upstream("boom".into()));
    }

    #[test]
    fn test_cache_key_from_request() {
        assert_eq!(request().cache_key(), CacheKey::new(TRACKED, "finney"));
    }
}
