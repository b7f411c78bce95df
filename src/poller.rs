//! Dashboard Poller
//!
//! Client-side state machine that loads tracked transfers once, keeps the last good
//! data through rate limits and retries on a fixed interval while degraded.
//!
//! ```text
//! Loading ──ok──────────▶ Ready ◀──retry ok── PartialError
//!    │                      │                      ▲
//!    ├──rate limited────────┼──────rate limited────┘
//!    └──other error──▶ Failed
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::source::TransferSource;
use crate::tracker::{TrackError, TrackRequest, TrackService};
use crate::wire::{AutoTweetStatus, TrackResponse};

/// Retry interval while degraded
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Anything that can answer a track query for the poller
#[async_trait]
pub trait TrackApi: Send + Sync {
    async fn track(&self) -> Result<Arc<TrackResponse>, TrackError>;

    /// Auto-post monitor status, when the backend exposes one
    async fn auto_tweet_status(&self) -> Option<AutoTweetStatus> {
        None
    }
}

/// What the dashboard should show
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Loading,
    Ready {
        data: Arc<TrackResponse>,
    },
    /// Rate limited; last good data (if any) stays on screen
    PartialError {
        data: Option<Arc<TrackResponse>>,
        message: String,
    },
    /// Full error screen
    Failed {
        message: String,
    },
}

impl PollState {
    pub fn data(&self) -> Option<&Arc<TrackResponse>> {
        match self {
            PollState::Ready { data } => Some(data),
            PollState::PartialError { data, .. } => data.as_ref(),
            PollState::Loading | PollState::Failed { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            PollState::PartialError { message, .. } | PollState::Failed { message } => {
                Some(message)
            }
            PollState::Loading | PollState::Ready { .. } => None,
        }
    }

    pub fn is_partial_error(&self) -> bool {
        matches!(self, PollState::PartialError { .. })
    }
}

/// Poll state machine over a [`TrackApi`]
pub struct Poller<A: ?Sized> {
    api: Arc<A>,
    state: PollState,
    auto_tweet: Option<AutoTweetStatus>,
}

impl<A: TrackApi + ?Sized> Poller<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            state: PollState::Loading,
            auto_tweet: None,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn auto_tweet(&self) -> Option<&AutoTweetStatus> {
        self.auto_tweet.as_ref()
    }

    /// Initial load
    pub async fn mount(&mut self) -> &PollState {
        self.auto_tweet = self.api.auto_tweet_status().await;
        self.refresh().await
    }

    /// Manual refresh: always calls the API and applies the result
    pub async fn refresh(&mut self) -> &PollState {
        let result = self.api.track().await;
        self.apply(result);
        &self.state
    }

    /// Timer tick: retries only while in `PartialError`
    pub async fn tick(&mut self) -> &PollState {
        if !self.state.is_partial_error() {
            return &self.state;
        }

        match self.api.track().await {
            Ok(data) => {
                info!("Retry succeeded, data refreshed");
                self.state = PollState::Ready { data };
            }
            Err(e) if e.is_rate_limited() => {
                debug!("Still rate limited, keeping current data");
            }
            Err(e) => {
                warn!(error = %e, "Background retry failed");
            }
        }
        &self.state
    }

    fn apply(&mut self, result: Result<Arc<TrackResponse>, TrackError>) {
        self.state = match result {
            Ok(data) => PollState::Ready { data },
            Err(e) if e.is_rate_limited() => PollState::PartialError {
                data: self.state.data().cloned(),
                message: e.message().to_string(),
            },
            Err(e) => PollState::Failed { message: e.to_string() },
        };
    }
}

/// [`TrackApi`] backed directly by an in-process [`TrackService`]
pub struct ServiceApi<S: ?Sized> {
    service: Arc<TrackService<S>>,
    request: TrackRequest,
}

impl<S: ?Sized> ServiceApi<S> {
    pub fn new(service: Arc<TrackService<S>>, request: TrackRequest) -> Self {
        Self { service, request }
    }
}

#[async_trait]
impl<S: TransferSource + ?Sized + 'static> TrackApi for ServiceApi<S> {
    async fn track(&self) -> Result<Arc<TrackResponse>, TrackError> {
        let result = self.service.track(&self.request).await?;
        Ok(Arc::new(TrackResponse::from(result.as_ref())))
    }
}

/// Poller running on its own task, ticking every `interval`
pub struct PollerHandle<A: ?Sized> {
    poller: Arc<Mutex<Poller<A>>>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl<A: TrackApi + ?Sized + 'static> PollerHandle<A> {
    /// Mount immediately, then tick every `interval`
    pub fn spawn(api: Arc<A>, interval: Duration) -> Self {
        let poller = Arc::new(Mutex::new(Poller::new(api)));
        let (shutdown, mut stopped) = watch::channel(false);

        let task_poller = Arc::clone(&poller);
        let task = tokio::spawn(async move {
            task_poller.lock().await.mount().await;

            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            debug!("Poller stopped");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        task_poller.lock().await.tick().await;
                    }
                }
            }
        });

        Self {
            poller,
            shutdown,
            task: Some(task),
        }
    }

    pub async fn state(&self) -> PollState {
        self.poller.lock().await.state().clone()
    }

    pub async fn refresh(&self) -> PollState {
        self.poller.lock().await.refresh().await.clone()
    }

    /// Stop scheduling further ticks; an in-flight call still completes
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop and wait for the task to finish
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl<A: ?Sized> Drop for PollerHandle<A> {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
