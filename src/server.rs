//! HTTP API
//!
//! axum router exposing tracking, cache status and auto-post controls.

use axum::extract::{Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::autotweet::{preview, summary_post, AutoTweetMonitor};
use crate::source::TransferSource;
use crate::tracker::{TrackError, TrackRequest, TrackService};
use crate::wire::{
    AutoTweetStatus, CacheStatusResponse, ErrorBody, HealthResponse, HistoryResponse,
    SettingsResponse, SettingsUpdate, ToggleResponse, TrackQuery, TrackResponse, TweetResponse,
};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid allowed origin {0:?}")]
    InvalidOrigin(String),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<TrackService<dyn TransferSource>>,
    pub monitor: Arc<AutoTweetMonitor<dyn TransferSource>>,
    /// Used for any `/track` parameter the caller omits
    pub defaults: TrackRequest,
}

impl AppState {
    pub fn new(
        tracker: Arc<TrackService<dyn TransferSource>>,
        monitor: Arc<AutoTweetMonitor<dyn TransferSource>>,
        defaults: TrackRequest,
    ) -> Self {
        Self {
            tracker,
            monitor,
            defaults,
        }
    }
}

/// A [`TrackError`] rendered as a structured JSON response
#[derive(Debug)]
pub struct ApiError(pub TrackError);

impl From<TrackError> for ApiError {
    fn from(err: TrackError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_rate_limited() {
            StatusCode::TOO_MANY_REQUESTS
        } else {
            StatusCode::BAD_GATEWAY
        };
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

pub fn build_router(state: AppState, allowed_origin: &str) -> Result<Router, ServerError> {
    let origin = HeaderValue::from_str(allowed_origin)
        .map_err(|_| ServerError::InvalidOrigin(allowed_origin.to_string()))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Ok(Router::new()
        .route("/health", get(health))
        .route("/track", get(track))
        .route("/tweet", post(tweet))
        .route("/cache-status", get(cache_status))
        .route("/autotweet/status", get(autotweet_status))
        .route("/autotweet/toggle", post(autotweet_toggle))
        .route("/autotweet/settings", post(autotweet_settings))
        .route("/autotweet/history", get(autotweet_history))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn serve<F>(router: Router, addr: SocketAddr, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "API server listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "TAO transfer tracker is running".to_string(),
    })
}

async fn track(
    State(state): State<AppState>,
    Query(query): Query<TrackQuery>,
) -> Result<Json<TrackResponse>, ApiError> {
    let request = query.resolve(&state.defaults);
    let result = state
        .tracker
        .track(&request)
        .await
        .map_err(|e| e.with_monitoring(state.monitor.is_enabled()))?;
    Ok(Json(TrackResponse::from(result.as_ref())))
}

async fn tweet(
    State(state): State<AppState>,
    Query(query): Query<TrackQuery>,
) -> Result<Json<TweetResponse>, ApiError> {
    let request = query.resolve(&state.defaults);
    let result = state
        .tracker
        .track(&request)
        .await
        .map_err(|e| e.with_monitoring(state.monitor.is_enabled()))?;

    let text = summary_post(&result);
    let tweet_preview = preview(&text);

    let monitor = Arc::clone(&state.monitor);
    tokio::spawn(async move {
        monitor.publish(&text).await;
    });

    Ok(Json(TweetResponse {
        status: "Tweet posting in background".to_string(),
        tweet_preview,
    }))
}

async fn cache_status(
    State(state): State<AppState>,
    Query(query): Query<TrackQuery>,
) -> Json<CacheStatusResponse> {
    let request = query.resolve(&state.defaults);
    let status = state.tracker.cache_status(&request.address, &request.network);
    Json(CacheStatusResponse::from_status(status, state.tracker.ttl().as_secs()))
}

async fn autotweet_status(State(state): State<AppState>) -> Json<AutoTweetStatus> {
    Json(state.monitor.status())
}

async fn autotweet_toggle(State(state): State<AppState>) -> Json<ToggleResponse> {
    let enabled = state.monitor.toggle();
    let status = if enabled { "Auto-tweet enabled" } else { "Auto-tweet disabled" };
    Json(ToggleResponse {
        status: status.to_string(),
        enabled,
    })
}

async fn autotweet_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Json<SettingsResponse> {
    let settings = state.monitor.update_settings(&update);
    Json(SettingsResponse {
        message: "Settings updated".to_string(),
        settings,
    })
}

async fn autotweet_history(State(state): State<AppState>) -> Json<HistoryResponse> {
    let history = state.monitor.history();
    Json(HistoryResponse {
        total_tweets: history.len(),
        history,
    })
}
