use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taoflow_tracker::autotweet::{AutoTweetMonitor, LogPoster};
use taoflow_tracker::cache::TtlCache;
use taoflow_tracker::config::TrackerConfig;
use taoflow_tracker::server::{build_router, serve, AppState};
use taoflow_tracker::source::{TaostatsClient, TransferSource};
use taoflow_tracker::tracker::TrackService;

#[tokio::main]
async fn main() -> Result<()> {
    let config = TrackerConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.log_level, config.log_json);

    info!(
        address = %config.tracked_address,
        network = %config.network,
        cache_ttl_secs = config.cache_ttl_secs,
        "Starting TAO transfer tracker"
    );

    let client = TaostatsClient::new(&config.base_url, config.request_timeout())
        .context("failed to build indexer client")?;
    let source: Arc<dyn TransferSource> = Arc::new(client);

    let tracker = Arc::new(TrackService::new(
        Arc::clone(&source),
        Arc::new(TtlCache::with_system_clock()),
        config.page_limits(),
        config.cache_ttl(),
    ));

    let monitor = Arc::new(AutoTweetMonitor::new(
        source,
        Arc::new(LogPoster),
        config.default_request(),
        config.page_limits(),
        config.auto_tweet.clone(),
    ));
    if config.auto_tweet.enabled {
        monitor.start();
    }

    let state = AppState::new(tracker, Arc::clone(&monitor), config.default_request());
    let router = build_router(state, &config.allowed_origin)?;

    serve(router, config.bind_addr, shutdown_signal()).await?;

    monitor.stop();
    info!("Tracker stopped");
    Ok(())
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Could not listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
