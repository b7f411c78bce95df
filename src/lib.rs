//! TaoFlow Tracker Library
//!
//! This crate provides components for tracking TAO transfers between a bridge address
//! and Solana: fetching transfer pages from the Taostats indexer, classifying them by
//! direction, caching the result, serving it over HTTP and posting about new transfers.

pub mod autotweet;
pub mod cache;
pub mod classifier;
pub mod client;
pub mod config;
pub mod poller;
pub mod server;
pub mod source;
pub mod tracker;
pub mod wire;

// Re-export commonly used types
pub use autotweet::{AutoTweetMonitor, AutoTweetSettings, LogPoster, PostError, Poster};
pub use cache::{Clock, ManualClock, SystemClock, TtlCache};
pub use classifier::{classify, ClassifiedResult, Direction, TransferRecord, TransferSummary};
pub use client::HttpTrackClient;
pub use config::{ConfigError, TrackerConfig};
pub use poller::{PollState, Poller, PollerHandle, TrackApi};
pub use server::{build_router, AppState};
pub use source::{fetch_pages, PageLimits, SourceError, TaostatsClient, TransferSource};
pub use tracker::{TrackError, TrackRequest, TrackService};
pub use wire::{ErrorBody, TrackResponse};
