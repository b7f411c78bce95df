//! Tracker Configuration
//!
//! Settings are read from environment variables, optionally seeded from a `.env`
//! file. Only the API key, tracked address and treasury address are required.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::autotweet::{
    AutoTweetSettings, DEFAULT_CHECK_INTERVAL_SECS, MAX_CHECK_INTERVAL_SECS,
    MIN_CHECK_INTERVAL_SECS,
};
use crate::cache::DEFAULT_TTL_SECS;
use crate::source::{
    PageLimits, DEFAULT_BASE_URL, DEFAULT_MAX_PAGES, DEFAULT_PAGE_DELAY_MS, DEFAULT_PAGE_SIZE,
    REQUEST_TIMEOUT_SECS,
};
use crate::tracker::TrackRequest;

/// Default network name
pub const DEFAULT_NETWORK: &str = "finney";

/// Default CORS origin (the dashboard dev server)
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Default log level when `RUST_LOG` is unset
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Failed to read env file: {0}")]
    EnvFile(#[from] dotenv::Error),
}

/// Full runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub api_key: String,
    pub tracked_address: String,
    pub treasury_address: String,
    pub network: String,
    pub base_url: String,
    pub page_size: usize,
    pub max_pages: u32,
    pub page_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub bind_addr: SocketAddr,
    pub allowed_origin: String,
    pub auto_tweet: AutoTweetSettings,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            tracked_address: String::new(),
            treasury_address: String::new(),
            network: DEFAULT_NETWORK.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            page_delay_ms: DEFAULT_PAGE_DELAY_MS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            cache_ttl_secs: DEFAULT_TTL_SECS,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            auto_tweet: AutoTweetSettings::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
        }
    }
}

impl TrackerConfig {
    /// Load from the process environment, after applying `.env` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from `path`, with real environment variables taking precedence
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut file_vars = HashMap::new();
        for item in dotenv::from_path_iter(path.as_ref())? {
            let (key, value) = item?;
            file_vars.insert(key, value);
        }
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file_vars.get(key).cloned()))
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let auto_tweet = AutoTweetSettings {
            enabled: parse_bool(&get, "AUTO_TWEET_ENABLED", defaults.auto_tweet.enabled)?,
            check_interval_seconds: parse(
                &get,
                "AUTO_TWEET_INTERVAL_SECS",
                DEFAULT_CHECK_INTERVAL_SECS,
            )?,
            min_amount_tao: parse(
                &get,
                "AUTO_TWEET_MIN_AMOUNT_TAO",
                defaults.auto_tweet.min_amount_tao,
            )?,
            test_mode: parse_bool(&get, "AUTO_TWEET_TEST_MODE", defaults.auto_tweet.test_mode)?,
        };
        let interval_range = MIN_CHECK_INTERVAL_SECS..=MAX_CHECK_INTERVAL_SECS;
        if !interval_range.contains(&auto_tweet.check_interval_seconds) {
            return Err(invalid("AUTO_TWEET_INTERVAL_SECS", auto_tweet.check_interval_seconds));
        }
        if !auto_tweet.min_amount_tao.is_finite() || auto_tweet.min_amount_tao < 0.0 {
            return Err(invalid("AUTO_TWEET_MIN_AMOUNT_TAO", auto_tweet.min_amount_tao));
        }

        let config = Self {
            api_key: require(&get, "TAOSTATS_API_KEY")?,
            tracked_address: require(&get, "TRACKED_ADDRESS")?,
            treasury_address: require(&get, "TREASURY_ADDRESS")?,
            network: get("NETWORK").unwrap_or(defaults.network),
            base_url: get("TAOSTATS_BASE_URL").unwrap_or(defaults.base_url),
            page_size: parse(&get, "PAGE_LIMIT", defaults.page_size)?,
            max_pages: parse(&get, "MAX_PAGES", defaults.max_pages)?,
            page_delay_ms: parse(&get, "PAGE_DELAY_MS", defaults.page_delay_ms)?,
            request_timeout_secs: parse(
                &get,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            cache_ttl_secs: parse(&get, "CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            bind_addr: parse(&get, "BIND_ADDR", defaults.bind_addr)?,
            allowed_origin: get("ALLOWED_ORIGIN").unwrap_or(defaults.allowed_origin),
            auto_tweet,
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: parse_bool(&get, "LOG_JSON", defaults.log_json)?,
        };

        if config.page_size == 0 {
            return Err(invalid("PAGE_LIMIT", config.page_size));
        }
        if config.max_pages == 0 {
            return Err(invalid("MAX_PAGES", config.max_pages));
        }

        Ok(config)
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            max_pages: self.max_pages,
            page_size: self.page_size,
            page_delay: Duration::from_millis(self.page_delay_ms),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Request used when `/track` query parameters are omitted
    pub fn default_request(&self) -> TrackRequest {
        TrackRequest {
            api_key: self.api_key.clone(),
            address: self.tracked_address.clone(),
            network: self.network.clone(),
            treasury: self.treasury_address.clone(),
        }
    }
}

fn invalid(key: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn require<G>(get: &G, key: &'static str) -> Result<String, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key).ok_or(ConfigError::Missing(key))
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| invalid(key, raw)),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => Ok(false),
        Some(v) => Err(invalid(key, v)),
    }
}
