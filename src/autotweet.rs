//! Auto-Tweet Monitor
//!
//! Background loop that polls the indexer directly, detects transfers it has not seen
//! before and hands a short post for each one to a [`Poster`]. The social platform
//! itself sits behind the `Poster` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::classifier::{classify, ClassifiedResult, Direction, TransferRecord, TransferSummary};
use crate::source::{fetch_pages, PageLimits, SourceError, TransferSource};
use crate::tracker::TrackRequest;
use crate::wire::{AutoTweetStatus, KnownTransactions, SettingsUpdate};

/// Minimum allowed check interval
pub const MIN_CHECK_INTERVAL_SECS: u64 = 30;

/// Maximum allowed check interval (one day)
pub const MAX_CHECK_INTERVAL_SECS: u64 = 86_400;

/// Default check interval
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

/// Non-rate-limit failures in a row before the monitor disables itself
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Rate-limit backoff grows by this much per consecutive error
pub const RATE_LIMIT_BACKOFF_STEP_SECS: u64 = 60;

/// Rate-limit backoff ceiling
pub const MAX_RATE_LIMIT_BACKOFF_SECS: u64 = 300;

/// Extra delay per consecutive error added to the regular interval
pub const ERROR_DELAY_STEP_SECS: u64 = 30;

/// Pause between consecutive posts
pub const POST_SPACING_SECS: u64 = 5;

/// Tweet history retained
pub const MAX_HISTORY: usize = 20;

/// Characters kept in a history preview
pub const PREVIEW_CHARS: usize = 100;

/// Monitor settings, adjustable at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoTweetSettings {
    pub enabled: bool,
    pub check_interval_seconds: u64,
    pub min_amount_tao: f64,
    /// Log posts instead of sending them
    pub test_mode: bool,
}

impl Default for AutoTweetSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: DEFAULT_CHECK_INTERVAL_SECS,
            min_amount_tao: 0.0,
            test_mode: false,
        }
    }
}

impl AutoTweetSettings {
    /// Apply a partial update, ignoring out-of-range values
    pub fn apply(&mut self, update: &SettingsUpdate) {
        if let Some(interval) = update.check_interval_seconds {
            if (MIN_CHECK_INTERVAL_SECS..=MAX_CHECK_INTERVAL_SECS).contains(&interval) {
                self.check_interval_seconds = interval;
            } else {
                warn!(interval, "Ignoring check interval outside allowed range");
            }
        }
        if let Some(min_amount) = update.min_amount_tao {
            if min_amount.is_finite() && min_amount >= 0.0 {
                self.min_amount_tao = min_amount;
            } else {
                warn!(min_amount, "Ignoring invalid minimum amount");
            }
        }
        if let Some(test_mode) = update.test_mode {
            self.test_mode = test_mode;
        }
    }
}

/// Backoff after `consecutive_errors` rate limits in a row
pub fn rate_limit_backoff(consecutive_errors: u32) -> Duration {
    let secs = RATE_LIMIT_BACKOFF_STEP_SECS.saturating_mul(u64::from(consecutive_errors));
    Duration::from_secs(secs.min(MAX_RATE_LIMIT_BACKOFF_SECS))
}

/// Delay before the next regular check
pub fn next_check_delay(interval_secs: u64, consecutive_errors: u32) -> Duration {
    let penalty = ERROR_DELAY_STEP_SECS.saturating_mul(u64::from(consecutive_errors));
    Duration::from_secs(interval_secs.saturating_add(penalty))
}

/// Errors a poster can report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PostError {
    #[error("Social platform rate limit reached")]
    RateLimited,

    #[error("Post failed: {0}")]
    Failed(String),
}

/// Publishes post text to a social platform
#[async_trait]
pub trait Poster: Send + Sync {
    /// Publish `text`, returning the platform's post id when it provides one
    async fn post(&self, text: &str) -> Result<Option<String>, PostError>;
}

/// Poster that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPoster;

#[async_trait]
impl Poster for LogPoster {
    async fn post(&self, text: &str) -> Result<Option<String>, PostError> {
        info!(preview = %preview(text), "Posting update");
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TweetStatus {
    TestSuccess,
    Posted,
    RateLimited,
    Failed,
}

/// One attempted post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweetRecord {
    pub timestamp: DateTime<Utc>,
    pub status: TweetStatus,
    pub text: String,
    pub preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// First `PREVIEW_CHARS` characters, with an ellipsis when cut
pub fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 6..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        address.to_string()
    }
}

/// Plain summary post for `POST /tweet`
pub fn summary_post(result: &ClassifiedResult) -> String {
    let summary = &result.summary;
    let mut text = format!(
        "Transaction Tracker Update\nAfter filtering: {} txs\nIn ({}): {}\nOut ({}): {}",
        summary.total_after_filter,
        Direction::Inbound.route(),
        summary.transfers_in_count,
        Direction::Outbound.route(),
        summary.transfers_out_count,
    );
    for (label, bucket) in [("IN", &result.inbound), ("OUT", &result.outbound)] {
        if let Some(tx) = bucket.first() {
            text.push_str(&format!(
                "\n\nExample {}:\n{} → {} | {} TAO",
                label,
                short_address(&tx.from_address),
                short_address(&tx.to_address),
                tx.display_amount()
            ));
        }
    }
    text
}

/// Post announcing one newly seen transfer
pub fn transfer_post(
    record: &TransferRecord,
    direction: Direction,
    totals: &TransferSummary,
) -> String {
    let link = match (&record.extrinsic_id, record.block_number) {
        (Some(id), _) => format!("\nTransaction: https://taostats.io/extrinsic/{}", id),
        (None, Some(block)) => format!("\nBlock: https://taostats.io/block/{}", block),
        (None, None) => String::new(),
    };
    format!(
        "New transfer detected: {} TAO ({})\n{} → {}\n\
         Totals: Bittensor → Solana {} TAO, Solana → Bittensor {} TAO{}",
        record.display_amount(),
        direction.route(),
        short_address(&record.from_address),
        short_address(&record.to_address),
        totals.total_out_tao,
        totals.total_in_tao,
        link
    )
}

/// Result of one monitor pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    pub new_inbound: usize,
    pub new_outbound: usize,
    pub posted: usize,
}

#[derive(Debug, Default)]
struct MonitorState {
    settings: AutoTweetSettings,
    known_in: HashSet<String>,
    known_out: HashSet<String>,
    last_check: Option<DateTime<Utc>>,
    history: VecDeque<TweetRecord>,
}

impl MonitorState {
    /// Replace the known sets with `result`, returning transfers not seen before
    fn absorb(&mut self, result: &ClassifiedResult) -> (Vec<TransferRecord>, Vec<TransferRecord>) {
        let new_in = unseen(&result.inbound, &self.known_in);
        let new_out = unseen(&result.outbound, &self.known_out);
        self.known_in = result.inbound.iter().map(TransferRecord::fingerprint).collect();
        self.known_out = result.outbound.iter().map(TransferRecord::fingerprint).collect();
        self.last_check = Some(Utc::now());
        (new_in, new_out)
    }
}

fn unseen(records: &[TransferRecord], known: &HashSet<String>) -> Vec<TransferRecord> {
    records
        .iter()
        .filter(|r| !known.contains(&r.fingerprint()))
        .cloned()
        .collect()
}

/// Watches the tracked address and posts about new transfers
pub struct AutoTweetMonitor<S: ?Sized> {
    source: Arc<S>,
    poster: Arc<dyn Poster>,
    request: TrackRequest,
    limits: PageLimits,
    post_spacing: Duration,
    state: Mutex<MonitorState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: TransferSource + ?Sized + 'static> AutoTweetMonitor<S> {
    pub fn new(
        source: Arc<S>,
        poster: Arc<dyn Poster>,
        request: TrackRequest,
        limits: PageLimits,
        settings: AutoTweetSettings,
    ) -> Self {
        Self {
            source,
            poster,
            request,
            limits,
            post_spacing: Duration::from_secs(POST_SPACING_SECS),
            state: Mutex::new(MonitorState {
                settings,
                ..Default::default()
            }),
            task: Mutex::new(None),
        }
    }

    /// Override the pause between posts
    pub fn with_post_spacing(mut self, spacing: Duration) -> Self {
        self.post_spacing = spacing;
        self
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> AutoTweetSettings {
        self.state().settings.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.state().settings.enabled
    }

    fn set_enabled(&self, enabled: bool) {
        self.state().settings.enabled = enabled;
    }

    pub fn update_settings(&self, update: &SettingsUpdate) -> AutoTweetSettings {
        let mut state = self.state();
        state.settings.apply(update);
        state.settings.clone()
    }

    pub fn status(&self) -> AutoTweetStatus {
        let state = self.state();
        AutoTweetStatus {
            enabled: state.settings.enabled,
            check_interval_seconds: state.settings.check_interval_seconds,
            min_amount_tao: state.settings.min_amount_tao,
            test_mode: state.settings.test_mode,
            last_check: state.last_check,
            known_transactions: KnownTransactions {
                transfers_in: state.known_in.len(),
                transfers_out: state.known_out.len(),
            },
            recent_tweets: state.history.len(),
            last_tweet: state.history.back().cloned(),
        }
    }

    pub fn history(&self) -> Vec<TweetRecord> {
        self.state().history.iter().cloned().collect()
    }

    async fn fetch(&self) -> Result<ClassifiedResult, SourceError> {
        let req = &self.request;
        let raw = fetch_pages(
            self.source.as_ref(),
            &req.api_key,
            &req.address,
            &req.network,
            &self.limits,
        )
        .await?;
        Ok(classify(&raw, &req.address, &req.treasury))
    }

    /// Record the current transfers as known without posting anything
    pub async fn seed(&self) -> Result<(), SourceError> {
        let result = self.fetch().await?;
        self.state().absorb(&result);
        info!(
            transfers_in = result.inbound.len(),
            transfers_out = result.outbound.len(),
            "Initialized known transfers"
        );
        Ok(())
    }

    /// One monitor pass: fetch, diff against known transfers, post the new ones
    pub async fn check_once(&self) -> Result<CheckOutcome, SourceError> {
        let result = self.fetch().await?;
        let (new_in, new_out, min_amount) = {
            let mut state = self.state();
            let (new_in, new_out) = state.absorb(&result);
            (new_in, new_out, state.settings.min_amount_tao)
        };

        info!(
            transfers_in = result.inbound.len(),
            transfers_out = result.outbound.len(),
            new_in = new_in.len(),
            new_out = new_out.len(),
            "Transfer check complete"
        );

        let mut outcome = CheckOutcome {
            new_inbound: new_in.len(),
            new_outbound: new_out.len(),
            posted: 0,
        };

        let fresh = new_in
            .iter()
            .map(|r| (r, Direction::Inbound))
            .chain(new_out.iter().map(|r| (r, Direction::Outbound)))
            .filter(|(r, _)| r.amount >= min_amount);

        for (record, direction) in fresh {
            if outcome.posted > 0 && !self.post_spacing.is_zero() {
                sleep(self.post_spacing).await;
            }
            self.publish(&transfer_post(record, direction, &result.summary)).await;
            outcome.posted += 1;
        }

        Ok(outcome)
    }

    /// Publish `text` (or only log it in test mode) and record the attempt
    pub async fn publish(&self, text: &str) -> TweetRecord {
        let test_mode = self.state().settings.test_mode;

        let (status, post_id, error) = if test_mode {
            info!(preview = %preview(text), "Test mode, not posting");
            (TweetStatus::TestSuccess, None, None)
        } else {
            match self.poster.post(text).await {
                Ok(id) => (TweetStatus::Posted, id, None),
                Err(PostError::RateLimited) => {
                    warn!("Social platform rate limit reached, skipping post");
                    (TweetStatus::RateLimited, None, Some(PostError::RateLimited.to_string()))
                }
                Err(e) => {
                    error!(error = %e, "Failed to post");
                    (TweetStatus::Failed, None, Some(e.to_string()))
                }
            }
        };

        let record = TweetRecord {
            timestamp: Utc::now(),
            status,
            text: text.to_string(),
            preview: preview(text),
            post_id,
            error,
        };

        let mut state = self.state();
        state.history.push_back(record.clone());
        while state.history.len() > MAX_HISTORY {
            state.history.pop_front();
        }
        record
    }

    /// Monitor loop; returns once disabled
    pub async fn run(self: Arc<Self>) {
        let seeded = self.state().last_check.is_some();
        if !seeded {
            if let Err(e) = self.seed().await {
                warn!(error = %e, "Failed to initialize known transfers, will retry on next check");
            }
            sleep(next_check_delay(self.settings().check_interval_seconds, 0)).await;
        }

        let mut consecutive_errors: u32 = 0;

        while self.is_enabled() {
            match self.check_once().await {
                Ok(outcome) => {
                    consecutive_errors = 0;
                    debug!(?outcome, "Monitor pass finished");
                }
                Err(SourceError::RateLimited) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let wait = rate_limit_backoff(consecutive_errors);
                    warn!(attempt = consecutive_errors, ?wait, "Rate limited, backing off");
                    sleep(wait).await;
                    continue;
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    error!(attempt = consecutive_errors, error = %e, "Monitor check failed");
                }
            }

            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                error!(consecutive_errors, "Too many consecutive errors, disabling auto-tweet");
                self.set_enabled(false);
                break;
            }

            let interval = self.settings().check_interval_seconds;
            sleep(next_check_delay(interval, consecutive_errors)).await;
        }

        info!("Auto-tweet monitor stopped");
    }

    /// Spawn the monitor loop unless one is already running
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        *task = Some(tokio::spawn(Arc::clone(self).run()));
        info!("Auto-tweet monitor started");
        true
    }

    /// Abort the monitor loop if it is running
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
            info!("Auto-tweet monitor stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Flip `enabled`, starting or stopping the loop to match
    pub fn toggle(self: &Arc<Self>) -> bool {
        let enabled = {
            let mut state = self.state();
            state.settings.enabled = !state.settings.enabled;
            state.settings.enabled
        };
        if enabled {
            self.start();
        } else {
            self.stop();
        }
        enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockTransferSource;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TRACKED: &str = "5TrackedBridgeAddressxxxxxxxxxxxxxxxxxxxxxxxxx";

    #[derive(Default)]
    struct RecordingPoster {
        posts: Mutex<Vec<String>>,
        fail_with: Option<PostError>,
    }

    #[async_trait]
    impl Poster for RecordingPoster {
        async fn post(&self, text: &str) -> Result<Option<String>, PostError> {
            self.posts.lock().unwrap().push(text.to_string());
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(Some("42".to_string())),
            }
        }
    }

    fn inbound(extrinsic: &str, planck: &str) -> Value {
        json!({
            "extrinsic_id": extrinsic,
            "from": { "ss58": "5SolanaRelay" },
            "to": { "ss58": TRACKED },
            "amount": planck
        })
    }

    fn outbound(extrinsic: &str, planck: &str) -> Value {
        json!({
            "extrinsic_id": extrinsic,
            "from": { "ss58": TRACKED },
            "to": { "ss58": "5SolanaRelay" },
            "amount": planck
        })
    }

    fn monitor_with(
        pages: Vec<Vec<Value>>,
        poster: Arc<RecordingPoster>,
        settings: AutoTweetSettings,
    ) -> AutoTweetMonitor<MockTransferSource> {
        let mut source = MockTransferSource::new();
        let mut pages = VecDeque::from(pages);
        source
            .expect_fetch_page()
            .returning(move |_, _, _, _, _| Ok(pages.pop_front().unwrap_or_default()));
        let request = TrackRequest {
            api_key: "key".into(),
            address: TRACKED.into(),
            network: "finney".into(),
            treasury: "5Treasury".into(),
        };
        let limits = PageLimits {
            max_pages: 1,
            page_size: 50,
            page_delay: Duration::ZERO,
        };
        AutoTweetMonitor::new(Arc::new(source), poster, request, limits, settings)
            .with_post_spacing(Duration::ZERO)
    }

    /// Monitor checking every 30s whose indexer answers call `n` with `respond(n)`
    fn counting_monitor<F>(
        respond: F,
    ) -> (Arc<AutoTweetMonitor<MockTransferSource>>, Arc<AtomicUsize>)
    where
        F: Fn(usize) -> Result<Vec<Value>, SourceError> + Send + 'static,
    {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut source = MockTransferSource::new();
        source
            .expect_fetch_page()
            .returning(move |_, _, _, _, _| respond(counter.fetch_add(1, Ordering::SeqCst)));
        let settings = AutoTweetSettings {
            check_interval_seconds: MIN_CHECK_INTERVAL_SECS,
            ..Default::default()
        };
        let limits = PageLimits {
            max_pages: 1,
            page_size: 50,
            page_delay: Duration::ZERO,
        };
        let monitor = AutoTweetMonitor::new(
            Arc::new(source),
            Arc::new(LogPoster),
            TrackRequest {
                api_key: "key".into(),
                address: TRACKED.into(),
                network: "finney".into(),
                treasury: "5Treasury".into(),
            },
            limits,
            settings,
        );
        (Arc::new(monitor), calls)
    }

    // ==================== settings tests ====================

    #[test]
    fn test_settings_default() {
        let settings = AutoTweetSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.check_interval_seconds, 60);
        assert_eq!(settings.min_amount_tao, 0.0);
        assert!(!settings.test_mode);
    }

    #[test]
    fn test_settings_ignore_short_interval_and_negative_amount() {
        let mut settings = AutoTweetSettings::default();
        settings.apply(&SettingsUpdate {
            check_interval_seconds: Some(10),
            min_amount_tao: Some(-1.0),
            test_mode: None,
        });
        assert_eq!(settings.check_interval_seconds, 60);
        assert_eq!(settings.min_amount_tao, 0.0);
    }

    #[test]
    fn test_settings_ignore_interval_above_maximum() {
        let mut settings = AutoTweetSettings::default();
        settings.apply(&SettingsUpdate {
            check_interval_seconds: Some(u64::MAX),
            min_amount_tao: Some(f64::NAN),
            test_mode: None,
        });
        assert_eq!(settings.check_interval_seconds, 60);
        assert_eq!(settings.min_amount_tao, 0.0);

        settings.apply(&SettingsUpdate {
            check_interval_seconds: Some(MAX_CHECK_INTERVAL_SECS),
            min_amount_tao: None,
            test_mode: None,
        });
        assert_eq!(settings.check_interval_seconds, MAX_CHECK_INTERVAL_SECS);
    }

    #[test]
    fn test_settings_accept_valid_update() {
        let mut settings = AutoTweetSettings::default();
        settings.apply(&SettingsUpdate {
            check_interval_seconds: Some(30),
            min_amount_tao: Some(2.5),
            test_mode: Some(true),
        });
        assert_eq!(settings.check_interval_seconds, 30);
        assert_eq!(settings.min_amount_tao, 2.5);
        assert!(settings.test_mode);
    }

    // ==================== backoff tests ====================

    #[test]
    fn test_rate_limit_backoff_grows_and_caps() {
        assert_eq!(rate_limit_backoff(1), Duration::from_secs(60));
        assert_eq!(rate_limit_backoff(3), Duration::from_secs(180));
        assert_eq!(rate_limit_backoff(5), Duration::from_secs(300));
        assert_eq!(rate_limit_backoff(50), Duration::from_secs(300));
    }

    #[test]
    fn test_next_check_delay_adds_error_penalty() {
        assert_eq!(next_check_delay(60, 0), Duration::from_secs(60));
        assert_eq!(next_check_delay(60, 2), Duration::from_secs(120));
    }

    #[test]
    fn test_next_check_delay_saturates() {
        assert_eq!(next_check_delay(u64::MAX, 1), Duration::from_secs(u64::MAX));
        assert_eq!(next_check_delay(u64::MAX, u32::MAX), Duration::from_secs(u64::MAX));
    }

    // ==================== formatting tests ====================

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "x".repeat(150);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
        assert!(p.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_short_address() {
        assert_eq!(short_address("5ABCDEFGHIJKLMNOP"), "5ABCDE...KLMNOP");
        assert_eq!(short_address("5ABC"), "5ABC");
    }

    #[test]
    fn test_summary_post_counts() {
        let raw = vec![inbound("1-1", "1000000000"), outbound("1-2", "2000000000")];
        let text = summary_post(&classify(&raw, TRACKED, "5Treasury"));
        assert!(text.contains("After filtering: 2 txs"));
        assert!(text.contains("Example IN"));
        assert!(text.contains("Example OUT"));
        assert!(text.contains("2 TAO"));
    }

    #[test]
    fn test_transfer_post_links_extrinsic() {
        let result = classify(&[inbound("77-3", "1000000000")], TRACKED, "5Treasury");
        let text = transfer_post(&result.inbound[0], Direction::Inbound, &result.summary);
        assert!(text.contains("https://taostats.io/extrinsic/77-3"));
        assert!(text.contains("Solana → Bittensor"));
    }

    // ==================== monitor tests ====================

    #[tokio::test]
    async fn test_seed_does_not_post() {
        let poster = Arc::new(RecordingPoster::default());
        let monitor = monitor_with(
            vec![vec![inbound("1-1", "1")]],
            poster.clone(),
            AutoTweetSettings::default(),
        );

        monitor.seed().await.unwrap();

        assert!(poster.posts.lock().unwrap().is_empty());
        let status = monitor.status();
        assert_eq!(status.known_transactions.transfers_in, 1);
        assert!(status.last_check.is_some());
    }

    #[tokio::test]
    async fn test_check_posts_only_new_transfers() {
        let poster = Arc::new(RecordingPoster::default());
        let monitor = monitor_with(
            vec![
                vec![inbound("1-1", "1000000000")],
                vec![inbound("1-1", "1000000000"), outbound("1-2", "3000000000")],
            ],
            poster.clone(),
            AutoTweetSettings::default(),
        );

        monitor.seed().await.unwrap();
        let outcome = monitor.check_once().await.unwrap();

        assert_eq!(outcome, CheckOutcome { new_inbound: 0, new_outbound: 1, posted: 1 });
        let posts = poster.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].contains("Bittensor → Solana"));
        assert_eq!(monitor.history()[0].status, TweetStatus::Posted);
        assert_eq!(monitor.history()[0].post_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_check_respects_min_amount() {
        let poster = Arc::new(RecordingPoster::default());
        let settings = AutoTweetSettings {
            min_amount_tao: 2.0,
            ..Default::default()
        };
        let monitor = monitor_with(
            vec![vec![], vec![inbound("1-1", "1000000000"), inbound("1-2", "5000000000")]],
            poster.clone(),
            settings,
        );

        monitor.seed().await.unwrap();
        let outcome = monitor.check_once().await.unwrap();

        assert_eq!(outcome.new_inbound, 2);
        assert_eq!(outcome.posted, 1);
    }

    #[tokio::test]
    async fn test_test_mode_skips_poster() {
        let poster = Arc::new(RecordingPoster::default());
        let settings = AutoTweetSettings {
            test_mode: true,
            ..Default::default()
        };
        let monitor = monitor_with(vec![], poster.clone(), settings);

        let record = monitor.publish("hello").await;

        assert_eq!(record.status, TweetStatus::TestSuccess);
        assert!(poster.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poster_rate_limit_is_recorded() {
        let poster = Arc::new(RecordingPoster {
            fail_with: Some(PostError::RateLimited),
            ..Default::default()
        });
        let monitor = monitor_with(vec![], poster, AutoTweetSettings::default());

        let record = monitor.publish("hello").await;

        assert_eq!(record.status, TweetStatus::RateLimited);
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let poster = Arc::new(RecordingPoster::default());
        let monitor = monitor_with(vec![], poster, AutoTweetSettings::default());

        for i in 0..(MAX_HISTORY + 5) {
            monitor.publish(&format!("post {}", i)).await;
        }

        let history = monitor.history();
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].text, "post 5");
        assert_eq!(monitor.status().last_tweet.unwrap().text, format!("post {}", MAX_HISTORY + 4));
    }

    #[tokio::test]
    async fn test_check_propagates_rate_limit() {
        let mut source = MockTransferSource::new();
        source
            .expect_fetch_page()
            .returning(|_, _, _, _, _| Err(SourceError::RateLimited));
        let monitor = AutoTweetMonitor::new(
            Arc::new(source),
            Arc::new(LogPoster),
            TrackRequest {
                api_key: "key".into(),
                address: TRACKED.into(),
                network: "finney".into(),
                treasury: "5Treasury".into(),
            },
            PageLimits::default().without_delay(),
            AutoTweetSettings::default(),
        );

        assert_eq!(monitor.check_once().await, Err(SourceError::RateLimited));
    }

    // ==================== run loop tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_run_disables_after_consecutive_errors() {
        let (monitor, calls) =
            counting_monitor(|_| Err(SourceError::Network("connection refused".into())));

        Arc::clone(&monitor).run().await;

        assert!(!monitor.is_enabled());
        // failed seed, then MAX_CONSECUTIVE_ERRORS failed checks
        assert_eq!(calls.load(Ordering::SeqCst), 1 + MAX_CONSECUTIVE_ERRORS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_backs_off_on_rate_limit_without_disabling() {
        let (monitor, calls) = counting_monitor(|_| Err(SourceError::RateLimited));

        let run = tokio::time::timeout(Duration::from_secs(1000), Arc::clone(&monitor).run());
        assert!(run.await.is_err(), "rate limits must not stop the loop");

        assert!(monitor.is_enabled());
        // seed at 0s, checks at 30, 90, 210, 390, 630 and 930s
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_skips_seed_when_already_seeded() {
        let (monitor, calls) = counting_monitor(|n| match n {
            0 => Ok(vec![]),
            _ => Err(SourceError::Network("connection refused".into())),
        });
        monitor.seed().await.unwrap();
        let started = tokio::time::Instant::now();

        Arc::clone(&monitor).run().await;

        assert!(!monitor.is_enabled());
        assert_eq!(calls.load(Ordering::SeqCst), 1 + MAX_CONSECUTIVE_ERRORS as usize);
        // no initial wait; penalties of 60 + 90 + 120 + 150s between the failed checks
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(420), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(450), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_toggle_stops_and_restarts() {
        let poster = Arc::new(RecordingPoster::default());
        let monitor = Arc::new(monitor_with(vec![], poster, AutoTweetSettings::default()));

        assert!(monitor.start());
        assert!(!monitor.start());
        assert!(monitor.is_running());

        assert!(!monitor.toggle());
        assert!(!monitor.is_enabled());

        assert!(monitor.toggle());
        assert!(monitor.is_running());
        monitor.stop();
    }
}
