//! Rule configuration source with atomic snapshot swapping
//!
//! Readers call [`RuleConfigSource::current_snapshot`], which never blocks
//! and never touches the network. Writers go through
//! [`RuleConfigSource::refresh`], which fetches, compiles and swaps in a new
//! snapshot, or leaves the installed one untouched on failure.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::fetcher::RuleFetcher;
use super::snapshot::{RuleSnapshot, SnapshotOrigin};
use crate::error::{AuthzError, Result};

/// Rule source configuration
#[derive(Debug, Clone)]
pub struct RuleSourceConfig {
    /// How long a fetched snapshot stays fresh
    pub ttl: Duration,

    /// First retry delay after a failed refresh
    pub initial_backoff: Duration,

    /// Upper bound for the retry delay
    pub max_backoff: Duration,
}

impl Default for RuleSourceConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RuleSourceConfig {
    /// Read overrides from `AUTHZ_RULES_TTL_SECS`, `AUTHZ_RULES_BACKOFF_MS`
    /// and `AUTHZ_RULES_MAX_BACKOFF_SECS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl: env_parse("AUTHZ_RULES_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ttl),
            initial_backoff: env_parse("AUTHZ_RULES_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: env_parse("AUTHZ_RULES_MAX_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_backoff),
        }
    }

    /// Next retry delay after `current`
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Result of a refresh call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot was installed
    Updated { generation: u64, version: String },
    /// The fetched rules equal the installed ones
    Unchanged { version: String },
    /// Another refresh was in flight; its result was shared
    Coalesced,
}

/// Refresh counters
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshStats {
    pub successes: u64,
    pub failures: u64,
}

/// Read-only view of the external rule configuration
pub struct RuleConfigSource {
    fetcher: Arc<dyn RuleFetcher>,
    snapshot: ArcSwap<RuleSnapshot>,
    config: RuleSourceConfig,

    /// Serializes fetches; waiters piggyback on the in-flight one
    refresh_lock: tokio::sync::Mutex<()>,
    /// Completed refresh attempts, used to detect coalesced waiters
    attempts: AtomicU64,
    last_error: Mutex<Option<String>>,
    last_success: Mutex<Option<Instant>>,
    invalidated: AtomicBool,
    wake: Notify,

    successes: AtomicU64,
    failures: AtomicU64,
}

impl RuleConfigSource {
    /// Create a source serving the fallback snapshot until the first refresh
    pub fn new(fetcher: Arc<dyn RuleFetcher>, config: RuleSourceConfig) -> Self {
        Self {
            fetcher,
            snapshot: ArcSwap::from_pointee(RuleSnapshot::fallback()),
            config,
            refresh_lock: tokio::sync::Mutex::new(()),
            attempts: AtomicU64::new(0),
            last_error: Mutex::new(None),
            last_success: Mutex::new(None),
            invalidated: AtomicBool::new(false),
            wake: Notify::new(),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// The installed snapshot; never blocks
    pub fn current_snapshot(&self) -> Arc<RuleSnapshot> {
        self.snapshot.load_full()
    }

    /// Generation of the installed snapshot
    pub fn generation(&self) -> u64 {
        self.snapshot.load().generation()
    }

    pub fn config(&self) -> &RuleSourceConfig {
        &self.config
    }

    /// Whether the installed snapshot should be refreshed
    pub fn is_stale(&self) -> bool {
        if self.invalidated.load(Ordering::Acquire) {
            return true;
        }
        match *self.last_success.lock() {
            Some(at) => at.elapsed() >= self.config.ttl,
            None => true,
        }
    }

    /// Mark the snapshot stale and wake the refresh loop early
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
        self.wake.notify_one();
        debug!("Rule snapshot invalidated");
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Fetch the rules and atomically install a new snapshot
    ///
    /// Concurrent callers do not queue further fetches: they wait for the
    /// in-flight one and report its result as [`RefreshOutcome::Coalesced`].
    ///
    /// # Errors
    ///
    /// [`AuthzError::ConfigUnavailable`] when nothing was ever fetched (the
    /// fallback stays in place), otherwise the fetch error. The installed
    /// snapshot is never touched on failure.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let observed = self.attempts.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        if self.attempts.load(Ordering::Acquire) != observed {
            debug!("Refresh coalesced with in-flight fetch");
            let last_error = self.last_error.lock().clone();
            return match last_error {
                Some(err) => Err(self.shared_failure(err)),
                None => Ok(RefreshOutcome::Coalesced),
            };
        }

        let fetched = self.fetcher.fetch().await;
        let outcome = match fetched {
            Ok(entries) => Ok(self.install(entries)),
            Err(err) => Err(self.record_failure(err)),
        };

        self.attempts.fetch_add(1, Ordering::Release);
        outcome
    }

    fn install(&self, entries: Vec<super::snapshot::RuleConfigEntry>) -> RefreshOutcome {
        let current = self.snapshot.load_full();
        let candidate = RuleSnapshot::compile(entries, SnapshotOrigin::Fetched, current.generation() + 1);

        *self.last_error.lock() = None;
        *self.last_success.lock() = Some(Instant::now());
        self.invalidated.store(false, Ordering::Release);
        self.successes.fetch_add(1, Ordering::Relaxed);

        if !current.is_fallback() && current.version() == candidate.version() {
            debug!(version = candidate.version(), "Rule snapshot unchanged");
            return RefreshOutcome::Unchanged {
                version: candidate.version().to_string(),
            };
        }

        let generation = candidate.generation();
        let version = candidate.version().to_string();
        info!(
            generation,
            version = %version,
            rules = candidate.rules().len(),
            defects = candidate.defects().len(),
            source = %self.fetcher.describe(),
            "Installed rule snapshot"
        );
        self.snapshot.store(Arc::new(candidate));

        RefreshOutcome::Updated { generation, version }
    }

    fn record_failure(&self, err: AuthzError) -> AuthzError {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(err.to_string());

        if self.snapshot.load().is_fallback() {
            warn!(
                source = %self.fetcher.describe(),
                "Rule configuration unavailable, serving fallback snapshot: {}",
                err
            );
            AuthzError::ConfigUnavailable(err.to_string())
        } else {
            warn!(
                source = %self.fetcher.describe(),
                generation = self.generation(),
                "Rule refresh failed, keeping last known good snapshot: {}",
                err
            );
            err
        }
    }

    /// The in-flight refresh's failure as seen by a coalesced waiter
    fn shared_failure(&self, message: String) -> AuthzError {
        if self.snapshot.load().is_fallback() {
            AuthzError::ConfigUnavailable(message)
        } else {
            AuthzError::Fetch(message)
        }
    }

    /// Spawn the background refresh task
    ///
    /// Refreshes every `ttl`, retries failures with exponential backoff, and
    /// wakes early on [`RuleConfigSource::invalidate`]. A snapshot that is
    /// still fresh when the loop starts waits out its `ttl` first.
    pub fn spawn_refresh_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let source = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = source.config.initial_backoff;
            let mut delay = if source.is_stale() {
                Duration::ZERO
            } else {
                source.config.ttl
            };

            loop {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = source.wake.notified() => {
                            debug!("Early rule refresh requested");
                        }
                    }
                }

                delay = match source.refresh().await {
                    Ok(_) => {
                        backoff = source.config.initial_backoff;
                        source.config.ttl
                    }
                    Err(_) => {
                        let delay = backoff;
                        backoff = source.config.next_backoff(backoff);
                        debug!("Retrying rule refresh in {:?}", delay);
                        delay
                    }
                };
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::fetcher::StaticRuleFetcher;
    use crate::rules::snapshot::RuleConfigEntry;

    fn entries() -> Vec<RuleConfigEntry> {
        vec![RuleConfigEntry::new("events", "read", ["Regio_*"])]
    }

    #[tokio::test]
    async fn test_serves_fallback_before_first_fetch() {
        let source = RuleConfigSource::new(Arc::new(StaticRuleFetcher::unavailable()), RuleSourceConfig::default());

        assert!(source.current_snapshot().is_fallback());
        assert!(source.is_stale());

        let err = source.refresh().await.unwrap_err();
        assert!(matches!(err, AuthzError::ConfigUnavailable(_)));
        assert!(source.current_snapshot().is_fallback());
        assert_eq!(source.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_refresh_installs_snapshot() {
        let fetcher = Arc::new(StaticRuleFetcher::new(entries()));
        let source = RuleConfigSource::new(fetcher.clone(), RuleSourceConfig::default());

        let outcome = source.refresh().await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Updated { generation: 1, .. }));
        assert_eq!(source.generation(), 1);
        assert!(!source.is_stale());

        // Same content again
        let outcome = source.refresh().await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Unchanged { .. }));
        assert_eq!(source.generation(), 1);

        fetcher.set_entries(Vec::new());
        let outcome = source.refresh().await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Updated { generation: 2, .. }));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_good_snapshot() {
        let fetcher = Arc::new(StaticRuleFetcher::new(entries()));
        let source = RuleConfigSource::new(fetcher.clone(), RuleSourceConfig::default());
        source.refresh().await.unwrap();
        let before = source.current_snapshot();

        fetcher.set_failing(true);
        let err = source.refresh().await.unwrap_err();
        assert!(matches!(err, AuthzError::Fetch(_)));

        let after = source.current_snapshot();
        assert!(!after.is_fallback());
        assert_eq!(after.version(), before.version());
        assert_eq!(after.generation(), before.generation());
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_coalesce() {
        let fetcher = Arc::new(StaticRuleFetcher::new(entries()).with_delay(Duration::from_millis(100)));
        let source = Arc::new(RuleConfigSource::new(fetcher.clone(), RuleSourceConfig::default()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let source = Arc::clone(&source);
            handles.push(tokio::spawn(async move { source.refresh().await }));
        }

        let mut coalesced = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == RefreshOutcome::Coalesced {
                coalesced += 1;
            }
        }

        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(coalesced, 4);
        assert_eq!(source.generation(), 1);
    }

    #[tokio::test]
    async fn test_coalesced_waiters_see_config_unavailable_on_fallback() {
        let fetcher = Arc::new(StaticRuleFetcher::unavailable().with_delay(Duration::from_millis(100)));
        let source = Arc::new(RuleConfigSource::new(fetcher.clone(), RuleSourceConfig::default()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let source = Arc::clone(&source);
            handles.push(tokio::spawn(async move { source.refresh().await }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, AuthzError::ConfigUnavailable(_)));
        }
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_coalesced_waiters_see_fetch_error_after_first_success() {
        let fetcher = Arc::new(StaticRuleFetcher::new(entries()).with_delay(Duration::from_millis(100)));
        let source = Arc::new(RuleConfigSource::new(fetcher.clone(), RuleSourceConfig::default()));
        source.refresh().await.unwrap();
        fetcher.set_failing(true);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let source = Arc::clone(&source);
            handles.push(tokio::spawn(async move { source.refresh().await }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, AuthzError::Fetch(_)));
        }
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_refresh_loop_waits_when_snapshot_is_fresh() {
        let fetcher = Arc::new(StaticRuleFetcher::new(entries()));
        let config = RuleSourceConfig {
            ttl: Duration::from_secs(3600),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        };
        let source = Arc::new(RuleConfigSource::new(fetcher.clone(), config));
        source.refresh().await.unwrap();

        let handle = source.spawn_refresh_loop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.fetch_count(), 1);

        source.invalidate();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.fetch_count(), 2);

        handle.abort();
    }

    #[tokio::test]
    async fn test_invalidate_marks_stale() {
        let source = RuleConfigSource::new(Arc::new(StaticRuleFetcher::new(entries())), RuleSourceConfig::default());
        source.refresh().await.unwrap();
        assert!(!source.is_stale());

        source.invalidate();
        assert!(source.is_stale());

        source.refresh().await.unwrap();
        assert!(!source.is_stale());
    }

    #[tokio::test]
    async fn test_refresh_loop_retries_with_backoff() {
        let fetcher = Arc::new(StaticRuleFetcher::unavailable());
        let config = RuleSourceConfig {
            ttl: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        };
        let source = Arc::new(RuleConfigSource::new(fetcher.clone(), config));
        let handle = source.spawn_refresh_loop();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fetcher.fetch_count() >= 3);
        assert!(source.current_snapshot().is_fallback());

        fetcher.set_failing(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!source.current_snapshot().is_fallback());

        handle.abort();
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RuleSourceConfig {
            ttl: Duration::from_secs(60),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        };
        assert_eq!(config.next_backoff(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(config.next_backoff(Duration::from_secs(4)), Duration::from_secs(5));
    }
}
