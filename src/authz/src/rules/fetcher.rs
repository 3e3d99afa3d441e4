//! Rule fetchers
//!
//! The transport behind the rule configuration is a collaborator's concern;
//! the source only needs something that can produce the current entry list.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use super::snapshot::{parse_rule_document, RuleConfigEntry};
use crate::error::{AuthzError, Result};

/// Produces the current rule entries from some external source
#[async_trait]
pub trait RuleFetcher: Send + Sync {
    /// Fetch the full entry list
    async fn fetch(&self) -> Result<Vec<RuleConfigEntry>>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// In-memory fetcher, used for embedding and tests
pub struct StaticRuleFetcher {
    entries: RwLock<Vec<RuleConfigEntry>>,
    failing: AtomicBool,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl StaticRuleFetcher {
    pub fn new(entries: Vec<RuleConfigEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            failing: AtomicBool::new(false),
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// A fetcher whose every fetch fails
    pub fn unavailable() -> Self {
        let fetcher = Self::new(Vec::new());
        fetcher.set_failing(true);
        fetcher
    }

    /// Delay each fetch, to simulate a slow endpoint
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the entries served by subsequent fetches
    pub fn set_entries(&self, entries: Vec<RuleConfigEntry>) {
        *self.entries.write() = entries;
    }

    /// Make subsequent fetches fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of fetches started so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuleFetcher for StaticRuleFetcher {
    async fn fetch(&self) -> Result<Vec<RuleConfigEntry>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthzError::Fetch("static rule source marked unavailable".to_string()));
        }

        Ok(self.entries.read().clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// Reads a JSON rule document from disk
pub struct FileRuleFetcher {
    path: PathBuf,
}

impl FileRuleFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RuleFetcher for FileRuleFetcher {
    async fn fetch(&self) -> Result<Vec<RuleConfigEntry>> {
        let bytes = tokio::fs::read(&self.path).await?;
        let entries = parse_rule_document(&bytes)?;
        debug!("Read {} rule entries from {}", entries.len(), self.path.display());
        Ok(entries)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Fetches the rule document from a read-only HTTP endpoint
pub struct HttpRuleFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpRuleFetcher {
    /// Create a fetcher with a per-request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl RuleFetcher for HttpRuleFetcher {
    async fn fetch(&self) -> Result<Vec<RuleConfigEntry>> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let entries = parse_rule_document(&bytes)?;
        debug!("Fetched {} rule entries from {}", entries.len(), self.url);
        Ok(entries)
    }

    fn describe(&self) -> String {
        format!("http:{}", self.url)
    }
}
