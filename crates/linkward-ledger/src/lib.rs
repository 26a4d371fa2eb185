//! Posted-link ledger abstractions and in-memory backend.
//!
//! The ledger decides, per canonical URL, whether a message is the first
//! post within the retention window or a duplicate, and guarantees the
//! duplicate notification fires at most once per original entry.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use sqlite::SqliteLinkLedger;

/// Default retention window for duplicate comparisons.
pub const DEFAULT_DEDUP_WINDOW_DAYS: i64 = 45;

/// Returns the default retention window as a duration.
pub fn default_dedup_window() -> Duration {
    Duration::days(DEFAULT_DEDUP_WINDOW_DAYS)
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LinkLedgerError>;

/// Errors returned by ledger implementations.
#[derive(Debug, Error)]
pub enum LinkLedgerError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A recorded link posting, keyed by `(normalized_url, message_ts)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedLink {
    pub normalized_url: String,
    pub original_url: String,
    pub message_ts: String,
    pub channel: String,
    pub permalink: String,
    pub posted_at: DateTime<Utc>,
    pub duplicate_notified: bool,
}

/// Input to [`LinkLedger::record_or_notify`]: one canonical URL occurrence
/// in one message.
#[derive(Debug, Clone)]
pub struct LinkCandidate {
    pub canonical_url: String,
    pub original_url: String,
    pub message_ts: String,
    pub channel: String,
    pub permalink: String,
    pub posted_at: DateTime<Utc>,
}

/// Outcome of the dedup decision for one canonical URL.
///
/// Both duplicate arms carry the original entry; only the newly-notified
/// arm entitles the caller to send a notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    FirstSeen,
    DuplicateNewlyNotified { original: PostedLink },
    DuplicateAlreadyNotified { original: PostedLink },
}

/// Async store contract shared by the engine and inspection tooling.
///
/// Implementations must make the window lookup and the subsequent
/// insert-or-flag mutation effectively atomic per canonical URL: under
/// concurrent duplicate detections exactly one caller observes
/// `DuplicateNewlyNotified`, and redelivered messages (same `message_ts`)
/// re-insert idempotently.
#[async_trait]
pub trait LinkLedger: Send + Sync {
    /// Records a first-seen link or flags a duplicate, as one atomic step.
    async fn record_or_notify(&self, candidate: &LinkCandidate) -> LedgerResult<DedupOutcome>;

    /// Most recent entry for `canonical_url` posted within the window
    /// ending at `now`, excluding `exclude_ts` (a message is never compared
    /// against its own entry).
    async fn recent_original(
        &self,
        canonical_url: &str,
        now: DateTime<Utc>,
        exclude_ts: &str,
    ) -> LedgerResult<Option<PostedLink>>;

    /// Deletes every entry owned by `message_ts`, returning the removed
    /// rows. A future repost of the same URL is first-seen again.
    async fn purge_for_message(&self, message_ts: &str) -> LedgerResult<Vec<PostedLink>>;
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug)]
pub struct InMemoryLinkLedger {
    window: Duration,
    entries: RwLock<HashMap<(String, String), PostedLink>>,
}

impl InMemoryLinkLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryLinkLedger {
    fn default() -> Self {
        Self::new(default_dedup_window())
    }
}

fn most_recent_in_window<'a>(
    entries: impl Iterator<Item = &'a PostedLink>,
    canonical_url: &str,
    cutoff: DateTime<Utc>,
    exclude_ts: &str,
) -> Option<&'a PostedLink> {
    entries
        .filter(|entry| {
            entry.normalized_url == canonical_url
                && entry.message_ts != exclude_ts
                && entry.posted_at >= cutoff
        })
        .max_by_key(|entry| entry.posted_at)
}

#[async_trait]
impl LinkLedger for InMemoryLinkLedger {
    async fn record_or_notify(&self, candidate: &LinkCandidate) -> LedgerResult<DedupOutcome> {
        let cutoff = Utc::now() - self.window;
        let mut entries = self.entries.write().await;

        let existing = most_recent_in_window(
            entries.values(),
            &candidate.canonical_url,
            cutoff,
            &candidate.message_ts,
        )
        .cloned();

        let Some(original) = existing else {
            let key = (candidate.canonical_url.clone(), candidate.message_ts.clone());
            entries.entry(key).or_insert_with(|| PostedLink {
                normalized_url: candidate.canonical_url.clone(),
                original_url: candidate.original_url.clone(),
                message_ts: candidate.message_ts.clone(),
                channel: candidate.channel.clone(),
                permalink: candidate.permalink.clone(),
                posted_at: candidate.posted_at,
                duplicate_notified: false,
            });
            return Ok(DedupOutcome::FirstSeen);
        };

        if original.duplicate_notified {
            return Ok(DedupOutcome::DuplicateAlreadyNotified { original });
        }

        let key = (original.normalized_url.clone(), original.message_ts.clone());
        let updated = match entries.get_mut(&key) {
            Some(entry) if !entry.duplicate_notified => {
                entry.duplicate_notified = true;
                true
            }
            _ => false,
        };

        let mut original = original;
        original.duplicate_notified = true;
        if updated {
            Ok(DedupOutcome::DuplicateNewlyNotified { original })
        } else {
            Ok(DedupOutcome::DuplicateAlreadyNotified { original })
        }
    }

    async fn recent_original(
        &self,
        canonical_url: &str,
        now: DateTime<Utc>,
        exclude_ts: &str,
    ) -> LedgerResult<Option<PostedLink>> {
        let entries = self.entries.read().await;
        Ok(most_recent_in_window(entries.values(), canonical_url, now - self.window, exclude_ts)
            .cloned())
    }

    async fn purge_for_message(&self, message_ts: &str) -> LedgerResult<Vec<PostedLink>> {
        let mut entries = self.entries.write().await;
        let keys: Vec<(String, String)> = entries
            .keys()
            .filter(|(_, ts)| ts == message_ts)
            .cloned()
            .collect();
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = entries.remove(&key) {
                removed.push(entry);
            }
        }
        Ok(removed)
    }
}
