//! Message-event pipeline for duplicate-link detection.
//!
//! Wires the canonicalizer and the ledger together: extracts URLs from an
//! inbound message, decides per canonical URL whether it is first-seen or a
//! duplicate, and delivers "already posted" notices through a
//! [`NotificationSink`]. Deletion events flow into the ledger's purge path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use linkward_core::{extract_urls, message_ts_to_datetime};
use linkward_ledger::{DedupOutcome, LinkCandidate, LinkLedger};
use linkward_rules::UrlCanonicalizer;
use url::Url;

mod mirror;

pub use mirror::{suggest_mirrors, MirrorRule};


/// One archived chat message, as delivered by the message source.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub channel: String,
    pub permalink: String,
    pub author: Option<String>,
}

impl InboundMessage {
    /// A reply inside an existing thread, as opposed to a top-level
    /// message or a thread parent.
    fn is_thread_reply(&self) -> bool {
        self.thread_ts
            .as_deref()
            .is_some_and(|thread_ts| thread_ts != self.ts)
    }

    /// Where replies to this message belong.
    fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

/// A message-deletion signal.
#[derive(Debug, Clone)]
pub struct DeletionEvent {
    pub deleted_ts: Option<String>,
    pub channel: String,
}

/// Delivers rendered notices into a channel thread. The engine decides
/// whether and with what content to notify; delivery is the collaborator's
/// concern.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn post_thread_reply(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> anyhow::Result<()>;
}

/// Scan configuration. The dedup retention window lives on the ledger;
/// everything else that was hard-coded in earlier variants is explicit
/// here.
#[derive(Debug, Clone)]
pub struct LinkScanConfig {
    /// Hosts (and their subdomains) whose links are never dedup-checked,
    /// e.g. the chat workspace's own archive domain.
    pub internal_hosts: Vec<String>,
    /// Host-mirror rewrites suggested alongside matching links.
    pub mirror_rules: Vec<MirrorRule>,
}

impl Default for LinkScanConfig {
    fn default() -> Self {
        Self {
            internal_hosts: Vec::new(),
            mirror_rules: MirrorRule::defaults(),
        }
    }
}

/// Per-URL result of a message scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlOutcome {
    SkippedInternal,
    FirstSeen,
    DuplicateNotified { original_permalink: String },
    DuplicateAlreadyNotified,
    DedupSkipped,
}

/// One extracted URL with its canonical form and dedup outcome.
#[derive(Debug, Clone)]
pub struct ScannedUrl {
    pub original_url: String,
    pub canonical_url: String,
    pub outcome: UrlOutcome,
}

/// What a message scan did, for callers and tests.
#[derive(Debug, Clone, Default)]
pub struct MessageScanReport {
    pub urls: Vec<ScannedUrl>,
    pub mirror_suggestions: Vec<String>,
    pub skipped_thread_reply: bool,
}

/// The duplicate-link detection engine.
pub struct LinkScanner {
    canonicalizer: UrlCanonicalizer,
    ledger: Arc<dyn LinkLedger>,
    sink: Arc<dyn NotificationSink>,
    config: LinkScanConfig,
}

impl LinkScanner {
    pub fn new(
        canonicalizer: UrlCanonicalizer,
        ledger: Arc<dyn LinkLedger>,
        sink: Arc<dyn NotificationSink>,
        config: LinkScanConfig,
    ) -> Self {
        Self {
            canonicalizer,
            ledger,
            sink,
            config,
        }
    }

    /// Processes one inbound message: dedup-checks every extracted URL and
    /// posts mirror suggestions. Never fails; every per-URL error degrades
    /// to skipping dedup for that URL.
    pub async fn scan_message(&self, message: &InboundMessage) -> MessageScanReport {
        let mut report = MessageScanReport::default();
        let urls = extract_urls(&message.text);
        if urls.is_empty() {
            return report;
        }

        // Only top-level messages are dedup-checked.
        if message.is_thread_reply() {
            report.skipped_thread_reply = true;
        } else {
            self.dedup_urls(message, &urls, &mut report).await;
        }

        self.post_mirror_suggestions(message, &urls, &mut report)
            .await;
        report
    }

    async fn dedup_urls(
        &self,
        message: &InboundMessage,
        urls: &[String],
        report: &mut MessageScanReport,
    ) {
        let posted_at = match message_ts_to_datetime(&message.ts) {
            Some(posted_at) => posted_at,
            None => {
                tracing::warn!(
                    ts = message.ts.as_str(),
                    channel = message.channel.as_str(),
                    "invalid message timestamp; falling back to current time"
                );
                Utc::now()
            }
        };

        for original_url in urls {
            if self.is_internal(original_url) {
                tracing::debug!(url = original_url.as_str(), "skipping internal link");
                report.urls.push(ScannedUrl {
                    original_url: original_url.clone(),
                    canonical_url: original_url.clone(),
                    outcome: UrlOutcome::SkippedInternal,
                });
                continue;
            }

            let canonical_url = self.canonicalizer.canonicalize(original_url);
            let candidate = LinkCandidate {
                canonical_url: canonical_url.clone(),
                original_url: original_url.clone(),
                message_ts: message.ts.clone(),
                channel: message.channel.clone(),
                permalink: message.permalink.clone(),
                posted_at,
            };

            let outcome = match self.ledger.record_or_notify(&candidate).await {
                Ok(DedupOutcome::FirstSeen) => UrlOutcome::FirstSeen,
                Ok(DedupOutcome::DuplicateNewlyNotified { original }) => {
                    tracing::info!(
                        original_url = original_url.as_str(),
                        canonical_url = canonical_url.as_str(),
                        original_permalink = original.permalink.as_str(),
                        original_ts = original.message_ts.as_str(),
                        channel = message.channel.as_str(),
                        "duplicate link detected"
                    );
                    let text = render_duplicate_notice(message.author.as_deref(), &original.permalink);
                    if let Err(error) = self
                        .sink
                        .post_thread_reply(&message.channel, message.reply_thread_ts(), &text)
                        .await
                    {
                        tracing::warn!(%error, "failed to deliver duplicate notice");
                    }
                    UrlOutcome::DuplicateNotified {
                        original_permalink: original.permalink,
                    }
                }
                Ok(DedupOutcome::DuplicateAlreadyNotified { .. }) => {
                    tracing::debug!(
                        canonical_url = canonical_url.as_str(),
                        "duplicate already notified; staying quiet"
                    );
                    UrlOutcome::DuplicateAlreadyNotified
                }
                Err(error) => {
                    // Link tracking is best-effort: skip this URL, keep the
                    // rest of the message going.
                    tracing::warn!(
                        url = original_url.as_str(),
                        %error,
                        "ledger failure; skipping dedup for this URL"
                    );
                    UrlOutcome::DedupSkipped
                }
            };

            report.urls.push(ScannedUrl {
                original_url: original_url.clone(),
                canonical_url,
                outcome,
            });
        }
    }

    async fn post_mirror_suggestions(
        &self,
        message: &InboundMessage,
        urls: &[String],
        report: &mut MessageScanReport,
    ) {
        let mirrors = suggest_mirrors(&self.config.mirror_rules, &message.text, urls);
        if mirrors.is_empty() {
            return;
        }

        let text = render_mirror_notice(&mirrors);
        if let Err(error) = self
            .sink
            .post_thread_reply(&message.channel, message.reply_thread_ts(), &text)
            .await
        {
            tracing::warn!(%error, "failed to deliver mirror suggestions");
            return;
        }
        report.mirror_suggestions = mirrors;
    }

    /// Deletion compensating action: forget every link the deleted message
    /// posted. Returns the number of purged entries.
    pub async fn handle_deletion(&self, event: &DeletionEvent) -> usize {
        let Some(deleted_ts) = event.deleted_ts.as_deref().filter(|ts| !ts.is_empty()) else {
            tracing::warn!(
                channel = event.channel.as_str(),
                "deletion event without timestamp; skipping link cleanup"
            );
            return 0;
        };

        match self.ledger.purge_for_message(deleted_ts).await {
            Ok(removed) => {
                if removed.is_empty() {
                    tracing::debug!(
                        deleted_ts,
                        channel = event.channel.as_str(),
                        "no links recorded for deleted message"
                    );
                } else {
                    tracing::info!(
                        deleted_ts,
                        channel = event.channel.as_str(),
                        count = removed.len(),
                        "removed links for deleted message"
                    );
                }
                removed.len()
            }
            Err(error) => {
                tracing::warn!(deleted_ts, %error, "failed to purge links for deleted message");
                0
            }
        }
    }

    fn is_internal(&self, url: &str) -> bool {
        if self.config.internal_hosts.is_empty() {
            return false;
        }
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.config.internal_hosts.iter().any(|internal| {
            let internal = internal.to_ascii_lowercase();
            host == internal || host.ends_with(&format!(".{internal}"))
        })
    }
}

fn render_duplicate_notice(author: Option<&str>, original_permalink: &str) -> String {
    match author {
        Some(author) => {
            format!("Hey {author}, this link was already posted here: {original_permalink}")
        }
        None => format!("This link was already posted here: {original_permalink}"),
    }
}

fn render_mirror_notice(mirrors: &[String]) -> String {
    if let [single] = mirrors {
        format!("Tracking-free mirror: {single}")
    } else {
        let listed: Vec<String> = mirrors.iter().map(|link| format!("• {link}")).collect();
        format!("Tracking-free mirrors:\n{}", listed.join("\n"))
    }
}
