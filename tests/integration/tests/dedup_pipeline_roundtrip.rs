//! End-to-end pipeline tests: canonicalizer + SQLite ledger + engine.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use linkward_engine::{
    DeletionEvent, InboundMessage, LinkScanConfig, LinkScanner, NotificationSink, UrlOutcome,
};
use linkward_ledger::{DedupOutcome, LinkCandidate, LinkLedger, SqliteLinkLedger};
use linkward_rules::UrlCanonicalizer;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingSink {
    posts: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn posts(&self) -> Vec<String> {
        self.posts.lock().expect("sink lock").clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn post_thread_reply(
        &self,
        _channel: &str,
        _thread_ts: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        self.posts.lock().expect("sink lock").push(text.to_string());
        Ok(())
    }
}

struct Pipeline {
    scanner: Arc<LinkScanner>,
    sink: Arc<RecordingSink>,
    ledger: Arc<SqliteLinkLedger>,
    _temp: TempDir,
}

fn pipeline() -> Pipeline {
    let temp = tempfile::tempdir().expect("tempdir");
    let ledger = Arc::new(
        SqliteLinkLedger::with_default_window(temp.path().join("links.sqlite"))
            .expect("create ledger"),
    );
    let sink = Arc::new(RecordingSink::default());
    let dyn_ledger: Arc<dyn LinkLedger> = ledger.clone();
    let scanner = Arc::new(LinkScanner::new(
        UrlCanonicalizer::with_default_rules(),
        dyn_ledger,
        sink.clone(),
        LinkScanConfig::default(),
    ));
    Pipeline {
        scanner,
        sink,
        ledger,
        _temp: temp,
    }
}

fn message(text: &str, ts: &str) -> InboundMessage {
    InboundMessage {
        text: text.to_string(),
        ts: ts.to_string(),
        thread_ts: None,
        channel: "C123".to_string(),
        permalink: format!("https://chat.example/archives/C123/p{ts}"),
        author: Some("sam".to_string()),
    }
}

#[tokio::test]
async fn wrapped_and_tracked_variants_collapse_to_one_duplicate() {
    let pipeline = pipeline();

    // A Google-wrapped share of example.com/path, trackers and all.
    let report = pipeline
        .scanner
        .scan_message(&message(
            "https://www.google.com/url?q=https%3A%2F%2Fexample.com%2Fpath%3Fa%3D1%26utm_source%3Dx&sa=D&ust=123",
            "1.0",
        ))
        .await;
    assert_eq!(report.urls[0].canonical_url, "https://example.com/path");
    assert_eq!(report.urls[0].outcome, UrlOutcome::FirstSeen);

    // A direct share of the same page with different tracking params.
    let report = pipeline
        .scanner
        .scan_message(&message("https://example.com/path?utm_source=y#section", "2.0"))
        .await;
    assert_eq!(
        report.urls[0].outcome,
        UrlOutcome::DuplicateNotified {
            original_permalink: "https://chat.example/archives/C123/p1.0".to_string(),
        }
    );

    // A third share stays quiet.
    let report = pipeline
        .scanner
        .scan_message(&message("https://example.com/path", "3.0"))
        .await;
    assert_eq!(report.urls[0].outcome, UrlOutcome::DuplicateAlreadyNotified);

    let posts = pipeline.sink.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0].contains("https://chat.example/archives/C123/p1.0"));
}

#[tokio::test]
async fn deleting_the_original_resets_the_url_to_first_seen() {
    let pipeline = pipeline();

    pipeline
        .scanner
        .scan_message(&message("https://example.com/article", "1.0"))
        .await;
    let removed = pipeline
        .scanner
        .handle_deletion(&DeletionEvent {
            deleted_ts: Some("1.0".to_string()),
            channel: "C123".to_string(),
        })
        .await;
    assert_eq!(removed, 1);

    let report = pipeline
        .scanner
        .scan_message(&message("https://example.com/article", "2.0"))
        .await;
    assert_eq!(report.urls[0].outcome, UrlOutcome::FirstSeen);
    assert!(pipeline.sink.posts().is_empty());
}

#[tokio::test]
async fn concurrent_reposts_notify_exactly_once() {
    let pipeline = pipeline();

    pipeline
        .scanner
        .scan_message(&message("https://example.com/article", "1.0"))
        .await;

    let mut handles = Vec::new();
    for index in 0..6 {
        let scanner = pipeline.scanner.clone();
        handles.push(tokio::spawn(async move {
            scanner
                .scan_message(&message(
                    "https://example.com/article?utm_source=race",
                    &format!("2.{index}"),
                ))
                .await
        }));
    }

    let mut notified = 0;
    for handle in handles {
        let report = handle.await.expect("join scan");
        if matches!(
            report.urls[0].outcome,
            UrlOutcome::DuplicateNotified { .. }
        ) {
            notified += 1;
        }
    }
    assert_eq!(notified, 1);
    assert_eq!(pipeline.sink.posts().len(), 1);
}

#[tokio::test]
async fn window_expiry_survives_ledger_reopen() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("links.sqlite");
    let now = Utc::now();

    {
        let ledger = SqliteLinkLedger::new(&db_path, Duration::days(45)).expect("create ledger");
        let outcome = ledger
            .record_or_notify(&LinkCandidate {
                canonical_url: "https://example.com/old".to_string(),
                original_url: "https://example.com/old".to_string(),
                message_ts: "1.0".to_string(),
                channel: "C123".to_string(),
                permalink: "https://chat.example/p1".to_string(),
                posted_at: now - Duration::days(50),
            })
            .await
            .expect("record aged entry");
        assert_eq!(outcome, DedupOutcome::FirstSeen);
    }

    let ledger: Arc<dyn LinkLedger> =
        Arc::new(SqliteLinkLedger::new(&db_path, Duration::days(45)).expect("reopen"));
    let sink = Arc::new(RecordingSink::default());
    let scanner = LinkScanner::new(
        UrlCanonicalizer::with_default_rules(),
        ledger,
        sink.clone(),
        LinkScanConfig::default(),
    );

    let report = scanner
        .scan_message(&message("https://example.com/old", "2.0"))
        .await;
    assert_eq!(report.urls[0].outcome, UrlOutcome::FirstSeen);
    assert!(sink.posts().is_empty());
}

#[tokio::test]
async fn canonical_forms_are_stable_across_the_default_rule_set() {
    let canonicalizer = UrlCanonicalizer::with_default_rules();
    let inputs = [
        "https://www.youtube.com/watch?v=7ts1vJLHrtc&utm_source=foo&feature=share",
        "https://www.google.com/url?q=https%3A%2F%2Fexample.com%2Fpath%3Fa%3D1&sa=D",
        "https://duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Falpha",
        "https://www.amazon.com/dp/B000TEST?tag=affiliate-20&ref_=abc",
        "https://rover.ebay.com/rover/1/711-0/1?mpre=https%3A%2F%2Fexample.com%2Febay",
        "http://www.lombax.it/test?notUsefulParameter=xxx#frag",
        "https://mail.google.com/mail/u/0?compose=abc",
    ];
    for input in inputs {
        let once = canonicalizer.canonicalize(input);
        let twice = canonicalizer.canonicalize(&once);
        assert_eq!(once, twice, "unstable canonical form for {input}");
    }
}

#[tokio::test]
async fn ledger_lookup_excludes_the_caller_itself() {
    let pipeline = pipeline();
    let now = Utc::now();

    pipeline
        .scanner
        .scan_message(&message("https://example.com/self", "1.0"))
        .await;

    let found = pipeline
        .ledger
        .recent_original("https://example.com/self", now, "1.0")
        .await
        .expect("lookup");
    assert!(found.is_none());

    let found = pipeline
        .ledger
        .recent_original("https://example.com/self", now, "other")
        .await
        .expect("lookup")
        .expect("entry");
    assert_eq!(found.message_ts, "1.0");
}
