//! `linkward` command line: canonicalize URLs and drive the link ledger.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use linkward_engine::{
    InboundMessage, LinkScanConfig, LinkScanner, NotificationSink, ScannedUrl, UrlOutcome,
};
use linkward_ledger::{LinkLedger, SqliteLinkLedger, DEFAULT_DEDUP_WINDOW_DAYS};
use linkward_rules::{load_rules_or_default, UrlCanonicalizer, GLOBAL_PROVIDER_NAME};

#[derive(Parser)]
#[command(
    name = "linkward",
    about = "URL canonicalization and duplicate-link detection"
)]
struct Cli {
    /// Provider rules file; embedded defaults are used when absent.
    #[arg(long, global = true, env = "LINKWARD_RULES_PATH")]
    rules: Option<PathBuf>,
    /// Default log level (overridden by RUST_LOG).
    #[arg(long, global = true, env = "LINKWARD_LOG_LEVEL", default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Canonicalize URLs given as arguments (or stdin lines).
    Clean { urls: Vec<String> },
    /// Scan message text from stdin against the ledger.
    Scan {
        #[arg(long, env = "LINKWARD_DATABASE_PATH", default_value = "linkward.sqlite")]
        database: PathBuf,
        /// Message timestamp (ledger key).
        #[arg(long)]
        ts: String,
        #[arg(long)]
        channel: String,
        #[arg(long, default_value = "")]
        permalink: String,
        #[arg(long)]
        thread_ts: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Hosts excluded from dedup (repeatable).
        #[arg(long = "internal-host")]
        internal_hosts: Vec<String>,
        /// Retention window for duplicate comparisons, in days.
        #[arg(long, default_value_t = DEFAULT_DEDUP_WINDOW_DAYS)]
        window_days: i64,
    },
    /// Remove ledger entries owned by a deleted message.
    Delete {
        #[arg(long, env = "LINKWARD_DATABASE_PATH", default_value = "linkward.sqlite")]
        database: PathBuf,
        #[arg(long)]
        ts: String,
    },
    /// Show the effective provider resolution order.
    Rules,
}

/// Prints notices to stdout instead of a chat transport.
struct StdoutSink;

#[async_trait]
impl NotificationSink for StdoutSink {
    async fn post_thread_reply(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<()> {
        println!("[{channel} @ {thread_ts}] {text}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let rules = load_rules_or_default(cli.rules.as_deref());

    match cli.command {
        Command::Clean { urls } => {
            let canonicalizer = UrlCanonicalizer::new(&rules).context("compile rules")?;
            let urls = if urls.is_empty() { read_stdin_lines()? } else { urls };
            for url in urls {
                println!("{}", canonicalizer.canonicalize(&url));
            }
        }
        Command::Scan {
            database,
            ts,
            channel,
            permalink,
            thread_ts,
            author,
            internal_hosts,
            window_days,
        } => {
            let canonicalizer = UrlCanonicalizer::new(&rules).context("compile rules")?;
            let ledger: Arc<dyn LinkLedger> = Arc::new(
                SqliteLinkLedger::new(&database, Duration::days(window_days))
                    .with_context(|| format!("open ledger at {}", database.display()))?,
            );
            let scanner = LinkScanner::new(
                canonicalizer,
                ledger,
                Arc::new(StdoutSink),
                LinkScanConfig {
                    internal_hosts,
                    ..LinkScanConfig::default()
                },
            );

            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("read message text from stdin")?;
            let report = scanner
                .scan_message(&InboundMessage {
                    text,
                    ts,
                    thread_ts,
                    channel,
                    permalink,
                    author,
                })
                .await;
            for scanned in &report.urls {
                println!("{}", format_outcome_line(scanned));
            }
        }
        Command::Delete { database, ts } => {
            let ledger = SqliteLinkLedger::with_default_window(&database)
                .with_context(|| format!("open ledger at {}", database.display()))?;
            let removed = ledger
                .purge_for_message(&ts)
                .await
                .context("purge ledger entries")?;
            println!("removed {} entries", removed.len());
        }
        Command::Rules => {
            for name in rules.specific_provider_names() {
                println!("{name}");
            }
            if rules.global_provider().is_some() {
                println!("{GLOBAL_PROVIDER_NAME} (applied to every URL)");
            }
        }
    }
    Ok(())
}

fn read_stdin_lines() -> Result<Vec<String>> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("read URLs from stdin")?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn format_outcome_line(scanned: &ScannedUrl) -> String {
    match &scanned.outcome {
        UrlOutcome::FirstSeen => format!("first-seen {}", scanned.canonical_url),
        UrlOutcome::DuplicateNotified { original_permalink } => format!(
            "duplicate {} (original: {original_permalink})",
            scanned.canonical_url
        ),
        UrlOutcome::DuplicateAlreadyNotified => {
            format!("duplicate-quiet {}", scanned.canonical_url)
        }
        UrlOutcome::SkippedInternal => format!("internal {}", scanned.original_url),
        UrlOutcome::DedupSkipped => format!("skipped {}", scanned.original_url),
    }
}

fn init_tracing(default_level: &str) {
    let default_directive = default_level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::WARN);
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_directive.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::format_outcome_line;
    use linkward_engine::{ScannedUrl, UrlOutcome};

    #[test]
    fn outcome_lines_are_stable() {
        let scanned = ScannedUrl {
            original_url: "https://example.com/a?utm_source=x".to_string(),
            canonical_url: "https://example.com/a".to_string(),
            outcome: UrlOutcome::FirstSeen,
        };
        assert_eq!(format_outcome_line(&scanned), "first-seen https://example.com/a");

        let scanned = ScannedUrl {
            outcome: UrlOutcome::DuplicateNotified {
                original_permalink: "https://chat.example/p1".to_string(),
            },
            ..scanned
        };
        assert_eq!(
            format_outcome_line(&scanned),
            "duplicate https://example.com/a (original: https://chat.example/p1)"
        );
    }
}
