//! SQLite-backed `LinkLedger` implementation with durable persistence.

use crate::{
    default_dedup_window, DedupOutcome, LedgerResult, LinkCandidate, LinkLedger, LinkLedgerError,
    PostedLink,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};

/// Persistent SQLite ledger shared by concurrent worker processes.
///
/// Every operation opens its own connection and runs inside a short
/// transaction; WAL mode plus a busy timeout make the lookup+mutate
/// critical section safe across workers sharing one database file.
#[derive(Debug)]
pub struct SqliteLinkLedger {
    db_path: PathBuf,
    window: Duration,
}

impl SqliteLinkLedger {
    /// Creates a SQLite-backed ledger at `path` with the given retention
    /// window, creating the schema if needed.
    pub fn new(path: impl AsRef<Path>, window: Duration) -> LedgerResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let ledger = Self { db_path, window };
        let connection = ledger.open_connection()?;
        ledger.initialize_schema(&connection)?;
        Ok(ledger)
    }

    /// Ledger with the default retention window.
    pub fn with_default_window(path: impl AsRef<Path>) -> LedgerResult<Self> {
        Self::new(path, default_dedup_window())
    }

    fn open_connection(&self) -> LedgerResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(std::time::Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> LedgerResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS posted_links (
                normalized_url     TEXT NOT NULL,
                original_url       TEXT NOT NULL,
                message_timestamp  TEXT NOT NULL,
                channel            TEXT NOT NULL,
                permalink          TEXT NOT NULL,
                posted_at          TEXT NOT NULL,
                duplicate_notified INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (normalized_url, message_timestamp)
            );

            CREATE INDEX IF NOT EXISTS idx_posted_links_message
                ON posted_links (message_timestamp);

            CREATE INDEX IF NOT EXISTS idx_posted_links_url_posted
                ON posted_links (normalized_url, posted_at);
            "#,
        )?;
        Ok(())
    }

    fn lookup_original(
        &self,
        connection: &Connection,
        canonical_url: &str,
        cutoff: DateTime<Utc>,
        exclude_ts: &str,
    ) -> LedgerResult<Option<PostedLink>> {
        connection
            .query_row(
                r#"
                SELECT normalized_url, original_url, message_timestamp, channel,
                       permalink, posted_at, duplicate_notified
                FROM posted_links
                WHERE normalized_url = ?1
                  AND posted_at >= ?2
                  AND message_timestamp != ?3
                ORDER BY posted_at DESC
                LIMIT 1
                "#,
                params![canonical_url, timestamp_to_db(cutoff), exclude_ts],
                row_to_posted_link,
            )
            .optional()?
            .transpose()
    }
}

#[async_trait]
impl LinkLedger for SqliteLinkLedger {
    async fn record_or_notify(&self, candidate: &LinkCandidate) -> LedgerResult<DedupOutcome> {
        let cutoff = Utc::now() - self.window;
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = self.lookup_original(
            &transaction,
            &candidate.canonical_url,
            cutoff,
            &candidate.message_ts,
        )?;

        let Some(original) = existing else {
            // Idempotent on redelivery: the composite key absorbs replays.
            transaction.execute(
                r#"
                INSERT OR IGNORE INTO posted_links (
                    normalized_url, original_url, message_timestamp, channel,
                    permalink, posted_at, duplicate_notified
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
                "#,
                params![
                    candidate.canonical_url,
                    candidate.original_url,
                    candidate.message_ts,
                    candidate.channel,
                    candidate.permalink,
                    timestamp_to_db(candidate.posted_at),
                ],
            )?;
            transaction.commit()?;
            return Ok(DedupOutcome::FirstSeen);
        };

        if original.duplicate_notified {
            transaction.commit()?;
            return Ok(DedupOutcome::DuplicateAlreadyNotified { original });
        }

        // Scoped to the exact key and the unset flag: of two racing
        // duplicate detections only one sees an affected row.
        let affected = transaction.execute(
            r#"
            UPDATE posted_links
            SET duplicate_notified = 1
            WHERE normalized_url = ?1
              AND message_timestamp = ?2
              AND duplicate_notified = 0
            "#,
            params![original.normalized_url, original.message_ts],
        )?;
        transaction.commit()?;

        let mut original = original;
        original.duplicate_notified = true;
        if affected == 1 {
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
        let connection = self.open_connection()?;
        self.lookup_original(&connection, canonical_url, now - self.window, exclude_ts)
    }

    async fn purge_for_message(&self, message_ts: &str) -> LedgerResult<Vec<PostedLink>> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut removed = Vec::new();
        {
            let mut statement = transaction.prepare(
                r#"
                SELECT normalized_url, original_url, message_timestamp, channel,
                       permalink, posted_at, duplicate_notified
                FROM posted_links
                WHERE message_timestamp = ?1
                "#,
            )?;
            let mut rows = statement.query(params![message_ts])?;
            while let Some(row) = rows.next()? {
                removed.push(row_to_posted_link(row)??);
            }
        }

        if !removed.is_empty() {
            transaction.execute(
                "DELETE FROM posted_links WHERE message_timestamp = ?1",
                params![message_ts],
            )?;
        }
        transaction.commit()?;
        Ok(removed)
    }
}

fn row_to_posted_link(row: &Row<'_>) -> rusqlite::Result<LedgerResult<PostedLink>> {
    let normalized_url: String = row.get(0)?;
    let original_url: String = row.get(1)?;
    let message_ts: String = row.get(2)?;
    let channel: String = row.get(3)?;
    let permalink: String = row.get(4)?;
    let posted_at_text: String = row.get(5)?;
    let notified: i64 = row.get(6)?;
    Ok(timestamp_from_db(&posted_at_text).map(|posted_at| PostedLink {
        normalized_url,
        original_url,
        message_ts,
        channel,
        permalink,
        posted_at,
        duplicate_notified: notified != 0,
    }))
}

/// Fixed-width RFC 3339 so that text comparison orders chronologically.
fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_from_db(value: &str) -> LedgerResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
