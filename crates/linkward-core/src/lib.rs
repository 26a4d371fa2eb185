//! Foundational low-level utilities shared across linkward crates.
//!
//! Provides message-timestamp parsing and URL extraction used by the
//! dedup engine and the ledger's window calculations.

pub mod extract;
pub mod time_utils;

pub use extract::extract_urls;
pub use time_utils::{message_ts_to_datetime, unix_secs_to_datetime};
